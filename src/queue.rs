//! Crawl work queue: `pending -> claimed -> done`.
//!
//! Claiming is a single conditional `UPDATE ... RETURNING`, so concurrent
//! workers on separate connections never receive the same target.

use std::fmt;

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{Connection, OptionalExtension, Transaction, TransactionBehavior};

use crate::error::QueueError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetId(pub i64);

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetState {
    Pending,
    Claimed,
    Done,
}

impl TargetState {
    pub fn as_str(self) -> &'static str {
        match self {
            TargetState::Pending => "pending",
            TargetState::Claimed => "claimed",
            TargetState::Done => "done",
        }
    }
}

impl ToSql for TargetState {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(self.as_str().into())
    }
}

impl FromSql for TargetState {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value.as_str()? {
            "pending" => Ok(TargetState::Pending),
            "claimed" => Ok(TargetState::Claimed),
            "done" => Ok(TargetState::Done),
            other => Err(FromSqlError::Other(
                format!("unknown crawl target state {:?}", other).into(),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlTarget {
    pub id: TargetId,
    pub url: String,
    pub state: TargetState,
}

/// Insert `url` as pending unless it is already known. Returns whether a row was added.
pub fn enqueue(conn: &Connection, url: &str) -> Result<bool, QueueError> {
    let added = conn.execute("INSERT OR IGNORE INTO CrawlTarget (url) VALUES (?1)", [url])?;
    Ok(added == 1)
}

pub fn enqueue_many(conn: &Connection, urls: &[String]) -> Result<usize, QueueError> {
    let tx = conn.unchecked_transaction()?;
    let mut count = 0;
    {
        let mut stmt = tx.prepare("INSERT OR IGNORE INTO CrawlTarget (url) VALUES (?1)")?;
        for url in urls {
            count += stmt.execute([url])?;
        }
    }
    tx.commit()?;
    Ok(count)
}

/// Atomically move the oldest pending target to `claimed` and return it.
/// `None` means the queue is drained.
pub fn claim_next(conn: &Connection) -> Result<Option<CrawlTarget>, QueueError> {
    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
    let target = tx
        .query_row(
            "UPDATE CrawlTarget
             SET state = ?1, claimed_at = datetime('now')
             WHERE id = (
                 SELECT id FROM CrawlTarget WHERE state = ?2 ORDER BY id LIMIT 1
             )
             RETURNING id, url, state",
            rusqlite::params![TargetState::Claimed, TargetState::Pending],
            |row| {
                Ok(CrawlTarget {
                    id: TargetId(row.get(0)?),
                    url: row.get(1)?,
                    state: row.get(2)?,
                })
            },
        )
        .optional()?;
    tx.commit()?;
    Ok(target)
}

pub fn mark_done(conn: &Connection, id: TargetId) -> Result<(), QueueError> {
    let changed = conn.execute(
        "UPDATE CrawlTarget SET state = ?1, done_at = datetime('now')
         WHERE id = ?2 AND state = ?3",
        rusqlite::params![TargetState::Done, id.0, TargetState::Claimed],
    )?;
    if changed == 0 {
        return Err(QueueError::NotClaimed(id.0));
    }
    Ok(())
}

/// Hand one claimed target back to `pending`, e.g. when its result could not be stored.
pub fn release(conn: &Connection, id: TargetId) -> Result<(), QueueError> {
    let changed = conn.execute(
        "UPDATE CrawlTarget SET state = ?1, claimed_at = NULL WHERE id = ?2 AND state = ?3",
        rusqlite::params![TargetState::Pending, id.0, TargetState::Claimed],
    )?;
    if changed == 0 {
        return Err(QueueError::NotClaimed(id.0));
    }
    Ok(())
}

/// Return targets stranded in `claimed` by an interrupted run to `pending`.
pub fn requeue_claimed(conn: &Connection) -> Result<usize, QueueError> {
    let changed = conn.execute(
        "UPDATE CrawlTarget SET state = ?1, claimed_at = NULL WHERE state = ?2",
        rusqlite::params![TargetState::Pending, TargetState::Claimed],
    )?;
    Ok(changed)
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct QueueCounts {
    pub pending: usize,
    pub claimed: usize,
    pub done: usize,
}

impl QueueCounts {
    pub fn total(&self) -> usize {
        self.pending + self.claimed + self.done
    }
}

pub fn counts(conn: &Connection) -> Result<QueueCounts, QueueError> {
    let mut stmt = conn.prepare("SELECT state, COUNT(*) FROM CrawlTarget GROUP BY state")?;
    let rows = stmt.query_map([], |row| {
        Ok((row.get::<_, TargetState>(0)?, row.get::<_, usize>(1)?))
    })?;

    let mut counts = QueueCounts::default();
    for row in rows {
        match row? {
            (TargetState::Pending, n) => counts.pending = n,
            (TargetState::Claimed, n) => counts.claimed = n,
            (TargetState::Done, n) => counts.done = n,
        }
    }
    Ok(counts)
}
