use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use rusqlite::Connection;
use serde::Serialize;

use crate::fetch::RawPage;
use crate::queue::{self, TargetId};

const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

pub fn connect(path: &Path) -> Result<Connection> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {:?}", dir))?;
    }
    let conn = Connection::open(path).with_context(|| format!("Failed to open {:?}", path))?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS CrawlTarget (
            id         INTEGER PRIMARY KEY,
            url        TEXT UNIQUE NOT NULL,
            state      TEXT NOT NULL DEFAULT 'pending'
                       CHECK(state IN ('pending','claimed','done')),
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            claimed_at TEXT,
            done_at    TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_target_state ON CrawlTarget(state);

        CREATE TABLE IF NOT EXISTS PageData (
            id           INTEGER PRIMARY KEY,
            target_id    INTEGER NOT NULL REFERENCES CrawlTarget(id),
            url          TEXT NOT NULL,
            html         TEXT,
            status       INTEGER,
            error        TEXT,
            latency_ms   INTEGER,
            fetched_at   TEXT NOT NULL DEFAULT (datetime('now')),
            processed_at TEXT,
            decode_error TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_page_target ON PageData(target_id);

        -- Normalized movie data
        CREATE TABLE IF NOT EXISTS Title (
            id          INTEGER PRIMARY KEY,
            name        TEXT UNIQUE,
            external_id TEXT UNIQUE NOT NULL
        );

        CREATE TABLE IF NOT EXISTS Listing (
            id           INTEGER PRIMARY KEY,
            title_ref    INTEGER NOT NULL REFERENCES Title(id),
            release_year TEXT,
            runtime      INTEGER,
            certificate  TEXT,
            imdb_rating  TEXT,
            metascore    TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_listing_title ON Listing(title_ref);

        CREATE TABLE IF NOT EXISTS Genre (
            id   INTEGER PRIMARY KEY,
            name TEXT UNIQUE NOT NULL
        );

        CREATE TABLE IF NOT EXISTS ListingGenre (
            listing_id INTEGER NOT NULL REFERENCES Listing(id),
            genre_id   INTEGER NOT NULL REFERENCES Genre(id),
            PRIMARY KEY (listing_id, genre_id)
        );

        CREATE TABLE IF NOT EXISTS Person (
            id   INTEGER PRIMARY KEY,
            name TEXT UNIQUE NOT NULL
        );

        CREATE TABLE IF NOT EXISTS ListingPerson (
            listing_id INTEGER NOT NULL REFERENCES Listing(id),
            person_id  INTEGER NOT NULL REFERENCES Person(id),
            PRIMARY KEY (listing_id, person_id)
        );
        ",
    )?;
    Ok(())
}

// ── Fetched pages ──

pub struct PageRow {
    pub target_id: TargetId,
    pub url: String,
    pub html: Option<String>,
    pub status: Option<u16>,
    pub error: Option<String>,
    pub latency_ms: Option<i64>,
}

impl PageRow {
    pub fn fetched(target_id: TargetId, page: RawPage) -> Self {
        PageRow {
            target_id,
            url: page.url,
            html: Some(page.body),
            status: Some(page.status),
            error: None,
            latency_ms: Some(page.latency_ms),
        }
    }

    pub fn failed(target_id: TargetId, url: &str, error: String) -> Self {
        PageRow {
            target_id,
            url: url.to_string(),
            html: None,
            status: None,
            error: Some(error),
            latency_ms: None,
        }
    }
}

/// Store the fetch result and close out its crawl target in one transaction.
pub fn record_fetch(conn: &Connection, row: &PageRow) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO PageData (target_id, url, html, status, error, latency_ms)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        rusqlite::params![
            row.target_id.0,
            row.url,
            row.html,
            row.status,
            row.error,
            row.latency_ms,
        ],
    )?;
    queue::mark_done(&tx, row.target_id)?;
    tx.commit()?;
    Ok(())
}

pub struct StoredPage {
    pub id: i64,
    pub url: String,
    pub html: String,
}

pub fn fetch_unprocessed(conn: &Connection, limit: Option<usize>) -> Result<Vec<StoredPage>> {
    let sql = format!(
        "SELECT id, url, html FROM PageData
         WHERE html IS NOT NULL AND processed_at IS NULL
         ORDER BY id{}",
        match limit {
            Some(n) => format!(" LIMIT {}", n),
            None => String::new(),
        }
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], |row| {
            Ok(StoredPage {
                id: row.get(0)?,
                url: row.get(1)?,
                html: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn mark_processed(conn: &Connection, page_id: i64, decode_error: Option<&str>) -> Result<()> {
    conn.execute(
        "UPDATE PageData SET processed_at = datetime('now'), decode_error = ?2 WHERE id = ?1",
        rusqlite::params![page_id, decode_error],
    )?;
    Ok(())
}

// ── Overview ──

#[derive(Debug, Serialize)]
pub struct OverviewRow {
    pub external_id: String,
    pub title: String,
    pub release_year: Option<String>,
    pub runtime: Option<u32>,
    pub certificate: Option<String>,
    pub imdb_rating: Option<String>,
    pub metascore: Option<String>,
    pub genres: String,
    pub people: usize,
}

/// Listings joined back to their title, genres and credit count.
pub fn fetch_overview(conn: &Connection, genre: Option<&str>, limit: usize) -> Result<Vec<OverviewRow>> {
    let filter = if genre.is_some() {
        " WHERE EXISTS (
              SELECT 1 FROM ListingGenre lg JOIN Genre g ON g.id = lg.genre_id
              WHERE lg.listing_id = l.id AND g.name = ?1 COLLATE NOCASE
          )"
    } else {
        ""
    };
    let sql = format!(
        "SELECT t.external_id, COALESCE(t.name, ''), l.release_year, l.runtime, l.certificate,
                l.imdb_rating, l.metascore,
                COALESCE((SELECT group_concat(g.name, ', ')
                          FROM ListingGenre lg JOIN Genre g ON g.id = lg.genre_id
                          WHERE lg.listing_id = l.id), ''),
                (SELECT COUNT(*) FROM ListingPerson lp WHERE lp.listing_id = l.id)
         FROM Listing l
         JOIN Title t ON t.id = l.title_ref{}
         ORDER BY CAST(l.imdb_rating AS REAL) DESC, t.name
         LIMIT {}",
        filter, limit
    );

    let mut stmt = conn.prepare(&sql)?;
    let params: Vec<&dyn rusqlite::types::ToSql> = match &genre {
        Some(g) => vec![g as &dyn rusqlite::types::ToSql],
        None => Vec::new(),
    };
    let rows = stmt
        .query_map(params.as_slice(), |row| {
            Ok(OverviewRow {
                external_id: row.get(0)?,
                title: row.get(1)?,
                release_year: row.get(2)?,
                runtime: row.get(3)?,
                certificate: row.get(4)?,
                imdb_rating: row.get(5)?,
                metascore: row.get(6)?,
                genres: row.get(7)?,
                people: row.get(8)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ── Stats ──

pub struct Stats {
    pub queue: queue::QueueCounts,
    pub fetched: usize,
    pub fetch_errors: usize,
    pub processed: usize,
    pub decode_errors: usize,
    pub titles: usize,
    pub listings: usize,
    pub genres: usize,
    pub people: usize,
}

pub fn get_stats(conn: &Connection) -> Result<Stats> {
    let count = |sql: &str| -> Result<usize> { Ok(conn.query_row(sql, [], |r| r.get(0))?) };
    Ok(Stats {
        queue: queue::counts(conn)?,
        fetched: count("SELECT COUNT(*) FROM PageData WHERE html IS NOT NULL")?,
        fetch_errors: count("SELECT COUNT(*) FROM PageData WHERE error IS NOT NULL")?,
        processed: count("SELECT COUNT(*) FROM PageData WHERE processed_at IS NOT NULL")?,
        decode_errors: count("SELECT COUNT(*) FROM PageData WHERE decode_error IS NOT NULL")?,
        titles: count("SELECT COUNT(*) FROM Title")?,
        listings: count("SELECT COUNT(*) FROM Listing")?,
        genres: count("SELECT COUNT(*) FROM Genre")?,
        people: count("SELECT COUNT(*) FROM Person")?,
    })
}

#[cfg(test)]
pub fn memory() -> Connection {
    let conn = Connection::open_in_memory().unwrap();
    conn.execute_batch("PRAGMA foreign_keys=ON;").unwrap();
    init_schema(&conn).unwrap();
    conn
}
