use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use rusqlite::Connection;
use tracing::{error, info, warn};

use crate::config::Settings;
use crate::db::{self, PageRow};
use crate::fetch::Fetch;
use crate::queue;
use crate::robots::CrawlPolicy;

pub const DISALLOWED: &str = "disallowed by robots.txt";

/// Crawl stats returned after completion.
#[derive(Debug, Default)]
pub struct CrawlStats {
    pub total: usize,
    pub ok: usize,
    pub errors: usize,
    pub disallowed: usize,
}

enum Outcome {
    Ok,
    Failed,
    Disallowed,
}

/// Remaining claims allowed for this run, shared by all workers.
struct Budget(Option<AtomicUsize>);

impl Budget {
    fn take(&self) -> bool {
        match &self.0 {
            None => true,
            Some(left) => left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok(),
        }
    }
}

/// Drain pending crawl targets with `workers` concurrent tasks.
///
/// Each worker owns its own connection: claim, check policy, fetch, then
/// store the page and mark the target done. `stop` is checked between claims.
pub async fn scrape<F, P>(
    settings: &Settings,
    fetcher: Arc<F>,
    policy: Arc<P>,
    limit: Option<usize>,
    workers: usize,
    stop: Arc<AtomicBool>,
) -> Result<CrawlStats>
where
    F: Fetch + 'static,
    P: CrawlPolicy + 'static,
{
    let pending = {
        let conn = db::connect(&settings.database_path)?;
        queue::counts(&conn)?.pending
    };
    let expected = limit.map_or(pending, |n| n.min(pending));

    let pb = ProgressBar::new(expected as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")?
            .progress_chars("=> "),
    );

    let budget = Arc::new(Budget(limit.map(AtomicUsize::new)));
    let (tx, mut rx) = tokio::sync::mpsc::channel::<Outcome>(workers.max(1) * 2);

    let mut handles = Vec::new();
    for worker_id in 0..workers.max(1) {
        let conn = Arc::new(Mutex::new(db::connect(&settings.database_path)?));
        let fetcher = Arc::clone(&fetcher);
        let policy = Arc::clone(&policy);
        let budget = Arc::clone(&budget);
        let stop = Arc::clone(&stop);
        let tx = tx.clone();
        handles.push(tokio::spawn(async move {
            worker(worker_id, conn, fetcher, policy, budget, stop, tx).await
        }));
    }

    // Drop our copy of tx so rx closes when all workers finish
    drop(tx);

    let mut stats = CrawlStats::default();
    while let Some(outcome) = rx.recv().await {
        stats.total += 1;
        match outcome {
            Outcome::Ok => stats.ok += 1,
            Outcome::Failed => stats.errors += 1,
            Outcome::Disallowed => stats.disallowed += 1,
        }
        pb.inc(1);
    }
    pb.finish_and_clear();

    let mut first_err = None;
    for handle in handles {
        match handle.await.context("crawl worker panicked")? {
            Ok(()) => {}
            Err(e) => {
                error!("Crawl worker failed: {:#}", e);
                first_err.get_or_insert(e);
            }
        }
    }
    if let Some(e) = first_err {
        return Err(e);
    }

    info!(
        "Crawled {} targets ({} ok, {} errors, {} disallowed)",
        stats.total, stats.ok, stats.errors, stats.disallowed
    );
    Ok(stats)
}

/// Run `f` against the worker's connection on the blocking pool, so SQLite
/// busy waits never stall the async workers.
async fn with_conn<T, Func>(conn: &Arc<Mutex<Connection>>, f: Func) -> Result<T>
where
    T: Send + 'static,
    Func: FnOnce(&Connection) -> T + Send + 'static,
{
    let conn = Arc::clone(conn);
    tokio::task::spawn_blocking(move || {
        let guard = conn.lock().map_err(|_| anyhow!("crawl connection lock poisoned"))?;
        Ok(f(&*guard))
    })
    .await
    .context("blocking database task failed")?
}

async fn worker<F: Fetch, P: CrawlPolicy>(
    worker_id: usize,
    conn: Arc<Mutex<Connection>>,
    fetcher: Arc<F>,
    policy: Arc<P>,
    budget: Arc<Budget>,
    stop: Arc<AtomicBool>,
    tx: tokio::sync::mpsc::Sender<Outcome>,
) -> Result<()> {
    loop {
        if stop.load(Ordering::SeqCst) {
            info!(worker_id, "Stop requested, leaving queue");
            break;
        }
        if !budget.take() {
            break;
        }
        let Some(target) = with_conn(&conn, queue::claim_next).await?? else {
            break;
        };

        let (row, outcome) = if !policy.is_allowed(&target.url) {
            warn!(worker_id, url = %target.url, "Skipping target {}", DISALLOWED);
            (
                PageRow::failed(target.id, &target.url, DISALLOWED.to_string()),
                Outcome::Disallowed,
            )
        } else {
            match fetcher.fetch(&target.url).await {
                Ok(page) => (PageRow::fetched(target.id, page), Outcome::Ok),
                Err(e) => {
                    warn!(worker_id, url = %target.url, error = %e, "Fetch failed");
                    (PageRow::failed(target.id, &target.url, e.to_string()), Outcome::Failed)
                }
            }
        };

        let id = target.id;
        if let Err(e) = with_conn(&conn, move |c| db::record_fetch(c, &row)).await? {
            error!(worker_id, url = %target.url, "Failed to store page: {:#}", e);
            // Leave the target claimable instead of stranded in `claimed`.
            if let Err(release_err) = with_conn(&conn, move |c| queue::release(c, id)).await? {
                warn!(worker_id, target = %id, "Failed to release target: {}", release_err);
            }
            return Err(e.context(format!("storing {}", target.url)));
        }
        let _ = tx.send(outcome).await;
    }
    Ok(())
}

/// Set `stop` on Ctrl-C. In-flight fetches and writes finish first.
pub fn stop_on_ctrl_c() -> Arc<AtomicBool> {
    let stop = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&stop);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; finishing in-flight pages");
            flag.store(true, Ordering::SeqCst);
        }
    });
    stop
}
