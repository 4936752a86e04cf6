mod config;
mod crawl;
mod db;
mod error;
mod fetch;
mod parser;
mod process;
mod queue;
mod robots;
mod store;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use config::Settings;
use fetch::HttpFetcher;

#[derive(Parser)]
#[command(name = "imdb_scraper", about = "IMDb Top 1000 listing scraper into SQLite")]
struct Cli {
    /// Settings file (missing default file is fine)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Database path, overrides settings
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enqueue the Top 1000 listing pages
    Seed {
        /// First `start` offset
        #[arg(long, default_value = "1")]
        first: u32,
        /// Last `start` offset (inclusive)
        #[arg(long, default_value = "951")]
        last: u32,
        /// Results per listing page
        #[arg(long, default_value = "50")]
        step: u32,
    },
    /// Enqueue arbitrary catalog URLs
    Enqueue {
        #[arg(required = true)]
        urls: Vec<String>,
    },
    /// Fetch pending targets into PageData
    Scrape {
        /// Max targets to claim (default: all pending)
        #[arg(short = 'n', long)]
        limit: Option<usize>,
        /// Concurrent workers (default: from settings)
        #[arg(short, long)]
        workers: Option<usize>,
    },
    /// Decode fetched pages and store their records
    Process {
        /// Max pages to process (default: all unprocessed)
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Scrape then process
    Run {
        #[arg(short = 'n', long)]
        limit: Option<usize>,
        #[arg(short, long)]
        workers: Option<usize>,
    },
    /// Return targets left claimed by an interrupted run to pending
    Requeue,
    /// Show queue, page and entity counts
    Stats,
    /// Listings overview table
    Overview {
        /// Only listings with this genre (case-insensitive)
        #[arg(short, long)]
        genre: Option<String>,
        /// Max rows to display
        #[arg(short = 'n', long, default_value = "50")]
        limit: usize,
        /// Print rows as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();

    let mut settings = Settings::load(cli.config.as_deref())?;
    if let Some(db) = cli.db {
        settings.database_path = db;
    }

    let conn = db::connect(&settings.database_path)?;
    db::init_schema(&conn)?;

    let result = match cli.command {
        Commands::Seed { first, last, step } => {
            if step == 0 {
                anyhow::bail!("--step must be positive");
            }
            let urls: Vec<String> = (first..=last)
                .step_by(step as usize)
                .map(|start| settings.listing_page(start))
                .collect();
            let added = queue::enqueue_many(&conn, &urls)?;
            println!("Enqueued {} new listing pages ({} total).", added, urls.len());
            Ok(())
        }
        Commands::Enqueue { urls } => {
            for url in &urls {
                url::Url::parse(url).with_context(|| format!("Invalid URL {:?}", url))?;
            }
            let added = queue::enqueue_many(&conn, &urls)?;
            println!("Enqueued {} new URLs ({} given).", added, urls.len());
            Ok(())
        }
        Commands::Scrape { limit, workers } => scrape(&conn, &settings, limit, workers).await,
        Commands::Process { limit } => {
            let pages = db::fetch_unprocessed(&conn, limit)?;
            if pages.is_empty() {
                println!("No unprocessed pages. Run 'scrape' first.");
                return Ok(());
            }
            println!("Processing {} pages...", pages.len());
            let counts = process::process_pages(&conn, &pages)?;
            counts.print();
            Ok(())
        }
        Commands::Run { limit, workers } => {
            // Phase 1: Scrape
            let t_scrape = Instant::now();
            scrape(&conn, &settings, limit, workers).await?;
            println!("Scraped in {}", format_duration(t_scrape.elapsed()));

            // Phase 2: Process
            let t_process = Instant::now();
            let pages = db::fetch_unprocessed(&conn, None)?;
            if pages.is_empty() {
                println!("Nothing to process (no pages fetched successfully).");
                return Ok(());
            }
            println!("Processing {} pages...", pages.len());
            let counts = process::process_pages(&conn, &pages)?;
            println!("Processed in {}", format_duration(t_process.elapsed()));
            counts.print();
            Ok(())
        }
        Commands::Requeue => {
            let n = queue::requeue_claimed(&conn)?;
            println!("Returned {} claimed targets to pending.", n);
            Ok(())
        }
        Commands::Stats => {
            let s = db::get_stats(&conn)?;
            println!("Targets:   {} ({} pending, {} claimed, {} done)",
                s.queue.total(), s.queue.pending, s.queue.claimed, s.queue.done);
            println!("Fetched:   {}", s.fetched);
            println!("Errors:    {}", s.fetch_errors);
            println!("Processed: {} ({} without a listing)", s.processed, s.decode_errors);
            println!("Titles:    {}", s.titles);
            println!("Listings:  {}", s.listings);
            println!("Genres:    {}", s.genres);
            println!("People:    {}", s.people);
            Ok(())
        }
        Commands::Overview { genre, limit, json } => {
            let rows = db::fetch_overview(&conn, genre.as_deref(), limit)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&rows)?);
                return Ok(());
            }
            if rows.is_empty() {
                println!("No listings found.");
                return Ok(());
            }

            println!(
                "{:>3} | {:<32} | {:<4} | {:>4} | {:<9} | {:>4} | {:>4} | {:<28} | {:>4}",
                "#", "Title", "Year", "Min", "Cert", "IMDb", "Meta", "Genres", "Cast"
            );
            println!("{}", "-".repeat(112));

            for (i, r) in rows.iter().enumerate() {
                let dash = || "-".to_string();
                println!(
                    "{:>3} | {:<32} | {:<4} | {:>4} | {:<9} | {:>4} | {:>4} | {:<28} | {:>4}",
                    i + 1,
                    truncate(&r.title, 32),
                    r.release_year.clone().unwrap_or_else(dash),
                    r.runtime.map(|m| m.to_string()).unwrap_or_else(dash),
                    truncate(r.certificate.as_deref().unwrap_or("-"), 9),
                    r.imdb_rating.clone().unwrap_or_else(dash),
                    r.metascore.clone().unwrap_or_else(dash),
                    truncate(&r.genres, 28),
                    r.people,
                );
            }

            println!("\n{} listings | id: /title/<id>", rows.len());
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

async fn scrape(
    conn: &rusqlite::Connection,
    settings: &Settings,
    limit: Option<usize>,
    workers: Option<usize>,
) -> anyhow::Result<()> {
    let counts = queue::counts(conn)?;
    if counts.claimed > 0 {
        warn!(
            "{} targets are still claimed; if no other scraper is running, use 'requeue'",
            counts.claimed
        );
    }
    if counts.pending == 0 {
        println!("No pending targets. Run 'seed' or 'enqueue' first.");
        return Ok(());
    }

    let workers = workers.unwrap_or(settings.workers).max(1);
    let fetcher = Arc::new(HttpFetcher::new(settings)?);
    let policy = Arc::new(robots::load(fetcher.as_ref(), settings).await?);

    info!(pending = counts.pending, workers, "Starting crawl");
    let stats = crawl::scrape(
        settings,
        fetcher,
        policy,
        limit,
        workers,
        crawl::stop_on_ctrl_c(),
    )
    .await?;
    println!(
        "Done: {} targets ({} ok, {} errors, {} disallowed).",
        stats.total, stats.ok, stats.errors, stats.disallowed
    );
    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", truncated)
    }
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
