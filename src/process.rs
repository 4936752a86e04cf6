use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use rusqlite::Connection;
use tracing::warn;

use crate::db::{self, StoredPage};
use crate::error::StoreError;
use crate::parser;
use crate::store;

const CHUNK: usize = 200;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ProcessCounts {
    pub pages: usize,
    pub records: usize,
    pub rejected: usize,
    pub structural: usize,
}

impl ProcessCounts {
    pub fn print(&self) {
        println!(
            "Decoded {} pages: {} records stored, {} rejected, {} pages without a listing.",
            self.pages, self.records, self.rejected, self.structural,
        );
    }
}

/// Decode stored pages in parallel, then ingest their records on `conn`.
///
/// Rejected records are logged and counted. A page that fails to decode is
/// marked processed with its error so it is not retried on every run.
pub fn process_pages(conn: &Connection, pages: &[StoredPage]) -> Result<ProcessCounts> {
    let pb = ProgressBar::new(pages.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec})")?
            .progress_chars("#>-"),
    );

    let mut counts = ProcessCounts::default();

    for chunk in pages.chunks(CHUNK) {
        let decoded: Vec<_> = chunk
            .par_iter()
            .map(|page| parser::decode_page(&page.html))
            .collect();

        for (page, result) in chunk.iter().zip(decoded) {
            counts.pages += 1;
            let records = match result {
                Ok(records) => records,
                Err(e) => {
                    warn!(page = page.id, url = %page.url, "Structural decode failure: {}", e);
                    counts.structural += 1;
                    db::mark_processed(conn, page.id, Some(&e.to_string()))?;
                    continue;
                }
            };

            for record in &records {
                match store::ingest(conn, record) {
                    Ok(_) => counts.records += 1,
                    Err(e @ (StoreError::MissingExternalId | StoreError::Constraint(_))) => {
                        warn!(
                            page = page.id,
                            title = record.title.as_deref().unwrap_or("-"),
                            "Record rejected: {}",
                            e
                        );
                        counts.rejected += 1;
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            db::mark_processed(conn, page.id, None)?;
        }
        pb.inc(chunk.len() as u64);
    }

    pb.finish_and_clear();
    Ok(counts)
}
