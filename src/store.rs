//! Normalized movie storage.
//!
//! `ingest` writes one `MovieRecord` as a title, a listing, and deduplicated
//! genre/person rows with their link rows. Uniqueness is enforced by SQLite
//! constraints at write time; every id is the one returned by the insert or
//! lookup that produced it.

use rusqlite::{Connection, OptionalExtension, Transaction, TransactionBehavior};
use tracing::debug;

use crate::error::StoreError;
use crate::parser::MovieRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TitleId(pub i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListingId(pub i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GenreId(pub i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PersonId(pub i64);

/// Persist one record atomically. Re-ingesting a known external id is a no-op
/// that returns the existing listing.
pub fn ingest(conn: &Connection, record: &MovieRecord) -> Result<ListingId, StoreError> {
    let external_id = record
        .external_id
        .as_deref()
        .ok_or(StoreError::MissingExternalId)?;

    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;

    let title_id = insert_or_fetch_title(&tx, external_id, record.title.as_deref())?;
    if let Some(existing) = listing_for_title(&tx, title_id)? {
        tx.commit()?;
        debug!(external_id, listing = existing.0, "already ingested");
        return Ok(existing);
    }

    let listing_id = insert_listing(&tx, title_id, record)?;

    for genre in tokens(&record.genres) {
        let genre_id = GenreId(insert_or_fetch_name(&tx, "Genre", genre)?);
        tx.prepare_cached("INSERT OR IGNORE INTO ListingGenre (listing_id, genre_id) VALUES (?1, ?2)")?
            .execute([listing_id.0, genre_id.0])?;
    }

    for name in tokens(&record.cast) {
        let person_id = PersonId(insert_or_fetch_name(&tx, "Person", name)?);
        tx.prepare_cached("INSERT OR IGNORE INTO ListingPerson (listing_id, person_id) VALUES (?1, ?2)")?
            .execute([listing_id.0, person_id.0])?;
    }

    tx.commit()?;
    debug!(external_id, listing = listing_id.0, "ingested");
    Ok(listing_id)
}

fn tokens(values: &[String]) -> impl Iterator<Item = &str> {
    values.iter().map(|v| v.trim()).filter(|v| !v.is_empty())
}

/// Dedup is on `external_id` only; a clashing `name` under another id is a constraint error.
fn insert_or_fetch_title(conn: &Connection, external_id: &str, name: Option<&str>) -> Result<TitleId, StoreError> {
    conn.prepare_cached(
        "INSERT INTO Title (name, external_id) VALUES (?1, ?2)
         ON CONFLICT(external_id) DO NOTHING",
    )?
    .execute(rusqlite::params![name, external_id])?;

    let id = conn
        .prepare_cached("SELECT id FROM Title WHERE external_id = ?1")?
        .query_row([external_id], |row| row.get(0))?;
    Ok(TitleId(id))
}

fn listing_for_title(conn: &Connection, title_id: TitleId) -> Result<Option<ListingId>, StoreError> {
    let id = conn
        .prepare_cached("SELECT id FROM Listing WHERE title_ref = ?1 ORDER BY id LIMIT 1")?
        .query_row([title_id.0], |row| row.get(0))
        .optional()?;
    Ok(id.map(ListingId))
}

fn insert_listing(conn: &Connection, title_id: TitleId, record: &MovieRecord) -> Result<ListingId, StoreError> {
    conn.prepare_cached(
        "INSERT INTO Listing (title_ref, release_year, runtime, certificate, imdb_rating, metascore)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )?
    .execute(rusqlite::params![
        title_id.0,
        record.release_year,
        record.runtime_minutes,
        record.certificate,
        record.imdb_rating,
        record.metascore,
    ])?;
    Ok(ListingId(conn.last_insert_rowid()))
}

/// `table` is one of the `(id, name UNIQUE)` lookup tables.
fn insert_or_fetch_name(conn: &Connection, table: &str, name: &str) -> Result<i64, StoreError> {
    conn.prepare_cached(&format!(
        "INSERT INTO {} (name) VALUES (?1) ON CONFLICT(name) DO NOTHING",
        table
    ))?
    .execute([name])?;

    let id = conn
        .prepare_cached(&format!("SELECT id FROM {} WHERE name = ?1", table))?
        .query_row([name], |row| row.get(0))?;
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use std::thread;

    fn count(conn: &Connection, table: &str) -> usize {
        conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |r| r.get(0))
            .unwrap()
    }

    fn snapshot(conn: &Connection) -> Vec<usize> {
        ["Title", "Listing", "Genre", "ListingGenre", "Person", "ListingPerson"]
            .iter()
            .map(|t| count(conn, t))
            .collect()
    }

    fn shawshank() -> MovieRecord {
        MovieRecord {
            external_id: Some("tt0111161".into()),
            title: Some("The Shawshank Redemption".into()),
            release_year: Some("1994".into()),
            certificate: Some("R".into()),
            runtime_minutes: Some(142),
            genres: vec!["Drama".into()],
            metascore: Some("82".into()),
            imdb_rating: Some("9.3".into()),
            cast: vec!["Frank Darabont".into(), "Tim Robbins".into(), "Morgan Freeman".into()],
        }
    }

    #[test]
    fn ingest_is_idempotent() {
        let conn = db::memory();
        let first = ingest(&conn, &shawshank()).unwrap();
        let once = snapshot(&conn);
        let second = ingest(&conn, &shawshank()).unwrap();

        assert_eq!(first, second);
        assert_eq!(snapshot(&conn), once);
        assert_eq!(once, vec![1, 1, 1, 1, 3, 3]);
    }

    #[test]
    fn reingest_leaves_listing_untouched() {
        let conn = db::memory();
        let id = ingest(&conn, &shawshank()).unwrap();
        let changed = MovieRecord {
            imdb_rating: Some("1.0".into()),
            genres: vec!["Comedy".into()],
            ..shawshank()
        };
        assert_eq!(ingest(&conn, &changed).unwrap(), id);

        let rating: String = conn
            .query_row("SELECT imdb_rating FROM Listing WHERE id = ?1", [id.0], |r| r.get(0))
            .unwrap();
        assert_eq!(rating, "9.3");
        assert_eq!(count(&conn, "Genre"), 1);
    }

    #[test]
    fn three_genres_three_links() {
        let conn = db::memory();
        let record = MovieRecord {
            external_id: Some("tt0000001".into()),
            title: Some("Vertigo".into()),
            genres: vec!["Drama".into(), "Romance".into(), "Thriller".into()],
            ..Default::default()
        };
        let id = ingest(&conn, &record).unwrap();

        assert_eq!(count(&conn, "Genre"), 3);
        let links: usize = conn
            .query_row("SELECT COUNT(*) FROM ListingGenre WHERE listing_id = ?1", [id.0], |r| r.get(0))
            .unwrap();
        assert_eq!(links, 3);
    }

    #[test]
    fn shared_genre_one_row_two_links() {
        let conn = db::memory();
        let other = MovieRecord {
            external_id: Some("tt0068646".into()),
            title: Some("The Godfather".into()),
            genres: vec!["Crime".into(), "Drama".into()],
            ..Default::default()
        };
        ingest(&conn, &shawshank()).unwrap();
        ingest(&conn, &other).unwrap();

        let drama_links: usize = conn
            .query_row(
                "SELECT COUNT(*) FROM ListingGenre lg JOIN Genre g ON g.id = lg.genre_id
                 WHERE g.name = 'Drama'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(count(&conn, "Genre"), 2);
        assert_eq!(drama_links, 2);
    }

    #[test]
    fn duplicate_tokens_within_a_record_are_harmless() {
        let conn = db::memory();
        let record = MovieRecord {
            genres: vec!["Drama".into(), " Drama ".into(), "".into()],
            cast: vec!["Tim Robbins".into(), "Tim Robbins".into()],
            ..shawshank()
        };
        ingest(&conn, &record).unwrap();
        assert_eq!(count(&conn, "Genre"), 1);
        assert_eq!(count(&conn, "ListingGenre"), 1);
        assert_eq!(count(&conn, "ListingPerson"), 1);
    }

    #[test]
    fn listings_sharing_year_and_runtime_keep_their_own_links() {
        let conn = db::memory();
        let a = MovieRecord {
            external_id: Some("tt1".into()),
            title: Some("A".into()),
            release_year: Some("1994".into()),
            runtime_minutes: Some(142),
            genres: vec!["Drama".into()],
            ..Default::default()
        };
        let b = MovieRecord {
            external_id: Some("tt2".into()),
            title: Some("B".into()),
            genres: vec!["Comedy".into()],
            ..a.clone()
        };
        let a_id = ingest(&conn, &a).unwrap();
        let b_id = ingest(&conn, &b).unwrap();
        assert_ne!(a_id, b_id);

        let genre_of = |id: ListingId| -> String {
            conn.query_row(
                "SELECT g.name FROM ListingGenre lg JOIN Genre g ON g.id = lg.genre_id
                 WHERE lg.listing_id = ?1",
                [id.0],
                |r| r.get(0),
            )
            .unwrap()
        };
        assert_eq!(genre_of(a_id), "Drama");
        assert_eq!(genre_of(b_id), "Comedy");
    }

    #[test]
    fn missing_fields_persist_as_null() {
        let conn = db::memory();
        let record = MovieRecord {
            external_id: Some("tt0050083".into()),
            title: Some("12 Angry Men".into()),
            ..Default::default()
        };
        let id = ingest(&conn, &record).unwrap();
        let nulls: (bool, bool, bool, bool, bool) = conn
            .query_row(
                "SELECT release_year IS NULL, runtime IS NULL, certificate IS NULL,
                        imdb_rating IS NULL, metascore IS NULL
                 FROM Listing WHERE id = ?1",
                [id.0],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?)),
            )
            .unwrap();
        assert_eq!(nulls, (true, true, true, true, true));
    }

    #[test]
    fn unknown_external_id_is_rejected() {
        let conn = db::memory();
        let record = MovieRecord {
            external_id: None,
            ..shawshank()
        };
        assert!(matches!(ingest(&conn, &record), Err(StoreError::MissingExternalId)));
        assert_eq!(count(&conn, "Title"), 0);
    }

    #[test]
    fn title_name_clash_is_a_constraint_error() {
        let conn = db::memory();
        ingest(&conn, &shawshank()).unwrap();
        let clash = MovieRecord {
            external_id: Some("tt9999999".into()),
            genres: vec!["Horror".into()],
            ..shawshank()
        };
        assert!(matches!(ingest(&conn, &clash), Err(StoreError::Constraint(_))));
        assert_eq!(count(&conn, "Listing"), 1);
        assert_eq!(count(&conn, "Genre"), 1);
    }

    #[test]
    fn failure_mid_record_rolls_back_everything() {
        let conn = db::memory();
        conn.execute_batch(
            "CREATE TRIGGER reject_person BEFORE INSERT ON Person
             WHEN NEW.name = 'Morgan Freeman'
             BEGIN SELECT RAISE(ABORT, 'rejected'); END;",
        )
        .unwrap();

        assert!(ingest(&conn, &shawshank()).is_err());
        assert_eq!(snapshot(&conn), vec![0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn concurrent_ingest_dedups_shared_names() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.sqlite");
        {
            let conn = db::connect(&path).unwrap();
            db::init_schema(&conn).unwrap();
        }

        let handles: Vec<_> = (0..6)
            .map(|worker| {
                let path = path.clone();
                thread::spawn(move || {
                    let conn = db::connect(&path).unwrap();
                    for i in 0..20 {
                        let record = MovieRecord {
                            external_id: Some(format!("tt{}{:03}", worker, i)),
                            title: Some(format!("Movie {} {}", worker, i)),
                            genres: vec!["Drama".into(), "Crime".into()],
                            cast: vec!["Morgan Freeman".into()],
                            ..Default::default()
                        };
                        ingest(&conn, &record).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let conn = db::connect(&path).unwrap();
        assert_eq!(count(&conn, "Listing"), 120);
        assert_eq!(count(&conn, "Genre"), 2);
        assert_eq!(count(&conn, "Person"), 1);
        assert_eq!(count(&conn, "ListingGenre"), 240);
        assert_eq!(count(&conn, "ListingPerson"), 120);
    }
}
