use rusqlite::ErrorCode;
use thiserror::Error;

/// The page does not have the shape the decoder expects.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("listing container <{tag} class=\"{class}\"> not found")]
    MissingContainer {
        tag: &'static str,
        class: &'static str,
    },
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("record has no external id")]
    MissingExternalId,

    #[error("constraint violated: {0}")]
    Constraint(String),

    #[error("sqlite error: {0}")]
    Sqlite(rusqlite::Error),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::SqliteFailure(e, msg) if e.code == ErrorCode::ConstraintViolation => {
                StoreError::Constraint(msg.unwrap_or_else(|| e.to_string()))
            }
            other => StoreError::Sqlite(other),
        }
    }
}

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("crawl target {0} is not claimed")]
    NotClaimed(i64),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected status {status} for {url}")]
    Status { url: String, status: u16 },

    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

impl FetchError {
    /// Rate limiting and server-side failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Status { status, .. } => *status == 429 || (500..600).contains(status),
            FetchError::Http(e) => e.is_timeout() || e.is_connect(),
            FetchError::Url(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constraint_failures_are_classified() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (name TEXT UNIQUE); INSERT INTO t VALUES ('a');")
            .unwrap();
        let err = conn.execute("INSERT INTO t VALUES ('a')", []).unwrap_err();
        assert!(matches!(StoreError::from(err), StoreError::Constraint(_)));

        let err = conn.execute("INSERT INTO missing VALUES (1)", []).unwrap_err();
        assert!(matches!(StoreError::from(err), StoreError::Sqlite(_)));
    }

    #[test]
    fn retryable_statuses() {
        let status = |s| FetchError::Status {
            url: "https://example.com".into(),
            status: s,
        };
        assert!(status(429).is_retryable());
        assert!(status(503).is_retryable());
        assert!(!status(404).is_retryable());
    }
}
