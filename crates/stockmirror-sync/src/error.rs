//! Error taxonomy for the sync engine
//!
//! Failures are attributable at three scopes: a single HTTP fetch
//! (`FetchError`), a single record write (`SchemaError` / `UpsertError`),
//! or a whole run (`SyncError`). Per-record errors are recovered locally by
//! the runner and reflected in counts; per-run errors terminate the run and
//! are isolated per entity type by the orchestrator.

use thiserror::Error;

/// Transport or HTTP failure while fetching a page.
///
/// Rate limiting (HTTP 429) is handled inside the fetcher with a
/// sleep-and-retry loop; it only surfaces here once the retry budget is
/// exhausted.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("HTTP request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Unexpected status {status} from {url}")]
    Status {
        status: reqwest::StatusCode,
        url: String,
    },

    #[error("Rate limit retries exhausted after {attempts} attempts for {url}")]
    RateLimitExhausted { attempts: u32, url: String },

    #[error("Malformed page payload from {url}: {reason}")]
    Payload { url: String, reason: String },
}

/// Destination schema inspection or mutation failure.
///
/// Fatal for the record being written, never for the run.
#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("Failed to inspect columns of table {table}: {source}")]
    Inspect {
        table: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("Failed to add column {column} to table {table}: {source}")]
    AddColumn {
        table: String,
        column: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("Failed to create table {table}: {source}")]
    CreateTable {
        table: String,
        #[source]
        source: sqlx::Error,
    },
}

/// Write failure for a single record. Counted, never fatal to the run.
#[derive(Error, Debug)]
pub enum UpsertError {
    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error("Write to table {table} failed for source id {source_id}: {source}")]
    Write {
        table: String,
        source_id: String,
        #[source]
        source: sqlx::Error,
    },
}

/// Run-scoped error. Terminal for the run it occurred in.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Run {0} not found")]
    RunNotFound(uuid::Uuid),

    #[error("Run {0} is still in progress and cannot be retried")]
    RunStillActive(uuid::Uuid),

    #[error("Sync cancelled")]
    Cancelled,

    #[error("{0}")]
    Run(String),
}

/// Result alias for run-scoped operations
pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_exhausted_display() {
        let err = FetchError::RateLimitExhausted {
            attempts: 45,
            url: "https://api.example.test/products".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("45 attempts"));
        assert!(msg.contains("products"));
    }

    #[test]
    fn test_sync_error_from_fetch() {
        let err: SyncError = FetchError::Payload {
            url: "https://api.example.test/users".to_string(),
            reason: "expected an array".to_string(),
        }
        .into();
        assert!(matches!(err, SyncError::Fetch(_)));
    }

    #[test]
    fn test_run_not_found_display() {
        let id = uuid::Uuid::new_v4();
        let err = SyncError::RunNotFound(id);
        assert!(err.to_string().contains(&id.to_string()));
    }
}
