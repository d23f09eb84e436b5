//! Error types for moviesearch-sync.
//!
//! The taxonomy drives retry behavior: transport errors are retried with
//! backoff inside the connectors and never surface to the engine, while
//! query, configuration and exhausted-batch errors abort the current run
//! before its checkpoint commit.

use thiserror::Error;

/// A single document the sink refused to index.
#[derive(Debug, Clone)]
pub struct DocumentFailure {
    /// Document id as sent in the bulk action.
    pub id: String,
    /// Error reason reported by the sink.
    pub reason: String,
}

/// Errors that can occur during synchronization.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Connection-level failure (reset, timeout, not connected).
    /// Always retried via reconnect + backoff.
    #[error("transport error: {0}")]
    Transport(String),

    /// Query or protocol logic error (malformed query, constraint
    /// violation, undecodable row). Fatal for the current run.
    #[error("query error: {0}")]
    Query(String),

    /// The sink rejected a subset of a bulk write. Retried with the
    /// failed subset up to a bounded count.
    #[error("sink rejected {} document(s)", .failures.len())]
    PartialWrite { failures: Vec<DocumentFailure> },

    /// A bulk write kept failing after every allowed retry. Fatal for
    /// the current run; its checkpoint is not committed.
    #[error("batch failed permanently: {0}")]
    FatalBatch(String),

    /// Programming invariant violation (unresolvable document kind,
    /// empty id set for a full fetch). Must never occur in correct
    /// operation.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Checkpoint store failure.
    #[error("checkpoint store error: {0}")]
    State(String),
}

impl SyncError {
    /// Whether this error should be retried by the backoff decorator.
    pub fn is_transport(&self) -> bool {
        matches!(self, SyncError::Transport(_))
    }
}

impl From<tokio_postgres::Error> for SyncError {
    fn from(e: tokio_postgres::Error) -> Self {
        if is_postgres_transport(&e) {
            SyncError::Transport(e.to_string())
        } else {
            SyncError::Query(e.to_string())
        }
    }
}

/// A PostgreSQL error is transport-level when the connection is gone or
/// the failure originated in I/O rather than in the server's query
/// processing. Errors carrying a SQLSTATE are query errors by definition.
fn is_postgres_transport(e: &tokio_postgres::Error) -> bool {
    if e.is_closed() {
        return true;
    }
    if e.as_db_error().is_some() {
        return false;
    }
    let mut source = std::error::Error::source(e);
    while let Some(cause) = source {
        if cause.downcast_ref::<std::io::Error>().is_some() {
            return true;
        }
        source = cause.source();
    }
    false
}

impl From<reqwest::Error> for SyncError {
    fn from(e: reqwest::Error) -> Self {
        // Body decode failures mean the sink answered with something we
        // cannot interpret; retrying will not help.
        if e.is_decode() {
            SyncError::Query(e.to_string())
        } else {
            SyncError::Transport(e.to_string())
        }
    }
}

impl From<anyhow::Error> for SyncError {
    fn from(e: anyhow::Error) -> Self {
        SyncError::State(format!("{e:#}"))
    }
}

/// Result type alias for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_classification() {
        assert!(SyncError::Transport("reset".into()).is_transport());
        assert!(!SyncError::Query("syntax".into()).is_transport());
        assert!(!SyncError::FatalBatch("gave up".into()).is_transport());
        assert!(!SyncError::Configuration("bad kind".into()).is_transport());
    }

    #[test]
    fn test_partial_write_display_counts_failures() {
        let err = SyncError::PartialWrite {
            failures: vec![
                DocumentFailure {
                    id: "a".into(),
                    reason: "mapper_parsing_exception".into(),
                },
                DocumentFailure {
                    id: "b".into(),
                    reason: "mapper_parsing_exception".into(),
                },
            ],
        };
        assert_eq!(err.to_string(), "sink rejected 2 document(s)");
    }
}
