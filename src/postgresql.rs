//! PostgreSQL source connector for moviesearch-sync.
//!
//! `query` builds the parametrized extraction queries; `source` owns the
//! connection and implements the engine-facing [`crate::sync::ChangeSource`]
//! trait with reconnect-with-backoff semantics.

pub mod query;
pub mod source;

pub use source::PostgresSource;
