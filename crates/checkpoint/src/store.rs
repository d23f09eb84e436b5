//! Checkpoint storage trait.
//!
//! This module defines the CheckpointStore trait for backend-agnostic
//! checkpoint operations.

use anyhow::Result;
use async_trait::async_trait;

/// Trait for checkpoint storage operations.
///
/// This trait abstracts the storage backend for checkpoint state,
/// allowing the same sync logic to work with:
/// - Filesystem storage (`FilesystemStore`)
/// - In-memory storage (`MemoryStore`)
///
/// Implementations must be read-after-write consistent: a value written
/// by `set` or `set_many` is visible to every subsequent `get`, including
/// from a new store instance opened over the same backing state.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Read a value from the store. Returns `None` if the key was never
    /// written or has been cleared.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a single value to the store.
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Apply several writes as one atomic update. An entry with a `None`
    /// value clears that key. Either every entry is applied or none is.
    async fn set_many(&self, entries: &[(String, Option<String>)]) -> Result<()>;
}
