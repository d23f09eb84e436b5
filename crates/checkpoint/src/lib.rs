//! Checkpoint management for moviesearch-sync
//!
//! Provides durable key-value checkpoint state that survives process
//! restarts, so a sync run can resume from its last committed position.
//!
//! # Architecture
//!
//! This crate provides a generic checkpoint system that:
//! - Defines the `CheckpointStore` trait for get/set/set_many operations
//! - Provides `CheckpointKey` for composite (entity kind, sync scope) keys
//! - Supports multiple storage backends via the trait
//!
//! ## Storage Backends
//!
//! - `FilesystemStore` - Persists the full key-value map as a single JSON
//!   document, replaced atomically on every write
//! - `MemoryStore` - Keeps state in memory, for tests and one-shot runs
//!
//! The engine only ever advances a cursor value after the batch that
//! produced it has been durably written to the sink, so every value read
//! back from a store is a safe resumption point.

mod filesystem;
mod key;
mod memory;
mod store;

#[cfg(test)]
mod tests;

pub use filesystem::FilesystemStore;
pub use key::CheckpointKey;
pub use memory::MemoryStore;
pub use store::CheckpointStore;
