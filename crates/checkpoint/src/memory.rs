//! In-memory checkpoint storage implementation.
//!
//! Suitable for tests and one-shot runs where durability across process
//! restarts is not needed. State is lost when the process exits; for
//! anything long-lived use `FilesystemStore`.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;

use crate::store::CheckpointStore;

/// In-memory implementation of the CheckpointStore trait.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the current entries, for assertions in tests.
    pub async fn snapshot(&self) -> HashMap<String, String> {
        self.entries.lock().await.clone()
    }
}

#[async_trait]
impl CheckpointStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries
            .lock()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn set_many(&self, entries: &[(String, Option<String>)]) -> Result<()> {
        let mut guard = self.entries.lock().await;
        for (key, value) in entries {
            match value {
                Some(v) => {
                    guard.insert(key.clone(), v.clone());
                }
                None => {
                    guard.remove(key);
                }
            }
        }
        Ok(())
    }
}
