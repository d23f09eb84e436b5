//! Filesystem-based checkpoint storage implementation.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

use crate::store::CheckpointStore;

/// On-disk shape of the checkpoint state.
#[derive(Debug, Default, Serialize, Deserialize)]
struct StateDocument {
    entries: BTreeMap<String, String>,
    updated_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Filesystem implementation of the CheckpointStore trait.
///
/// Keeps the whole key-value map in a single JSON document inside the
/// given directory. Every write rewrites the document through a temporary
/// file and a rename, so a crash mid-write leaves the previous state
/// intact and `set_many` is all-or-nothing.
pub struct FilesystemStore {
    dir: PathBuf,
    // Serializes load-modify-store cycles within one process.
    write_lock: Mutex<()>,
}

const STATE_FILE: &str = "state.json";

impl FilesystemStore {
    /// Create a new FilesystemStore rooted at the given directory.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Get the directory path.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn state_path(&self) -> PathBuf {
        self.dir.join(STATE_FILE)
    }

    fn load(&self) -> Result<StateDocument> {
        let path = self.state_path();
        if !path.exists() {
            return Ok(StateDocument::default());
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read checkpoint state from {}", path.display()))?;
        let doc = serde_json::from_str(&content)
            .with_context(|| format!("Malformed checkpoint state in {}", path.display()))?;
        Ok(doc)
    }

    fn persist(&self, mut doc: StateDocument) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        doc.updated_at = Some(chrono::Utc::now());

        let path = self.state_path();
        let tmp = self.dir.join(format!("{STATE_FILE}.tmp"));
        std::fs::write(&tmp, serde_json::to_string_pretty(&doc)?)?;
        std::fs::rename(&tmp, &path)
            .with_context(|| format!("Failed to replace checkpoint state at {}", path.display()))?;

        tracing::debug!("Persisted checkpoint state to {}", path.display());
        Ok(())
    }
}

#[async_trait]
impl CheckpointStore for FilesystemStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let doc = self.load()?;
        Ok(doc.entries.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut doc = self.load()?;
        doc.entries.insert(key.to_string(), value.to_string());
        self.persist(doc)
    }

    async fn set_many(&self, entries: &[(String, Option<String>)]) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut doc = self.load()?;
        for (key, value) in entries {
            match value {
                Some(v) => {
                    doc.entries.insert(key.clone(), v.clone());
                }
                None => {
                    doc.entries.remove(key);
                }
            }
        }
        self.persist(doc)
    }
}
