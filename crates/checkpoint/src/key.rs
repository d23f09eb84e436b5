//! Composite checkpoint keys.

/// Composite key identifying one pagination cursor: the entity kind being
/// scanned and the sync scope (target index) it is scanned for.
///
/// The same entity kind can be scanned under different scopes in one run
/// (e.g. a reference table feeding the primary index and its own
/// standalone index), so both parts are needed to keep the cursors apart.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CheckpointKey {
    /// Source entity kind, e.g. a table name.
    pub entity: String,
    /// Sync scope, e.g. the target index name.
    pub scope: String,
}

impl CheckpointKey {
    pub fn new(entity: impl Into<String>, scope: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            scope: scope.into(),
        }
    }

    /// Stable string encoding used as the storage key.
    pub fn storage_key(&self) -> String {
        format!("{}_{}_last_id", self.entity, self.scope)
    }
}

impl std::fmt::Display for CheckpointKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.storage_key())
    }
}
