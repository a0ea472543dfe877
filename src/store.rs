//! Snapshot persistence

use async_trait::async_trait;
use std::path::PathBuf;
use tracing::debug;

use crate::error::Result;
use crate::models::Snapshot;

/// Storage backend for scan snapshots
///
/// Exactly one snapshot exists at a time; a save replaces the previous one
/// wholesale.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Load the current snapshot, or None when no scan has completed yet
    async fn load(&self) -> Result<Option<Snapshot>>;

    /// Replace the current snapshot
    async fn save(&self, snapshot: &Snapshot) -> Result<()>;
}

/// File-backed store using pretty-printed JSON
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

#[async_trait]
impl SnapshotStore for JsonFileStore {
    async fn load(&self) -> Result<Option<Snapshot>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let contents = tokio::fs::read_to_string(&self.path).await?;
        let snapshot = serde_json::from_str(&contents)?;
        debug!("Loaded snapshot from {:?}", self.path);
        Ok(Some(snapshot))
    }

    async fn save(&self, snapshot: &Snapshot) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let contents = serde_json::to_string_pretty(snapshot)?;
        tokio::fs::write(&self.path, contents).await?;
        debug!("Saved snapshot to {:?}", self.path);
        Ok(())
    }
}
