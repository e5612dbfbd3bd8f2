//! Last-sync-mark persistence.
//!
//! The sync mark is the timestamp of the last fully completed
//! endpoint-to-database cycle. It is read at the start of each cycle and
//! written only after the cycle ran all the way through, so an aborted cycle
//! never advances it. An absent mark means "never synced"; callers treat it
//! as the Unix epoch.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Mutex;

/// Storage backend for the sync mark.
#[async_trait]
pub trait SyncMarkStore: Send + Sync {
    /// Read the persisted mark. Returns `None` when no mark has been written.
    async fn load(&self) -> Result<Option<DateTime<Utc>>>;

    /// Persist a new mark, replacing any previous one.
    async fn store(&self, mark: DateTime<Utc>) -> Result<()>;
}

/// On-disk representation of the mark.
#[derive(Debug, Serialize, Deserialize)]
struct StoredMark {
    mark: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// Sync mark persisted as a single JSON file.
pub struct FilesystemMarkStore {
    path: PathBuf,
}

impl FilesystemMarkStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl SyncMarkStore for FilesystemMarkStore {
    async fn load(&self) -> Result<Option<DateTime<Utc>>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&self.path)?;
        let stored: StoredMark = serde_json::from_str(&content)?;
        Ok(Some(stored.mark))
    }

    async fn store(&self, mark: DateTime<Utc>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let stored = StoredMark {
            mark,
            updated_at: Utc::now(),
        };
        std::fs::write(&self.path, serde_json::to_string_pretty(&stored)?)?;
        tracing::debug!("stored sync mark {mark} to {}", self.path.display());
        Ok(())
    }
}

/// In-memory mark store for tests.
#[derive(Default)]
pub struct MemoryMarkStore {
    mark: Mutex<Option<DateTime<Utc>>>,
}

impl MemoryMarkStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SyncMarkStore for MemoryMarkStore {
    async fn load(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(*self.mark.lock().expect("mark lock poisoned"))
    }

    async fn store(&self, mark: DateTime<Utc>) -> Result<()> {
        *self.mark.lock().expect("mark lock poisoned") = Some(mark);
        Ok(())
    }
}
