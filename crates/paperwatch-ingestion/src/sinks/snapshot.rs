//! Seen-set kept in a local JSON file.
//!
//! Avoids paging the whole destination at the start of every run. The file
//! only grows: every successful write merges its identifier straight away.
//! A missing file is an empty set.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::SeenSetSource;
use crate::dedup::SeenSet;
use crate::error::PipelineError;

#[derive(Debug, Default, Serialize, Deserialize)]
struct SnapshotFile {
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    ids: BTreeSet<String>,
}

pub struct SnapshotSeenSet {
    path: PathBuf,
    /// Serializes read-merge-write cycles from concurrent writers.
    write_lock: Mutex<()>,
}

impl SnapshotSeenSet {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), write_lock: Mutex::new(()) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read(&self) -> Result<SnapshotFile, PipelineError> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No snapshot yet");
                return Ok(SnapshotFile::default());
            }
            Err(e) => return Err(self.unavailable(e)),
        };
        serde_json::from_str(&raw).map_err(|e| self.unavailable(e))
    }

    fn unavailable(&self, e: impl std::fmt::Display) -> PipelineError {
        PipelineError::SinkUnavailable(format!("seen-set snapshot {}: {e}", self.path.display()))
    }
}

#[async_trait]
impl SeenSetSource for SnapshotSeenSet {
    async fn load(&self) -> Result<SeenSet, PipelineError> {
        let file = self.read().await?;
        info!(n = file.ids.len(), path = %self.path.display(), "Loaded seen-set snapshot");
        Ok(file.ids.into_iter().collect())
    }

    async fn record(&self, ids: &[String]) -> Result<(), PipelineError> {
        if ids.is_empty() {
            return Ok(());
        }
        let _guard = self.write_lock.lock().await;
        let mut file = self.read().await?;
        file.ids.extend(ids.iter().cloned());
        file.updated_at = Some(Utc::now());

        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir).await.map_err(|e| self.unavailable(e))?;
        }
        let body = serde_json::to_string_pretty(&file).map_err(|e| self.unavailable(e))?;

        // Write beside the target and rename so a crash never leaves half a file.
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body).await.map_err(|e| self.unavailable(e))?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(|e| self.unavailable(e))?;

        debug!(added = ids.len(), total = file.ids.len(), "Seen-set snapshot updated");
        Ok(())
    }

    fn name(&self) -> &str {
        "snapshot"
    }
}
