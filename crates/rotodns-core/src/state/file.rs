// # File State Store
//
// File-backed implementation of `StateStore`.
//
// ## Durability
//
// - Atomic writes: new state is written to a temporary sibling file,
//   fsynced, then renamed over the live file, so a crash mid-write
//   leaves either the old or the new document on disk.
// - Absent file: treated as empty state (no job has ever fired).
// - Corrupt file: a state fault; the operator must repair or remove the
//   file before the engine will start.
//
// ## File Format
//
// ```json
// {
//   "version": "1",
//   "jobs": {
//     "job-web": { "last_fired_at": 1755072000, "cursor": 3, "consecutive_failures": 0 }
//   },
//   "triggers": {
//     "trig-monthly": { "last_fired_period": "2025-08" }
//   }
// }
// ```

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

use crate::error::{Error, Result};
use crate::traits::state_store::{JobState, StateStore};

/// State file format version, for future migrations
const STATE_FILE_VERSION: &str = "1";

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct TriggerMarker {
    last_fired_period: String,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct StateFileFormat {
    version: String,
    #[serde(default)]
    jobs: HashMap<String, JobState>,
    #[serde(default)]
    triggers: HashMap<String, TriggerMarker>,
}

#[derive(Debug, Default)]
struct Inner {
    jobs: HashMap<String, JobState>,
    triggers: HashMap<String, TriggerMarker>,
    dirty: bool,
}

/// File-backed state store with atomic writes
///
/// State is cached in memory across ticks; every mutation is written
/// through to disk before the call returns.
#[derive(Debug)]
pub struct FileStateStore {
    path: PathBuf,
    inner: Arc<RwLock<Inner>>,
}

impl FileStateStore {
    /// Open or create a file state store
    ///
    /// Parent directories are created if needed. An absent state file
    /// yields empty state; an unreadable or unparseable one is a state
    /// fault.
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).await.map_err(|e| {
                    Error::state(format!(
                        "cannot create state directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let inner = Self::load(&path).await?;
        Ok(Self {
            path,
            inner: Arc::new(RwLock::new(inner)),
        })
    }

    async fn load(path: &Path) -> Result<Inner> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "state file absent, starting empty");
            return Ok(Inner::default());
        }

        let content = fs::read_to_string(path).await.map_err(|e| {
            Error::state(format!("cannot read state file {}: {}", path.display(), e))
        })?;

        let parsed: StateFileFormat = serde_json::from_str(&content).map_err(|e| {
            Error::state(format!(
                "cannot parse state file {}: {}",
                path.display(),
                e
            ))
        })?;

        if parsed.version != STATE_FILE_VERSION {
            tracing::warn!(
                expected = STATE_FILE_VERSION,
                found = %parsed.version,
                "state file version mismatch, loading anyway"
            );
        }

        tracing::debug!(
            jobs = parsed.jobs.len(),
            triggers = parsed.triggers.len(),
            "loaded state file"
        );

        Ok(Inner {
            jobs: parsed.jobs,
            triggers: parsed.triggers,
            dirty: false,
        })
    }

    /// Write the current state to disk atomically
    async fn write_through(&self) -> Result<()> {
        let snapshot = {
            let guard = self.inner.read().await;
            StateFileFormat {
                version: STATE_FILE_VERSION.to_string(),
                jobs: guard.jobs.clone(),
                triggers: guard.triggers.clone(),
            }
        };

        let json = serde_json::to_string_pretty(&snapshot)
            .map_err(|e| Error::state(format!("cannot serialize state: {}", e)))?;

        let tmp = self.path.with_extension("json.tmp");
        let mut file = fs::File::create(&tmp)
            .await
            .map_err(|e| Error::state(format!("cannot create {}: {}", tmp.display(), e)))?;
        file.write_all(json.as_bytes())
            .await
            .map_err(|e| Error::state(format!("cannot write {}: {}", tmp.display(), e)))?;
        file.sync_all()
            .await
            .map_err(|e| Error::state(format!("cannot sync {}: {}", tmp.display(), e)))?;
        drop(file);

        fs::rename(&tmp, &self.path).await.map_err(|e| {
            Error::state(format!(
                "cannot rename {} to {}: {}",
                tmp.display(),
                self.path.display(),
                e
            ))
        })?;

        let mut guard = self.inner.write().await;
        guard.dirty = false;

        tracing::trace!(path = %self.path.display(), "state written");
        Ok(())
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn job_state(&self, job_id: &str) -> Result<JobState> {
        let guard = self.inner.read().await;
        Ok(guard.jobs.get(job_id).cloned().unwrap_or_default())
    }

    async fn set_job_state(&self, job_id: &str, state: &JobState) -> Result<()> {
        {
            let mut guard = self.inner.write().await;
            guard.jobs.insert(job_id.to_string(), state.clone());
            guard.dirty = true;
        }
        self.write_through().await
    }

    async fn trigger_period(&self, trigger_id: &str) -> Result<Option<String>> {
        let guard = self.inner.read().await;
        Ok(guard
            .triggers
            .get(trigger_id)
            .map(|m| m.last_fired_period.clone()))
    }

    async fn set_trigger_period(&self, trigger_id: &str, period: &str) -> Result<()> {
        {
            let mut guard = self.inner.write().await;
            guard.triggers.insert(
                trigger_id.to_string(),
                TriggerMarker {
                    last_fired_period: period.to_string(),
                },
            );
            guard.dirty = true;
        }
        self.write_through().await
    }

    async fn flush(&self) -> Result<()> {
        let dirty = self.inner.read().await.dirty;
        if dirty {
            self.write_through().await
        } else {
            Ok(())
        }
    }
}
