// # Memory State Store
//
// In-memory implementation of `StateStore`. State does not survive the
// process; the first tick after a restart treats every job as never
// fired. Intended for tests and throwaway deployments.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::Result;
use crate::traits::state_store::{JobState, StateStore};

/// In-memory state store
#[derive(Debug, Clone, Default)]
pub struct MemoryStateStore {
    jobs: Arc<RwLock<HashMap<String, JobState>>>,
    triggers: Arc<RwLock<HashMap<String, String>>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of jobs with stored state
    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn job_state(&self, job_id: &str) -> Result<JobState> {
        let guard = self.jobs.read().await;
        Ok(guard.get(job_id).cloned().unwrap_or_default())
    }

    async fn set_job_state(&self, job_id: &str, state: &JobState) -> Result<()> {
        let mut guard = self.jobs.write().await;
        guard.insert(job_id.to_string(), state.clone());
        Ok(())
    }

    async fn trigger_period(&self, trigger_id: &str) -> Result<Option<String>> {
        let guard = self.triggers.read().await;
        Ok(guard.get(trigger_id).cloned())
    }

    async fn set_trigger_period(&self, trigger_id: &str, period: &str) -> Result<()> {
        let mut guard = self.triggers.write().await;
        guard.insert(trigger_id.to_string(), period.to_string());
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        Ok(())
    }
}
