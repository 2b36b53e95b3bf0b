// # State Store Trait
//
// Persistent rotation state: when each job last fired, where its cursor
// stands, and which period each trigger last alerted in.
//
// The store is what makes rotations idempotent under restart and keeps
// the operator's minimum cadence honest: the engine consults it before
// every firing and persists it immediately after every success.
//
// Missing state is not an error. A job with no stored entry has simply
// never fired.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Per-job rotation state
///
/// `cursor` is kind-specific: the pool-window start for multi-pool jobs,
/// the last chosen pool index for single-record jobs, unused for
/// shuffles. `last_fired_at` is Unix epoch seconds and is monotonically
/// non-decreasing for the lifetime of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobState {
    /// Epoch seconds of the last successful firing; `None` = never fired
    #[serde(default)]
    pub last_fired_at: Option<i64>,
    /// Algorithm selection position
    #[serde(default)]
    pub cursor: u64,
    /// Transient-failure streak length since the last success
    #[serde(default)]
    pub consecutive_failures: u32,
}

impl JobState {
    /// The state of a job that has never fired
    pub fn never_fired() -> Self {
        Self {
            last_fired_at: None,
            cursor: 0,
            consecutive_failures: 0,
        }
    }

    /// Whether the job is due at `now` given its interval
    pub fn is_due(&self, now: DateTime<Utc>, interval_minutes: u32) -> bool {
        match self.last_fired_at {
            None => true,
            Some(fired) => now.timestamp() >= fired + i64::from(interval_minutes) * 60,
        }
    }

    /// Seconds until the job becomes due; zero when already due
    pub fn due_in_secs(&self, now: DateTime<Utc>, interval_minutes: u32) -> i64 {
        match self.last_fired_at {
            None => 0,
            Some(fired) => (fired + i64::from(interval_minutes) * 60 - now.timestamp()).max(0),
        }
    }
}

impl Default for JobState {
    fn default() -> Self {
        Self::never_fired()
    }
}

/// Interface for persistent rotation-state storage
///
/// Implementations must be safe to call concurrently from multiple
/// tasks; the engine's per-account workers share one store. Writes are
/// rare (one per successful firing) but must be durable before the call
/// returns.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Read a job's state; missing state means never fired
    async fn job_state(&self, job_id: &str) -> Result<JobState>;

    /// Persist a job's state
    async fn set_job_state(&self, job_id: &str, state: &JobState) -> Result<()>;

    /// The period identifier a trigger most recently fired in
    async fn trigger_period(&self, trigger_id: &str) -> Result<Option<String>>;

    /// Mark a trigger as fired for a period
    async fn set_trigger_period(&self, trigger_id: &str, period: &str) -> Result<()>;

    /// Persist any buffered changes
    async fn flush(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn never_fired_is_always_due() {
        let state = JobState::never_fired();
        let now = Utc.timestamp_opt(1_000_000, 0).unwrap();
        assert!(state.is_due(now, 5));
        assert_eq!(state.due_in_secs(now, 5), 0);
    }

    #[test]
    fn due_exactly_at_interval_boundary() {
        let fired = 1_000_000;
        let state = JobState {
            last_fired_at: Some(fired),
            cursor: 0,
            consecutive_failures: 0,
        };
        let just_before = Utc.timestamp_opt(fired + 5 * 60 - 1, 0).unwrap();
        let at_boundary = Utc.timestamp_opt(fired + 5 * 60, 0).unwrap();
        assert!(!state.is_due(just_before, 5));
        assert_eq!(state.due_in_secs(just_before, 5), 1);
        assert!(state.is_due(at_boundary, 5));
    }
}
