//! Job evaluator: from (job, state, live snapshot) to a concrete plan
//!
//! The evaluator is the dispatch table between job kinds and the pure
//! selection algorithms. It performs no I/O: the engine samples the live
//! records it needs once, up front, and hands the snapshot in. A shuffle
//! therefore sees a consistent view of all its records even if something
//! else mutates them mid-firing.

use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::config::{Job, JobKind};
use crate::error::{Error, Result};
use crate::rotation::{pick_single, shuffled_values, window_values, RecordUpdate, RotationPlan};
use crate::traits::dns_provider::Record;
use crate::traits::state_store::JobState;

/// Why a job was not fired this tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// The job's interval has not elapsed yet
    NotDue { due_in_secs: i64 },
    /// The job is disabled in configuration
    Disabled,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::NotDue { due_in_secs } => write!(f, "not due for {}s", due_in_secs),
            SkipReason::Disabled => f.write_str("disabled"),
        }
    }
}

/// Outcome of evaluating one job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Evaluation {
    Fire(RotationPlan),
    Skip(SkipReason),
}

/// Evaluate a job against its state and a sampled live-record snapshot
///
/// `live` must contain every record the job references, keyed by record
/// id; a missing entry is a record-scope fault (the engine quarantines
/// the job for this tick).
pub fn evaluate(
    job: &Job,
    state: &JobState,
    now: DateTime<Utc>,
    live: &HashMap<String, Record>,
) -> Result<Evaluation> {
    if !job.enabled {
        return Ok(Evaluation::Skip(SkipReason::Disabled));
    }
    if !state.is_due(now, job.interval_minutes) {
        return Ok(Evaluation::Skip(SkipReason::NotDue {
            due_in_secs: state.due_in_secs(now, job.interval_minutes),
        }));
    }

    let plan = match &job.kind {
        JobKind::Single {
            record_id, ip_pool, ..
        } => {
            let record = live_record(job, live, record_id)?;
            let (value, new_cursor) = pick_single(ip_pool, record.value, state.cursor);
            RotationPlan {
                updates: vec![RecordUpdate {
                    record_id: record_id.clone(),
                    value,
                }],
                new_cursor: Some(new_cursor),
            }
        }

        JobKind::MultiPool {
            record_ids, ip_pool, ..
        } => {
            // Existence check up front so a missing record skips the
            // whole batch before any write.
            for record_id in record_ids {
                live_record(job, live, record_id)?;
            }
            let (values, new_cursor) = window_values(ip_pool, record_ids.len(), state.cursor);
            RotationPlan {
                updates: record_ids
                    .iter()
                    .zip(values)
                    .map(|(record_id, value)| RecordUpdate {
                        record_id: record_id.clone(),
                        value,
                    })
                    .collect(),
                new_cursor: Some(new_cursor),
            }
        }

        JobKind::Shuffle { record_ids, shift } => {
            let sampled: Vec<_> = record_ids
                .iter()
                .map(|record_id| live_record(job, live, record_id).map(|r| r.value))
                .collect::<Result<_>>()?;
            let values = shuffled_values(&sampled, *shift);
            RotationPlan {
                updates: record_ids
                    .iter()
                    .zip(values)
                    .map(|(record_id, value)| RecordUpdate {
                        record_id: record_id.clone(),
                        value,
                    })
                    .collect(),
                new_cursor: None,
            }
        }
    };

    Ok(Evaluation::Fire(plan))
}

fn live_record<'a>(
    job: &Job,
    live: &'a HashMap<String, Record>,
    record_id: &str,
) -> Result<&'a Record> {
    live.get(record_id).ok_or_else(|| {
        Error::not_found(format!(
            "record {} referenced by job {} does not exist at the provider",
            record_id, job.id
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RecordType;
    use chrono::TimeZone;
    use std::net::IpAddr;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    fn record(id: &str, value: &str) -> Record {
        Record {
            id: id.into(),
            name: format!("{id}.example.com"),
            record_type: RecordType::A,
            value: ip(value),
            proxied: false,
            ttl: 300,
        }
    }

    fn single_job(interval: u32, pool: &[&str]) -> Job {
        Job {
            id: "job-1".into(),
            account_id: "acct".into(),
            zone_id: "zone".into(),
            interval_minutes: interval,
            enabled: true,
            kind: JobKind::Single {
                record_id: "rec-1".into(),
                record_type: RecordType::A,
                ip_pool: pool.iter().map(|s| ip(s)).collect(),
            },
        }
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn due_job_emits_a_single_update() {
        let job = single_job(5, &["1.1.1.1", "2.2.2.2"]);
        let live = HashMap::from([("rec-1".to_string(), record("rec-1", "1.1.1.1"))]);

        let eval = evaluate(&job, &JobState::never_fired(), at(0), &live).unwrap();
        match eval {
            Evaluation::Fire(plan) => {
                assert_eq!(plan.updates.len(), 1);
                assert_eq!(plan.updates[0].value, ip("2.2.2.2"));
                assert_eq!(plan.new_cursor, Some(1));
            }
            other => panic!("expected fire, got {:?}", other),
        }
    }

    #[test]
    fn not_due_job_is_skipped_with_remaining_time() {
        let job = single_job(5, &["1.1.1.1", "2.2.2.2"]);
        let live = HashMap::from([("rec-1".to_string(), record("rec-1", "1.1.1.1"))]);
        let state = JobState {
            last_fired_at: Some(0),
            cursor: 1,
            consecutive_failures: 0,
        };

        let eval = evaluate(&job, &state, at(4 * 60), &live).unwrap();
        assert_eq!(
            eval,
            Evaluation::Skip(SkipReason::NotDue { due_in_secs: 60 })
        );
    }

    #[test]
    fn disabled_job_is_skipped() {
        let mut job = single_job(5, &["1.1.1.1"]);
        job.enabled = false;
        let eval = evaluate(&job, &JobState::never_fired(), at(0), &HashMap::new()).unwrap();
        assert_eq!(eval, Evaluation::Skip(SkipReason::Disabled));
    }

    #[test]
    fn missing_record_is_a_record_scope_fault() {
        let job = single_job(5, &["1.1.1.1"]);
        let err = evaluate(&job, &JobState::never_fired(), at(0), &HashMap::new()).unwrap_err();
        assert_eq!(err.kind(), crate::error::FaultKind::RecordScope);
        assert!(err.to_string().contains("rec-1"));
        assert!(err.to_string().contains("job-1"));
    }

    #[test]
    fn shuffle_plan_uses_the_snapshot() {
        let job = Job {
            id: "job-sh".into(),
            account_id: "acct".into(),
            zone_id: "zone".into(),
            interval_minutes: 5,
            enabled: true,
            kind: JobKind::Shuffle {
                record_ids: vec!["a".into(), "b".into(), "c".into()],
                shift: 1,
            },
        };
        let live = HashMap::from([
            ("a".to_string(), record("a", "1.1.1.1")),
            ("b".to_string(), record("b", "2.2.2.2")),
            ("c".to_string(), record("c", "3.3.3.3")),
        ]);

        let eval = evaluate(&job, &JobState::never_fired(), at(0), &live).unwrap();
        match eval {
            Evaluation::Fire(plan) => {
                assert_eq!(plan.new_cursor, None);
                let values: Vec<_> = plan.updates.iter().map(|u| u.value).collect();
                assert_eq!(values, vec![ip("2.2.2.2"), ip("3.3.3.3"), ip("1.1.1.1")]);
            }
            other => panic!("expected fire, got {:?}", other),
        }
    }
}
