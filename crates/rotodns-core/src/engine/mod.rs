//! The rotation engine driver
//!
//! One tick = one pass over every enabled job:
//!
//! 1. Reload the configuration (the interactive UI may have rewritten
//!    it; within a tick the snapshot is immutable).
//! 2. Group jobs by account in configuration order. Accounts proceed in
//!    parallel; jobs within an account are strictly sequential so there
//!    is never more than one in-flight provider request per account.
//! 3. Per job: read state, gate on the due time, sample the referenced
//!    live records, evaluate a plan, apply the updates sequentially, and
//!    persist state immediately after a successful firing. A crash
//!    mid-tick therefore loses at most the updates not yet applied and
//!    never duplicates a persisted one.
//! 4. On the sub-cadence, evaluate traffic triggers.
//!
//! Failure dispatch follows the fault taxonomy: transient faults bump
//! the job's failure streak and are retried next tick; auth and
//! record-scope faults quarantine the job for the rest of the tick;
//! config and state faults are not absorbed — they propagate out of
//! `run_tick` so the caller can surface them (a config reload failure
//! only costs the tick in long-lived mode, a state-store failure stops
//! the engine).
//!
//! The engine supports two drive modes over the same `run_tick`: an
//! externally scheduled one-shot invocation, or a long-lived loop with
//! an internal ticker. A shutdown signal received mid-tick lets the
//! in-flight job finish (and its state persist) before the loop exits.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::{Account, ConfigStore, Job};
use crate::error::{Error, FaultKind, Result};
use crate::evaluator::{self, Evaluation};
use crate::traits::clock::Clock;
use crate::traits::dns_provider::DnsProvider;
use crate::traits::state_store::{JobState, StateStore};
use crate::traits::usage_source::UsageSource;
use crate::trigger::{self, TriggerSummary};

/// Engine tuning knobs
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Interval between ticks in long-lived mode; also the base of the
    /// tick deadline (5 × tick_period)
    pub tick_period: Duration,
    /// Evaluate triggers every N ticks
    pub trigger_cadence_ticks: u64,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            tick_period: Duration::from_secs(60),
            trigger_cadence_ticks: 5,
        }
    }
}

/// What happened during one tick
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickSummary {
    /// Jobs that fired (at least one record updated)
    pub fired: usize,
    /// Jobs not due, disabled, or cut off by the tick deadline
    pub skipped: usize,
    /// Jobs that failed transiently and will retry next tick
    pub failed: usize,
    /// Jobs quarantined for this tick (auth or record-scope fault)
    pub quarantined: usize,
    /// Trigger pass results, when the sub-cadence ran
    pub triggers: Option<TriggerSummary>,
}

impl TickSummary {
    fn merge(&mut self, other: TickSummary) {
        self.fired += other.fired;
        self.skipped += other.skipped;
        self.failed += other.failed;
        self.quarantined += other.quarantined;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobOutcome {
    Fired,
    Skipped,
    Failed,
    Quarantined,
}

/// The rotation engine
///
/// All collaborators are injected: the provider client, the state
/// store, the clock, and (optionally) the usage source for triggers.
/// The configuration file is re-read at every tick boundary.
pub struct RotationEngine {
    provider: Arc<dyn DnsProvider>,
    state: Arc<dyn StateStore>,
    clock: Arc<dyn Clock>,
    usage: Option<Arc<dyn UsageSource>>,
    config_path: PathBuf,
    options: EngineOptions,
    cancelled: Arc<AtomicBool>,
    ticks: AtomicU64,
}

impl RotationEngine {
    pub fn new(
        provider: Arc<dyn DnsProvider>,
        state: Arc<dyn StateStore>,
        clock: Arc<dyn Clock>,
        usage: Option<Arc<dyn UsageSource>>,
        config_path: impl Into<PathBuf>,
        options: EngineOptions,
    ) -> Self {
        Self {
            provider,
            state,
            clock,
            usage,
            config_path: config_path.into(),
            options,
            cancelled: Arc::new(AtomicBool::new(false)),
            ticks: AtomicU64::new(0),
        }
    }

    /// Run one full tick: every enabled job, then (on the sub-cadence)
    /// the trigger pass
    ///
    /// In externally scheduled mode this is the whole invocation, so the
    /// trigger pass runs every time; the in-memory tick counter only
    /// spaces it out in long-lived mode.
    pub async fn run_tick(&self) -> Result<TickSummary> {
        let store = ConfigStore::load(&self.config_path).await?;
        let deadline = Instant::now() + self.options.tick_period * 5;
        let tick_index = self.ticks.fetch_add(1, Ordering::SeqCst);

        let mut summary = self.rotate_all(&store, deadline).await?;

        if tick_index % self.options.trigger_cadence_ticks == 0 {
            if let Some(usage) = &self.usage {
                if !store.triggers().is_empty() {
                    // Agent failures are absorbed inside the pass; an
                    // error here is a state-store fault and propagates.
                    summary.triggers = Some(
                        trigger::evaluate_triggers(
                            store.triggers(),
                            store.agents(),
                            usage,
                            &self.state,
                        )
                        .await?,
                    );
                }
            }
        }

        Ok(summary)
    }

    async fn rotate_all(&self, store: &ConfigStore, deadline: Instant) -> Result<TickSummary> {
        // Group enabled jobs by account, preserving configuration order
        // within each group.
        let mut groups: Vec<(Account, Vec<Job>)> = Vec::new();
        for job in store.jobs() {
            if !job.enabled {
                continue;
            }
            let Some(account) = store.account(&job.account_id) else {
                // Unreachable after validation; tolerated so a racing
                // config rewrite cannot wedge the tick.
                continue;
            };
            match groups.iter_mut().find(|(a, _)| a.id == account.id) {
                Some((_, jobs)) => jobs.push(job.clone()),
                None => groups.push((account.clone(), vec![job.clone()])),
            }
        }

        let mut workers = JoinSet::new();
        for (account, jobs) in groups {
            let provider = Arc::clone(&self.provider);
            let state = Arc::clone(&self.state);
            let clock = Arc::clone(&self.clock);
            let cancelled = Arc::clone(&self.cancelled);
            workers.spawn(async move {
                process_account(provider, state, clock, cancelled, deadline, account, jobs).await
            });
        }

        // Let every worker finish its in-flight job even when one of
        // them hits a fatal fault; the first such fault is surfaced
        // after the join.
        let mut summary = TickSummary::default();
        let mut first_fault: Option<Error> = None;
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(Ok(account_summary)) => summary.merge(account_summary),
                Ok(Err(e)) => {
                    error!(error = %e, "account worker aborted");
                    if first_fault.is_none() {
                        first_fault = Some(e);
                    }
                }
                Err(e) => error!(error = %e, "account worker panicked"),
            }
        }
        match first_fault {
            Some(e) => Err(e),
            None => Ok(summary),
        }
    }

    /// Long-lived mode with SIGINT as the shutdown signal
    pub async fn run(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                let _ = tx.send(());
            }
        });
        self.run_with_shutdown(Some(rx)).await
    }

    /// Long-lived mode with an explicit shutdown signal
    ///
    /// A signal arriving mid-tick lets the in-flight job finish; its
    /// state is persisted before the loop exits. Remaining jobs in the
    /// tick are skipped.
    pub async fn run_with_shutdown(
        &self,
        shutdown: Option<oneshot::Receiver<()>>,
    ) -> Result<()> {
        info!(tick_period_secs = self.options.tick_period.as_secs(), "rotation engine started");

        let mut interval = tokio::time::interval(self.options.tick_period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        match shutdown {
            Some(mut rx) => loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let tick = self.run_tick();
                        tokio::pin!(tick);
                        let result = tokio::select! {
                            result = &mut tick => result,
                            _ = &mut rx => {
                                self.cancelled.store(true, Ordering::SeqCst);
                                info!("shutdown requested, letting in-flight work finish");
                                tick.await
                            }
                        };
                        self.handle_tick_result(result)?;
                        if self.cancelled.load(Ordering::SeqCst) {
                            break;
                        }
                    }
                    _ = &mut rx => {
                        self.cancelled.store(true, Ordering::SeqCst);
                        break;
                    }
                }
            },
            None => loop {
                interval.tick().await;
                let result = self.run_tick().await;
                self.handle_tick_result(result)?;
            },
        }

        self.state.flush().await?;
        info!("rotation engine stopped");
        Ok(())
    }

    /// Digest one tick's outcome in long-lived mode
    ///
    /// Config faults cost the tick and nothing more (the operator fixes
    /// the file, the next reload picks it up). State faults stop the
    /// engine: a store that cannot persist firings can no longer keep
    /// the cadence honest.
    fn handle_tick_result(&self, result: Result<TickSummary>) -> Result<()> {
        match result {
            Ok(summary) => {
                if summary.fired + summary.failed + summary.quarantined > 0 {
                    info!(
                        fired = summary.fired,
                        skipped = summary.skipped,
                        failed = summary.failed,
                        quarantined = summary.quarantined,
                        "tick complete"
                    );
                } else {
                    debug!(skipped = summary.skipped, "tick complete, nothing due");
                }
                Ok(())
            }
            Err(e) if e.kind() == FaultKind::Config => {
                // The previous snapshot is not retained; the tick is
                // lost until the operator fixes the file.
                error!(error = %e, "config reload failed, tick aborted");
                Ok(())
            }
            Err(e) if e.kind() == FaultKind::State => {
                error!(error = %e, "state store failed, stopping engine");
                Err(e)
            }
            Err(e) => {
                error!(error = %e, "tick failed");
                Ok(())
            }
        }
    }
}

async fn process_account(
    provider: Arc<dyn DnsProvider>,
    state: Arc<dyn StateStore>,
    clock: Arc<dyn Clock>,
    cancelled: Arc<AtomicBool>,
    deadline: Instant,
    account: Account,
    jobs: Vec<Job>,
) -> Result<TickSummary> {
    let mut summary = TickSummary::default();
    let mut deadline_logged = false;

    for job in jobs {
        if cancelled.load(Ordering::SeqCst) {
            summary.skipped += 1;
            continue;
        }
        if Instant::now() >= deadline {
            if !deadline_logged {
                warn!(account = %account.name, "tick deadline exceeded, skipping remaining jobs");
                deadline_logged = true;
            }
            summary.skipped += 1;
            continue;
        }

        // A config or state fault out of `run_job` is fatal for the
        // whole tick, not a per-job condition.
        match run_job(&*provider, &*state, &*clock, &account, &job).await? {
            JobOutcome::Fired => summary.fired += 1,
            JobOutcome::Skipped => summary.skipped += 1,
            JobOutcome::Failed => summary.failed += 1,
            JobOutcome::Quarantined => summary.quarantined += 1,
        }
    }

    Ok(summary)
}

async fn run_job(
    provider: &dyn DnsProvider,
    state_store: &dyn StateStore,
    clock: &dyn Clock,
    account: &Account,
    job: &Job,
) -> Result<JobOutcome> {
    let mut job_state = state_store.job_state(&job.id).await?;
    let now = clock.now();

    // Cheap gate before any provider traffic.
    if !job_state.is_due(now, job.interval_minutes) {
        debug!(
            job = %job.id,
            due_in_secs = job_state.due_in_secs(now, job.interval_minutes),
            "not due"
        );
        return Ok(JobOutcome::Skipped);
    }

    // Sample every referenced record once; the evaluator works on this
    // snapshot so a shuffle shifts a consistent set of values.
    let mut live = HashMap::new();
    for record_id in job.kind.record_ids() {
        match provider.get_record(account, &job.zone_id, record_id).await {
            Ok(record) => {
                live.insert(record_id.to_string(), record);
            }
            Err(e) => return dispatch_fault(state_store, job, &mut job_state, e).await,
        }
    }

    let plan = match evaluator::evaluate(job, &job_state, now, &live) {
        Ok(Evaluation::Fire(plan)) => plan,
        Ok(Evaluation::Skip(reason)) => {
            debug!(job = %job.id, %reason, "skipped");
            return Ok(JobOutcome::Skipped);
        }
        Err(e) => return dispatch_fault(state_store, job, &mut job_state, e).await,
    };

    // Apply sequentially. A record whose update fails keeps its previous
    // value; the batch still counts as a firing when anything succeeded,
    // and the advanced cursor hands the failed records fresh values next
    // time.
    let total = plan.updates.len();
    let mut succeeded = 0usize;
    let mut fatal = false;
    for update in &plan.updates {
        match provider
            .update_record(account, &job.zone_id, &update.record_id, update.value)
            .await
        {
            Ok(_) => {
                debug!(job = %job.id, record = %update.record_id, value = %update.value, "record updated");
                succeeded += 1;
            }
            Err(e) => match e.kind() {
                FaultKind::Transient => {
                    debug!(job = %job.id, record = %update.record_id, error = %e, "update failed");
                }
                FaultKind::Auth | FaultKind::RecordScope => {
                    error!(job = %job.id, record = %update.record_id, error = %e, "update rejected");
                    fatal = true;
                }
                FaultKind::Config | FaultKind::State => return Err(e),
            },
        }
    }

    if succeeded > 0 {
        job_state.last_fired_at = Some(now.timestamp());
        if let Some(cursor) = plan.new_cursor {
            job_state.cursor = cursor;
        }
        job_state.consecutive_failures = 0;
        state_store.set_job_state(&job.id, &job_state).await?;

        if succeeded < total {
            warn!(
                job = %job.id,
                updated = succeeded,
                total,
                "partial batch applied; failed records get fresh values next firing"
            );
        } else {
            info!(job = %job.id, kind = job.kind.name(), updated = succeeded, "rotation applied");
        }
        Ok(JobOutcome::Fired)
    } else if fatal {
        Ok(JobOutcome::Quarantined)
    } else {
        record_transient_failure(state_store, job, &mut job_state).await?;
        Ok(JobOutcome::Failed)
    }
}

async fn dispatch_fault(
    state_store: &dyn StateStore,
    job: &Job,
    job_state: &mut JobState,
    fault: Error,
) -> Result<JobOutcome> {
    match fault.kind() {
        FaultKind::Transient => {
            record_transient_failure(state_store, job, job_state).await?;
            Ok(JobOutcome::Failed)
        }
        FaultKind::Auth | FaultKind::RecordScope => {
            error!(job = %job.id, error = %fault, "job quarantined for this tick");
            Ok(JobOutcome::Quarantined)
        }
        FaultKind::Config | FaultKind::State => Err(fault),
    }
}

async fn record_transient_failure(
    state_store: &dyn StateStore,
    job: &Job,
    job_state: &mut JobState,
) -> Result<()> {
    job_state.consecutive_failures += 1;
    state_store.set_job_state(&job.id, job_state).await?;

    // WARN on the first failure of a streak and every power-of-two
    // occurrence after; the rest stay at debug to keep a flapping
    // provider from flooding the log.
    let streak = job_state.consecutive_failures;
    if streak.is_power_of_two() {
        warn!(job = %job.id, failures = streak, "rotation failed, retrying next tick");
    } else {
        debug!(job = %job.id, failures = streak, "rotation failed, retrying next tick");
    }
    Ok(())
}
