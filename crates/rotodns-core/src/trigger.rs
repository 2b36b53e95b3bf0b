//! Trigger evaluator: traffic-usage thresholds with per-period latching
//!
//! Runs on the engine's sub-cadence. For each configured trigger the
//! evaluator fetches the owning agent's usage report, compares the
//! trigger's window total against its limit, and raises at most one
//! alert per (trigger, period): the agent-assigned period identifier is
//! persisted when an alert fires and checked before the next one.
//!
//! Agent fetch failures are transient — the trigger is skipped this
//! round and re-examined on the next sub-tick.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::{Agent, Trigger};
use crate::error::Result;
use crate::traits::state_store::StateStore;
use crate::traits::usage_source::UsageSource;

/// Outcome counters for one trigger pass
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TriggerSummary {
    /// Alerts raised this pass
    pub fired: usize,
    /// Triggers below their limit or already latched for the period
    pub quiet: usize,
    /// Triggers whose agent could not be consulted
    pub unavailable: usize,
}

/// Evaluate every trigger once
pub async fn evaluate_triggers(
    triggers: &[Trigger],
    agents: &[Agent],
    usage: &Arc<dyn UsageSource>,
    state: &Arc<dyn StateStore>,
) -> Result<TriggerSummary> {
    let mut summary = TriggerSummary::default();

    for trigger in triggers {
        // Validation guarantees the agent exists at load time; a miss
        // here means the config changed under us, which the next tick's
        // reload will surface.
        let Some(agent) = agents.iter().find(|a| a.id == trigger.agent_id) else {
            warn!(trigger = %trigger.id, agent = %trigger.agent_id, "agent missing, skipping trigger");
            summary.unavailable += 1;
            continue;
        };

        let report = match usage.usage_report(agent).await {
            Ok(report) => report,
            Err(e) => {
                warn!(trigger = %trigger.id, agent = %agent.name, error = %e, "usage fetch failed");
                summary.unavailable += 1;
                continue;
            }
        };

        let window = report.window(trigger.window);
        let already_fired = state.trigger_period(&trigger.id).await?.as_deref() == Some(window.period.as_str());
        if already_fired {
            debug!(trigger = %trigger.id, period = %window.period, "already alerted this period");
            summary.quiet += 1;
            continue;
        }

        let total_gb = window.total_gb();
        if total_gb > trigger.limit_gb {
            warn!(
                trigger = %trigger.id,
                label = %trigger.label,
                agent = %agent.name,
                period = %window.period,
                used_gb = format_args!("{:.1}", total_gb),
                limit_gb = trigger.limit_gb,
                "traffic limit exceeded"
            );
            state.set_trigger_period(&trigger.id, &window.period).await?;
            summary.fired += 1;
        } else {
            debug!(
                trigger = %trigger.id,
                period = %window.period,
                used_gb = format_args!("{:.1}", total_gb),
                limit_gb = trigger.limit_gb,
                "within limit"
            );
            summary.quiet += 1;
        }
    }

    Ok(summary)
}
