// # Usage Source Trait
//
// Read-only view over a per-host traffic-measurement agent. The trigger
// evaluator consumes window totals and the agent-assigned period
// identifiers; the agent's own measurement machinery is out of scope.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::{Agent, TriggerWindow};
use crate::error::Result;

/// Accumulated traffic for one calendar window
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowUsage {
    /// Agent-assigned period identifier (e.g. "2025-08-13", "2025-W33",
    /// "2025-08"); comparing identifiers, not timestamps, is what makes
    /// the at-most-once-per-period rule robust across clock skew
    pub period: String,
    /// Bytes received within the period
    pub rx_bytes: u64,
    /// Bytes transmitted within the period
    pub tx_bytes: u64,
}

impl WindowUsage {
    /// Combined traffic in both directions
    pub fn total_bytes(&self) -> u64 {
        self.rx_bytes.saturating_add(self.tx_bytes)
    }

    /// Combined traffic in GiB
    pub fn total_gb(&self) -> f64 {
        self.total_bytes() as f64 / (1024.0 * 1024.0 * 1024.0)
    }
}

/// Usage totals for all three windows, as reported by one agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageReport {
    pub daily: WindowUsage,
    pub weekly: WindowUsage,
    pub monthly: WindowUsage,
}

impl UsageReport {
    /// The window a trigger measures over
    pub fn window(&self, window: TriggerWindow) -> &WindowUsage {
        match window {
            TriggerWindow::Daily => &self.daily,
            TriggerWindow::Weekly => &self.weekly,
            TriggerWindow::Monthly => &self.monthly,
        }
    }
}

/// Interface over a traffic-measurement agent
#[async_trait]
pub trait UsageSource: Send + Sync {
    /// Fetch the agent's current totals for all windows
    async fn usage_report(&self, agent: &Agent) -> Result<UsageReport>;
}
