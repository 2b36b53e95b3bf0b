// # HTTP Usage Agent Client
//
// `UsageSource` implementation over a per-host traffic-measurement
// agent's HTTP endpoint.
//
// The agent owns the measurement machinery and the calendar arithmetic;
// this client only fetches the per-window totals and the agent-assigned
// period identifiers that the trigger evaluator compares against its
// persisted markers.
//
// ## Protocol
//
// ```http
// GET {base_url}/v1/usage
// X-API-Key: <agent key>
// ```
//
// ```json
// {
//   "daily":   { "period": "2025-08-13", "rx_bytes": 1234, "tx_bytes": 567 },
//   "weekly":  { "period": "2025-W33",   "rx_bytes": 9876, "tx_bytes": 543 },
//   "monthly": { "period": "2025-08",    "rx_bytes": 4321, "tx_bytes": 987 }
// }
// ```

use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

use rotodns_core::config::Agent;
use rotodns_core::traits::usage_source::{UsageReport, UsageSource};
use rotodns_core::{Error, Result};

/// Default per-request timeout
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP client for traffic agents
#[derive(Debug, Clone)]
pub struct HttpUsageAgent {
    client: reqwest::Client,
}

impl HttpUsageAgent {
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("failed to build HTTP client");
        Self { client }
    }
}

impl Default for HttpUsageAgent {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UsageSource for HttpUsageAgent {
    async fn usage_report(&self, agent: &Agent) -> Result<UsageReport> {
        let url = format!("{}/v1/usage", agent.base_url.trim_end_matches('/'));
        debug!(agent = %agent.name, "fetching usage report");

        let response = self
            .client
            .get(&url)
            .header("X-API-Key", agent.api_key.expose())
            .send()
            .await
            .map_err(|e| Error::agent(format!("agent {} unreachable: {}", agent.name, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::agent(format!(
                "agent {} returned HTTP {}",
                agent.name, status
            )));
        }

        response
            .json::<UsageReport>()
            .await
            .map_err(|e| Error::agent(format!("agent {} sent an invalid report: {}", agent.name, e)))
    }
}
