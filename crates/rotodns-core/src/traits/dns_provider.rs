// # DNS Provider Trait
//
// Defines the interface over the hosted DNS backend. The engine is the
// only caller; implementations live in their own crates (Cloudflare in
// `rotodns-provider-cloudflare`).
//
// ## Contract
//
// Every operation takes the `Account` whose credentials authorize it, so
// a single client instance serves all configured accounts. Operations
// are async and may block on network I/O, but the client itself never
// retries, never sleeps, and never logs above debug level — retry and
// cadence policy belong to the engine.
//
// Errors must be pre-classified into the engine's fault taxonomy:
// auth (401/403), not-found (404), rejected payload (other 4xx), and
// transient (429, 5xx, timeouts, connection failures).

use async_trait::async_trait;
use std::net::IpAddr;

use crate::config::{Account, RecordType};
use crate::error::Result;

/// A DNS zone as reported by the provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Zone {
    /// Provider-assigned zone id
    pub id: String,
    /// The apex domain
    pub name: String,
}

/// A live A/AAAA record as reported by the provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Provider-assigned record id
    pub id: String,
    /// Fully qualified record name
    pub name: String,
    /// Record type (A or AAAA)
    pub record_type: RecordType,
    /// Current target address
    pub value: IpAddr,
    /// Provider-specific proxying flag; preserved verbatim on update
    pub proxied: bool,
    /// Time-to-live in seconds; preserved verbatim on update
    pub ttl: u32,
}

/// Result of verifying an account's API token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenVerification {
    /// Whether the token authenticates at all
    pub valid: bool,
    /// Permissions the token lacks for rotation work
    pub missing_permissions: Vec<String>,
}

impl TokenVerification {
    /// Token is usable for rotation: authenticates and lacks nothing
    pub fn is_usable(&self) -> bool {
        self.valid && self.missing_permissions.is_empty()
    }
}

/// Interface over the DNS backend consumed by the rotation engine
#[async_trait]
pub trait DnsProvider: Send + Sync {
    /// List all zones visible to the account
    async fn list_zones(&self, account: &Account) -> Result<Vec<Zone>>;

    /// List all A/AAAA records in a zone, optionally filtered by type
    ///
    /// Implementations must return the full set, paginating internally
    /// if the backend pages.
    async fn list_records(
        &self,
        account: &Account,
        zone_id: &str,
        type_filter: Option<RecordType>,
    ) -> Result<Vec<Record>>;

    /// Read one record by id
    async fn get_record(&self, account: &Account, zone_id: &str, record_id: &str)
        -> Result<Record>;

    /// Point a record at a new address
    ///
    /// Only the value changes; `type`, `name`, `proxied`, and `ttl` are
    /// preserved. When the record already holds `new_value`, the write
    /// may be elided and the current record returned.
    async fn update_record(
        &self,
        account: &Account,
        zone_id: &str,
        record_id: &str,
        new_value: IpAddr,
    ) -> Result<Record>;

    /// Verify the account's token and report missing permissions
    async fn verify_token(&self, account: &Account) -> Result<TokenVerification>;

    /// Provider name for logging
    fn provider_name(&self) -> &'static str;
}
