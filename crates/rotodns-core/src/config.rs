//! Operator configuration: document types, validation, atomic persistence
//!
//! The whole configuration is one JSON document owning accounts, zone
//! references, rotation jobs, and (optionally) traffic triggers and
//! agents. Parsing is exhaustive up front: jobs are tagged variants with
//! per-kind payloads, so the engine only ever operates on well-typed
//! values. A document that fails any validation rule is rejected as a
//! whole, naming the first offending entity.
//!
//! The interactive UI is the writer of this file and the engine is a
//! reader; writes go to a temporary sibling which is fsynced and renamed
//! over the live file, so a concurrent reader observes either the old or
//! the new document, never a torn one.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::error::{Error, Result};

/// Minimum allowed rotation interval per job, in minutes
pub const MIN_INTERVAL_MINUTES: u32 = 5;

/// Interval applied when a job omits `interval_minutes`
pub const DEFAULT_INTERVAL_MINUTES: u32 = 30;

/// Provider API token
///
/// Wrapped so the secret can never leak through `Debug` formatting or a
/// log line. Serialization is transparent (the document stores the bare
/// string).
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct ApiToken(String);

impl ApiToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Access the secret value. Callers must not log the result.
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for ApiToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("<REDACTED>")
    }
}

/// A named credential bundle authorizing provider access
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    /// Stable opaque identifier
    pub id: String,
    /// Operator-facing display name
    pub name: String,
    /// Provider API token; never logged
    pub token: ApiToken,
}

/// A cached reference to a DNS zone owned by an account
///
/// Zone existence is authoritative at the provider; the local entry only
/// binds a provider zone id to an account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Zone {
    /// Provider-assigned zone id
    pub id: String,
    /// The account that owns this zone
    pub account_id: String,
    /// The apex domain
    pub name: String,
}

/// DNS record type managed by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordType {
    /// IPv4 address record
    A,
    /// IPv6 address record
    #[serde(rename = "AAAA")]
    Aaaa,
}

impl RecordType {
    /// Whether the given address belongs to this record type's family
    pub fn matches(&self, ip: &IpAddr) -> bool {
        match self {
            RecordType::A => ip.is_ipv4(),
            RecordType::Aaaa => ip.is_ipv6(),
        }
    }

    /// Wire name as the provider expects it
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordType::A => "A",
            RecordType::Aaaa => "AAAA",
        }
    }
}

impl std::fmt::Display for RecordType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind-specific payload of a rotation job
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobKind {
    /// One record cycling through an ordered IP pool
    Single {
        record_id: String,
        record_type: RecordType,
        ip_pool: Vec<IpAddr>,
    },

    /// N records served from a sliding window over a shared pool
    MultiPool {
        record_ids: Vec<String>,
        record_type: RecordType,
        ip_pool: Vec<IpAddr>,
    },

    /// Cyclic permutation of the live values across a fixed record set
    Shuffle {
        record_ids: Vec<String>,
        #[serde(default = "default_shift")]
        shift: u32,
    },
}

impl JobKind {
    /// All record ids this job reads and writes, in payload order
    pub fn record_ids(&self) -> Vec<&str> {
        match self {
            JobKind::Single { record_id, .. } => vec![record_id.as_str()],
            JobKind::MultiPool { record_ids, .. } | JobKind::Shuffle { record_ids, .. } => {
                record_ids.iter().map(String::as_str).collect()
            }
        }
    }

    /// Short kind name for logging
    pub fn name(&self) -> &'static str {
        match self {
            JobKind::Single { .. } => "single",
            JobKind::MultiPool { .. } => "multi_pool",
            JobKind::Shuffle { .. } => "shuffle",
        }
    }
}

/// The unit of scheduled work
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Stable opaque identifier
    pub id: String,
    /// Account whose credentials authorize the updates
    pub account_id: String,
    /// Provider zone id holding the records
    pub zone_id: String,
    /// Minimum minutes between firings
    #[serde(default = "default_interval")]
    pub interval_minutes: u32,
    /// Disabled jobs are skipped without touching their state
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Kind-specific payload
    #[serde(flatten)]
    pub kind: JobKind,
}

/// Calendar window a traffic trigger measures over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerWindow {
    Daily,
    Weekly,
    Monthly,
}

/// A traffic-usage alert threshold bound to one agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trigger {
    pub id: String,
    pub agent_id: String,
    pub window: TriggerWindow,
    pub limit_gb: f64,
    pub label: String,
}

/// A registered per-host traffic-measurement agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub name: String,
    pub base_url: String,
    pub api_key: ApiToken,
}

fn default_interval() -> u32 {
    DEFAULT_INTERVAL_MINUTES
}

fn default_enabled() -> bool {
    true
}

fn default_shift() -> u32 {
    1
}

/// The full configuration document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Document {
    #[serde(default)]
    accounts: Vec<Account>,
    #[serde(default)]
    zones: Vec<Zone>,
    #[serde(default)]
    jobs: Vec<Job>,
    #[serde(default)]
    triggers: Vec<Trigger>,
    #[serde(default)]
    agents: Vec<Agent>,
}

impl Document {
    fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for account in &self.accounts {
            if !seen.insert(account.id.as_str()) {
                return Err(Error::config(format!("duplicate account id: {}", account.id)));
            }
            if account.token.is_empty() {
                return Err(Error::config(format!("account {}: empty API token", account.id)));
            }
        }

        let mut seen = HashSet::new();
        for zone in &self.zones {
            if !seen.insert(zone.id.as_str()) {
                return Err(Error::config(format!("duplicate zone id: {}", zone.id)));
            }
            if self.account(&zone.account_id).is_none() {
                return Err(Error::config(format!(
                    "zone {}: unknown account {}",
                    zone.id, zone.account_id
                )));
            }
        }

        let mut seen = HashSet::new();
        for job in &self.jobs {
            if !seen.insert(job.id.as_str()) {
                return Err(Error::config(format!("duplicate job id: {}", job.id)));
            }
            validate_job(self, job)?;
        }

        let mut seen = HashSet::new();
        for agent in &self.agents {
            if !seen.insert(agent.id.as_str()) {
                return Err(Error::config(format!("duplicate agent id: {}", agent.id)));
            }
            if agent.base_url.is_empty() {
                return Err(Error::config(format!("agent {}: empty base_url", agent.id)));
            }
        }

        let mut seen = HashSet::new();
        for trigger in &self.triggers {
            if !seen.insert(trigger.id.as_str()) {
                return Err(Error::config(format!("duplicate trigger id: {}", trigger.id)));
            }
            if self.agent(&trigger.agent_id).is_none() {
                return Err(Error::config(format!(
                    "trigger {}: unknown agent {}",
                    trigger.id, trigger.agent_id
                )));
            }
            if !trigger.limit_gb.is_finite() || trigger.limit_gb <= 0.0 {
                return Err(Error::config(format!(
                    "trigger {}: limit_gb must be a positive number",
                    trigger.id
                )));
            }
        }

        Ok(())
    }

    fn account(&self, id: &str) -> Option<&Account> {
        self.accounts.iter().find(|a| a.id == id)
    }

    fn zone(&self, id: &str) -> Option<&Zone> {
        self.zones.iter().find(|z| z.id == id)
    }

    fn agent(&self, id: &str) -> Option<&Agent> {
        self.agents.iter().find(|a| a.id == id)
    }
}

fn validate_job(doc: &Document, job: &Job) -> Result<()> {
    if doc.account(&job.account_id).is_none() {
        return Err(Error::config(format!(
            "job {}: unknown account {}",
            job.id, job.account_id
        )));
    }
    if doc.zone(&job.zone_id).is_none() {
        return Err(Error::config(format!(
            "job {}: unknown zone {}",
            job.id, job.zone_id
        )));
    }
    if job.interval_minutes < MIN_INTERVAL_MINUTES {
        return Err(Error::config(format!(
            "job {}: interval_minutes {} is below the minimum of {}",
            job.id, job.interval_minutes, MIN_INTERVAL_MINUTES
        )));
    }

    match &job.kind {
        JobKind::Single {
            record_type,
            ip_pool,
            ..
        } => {
            if ip_pool.is_empty() {
                return Err(Error::config(format!("job {}: empty ip_pool", job.id)));
            }
            check_pool_family(&job.id, *record_type, ip_pool)?;
        }
        JobKind::MultiPool {
            record_ids,
            record_type,
            ip_pool,
        } => {
            if record_ids.is_empty() {
                return Err(Error::config(format!("job {}: no records listed", job.id)));
            }
            if ip_pool.len() < record_ids.len() {
                return Err(Error::config(format!(
                    "job {}: ip_pool has {} entries but {} records need distinct values",
                    job.id,
                    ip_pool.len(),
                    record_ids.len()
                )));
            }
            check_pool_family(&job.id, *record_type, ip_pool)?;
        }
        JobKind::Shuffle { record_ids, shift } => {
            if record_ids.len() < 2 {
                return Err(Error::config(format!(
                    "job {}: shuffle needs at least 2 records",
                    job.id
                )));
            }
            if *shift == 0 || *shift as usize >= record_ids.len() {
                return Err(Error::config(format!(
                    "job {}: shift {} must be in 1..{}",
                    job.id,
                    shift,
                    record_ids.len()
                )));
            }
        }
    }

    Ok(())
}

fn check_pool_family(job_id: &str, record_type: RecordType, pool: &[IpAddr]) -> Result<()> {
    for ip in pool {
        if !record_type.matches(ip) {
            return Err(Error::config(format!(
                "job {job_id}: pool entry {ip} does not match record type {record_type}"
            )));
        }
    }
    Ok(())
}

/// Loads, validates, and persists the configuration document
///
/// The raw document is not exposed; all access goes through per-entity
/// accessors and mutators. Mutations are validated on `save()`, and
/// referential guards (an account still referenced by a zone, a zone
/// still referenced by a job) reject deletions up front.
#[derive(Debug)]
pub struct ConfigStore {
    path: PathBuf,
    doc: Document,
}

impl ConfigStore {
    /// Load and validate the document at `path`
    ///
    /// A missing file, a parse failure, or a validation failure is a
    /// config fault; the caller decides whether that is fatal.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let content = fs::read_to_string(&path).await.map_err(|e| {
            Error::config(format!("cannot read config file {}: {}", path.display(), e))
        })?;

        let doc: Document = serde_json::from_str(&content).map_err(|e| {
            Error::config(format!("cannot parse config file {}: {}", path.display(), e))
        })?;
        doc.validate()?;

        Ok(Self { path, doc })
    }

    /// Create an empty store bound to `path` (the file is written on save)
    pub fn create(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            doc: Document::default(),
        }
    }

    pub fn accounts(&self) -> &[Account] {
        &self.doc.accounts
    }

    pub fn account(&self, id: &str) -> Option<&Account> {
        self.doc.account(id)
    }

    pub fn zones(&self) -> &[Zone] {
        &self.doc.zones
    }

    pub fn zone(&self, id: &str) -> Option<&Zone> {
        self.doc.zone(id)
    }

    /// Jobs in configuration order; the engine preserves this order
    /// within each account
    pub fn jobs(&self) -> &[Job] {
        &self.doc.jobs
    }

    pub fn job(&self, id: &str) -> Option<&Job> {
        self.doc.jobs.iter().find(|j| j.id == id)
    }

    pub fn triggers(&self) -> &[Trigger] {
        &self.doc.triggers
    }

    pub fn agents(&self) -> &[Agent] {
        &self.doc.agents
    }

    pub fn agent(&self, id: &str) -> Option<&Agent> {
        self.doc.agent(id)
    }

    pub fn upsert_account(&mut self, account: Account) {
        match self.doc.accounts.iter_mut().find(|a| a.id == account.id) {
            Some(slot) => *slot = account,
            None => self.doc.accounts.push(account),
        }
    }

    /// Remove an account; refused while any zone still references it
    pub fn remove_account(&mut self, id: &str) -> Result<()> {
        if let Some(zone) = self.doc.zones.iter().find(|z| z.account_id == id) {
            return Err(Error::config(format!(
                "account {} is still referenced by zone {}",
                id, zone.id
            )));
        }
        self.doc.accounts.retain(|a| a.id != id);
        Ok(())
    }

    pub fn upsert_zone(&mut self, zone: Zone) {
        match self.doc.zones.iter_mut().find(|z| z.id == zone.id) {
            Some(slot) => *slot = zone,
            None => self.doc.zones.push(zone),
        }
    }

    /// Remove a zone; refused while any job still references it
    pub fn remove_zone(&mut self, id: &str) -> Result<()> {
        if let Some(job) = self.doc.jobs.iter().find(|j| j.zone_id == id) {
            return Err(Error::config(format!(
                "zone {} is still referenced by job {}",
                id, job.id
            )));
        }
        self.doc.zones.retain(|z| z.id != id);
        Ok(())
    }

    pub fn upsert_job(&mut self, job: Job) {
        match self.doc.jobs.iter_mut().find(|j| j.id == job.id) {
            Some(slot) => *slot = job,
            None => self.doc.jobs.push(job),
        }
    }

    pub fn remove_job(&mut self, id: &str) {
        self.doc.jobs.retain(|j| j.id != id);
    }

    pub fn upsert_trigger(&mut self, trigger: Trigger) {
        match self.doc.triggers.iter_mut().find(|t| t.id == trigger.id) {
            Some(slot) => *slot = trigger,
            None => self.doc.triggers.push(trigger),
        }
    }

    pub fn remove_trigger(&mut self, id: &str) {
        self.doc.triggers.retain(|t| t.id != id);
    }

    pub fn upsert_agent(&mut self, agent: Agent) {
        match self.doc.agents.iter_mut().find(|a| a.id == agent.id) {
            Some(slot) => *slot = agent,
            None => self.doc.agents.push(agent),
        }
    }

    /// Remove an agent; refused while any trigger still references it
    pub fn remove_agent(&mut self, id: &str) -> Result<()> {
        if let Some(trigger) = self.doc.triggers.iter().find(|t| t.agent_id == id) {
            return Err(Error::config(format!(
                "agent {} is still referenced by trigger {}",
                id, trigger.id
            )));
        }
        self.doc.agents.retain(|a| a.id != id);
        Ok(())
    }

    /// Validate and atomically persist the document
    ///
    /// The document is serialized to a temporary sibling file, fsynced,
    /// and renamed over the live file. If the containing directory does
    /// not exist or is not writable, the write fails loudly rather than
    /// creating the file elsewhere.
    pub async fn save(&self) -> Result<()> {
        self.doc.validate()?;

        let parent = self.path.parent().unwrap_or_else(|| Path::new("."));
        if !parent.as_os_str().is_empty() && !parent.exists() {
            return Err(Error::config(format!(
                "config directory {} does not exist; create it before saving",
                parent.display()
            )));
        }

        let json = serde_json::to_string_pretty(&self.doc)
            .map_err(|e| Error::config(format!("cannot serialize config: {}", e)))?;

        let tmp = self.path.with_extension("json.tmp");
        let mut file = fs::File::create(&tmp).await.map_err(|e| {
            Error::config(format!(
                "config directory {} is not writable: {}",
                parent.display(),
                e
            ))
        })?;
        file.write_all(json.as_bytes())
            .await
            .map_err(|e| Error::config(format!("cannot write {}: {}", tmp.display(), e)))?;
        file.sync_all()
            .await
            .map_err(|e| Error::config(format!("cannot sync {}: {}", tmp.display(), e)))?;
        drop(file);

        fs::rename(&tmp, &self.path).await.map_err(|e| {
            Error::config(format!(
                "cannot rename {} to {}: {}",
                tmp.display(),
                self.path.display(),
                e
            ))
        })?;

        Ok(())
    }
}
