//! Test doubles and helpers shared by the engine contract tests
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rotodns_core::config::{Agent, RecordType};
use rotodns_core::error::{Error, Result};
use rotodns_core::state::MemoryStateStore;
use rotodns_core::traits::clock::Clock;
use rotodns_core::traits::dns_provider::{DnsProvider, Record, TokenVerification, Zone};
use rotodns_core::traits::state_store::{JobState, StateStore};
use rotodns_core::traits::usage_source::{UsageReport, UsageSource, WindowUsage};
use rotodns_core::{Account, EngineOptions, RotationEngine};

pub fn ip(s: &str) -> IpAddr {
    s.parse().unwrap()
}

/// A clock the tests advance by hand
#[derive(Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn at_epoch(secs: i64) -> Self {
        Self {
            now: Arc::new(Mutex::new(Utc.timestamp_opt(secs, 0).unwrap())),
        }
    }

    pub fn advance_secs(&self, secs: i64) {
        let mut guard = self.now.lock().unwrap();
        *guard += ChronoDuration::seconds(secs);
    }

    pub fn advance_minutes(&self, minutes: i64) {
        self.advance_secs(minutes * 60);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

/// Scripted failure kinds for the mock provider
#[derive(Debug, Clone, Copy)]
pub enum MockFault {
    Transient,
    NotFound,
    Auth,
}

impl MockFault {
    fn to_error(self, record_id: &str) -> Error {
        match self {
            MockFault::Transient => Error::transient(format!("injected 502 for {record_id}")),
            MockFault::NotFound => Error::not_found(format!("record {record_id}")),
            MockFault::Auth => Error::auth(format!("injected 403 for {record_id}")),
        }
    }
}

/// In-memory DNS backend that records every write and can be scripted
/// to fail
#[derive(Clone, Default)]
pub struct MockDnsProvider {
    records: Arc<Mutex<HashMap<String, Record>>>,
    update_log: Arc<Mutex<Vec<(String, IpAddr)>>>,
    update_failures: Arc<Mutex<HashMap<String, VecDeque<MockFault>>>>,
    get_failures: Arc<Mutex<HashMap<String, VecDeque<MockFault>>>>,
}

impl MockDnsProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_record(&self, id: &str, name: &str, value: &str) {
        let value = ip(value);
        let record_type = if value.is_ipv4() {
            RecordType::A
        } else {
            RecordType::Aaaa
        };
        self.records.lock().unwrap().insert(
            id.to_string(),
            Record {
                id: id.to_string(),
                name: name.to_string(),
                record_type,
                value,
                proxied: false,
                ttl: 300,
            },
        );
    }

    pub fn remove_record(&self, id: &str) {
        self.records.lock().unwrap().remove(id);
    }

    pub fn record_value(&self, id: &str) -> IpAddr {
        self.records.lock().unwrap().get(id).unwrap().value
    }

    /// Fail the next update of `record_id` with the given fault
    pub fn fail_next_update(&self, record_id: &str, fault: MockFault) {
        self.update_failures
            .lock()
            .unwrap()
            .entry(record_id.to_string())
            .or_default()
            .push_back(fault);
    }

    /// Fail the next read of `record_id` with the given fault
    pub fn fail_next_get(&self, record_id: &str, fault: MockFault) {
        self.get_failures
            .lock()
            .unwrap()
            .entry(record_id.to_string())
            .or_default()
            .push_back(fault);
    }

    pub fn update_count(&self) -> usize {
        self.update_log.lock().unwrap().len()
    }

    pub fn update_log(&self) -> Vec<(String, IpAddr)> {
        self.update_log.lock().unwrap().clone()
    }
}

#[async_trait]
impl DnsProvider for MockDnsProvider {
    async fn list_zones(&self, _account: &Account) -> Result<Vec<Zone>> {
        Ok(vec![Zone {
            id: "zone-1".into(),
            name: "example.com".into(),
        }])
    }

    async fn list_records(
        &self,
        _account: &Account,
        _zone_id: &str,
        type_filter: Option<RecordType>,
    ) -> Result<Vec<Record>> {
        let guard = self.records.lock().unwrap();
        Ok(guard
            .values()
            .filter(|r| type_filter.is_none_or(|t| r.record_type == t))
            .cloned()
            .collect())
    }

    async fn get_record(
        &self,
        _account: &Account,
        _zone_id: &str,
        record_id: &str,
    ) -> Result<Record> {
        if let Some(fault) = self
            .get_failures
            .lock()
            .unwrap()
            .get_mut(record_id)
            .and_then(VecDeque::pop_front)
        {
            return Err(fault.to_error(record_id));
        }
        self.records
            .lock()
            .unwrap()
            .get(record_id)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("record {record_id}")))
    }

    async fn update_record(
        &self,
        _account: &Account,
        _zone_id: &str,
        record_id: &str,
        new_value: IpAddr,
    ) -> Result<Record> {
        if let Some(fault) = self
            .update_failures
            .lock()
            .unwrap()
            .get_mut(record_id)
            .and_then(VecDeque::pop_front)
        {
            return Err(fault.to_error(record_id));
        }

        let mut guard = self.records.lock().unwrap();
        let record = guard
            .get_mut(record_id)
            .ok_or_else(|| Error::not_found(format!("record {record_id}")))?;
        record.value = new_value;
        let updated = record.clone();
        drop(guard);

        self.update_log
            .lock()
            .unwrap()
            .push((record_id.to_string(), new_value));
        Ok(updated)
    }

    async fn verify_token(&self, _account: &Account) -> Result<TokenVerification> {
        Ok(TokenVerification {
            valid: true,
            missing_permissions: Vec::new(),
        })
    }

    fn provider_name(&self) -> &'static str {
        "mock"
    }
}

/// State store whose writes can be made to fail, for exercising the
/// fatal state-fault path
#[derive(Clone, Default)]
pub struct FailingStateStore {
    inner: MemoryStateStore,
    fail_writes: Arc<AtomicBool>,
}

impl FailingStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn write_fault(&self) -> Option<Error> {
        if self.fail_writes.load(Ordering::SeqCst) {
            Some(Error::state("injected write failure"))
        } else {
            None
        }
    }
}

#[async_trait]
impl StateStore for FailingStateStore {
    async fn job_state(&self, job_id: &str) -> Result<JobState> {
        self.inner.job_state(job_id).await
    }

    async fn set_job_state(&self, job_id: &str, state: &JobState) -> Result<()> {
        match self.write_fault() {
            Some(e) => Err(e),
            None => self.inner.set_job_state(job_id, state).await,
        }
    }

    async fn trigger_period(&self, trigger_id: &str) -> Result<Option<String>> {
        self.inner.trigger_period(trigger_id).await
    }

    async fn set_trigger_period(&self, trigger_id: &str, period: &str) -> Result<()> {
        match self.write_fault() {
            Some(e) => Err(e),
            None => self.inner.set_trigger_period(trigger_id, period).await,
        }
    }

    async fn flush(&self) -> Result<()> {
        self.inner.flush().await
    }
}

/// Usage source returning whatever report the test last installed
#[derive(Clone)]
pub struct MockUsageSource {
    report: Arc<Mutex<UsageReport>>,
}

impl MockUsageSource {
    pub fn new(report: UsageReport) -> Self {
        Self {
            report: Arc::new(Mutex::new(report)),
        }
    }

    pub fn set_report(&self, report: UsageReport) {
        *self.report.lock().unwrap() = report;
    }
}

#[async_trait]
impl UsageSource for MockUsageSource {
    async fn usage_report(&self, _agent: &Agent) -> Result<UsageReport> {
        Ok(self.report.lock().unwrap().clone())
    }
}

/// Build a usage report where every window carries the same totals
pub fn flat_report(period_prefix: &str, rx_bytes: u64) -> UsageReport {
    let window = |suffix: &str| WindowUsage {
        period: format!("{period_prefix}{suffix}"),
        rx_bytes,
        tx_bytes: 0,
    };
    UsageReport {
        daily: window("-d"),
        weekly: window("-w"),
        monthly: window("-m"),
    }
}

/// Write a config document and return its path
pub fn write_config(dir: &Path, doc: serde_json::Value) -> PathBuf {
    let path = dir.join("config.json");
    std::fs::write(&path, serde_json::to_string_pretty(&doc).unwrap()).unwrap();
    path
}

/// The account/zone scaffolding every test config shares
pub fn config_with_jobs(jobs: serde_json::Value) -> serde_json::Value {
    serde_json::json!({
        "accounts": [ { "id": "acct-1", "name": "primary", "token": "tok-test" } ],
        "zones": [ { "id": "zone-1", "account_id": "acct-1", "name": "example.com" } ],
        "jobs": jobs,
    })
}

/// Engine wired to the mocks, with a 60 s tick and triggers on every tick
pub fn test_engine(
    provider: &MockDnsProvider,
    state: &Arc<MemoryStateStore>,
    clock: &ManualClock,
    usage: Option<Arc<dyn UsageSource>>,
    config_path: &Path,
) -> RotationEngine {
    RotationEngine::new(
        Arc::new(provider.clone()),
        state.clone(),
        Arc::new(clock.clone()),
        usage,
        config_path,
        EngineOptions {
            tick_period: Duration::from_secs(60),
            trigger_cadence_ticks: 1,
        },
    )
}
