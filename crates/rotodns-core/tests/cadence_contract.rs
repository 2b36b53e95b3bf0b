//! Contract: cadence enforcement
//!
//! A job never fires twice within its interval, `last_fired_at` is
//! monotonically non-decreasing, and a no-op firing still resets the
//! timer.

mod common;

use common::*;
use rotodns_core::state::MemoryStateStore;
use rotodns_core::traits::state_store::StateStore;
use std::sync::Arc;
use tempfile::tempdir;

fn two_ip_config() -> serde_json::Value {
    config_with_jobs(serde_json::json!([{
        "id": "job-1",
        "account_id": "acct-1",
        "zone_id": "zone-1",
        "interval_minutes": 5,
        "kind": "single",
        "record_id": "rec-1",
        "record_type": "A",
        "ip_pool": ["1.1.1.1", "2.2.2.2"],
    }]))
}

#[tokio::test]
async fn two_ip_swap_honors_the_interval() {
    let dir = tempdir().unwrap();
    let config_path = write_config(dir.path(), two_ip_config());

    let provider = MockDnsProvider::new();
    provider.insert_record("rec-1", "www.example.com", "1.1.1.1");
    let state = Arc::new(MemoryStateStore::new());
    let clock = ManualClock::at_epoch(0);
    let engine = test_engine(&provider, &state, &clock, None, &config_path);

    // t=0: due (never fired), rotates to the second pool entry.
    let summary = engine.run_tick().await.unwrap();
    assert_eq!(summary.fired, 1);
    assert_eq!(provider.record_value("rec-1"), ip("2.2.2.2"));
    let job_state = state.job_state("job-1").await.unwrap();
    assert_eq!(job_state.last_fired_at, Some(0));
    assert_eq!(job_state.cursor, 1);

    // t=4min: not due, no provider traffic.
    clock.advance_minutes(4);
    let summary = engine.run_tick().await.unwrap();
    assert_eq!(summary.fired, 0);
    assert_eq!(summary.skipped, 1);
    assert_eq!(provider.update_count(), 1);

    // t=5min: due again, swaps back.
    clock.advance_minutes(1);
    let summary = engine.run_tick().await.unwrap();
    assert_eq!(summary.fired, 1);
    assert_eq!(provider.record_value("rec-1"), ip("1.1.1.1"));
    let job_state = state.job_state("job-1").await.unwrap();
    assert_eq!(job_state.last_fired_at, Some(300));
    assert_eq!(job_state.cursor, 0);
}

#[tokio::test]
async fn last_fired_at_never_decreases() {
    let dir = tempdir().unwrap();
    let config_path = write_config(dir.path(), two_ip_config());

    let provider = MockDnsProvider::new();
    provider.insert_record("rec-1", "www.example.com", "1.1.1.1");
    let state = Arc::new(MemoryStateStore::new());
    let clock = ManualClock::at_epoch(0);
    let engine = test_engine(&provider, &state, &clock, None, &config_path);

    let mut previous = None;
    for _ in 0..6 {
        engine.run_tick().await.unwrap();
        let fired_at = state.job_state("job-1").await.unwrap().last_fired_at;
        assert!(fired_at >= previous, "{fired_at:?} < {previous:?}");
        previous = fired_at;
        clock.advance_minutes(3);
    }
}

#[tokio::test]
async fn successive_firings_are_at_least_one_interval_apart() {
    let dir = tempdir().unwrap();
    let config_path = write_config(dir.path(), two_ip_config());

    let provider = MockDnsProvider::new();
    provider.insert_record("rec-1", "www.example.com", "1.1.1.1");
    let state = Arc::new(MemoryStateStore::new());
    let clock = ManualClock::at_epoch(0);
    let engine = test_engine(&provider, &state, &clock, None, &config_path);

    // Tick every minute for half an hour; the 5-minute job must fire
    // exactly every 5 minutes.
    let mut firings = Vec::new();
    for _ in 0..30 {
        engine.run_tick().await.unwrap();
        let fired_at = state.job_state("job-1").await.unwrap().last_fired_at.unwrap();
        if firings.last() != Some(&fired_at) {
            firings.push(fired_at);
        }
        clock.advance_minutes(1);
    }

    for pair in firings.windows(2) {
        assert!(pair[1] - pair[0] >= 5 * 60, "firings too close: {pair:?}");
    }
    assert_eq!(firings.len(), 6);
}

#[tokio::test]
async fn noop_firing_still_resets_the_timer() {
    let dir = tempdir().unwrap();
    let config_path = write_config(
        dir.path(),
        config_with_jobs(serde_json::json!([{
            "id": "job-pinned",
            "account_id": "acct-1",
            "zone_id": "zone-1",
            "interval_minutes": 5,
            "kind": "single",
            "record_id": "rec-1",
            "record_type": "A",
            "ip_pool": ["5.5.5.5"],
        }])),
    );

    let provider = MockDnsProvider::new();
    provider.insert_record("rec-1", "www.example.com", "5.5.5.5");
    let state = Arc::new(MemoryStateStore::new());
    let clock = ManualClock::at_epoch(100);
    let engine = test_engine(&provider, &state, &clock, None, &config_path);

    let summary = engine.run_tick().await.unwrap();
    assert_eq!(summary.fired, 1);
    assert_eq!(provider.record_value("rec-1"), ip("5.5.5.5"));
    assert_eq!(
        state.job_state("job-pinned").await.unwrap().last_fired_at,
        Some(100)
    );
}

#[tokio::test]
async fn disabled_jobs_never_run() {
    let dir = tempdir().unwrap();
    let config_path = write_config(
        dir.path(),
        config_with_jobs(serde_json::json!([{
            "id": "job-off",
            "account_id": "acct-1",
            "zone_id": "zone-1",
            "interval_minutes": 5,
            "enabled": false,
            "kind": "single",
            "record_id": "rec-1",
            "record_type": "A",
            "ip_pool": ["1.1.1.1", "2.2.2.2"],
        }])),
    );

    let provider = MockDnsProvider::new();
    provider.insert_record("rec-1", "www.example.com", "1.1.1.1");
    let state = Arc::new(MemoryStateStore::new());
    let clock = ManualClock::at_epoch(0);
    let engine = test_engine(&provider, &state, &clock, None, &config_path);

    let summary = engine.run_tick().await.unwrap();
    assert_eq!(summary.fired, 0);
    assert_eq!(provider.update_count(), 0);
    assert_eq!(
        state.job_state("job-off").await.unwrap().last_fired_at,
        None
    );
}
