//! Integration tests for the supervised worker harness.
//!
//! These tests validate real-world functionality including:
//! - Complete runs with randomized operation durations
//! - Busy/free event streams per worker
//! - External lease expiry
//! - Shutdown while workers are blocked or mid-operation

use lease_pool::config::{HarnessConfig, PoolConfig};
use lease_pool::core::TableStrategy;
use lease_pool::runtime::{Supervisor, WorkerEvent, WorkerEventKind, EVENT_BUFFER};
use std::collections::HashMap;
use std::thread;
use std::time::{Duration, Instant};

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

fn config(strategy: TableStrategy) -> HarnessConfig {
    HarnessConfig {
        pool: PoolConfig::new("harness").with_strategy(strategy),
        resource_count: 3,
        min_operation_ms: 1,
        max_operation_ms: 5,
        worker_count: 10,
        iterations: 20,
        acquire_timeout_ms: None,
        lease_ms: None,
    }
}

fn wait_until(what: &str, condition: impl Fn() -> bool) {
    let start = Instant::now();
    while !condition() {
        assert!(start.elapsed() < Duration::from_secs(5), "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(2));
    }
}

fn count_by_worker(events: &[WorkerEvent], pick: impl Fn(&WorkerEventKind) -> bool) -> HashMap<usize, usize> {
    let mut counts = HashMap::new();
    for event in events.iter().filter(|e| pick(&e.kind)) {
        *counts.entry(event.worker).or_insert(0) += 1;
    }
    counts
}

// ============================================================================
// TESTS
// ============================================================================

#[test]
fn test_full_run_completes_for_both_strategies() {
    for strategy in [TableStrategy::Locked, TableStrategy::LockFree] {
        let supervisor = Supervisor::start(&config(strategy)).unwrap();
        let events = supervisor.events();
        let report = supervisor.join();

        assert_eq!(report.workers.len(), 10);
        assert_eq!(report.total_completed(), 200, "{strategy:?}");
        assert!(report.failures().is_empty());
        assert!(report.final_snapshot.is_consistent());
        assert_eq!(report.final_snapshot.available_permits, 3);
        assert_eq!(report.final_snapshot.strategy, strategy);
        assert_eq!(report.dropped_events, 0);

        let events: Vec<_> = events.try_iter().collect();
        let acquired = count_by_worker(&events, |k| matches!(k, WorkerEventKind::Acquired { .. }));
        let released = count_by_worker(&events, |k| matches!(k, WorkerEventKind::Released { .. }));
        assert_eq!(acquired, released);
        assert!(acquired.values().all(|n| *n == 20));
        assert!(events.iter().all(|e| match e.kind {
            WorkerEventKind::Acquired { resource } | WorkerEventKind::Released { resource } => resource < 3,
            _ => true,
        }));
    }
}

#[test]
fn test_external_lease_expiry_interrupts_operation() {
    let mut cfg = config(TableStrategy::LockFree);
    cfg.resource_count = 1;
    cfg.worker_count = 1;
    cfg.iterations = 1;
    cfg.min_operation_ms = 10_000;
    cfg.max_operation_ms = 10_000;

    let supervisor = Supervisor::start(&cfg).unwrap();
    wait_until("worker to hold the resource", || {
        supervisor.pool().available_permits() == 0
    });
    // Slot is published right after the acquire event; retry until it lands.
    wait_until("lease to expire", || supervisor.expire_lease(0));
    assert!(!supervisor.expire_lease(7));

    let start = Instant::now();
    let report = supervisor.join();
    assert!(start.elapsed() < Duration::from_secs(5));
    assert_eq!(report.workers[0].expired, 1);
    assert_eq!(report.workers[0].completed, 0);
    assert_eq!(report.final_snapshot.available_permits, 1);
}

#[test]
fn test_lease_limit_from_config() {
    let mut cfg = config(TableStrategy::Locked);
    cfg.worker_count = 3;
    cfg.iterations = 2;
    cfg.min_operation_ms = 10_000;
    cfg.max_operation_ms = 10_000;
    cfg.lease_ms = Some(20);

    let report = Supervisor::start(&cfg).unwrap().join();
    assert_eq!(report.workers.iter().map(|w| w.expired).sum::<usize>(), 6);
    assert!(report.final_snapshot.is_consistent());
}

#[test]
fn test_shutdown_wakes_blocked_and_busy_workers() {
    let mut cfg = config(TableStrategy::Locked);
    cfg.resource_count = 2;
    cfg.worker_count = 6;
    cfg.iterations = 1_000;
    cfg.min_operation_ms = 10_000;
    cfg.max_operation_ms = 10_000;

    let supervisor = Supervisor::start(&cfg).unwrap();
    let pool = supervisor.pool().clone();
    wait_until("two holders and four waiters", || {
        pool.available_permits() == 0 && pool.waiting() == 4
    });

    let start = Instant::now();
    supervisor.shutdown();
    assert!(supervisor.is_shutdown());
    let report = supervisor.join();

    assert!(start.elapsed() < Duration::from_secs(5));
    assert!(report.workers.iter().all(|w| w.cancelled));
    assert!(report.failures().is_empty());
    assert_eq!(report.final_snapshot.available_permits, 2);
    assert!(report.final_snapshot.busy.is_empty());
    assert!(pool.is_shutdown());
}

#[test]
fn test_acquire_timeouts_are_reported_not_fatal() {
    let mut cfg = config(TableStrategy::LockFree);
    cfg.resource_count = 1;
    cfg.worker_count = 4;
    cfg.iterations = 3;
    cfg.min_operation_ms = 30;
    cfg.max_operation_ms = 30;
    cfg.acquire_timeout_ms = Some(5);

    let supervisor = Supervisor::start(&cfg).unwrap();
    let events = supervisor.events();
    let report = supervisor.join();

    let timed_out: usize = report.workers.iter().map(|w| w.timed_out).sum();
    let completed = report.total_completed();
    assert_eq!(timed_out + completed, 12);
    assert!(timed_out > 0);
    assert!(report.failures().is_empty());
    assert_eq!(
        events
            .try_iter()
            .filter(|e| e.kind == WorkerEventKind::TimedOut)
            .count(),
        timed_out
    );
}

#[test]
fn test_huge_timeouts_behave_as_unbounded() {
    let mut cfg = config(TableStrategy::LockFree);
    cfg.worker_count = 4;
    cfg.iterations = 5;
    cfg.acquire_timeout_ms = Some(u64::MAX);
    cfg.lease_ms = Some(u64::MAX);

    let report = Supervisor::start(&cfg).unwrap().join();
    assert_eq!(report.total_completed(), 20);
    assert!(report.failures().is_empty());
    assert!(report.workers.iter().all(|w| w.timed_out == 0 && w.expired == 0));
}

#[test]
fn test_undrained_events_are_dropped_not_buffered() {
    let mut cfg = config(TableStrategy::Locked);
    cfg.worker_count = 10;
    cfg.iterations = 200;
    cfg.min_operation_ms = 0;
    cfg.max_operation_ms = 0;

    let supervisor = Supervisor::start(&cfg).unwrap();
    let events = supervisor.events();
    let report = supervisor.join();

    // Acquired, Completed and Released per iteration.
    let emitted = 10 * 200 * 3;
    assert_eq!(report.total_completed(), 2_000);
    assert_eq!(events.len(), EVENT_BUFFER);
    assert_eq!(report.dropped_events, emitted - EVENT_BUFFER);
    assert!(report.failures().is_empty());
}

#[test]
fn test_invalid_config_rejected() {
    let mut cfg = config(TableStrategy::Locked);
    cfg.worker_count = 0;
    assert!(Supervisor::start(&cfg).is_err());
}
