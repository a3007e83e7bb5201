//! Supervisor: builds a pool from configuration and drives worker threads
//! against it.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver};
use tracing::{debug, info, warn};

use crate::builders::build_pool;
use crate::config::HarnessConfig;
use crate::core::{CancelToken, PoolError, PoolSnapshot, ResourcePool};
use crate::runtime::operation::SimulatedOperation;
use crate::runtime::worker::{run_worker, LeaseSlot, WorkerContext, WorkerEvent, WorkerSummary};

/// Worker events buffered before further events are dropped.
pub const EVENT_BUFFER: usize = 4096;

/// Outcome of a supervised run.
#[derive(Debug, Clone)]
pub struct HarnessReport {
    /// One summary per worker, in worker order.
    pub workers: Vec<WorkerSummary>,
    /// Pool state after every worker exited.
    pub final_snapshot: PoolSnapshot,
    /// Events lost because nobody drained [`Supervisor::events`] in time.
    pub dropped_events: usize,
}

impl HarnessReport {
    /// Operations that ran to completion across all workers.
    #[must_use]
    pub fn total_completed(&self) -> usize {
        self.workers.iter().map(|w| w.completed).sum()
    }

    /// Fatal errors that terminated workers.
    #[must_use]
    pub fn failures(&self) -> Vec<&PoolError> {
        self.workers.iter().filter_map(|w| w.failed.as_ref()).collect()
    }
}

/// Owns the pool, the shutdown signal, and the worker threads.
pub struct Supervisor {
    pool: Arc<ResourcePool<SimulatedOperation>>,
    shutdown: CancelToken,
    leases: Vec<Arc<LeaseSlot>>,
    workers: Vec<JoinHandle<WorkerSummary>>,
    events: Receiver<WorkerEvent>,
    dropped_events: Arc<AtomicUsize>,
}

impl Supervisor {
    /// Build the pool and start `config.worker_count` worker threads.
    ///
    /// # Errors
    ///
    /// - `PoolError::InvalidConfig` if the configuration is invalid
    /// - `PoolError::Internal` if a worker thread cannot be spawned
    pub fn start(config: &HarnessConfig) -> Result<Self, PoolError> {
        config.validate().map_err(PoolError::InvalidConfig)?;
        let pool = Arc::new(build_pool(config)?);
        let shutdown = CancelToken::new();
        let (events_tx, events) = bounded(EVENT_BUFFER);

        let mut supervisor = Self {
            pool,
            shutdown,
            leases: Vec::with_capacity(config.worker_count),
            workers: Vec::with_capacity(config.worker_count),
            events,
            dropped_events: Arc::new(AtomicUsize::new(0)),
        };

        for id in 0..config.worker_count {
            let lease = Arc::new(LeaseSlot::new());
            let ctx = WorkerContext {
                id,
                pool: Arc::clone(&supervisor.pool),
                shutdown: supervisor.shutdown.clone(),
                lease: Arc::clone(&lease),
                events: events_tx.clone(),
                dropped_events: Arc::clone(&supervisor.dropped_events),
                iterations: config.iterations,
                acquire_timeout: config.acquire_timeout(),
                lease_limit: config.lease_limit(),
            };
            let handle = thread::Builder::new()
                .name(format!("lease-worker-{id}"))
                .spawn(move || run_worker(ctx))
                .map_err(|e| {
                    // Workers already running stop via Drop.
                    PoolError::Internal(format!("failed to spawn worker {id}: {e}"))
                })?;
            supervisor.leases.push(lease);
            supervisor.workers.push(handle);
        }

        info!(
            pool = %supervisor.pool.name(),
            workers = config.worker_count,
            resources = config.resource_count,
            iterations = config.iterations,
            "supervisor started"
        );
        Ok(supervisor)
    }

    /// Stream of worker events.
    ///
    /// The buffer holds [`EVENT_BUFFER`] events. Workers never block on it;
    /// once it is full further events are dropped and counted in
    /// [`HarnessReport::dropped_events`], so drain it while workers run if
    /// every event matters.
    #[must_use]
    pub fn events(&self) -> Receiver<WorkerEvent> {
        self.events.clone()
    }

    /// Shared pool.
    #[must_use]
    pub const fn pool(&self) -> &Arc<ResourcePool<SimulatedOperation>> {
        &self.pool
    }

    /// Expire the lease `worker` currently holds. Returns `false` if the
    /// worker does not exist or holds nothing.
    pub fn expire_lease(&self, worker: usize) -> bool {
        let expired = self.leases.get(worker).is_some_and(|slot| slot.expire());
        debug!(worker, expired, "lease expiry requested");
        expired
    }

    /// Stop all workers: in-progress operations are interrupted, blocked
    /// acquires are woken, and no new acquires are admitted.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        self.pool.shutdown();
    }

    /// Whether a shutdown was requested, by the caller or by a failing worker.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Wait for every worker to exit and collect their summaries.
    #[must_use]
    pub fn join(mut self) -> HarnessReport {
        let workers = std::mem::take(&mut self.workers)
            .into_iter()
            .enumerate()
            .map(|(id, handle)| {
                handle.join().unwrap_or_else(|_| {
                    warn!(worker = id, "worker panicked");
                    WorkerSummary {
                        worker: id,
                        failed: Some(PoolError::Internal("worker panicked".into())),
                        ..WorkerSummary::default()
                    }
                })
            })
            .collect();

        let report = HarnessReport {
            workers,
            final_snapshot: self.pool.snapshot(),
            dropped_events: self.dropped_events.load(Ordering::Relaxed),
        };
        info!(
            completed = report.total_completed(),
            failures = report.failures().len(),
            dropped_events = report.dropped_events,
            "supervisor finished"
        );
        report
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        if !self.workers.is_empty() {
            // Signal but don't join; explicit join() is required for a report.
            self.shutdown();
            debug!("supervisor dropped without join - workers detached");
        }
    }
}
