//! Worker loop: acquire, operate, release, report.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Sender, TrySendError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::core::{CancelToken, PoolError, ResourceId, ResourcePool};
use crate::runtime::operation::{OperationOutcome, SimulatedOperation};
use crate::util::clock::now_ms;

/// What happened to a worker. These are the busy/free notifications an
/// observer such as a UI consumes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum WorkerEventKind {
    /// Resource became busy.
    Acquired {
        /// Claimed resource.
        resource: ResourceId,
    },
    /// Operation ran to completion.
    Completed {
        /// Resource used.
        resource: ResourceId,
        /// Time spent in milliseconds.
        elapsed_ms: u64,
    },
    /// Operation was cut short by lease expiry.
    LeaseExpired {
        /// Resource used.
        resource: ResourceId,
    },
    /// Resource became free.
    Released {
        /// Released resource.
        resource: ResourceId,
    },
    /// No admission within the acquire timeout.
    TimedOut,
    /// Worker stopped because of shutdown.
    Cancelled,
    /// Worker stopped on a fatal error.
    Failed {
        /// Error description.
        reason: String,
    },
}

/// Event emitted by a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerEvent {
    /// Worker index.
    pub worker: usize,
    /// Iteration the event belongs to.
    pub iteration: usize,
    /// Milliseconds since the Unix epoch.
    pub at_ms: u128,
    /// Event payload.
    pub kind: WorkerEventKind,
}

/// The lease token of whatever a worker currently holds, so a supervisor can
/// expire it from outside.
#[derive(Debug, Default)]
pub struct LeaseSlot {
    current: Mutex<Option<CancelToken>>,
}

impl LeaseSlot {
    /// Create an empty slot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn set(&self, token: Option<CancelToken>) {
        *self.current.lock() = token;
    }

    /// Cancel the current lease. Returns `false` when nothing is held.
    pub fn expire(&self) -> bool {
        let current = self.current.lock().clone();
        current.is_some_and(|token| {
            token.cancel();
            true
        })
    }
}

/// Per-run counters returned by [`run_worker`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerSummary {
    /// Worker index.
    pub worker: usize,
    /// Iterations whose operation ran to completion.
    pub completed: usize,
    /// Iterations cut short by lease expiry.
    pub expired: usize,
    /// Acquires that timed out.
    pub timed_out: usize,
    /// Whether the worker stopped because of shutdown.
    pub cancelled: bool,
    /// Fatal error that terminated the worker.
    pub failed: Option<PoolError>,
}

/// Everything one worker needs.
pub struct WorkerContext {
    /// Worker index.
    pub id: usize,
    /// Shared pool.
    pub pool: Arc<ResourcePool<SimulatedOperation>>,
    /// Supervisor-wide shutdown signal.
    pub shutdown: CancelToken,
    /// Where the current lease token is published.
    pub lease: Arc<LeaseSlot>,
    /// Event sink. Sends never block; events that do not fit are dropped.
    pub events: Sender<WorkerEvent>,
    /// Count of events dropped because the sink was full.
    pub dropped_events: Arc<AtomicUsize>,
    /// Cycles to run.
    pub iterations: usize,
    /// Bound on each acquire.
    pub acquire_timeout: Option<Duration>,
    /// Bound on each lease.
    pub lease_limit: Option<Duration>,
}

impl WorkerContext {
    fn emit(&self, iteration: usize, kind: WorkerEventKind) {
        let event = WorkerEvent {
            worker: self.id,
            iteration,
            at_ms: now_ms(),
            kind,
        };
        match self.events.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                if self.dropped_events.fetch_add(1, Ordering::Relaxed) == 0 {
                    warn!(worker = self.id, "event buffer full, dropping worker events");
                }
            }
            // Observer went away; the worker carries on regardless.
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    fn fail(&self, iteration: usize, summary: &mut WorkerSummary, err: PoolError) {
        error!(worker = self.id, iteration, error = %err, "worker terminated on fatal error");
        self.emit(
            iteration,
            WorkerEventKind::Failed {
                reason: err.to_string(),
            },
        );
        summary.failed = Some(err);
        self.shutdown.cancel();
        self.pool.shutdown();
    }
}

/// Run `ctx.iterations` acquire → operate → release cycles.
///
/// Stops early on shutdown (blocked acquires are woken) or on a fatal pool
/// error, in which case the whole supervisor is shut down as well. A held
/// resource is released on every exit path.
pub fn run_worker(ctx: WorkerContext) -> WorkerSummary {
    let mut summary = WorkerSummary {
        worker: ctx.id,
        ..WorkerSummary::default()
    };
    debug!(worker = ctx.id, iterations = ctx.iterations, "worker started");

    for iteration in 0..ctx.iterations {
        if ctx.shutdown.is_cancelled() {
            summary.cancelled = true;
            ctx.emit(iteration, WorkerEventKind::Cancelled);
            break;
        }

        let acquired = match ctx.acquire_timeout {
            Some(timeout) => ctx.pool.try_lease_for(&ctx.shutdown, timeout),
            None => ctx.pool.lease_cancellable(&ctx.shutdown).map(Some),
        };
        let guard = match acquired {
            Ok(Some(guard)) => guard,
            Ok(None) => {
                summary.timed_out += 1;
                ctx.emit(iteration, WorkerEventKind::TimedOut);
                continue;
            }
            Err(e) if e.is_cancellation() => {
                summary.cancelled = true;
                ctx.emit(iteration, WorkerEventKind::Cancelled);
                break;
            }
            Err(e) => {
                ctx.fail(iteration, &mut summary, e);
                break;
            }
        };

        let resource = guard.id();
        ctx.emit(iteration, WorkerEventKind::Acquired { resource });

        let lease = ctx.shutdown.child_token();
        ctx.lease.set(Some(lease.clone()));
        let outcome = guard.perform(&lease, ctx.lease_limit);
        ctx.lease.set(None);

        match outcome {
            OperationOutcome::Completed { elapsed } => {
                summary.completed += 1;
                ctx.emit(
                    iteration,
                    WorkerEventKind::Completed {
                        resource,
                        elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                    },
                );
            }
            OperationOutcome::Expired { .. } => {
                summary.expired += 1;
                ctx.emit(iteration, WorkerEventKind::LeaseExpired { resource });
            }
            OperationOutcome::Interrupted { .. } if ctx.shutdown.is_cancelled() => {
                debug!(worker = ctx.id, resource, "operation interrupted by shutdown");
            }
            OperationOutcome::Interrupted { .. } => {
                summary.expired += 1;
                ctx.emit(iteration, WorkerEventKind::LeaseExpired { resource });
            }
        }

        if let Err(e) = guard.release() {
            ctx.fail(iteration, &mut summary, e);
            break;
        }
        ctx.emit(iteration, WorkerEventKind::Released { resource });
    }

    info!(
        worker = ctx.id,
        completed = summary.completed,
        expired = summary.expired,
        timed_out = summary.timed_out,
        cancelled = summary.cancelled,
        "worker finished"
    );
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;
    use crossbeam_channel::unbounded;

    fn single_resource_pool(op_ms: u64) -> Arc<ResourcePool<SimulatedOperation>> {
        let op = Duration::from_millis(op_ms);
        Arc::new(
            ResourcePool::new(vec![SimulatedOperation::new(0, op, op)], PoolConfig::new("worker"))
                .unwrap(),
        )
    }

    fn context(
        pool: &Arc<ResourcePool<SimulatedOperation>>,
        iterations: usize,
        events: Sender<WorkerEvent>,
    ) -> WorkerContext {
        WorkerContext {
            id: 0,
            pool: Arc::clone(pool),
            shutdown: CancelToken::new(),
            lease: Arc::new(LeaseSlot::new()),
            events,
            dropped_events: Arc::new(AtomicUsize::new(0)),
            iterations,
            acquire_timeout: None,
            lease_limit: None,
        }
    }

    #[test]
    fn test_worker_reports_busy_then_free() {
        let pool = single_resource_pool(1);
        let (tx, rx) = unbounded();
        let summary = run_worker(context(&pool, 2, tx));

        assert_eq!(summary.completed, 2);
        assert!(summary.failed.is_none());
        let kinds: Vec<_> = rx.try_iter().map(|e| e.kind).collect();
        assert!(matches!(kinds[0], WorkerEventKind::Acquired { resource: 0 }));
        assert!(matches!(kinds[1], WorkerEventKind::Completed { resource: 0, .. }));
        assert!(matches!(kinds[2], WorkerEventKind::Released { resource: 0 }));
        assert_eq!(kinds.len(), 6);
        assert_eq!(pool.available_permits(), 1);
    }

    #[test]
    fn test_lease_limit_releases_resource() {
        let pool = single_resource_pool(5_000);
        let (tx, rx) = unbounded();
        let mut ctx = context(&pool, 1, tx);
        ctx.lease_limit = Some(Duration::from_millis(10));
        let summary = run_worker(ctx);

        assert_eq!(summary.expired, 1);
        assert!(rx
            .try_iter()
            .any(|e| e.kind == WorkerEventKind::LeaseExpired { resource: 0 }));
        assert_eq!(pool.available_permits(), 1);
    }

    #[test]
    fn test_acquire_timeout_reported() {
        let pool = single_resource_pool(1);
        let held = pool.acquire().unwrap();
        let (tx, rx) = unbounded();
        let mut ctx = context(&pool, 2, tx);
        ctx.acquire_timeout = Some(Duration::from_millis(10));
        let summary = run_worker(ctx);

        assert_eq!(summary.timed_out, 2);
        assert_eq!(rx.try_iter().count(), 2);
        pool.release(held).unwrap();
    }

    #[test]
    fn test_cancelled_before_start() {
        let pool = single_resource_pool(1);
        let (tx, _rx) = unbounded();
        let ctx = context(&pool, 5, tx);
        ctx.shutdown.cancel();
        let summary = run_worker(ctx);
        assert!(summary.cancelled);
        assert_eq!(summary.completed, 0);
    }

    #[test]
    fn test_lease_slot_expire_without_lease() {
        let slot = LeaseSlot::new();
        assert!(!slot.expire());
        let token = CancelToken::new();
        slot.set(Some(token.clone()));
        assert!(slot.expire());
        assert!(token.is_cancelled());
    }
}
