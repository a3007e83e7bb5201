//! Fair counting semaphore bounding concurrent checkouts.
//!
//! The gate hands permits directly to the longest-waiting caller: a release
//! with a non-empty queue never touches the counter, it pops the front waiter
//! and marks it granted. A caller may only take the fast path when nobody is
//! queued, so a late arrival can never overtake a sleeping one. Together this
//! means the queue is only non-empty while the counter is zero.
//!
//! Every waiter sleeps on its own `Condvar`, so a release wakes exactly one
//! thread. Waits can be withdrawn by a deadline, a [`CancelToken`], or
//! [`AdmissionGate::close`]; withdrawing removes only that waiter and leaves
//! the order of the rest untouched.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, trace};

use crate::core::{CancelToken, PoolError};

/// A blocked caller. Flags are only written with the gate lock held.
struct Waiter {
    ticket: u64,
    cond: Condvar,
    granted: AtomicBool,
    cancelled: AtomicBool,
}

struct GateState {
    permits: usize,
    queue: VecDeque<Arc<Waiter>>,
    closed: bool,
    next_ticket: u64,
}

struct GateShared {
    state: Mutex<GateState>,
    /// Unsynchronized mirror of `state.permits` for diagnostics.
    permits_hint: AtomicUsize,
    capacity: usize,
}

impl GateShared {
    fn set_permits(&self, state: &mut GateState, permits: usize) {
        state.permits = permits;
        self.permits_hint.store(permits, Ordering::Relaxed);
    }
}

/// Counters observed under the gate lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateView {
    /// Permits not checked out.
    pub permits: usize,
    /// Callers blocked in the queue.
    pub waiters: usize,
    /// Whether the gate has been closed.
    pub closed: bool,
}

/// Strictly FIFO counting semaphore of fixed capacity.
pub struct AdmissionGate {
    shared: Arc<GateShared>,
}

impl AdmissionGate {
    /// Create a gate with `capacity` permits, all available.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            shared: Arc::new(GateShared {
                state: Mutex::new(GateState {
                    permits: capacity,
                    queue: VecDeque::new(),
                    closed: false,
                    next_ticket: 0,
                }),
                permits_hint: AtomicUsize::new(capacity),
                capacity,
            }),
        }
    }

    /// Total number of permits.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Take a permit, blocking in FIFO order until one is handed over.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::Shutdown` if the gate is closed before admission.
    pub fn acquire_blocking(&self) -> Result<(), PoolError> {
        self.acquire_until(None, None)
    }

    /// Take a permit only if one is free and nobody is queued.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::Shutdown` if the gate is closed.
    pub fn try_acquire(&self) -> Result<bool, PoolError> {
        let mut state = self.shared.state.lock();
        if state.closed {
            return Err(PoolError::Shutdown);
        }
        Ok(self.take_fast(&mut state))
    }

    /// Take a permit, giving up at `deadline` or when `token` fires.
    ///
    /// A waiter that was granted a permit keeps it even if the deadline or
    /// the token fires at the same moment.
    ///
    /// # Errors
    ///
    /// - `PoolError::Timeout` if `deadline` passed first
    /// - `PoolError::Cancelled` if `token` fired first
    /// - `PoolError::Shutdown` if the gate was closed first
    pub fn acquire_until(
        &self,
        deadline: Option<Instant>,
        token: Option<&CancelToken>,
    ) -> Result<(), PoolError> {
        let waiter = {
            let mut state = self.shared.state.lock();
            if state.closed {
                return Err(PoolError::Shutdown);
            }
            if self.take_fast(&mut state) {
                return Ok(());
            }
            if token.is_some_and(CancelToken::is_cancelled) {
                return Err(PoolError::Cancelled);
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Err(PoolError::Timeout);
            }

            let waiter = Arc::new(Waiter {
                ticket: state.next_ticket,
                cond: Condvar::new(),
                granted: AtomicBool::new(false),
                cancelled: AtomicBool::new(false),
            });
            state.next_ticket += 1;
            state.queue.push_back(Arc::clone(&waiter));
            trace!(ticket = waiter.ticket, queued = state.queue.len(), "waiter enqueued");
            waiter
        };

        // Registered with the gate unlocked: cancelling a token runs the
        // callback, which takes the gate lock.
        let registration = token.map(|token| {
            let id = token.register(wake_on_cancel(
                Arc::downgrade(&self.shared),
                Arc::clone(&waiter),
            ));
            if id.is_none() {
                waiter.cancelled.store(true, Ordering::Relaxed);
            }
            (token, id)
        });

        let outcome = self.wait(&waiter, deadline);

        if let Some((token, Some(id))) = registration {
            token.deregister(id);
        }
        outcome
    }

    fn take_fast(&self, state: &mut GateState) -> bool {
        if state.queue.is_empty() && state.permits > 0 {
            let permits = state.permits - 1;
            self.shared.set_permits(state, permits);
            true
        } else {
            false
        }
    }

    fn wait(&self, waiter: &Arc<Waiter>, deadline: Option<Instant>) -> Result<(), PoolError> {
        let mut state = self.shared.state.lock();
        loop {
            if waiter.granted.load(Ordering::Relaxed) {
                trace!(ticket = waiter.ticket, "waiter admitted");
                return Ok(());
            }
            let reason = if state.closed {
                Some(PoolError::Shutdown)
            } else if waiter.cancelled.load(Ordering::Relaxed) {
                Some(PoolError::Cancelled)
            } else if deadline.is_some_and(|d| Instant::now() >= d) {
                Some(PoolError::Timeout)
            } else {
                None
            };
            if let Some(reason) = reason {
                Self::withdraw(&mut state, waiter);
                debug!(ticket = waiter.ticket, reason = %reason, "waiter withdrawn");
                return Err(reason);
            }

            match deadline {
                Some(deadline) => {
                    waiter.cond.wait_until(&mut state, deadline);
                }
                None => waiter.cond.wait(&mut state),
            }
        }
    }

    /// Remove a not-yet-granted waiter. Granting pops from the front under
    /// the same lock, so an ungranted waiter is always still queued.
    fn withdraw(state: &mut MutexGuard<'_, GateState>, waiter: &Arc<Waiter>) {
        state.queue.retain(|queued| !Arc::ptr_eq(queued, waiter));
    }

    /// Return a permit, handing it to the longest waiter if there is one.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::PermitOverflow` if every permit is already free.
    pub fn release(&self) -> Result<(), PoolError> {
        let mut state = self.shared.state.lock();
        if let Some(next) = state.queue.pop_front() {
            next.granted.store(true, Ordering::Relaxed);
            next.cond.notify_one();
            trace!(ticket = next.ticket, "permit handed to waiter");
            return Ok(());
        }
        if state.permits >= self.shared.capacity {
            return Err(PoolError::PermitOverflow {
                capacity: self.shared.capacity,
            });
        }
        let permits = state.permits + 1;
        self.shared.set_permits(&mut state, permits);
        Ok(())
    }

    /// Close the gate: every queued waiter returns `PoolError::Shutdown` and
    /// later acquires fail immediately. Releases keep working.
    ///
    /// Returns `false` if the gate was already closed.
    pub fn close(&self) -> bool {
        let mut state = self.shared.state.lock();
        if state.closed {
            return false;
        }
        state.closed = true;
        for waiter in &state.queue {
            waiter.cond.notify_one();
        }
        debug!(woken = state.queue.len(), "admission gate closed");
        true
    }

    /// Whether [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed
    }

    /// Best-effort count of free permits. Not synchronized with concurrent
    /// acquires and releases; use for diagnostics only.
    #[must_use]
    pub fn available_permits(&self) -> usize {
        self.shared.permits_hint.load(Ordering::Relaxed)
    }

    /// Number of callers currently queued.
    #[must_use]
    pub fn waiting(&self) -> usize {
        self.shared.state.lock().queue.len()
    }

    /// Run `f` with the gate locked, so no admission or release can happen
    /// while it runs.
    pub(crate) fn with_view<T>(&self, f: impl FnOnce(GateView) -> T) -> T {
        let state = self.shared.state.lock();
        f(GateView {
            permits: state.permits,
            waiters: state.queue.len(),
            closed: state.closed,
        })
    }
}

fn wake_on_cancel(gate: Weak<GateShared>, waiter: Arc<Waiter>) -> Box<dyn FnOnce() + Send> {
    Box::new(move || {
        if let Some(gate) = gate.upgrade() {
            let _state = gate.state.lock();
            waiter.cancelled.store(true, Ordering::Relaxed);
            waiter.cond.notify_one();
        }
    })
}
