//! Cancellation tokens for blocked acquires and in-progress leases.
//!
//! A [`CancelToken`] is a shared, one-shot signal. Cancelling it wakes every
//! thread sleeping in [`CancelToken::wait_timeout`] and runs the wake
//! callbacks registered by blocked gate waiters, so no thread needs to poll.
//! Child tokens are cancelled together with their parent, which lets a
//! supervisor-wide shutdown reach every per-lease token.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

type Callback = Box<dyn FnOnce() + Send>;

struct TokenState {
    cancelled: bool,
    callbacks: Vec<(u64, Callback)>,
    next_id: u64,
}

struct TokenInner {
    state: Mutex<TokenState>,
    cond: Condvar,
    /// Mirror of `state.cancelled` for lock-free checks.
    cancelled: AtomicBool,
    /// Registration held on the parent token, removed when this token dies.
    parent: Mutex<Option<(Weak<TokenInner>, u64)>>,
}

impl TokenInner {
    fn new() -> Self {
        Self {
            state: Mutex::new(TokenState {
                cancelled: false,
                callbacks: Vec::new(),
                next_id: 0,
            }),
            cond: Condvar::new(),
            cancelled: AtomicBool::new(false),
            parent: Mutex::new(None),
        }
    }
}

impl Drop for TokenInner {
    fn drop(&mut self) {
        if let Some((parent, id)) = self.parent.get_mut().take() {
            if let Some(parent) = parent.upgrade() {
                parent.state.lock().callbacks.retain(|(cb_id, _)| *cb_id != id);
            }
        }
    }
}

/// Shared one-shot cancellation signal.
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<TokenInner>,
}

impl CancelToken {
    /// Create a token that has not been cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(TokenInner::new()),
        }
    }

    /// Create a token that is cancelled whenever `self` is.
    ///
    /// Cancelling the child does not affect the parent.
    #[must_use]
    pub fn child_token(&self) -> Self {
        let child = Self::new();
        let weak = Arc::downgrade(&child.inner);
        let registration = self.register(Box::new(move || {
            if let Some(inner) = weak.upgrade() {
                Self { inner }.cancel();
            }
        }));
        match registration {
            Some(id) => *child.inner.parent.lock() = Some((Arc::downgrade(&self.inner), id)),
            None => child.cancel(),
        }
        child
    }

    /// Fire the token. Idempotent.
    pub fn cancel(&self) {
        let callbacks = {
            let mut state = self.inner.state.lock();
            if state.cancelled {
                return;
            }
            state.cancelled = true;
            self.inner.cancelled.store(true, Ordering::Release);
            std::mem::take(&mut state.callbacks)
        };
        self.inner.cond.notify_all();
        // Callbacks take other locks; run them with the token unlocked.
        for (_, callback) in callbacks {
            callback();
        }
    }

    /// Whether the token has fired.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Sleep for up to `timeout`, returning early if the token fires.
    ///
    /// Returns `true` if the token was cancelled, `false` if the full
    /// duration elapsed.
    ///
    /// A timeout too large to express as an `Instant` waits for cancellation
    /// only.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        let mut state = self.inner.state.lock();
        while !state.cancelled {
            match deadline {
                Some(deadline) => {
                    if self.inner.cond.wait_until(&mut state, deadline).timed_out() {
                        return state.cancelled;
                    }
                }
                None => self.inner.cond.wait(&mut state),
            }
        }
        true
    }

    /// Register a callback to run once on cancellation.
    ///
    /// Returns `None` without storing the callback when the token has already
    /// fired; the caller is expected to act on the cancellation itself.
    pub(crate) fn register(&self, callback: Callback) -> Option<u64> {
        let mut state = self.inner.state.lock();
        if state.cancelled {
            return None;
        }
        let id = state.next_id;
        state.next_id += 1;
        state.callbacks.push((id, callback));
        Some(id)
    }

    /// Drop a callback that is no longer needed.
    pub(crate) fn deregister(&self, id: u64) {
        self.inner
            .state
            .lock()
            .callbacks
            .retain(|(cb_id, _)| *cb_id != id);
    }

    #[cfg(test)]
    fn registered(&self) -> usize {
        self.inner.state.lock().callbacks.len()
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
