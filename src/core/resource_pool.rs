//! Resource pool: admission gate plus availability table.
//!
//! Acquire takes a permit from the [`AdmissionGate`] and only then claims an
//! entry from the [`ResourceTable`]. Release frees the entry first and returns
//! the permit second, so a newly admitted caller always finds a free entry.
//! The coupling gives, at every quiescent point:
//!
//! ```text
//! capacity - available_permits == busy entries
//! ```
//!
//! and at every instant `busy entries <= capacity - available_permits`.
//! Gate and table change in two separate steps, so exact equality cannot hold
//! mid-operation; the quiescent equality plus the always-true bound is the
//! gate/table invariant, checked by [`PoolSnapshot::is_consistent`] and
//! [`PoolSnapshot::is_bounded`].

use std::ops::Deref;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::PoolConfig;
use crate::core::table::{new_table, ResourceId, ResourceTable, TableStrategy};
use crate::core::{AdmissionGate, CancelToken, PoolError};

/// Capability for one checked-out resource. Consumed by
/// [`ResourcePool::release`].
#[derive(Debug, PartialEq, Eq)]
#[must_use = "a handle that is never released keeps its resource busy forever"]
pub struct Handle {
    id: ResourceId,
    pool: Uuid,
}

impl Handle {
    /// Id of the claimed resource.
    #[must_use]
    pub const fn id(&self) -> ResourceId {
        self.id
    }

    /// Id of the pool that issued this handle.
    #[must_use]
    pub const fn pool_id(&self) -> Uuid {
        self.pool
    }
}

/// Pool state read with the admission gate locked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolSnapshot {
    /// Number of resources.
    pub capacity: usize,
    /// Permits not checked out.
    pub available_permits: usize,
    /// Ids of table entries marked busy.
    pub busy: Vec<ResourceId>,
    /// Callers blocked on admission.
    pub waiters: usize,
    /// Whether the pool has been shut down.
    pub closed: bool,
    /// Table strategy in use.
    pub strategy: TableStrategy,
}

impl PoolSnapshot {
    /// Permits currently checked out.
    #[must_use]
    pub const fn permits_in_use(&self) -> usize {
        self.capacity - self.available_permits
    }

    /// Exact gate/table agreement. Holds whenever no acquire or release is
    /// between its gate step and its table step.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.permits_in_use() == self.busy.len()
    }

    /// Agreement that holds at every instant, even mid-operation.
    #[must_use]
    pub fn is_bounded(&self) -> bool {
        self.busy.len() <= self.permits_in_use()
    }
}

/// Fixed-capacity pool of interchangeable resources with fair admission.
pub struct ResourcePool<R> {
    id: Uuid,
    name: String,
    resources: Vec<R>,
    table: Box<dyn ResourceTable>,
    gate: AdmissionGate,
}

impl<R> ResourcePool<R> {
    /// Create a pool owning `resources`; capacity is `resources.len()`.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::InvalidConfig` if `resources` is empty or the
    /// configuration is invalid.
    pub fn new(resources: Vec<R>, config: PoolConfig) -> Result<Self, PoolError> {
        config.validate().map_err(PoolError::InvalidConfig)?;
        if resources.is_empty() {
            return Err(PoolError::InvalidConfig(
                "a pool needs at least one resource".into(),
            ));
        }

        let capacity = resources.len();
        let pool = Self {
            id: Uuid::new_v4(),
            name: config.name,
            table: new_table(config.strategy, capacity),
            gate: AdmissionGate::new(capacity),
            resources,
        };
        info!(
            pool = %pool.name,
            capacity,
            strategy = ?config.strategy,
            "resource pool initialized"
        );
        Ok(pool)
    }

    /// Block until a resource is free, in FIFO order with other callers.
    ///
    /// # Errors
    ///
    /// - `PoolError::Shutdown` if the pool is shut down while waiting
    /// - `PoolError::InvariantViolated` if admission succeeded but no entry
    ///   was free
    pub fn acquire(&self) -> Result<Handle, PoolError> {
        self.admit_and_claim(None, None)
    }

    /// Like [`acquire`](Self::acquire), but give up after `timeout`.
    ///
    /// Returns `Ok(None)` when the timeout elapses; that is a normal outcome.
    ///
    /// # Errors
    ///
    /// Same as [`acquire`](Self::acquire).
    pub fn try_acquire_timeout(&self, timeout: Duration) -> Result<Option<Handle>, PoolError> {
        Self::timeout_to_none(self.admit_and_claim(deadline_after(timeout), None))
    }

    /// Like [`acquire`](Self::acquire), but abort when `token` fires.
    ///
    /// # Errors
    ///
    /// - `PoolError::Cancelled` if `token` fired before admission
    /// - otherwise as [`acquire`](Self::acquire)
    pub fn acquire_cancellable(&self, token: &CancelToken) -> Result<Handle, PoolError> {
        self.admit_and_claim(None, Some(token))
    }

    /// Bounded and cancellable acquire. `Ok(None)` on timeout.
    ///
    /// # Errors
    ///
    /// Same as [`acquire_cancellable`](Self::acquire_cancellable).
    pub fn try_acquire_for(
        &self,
        token: &CancelToken,
        timeout: Duration,
    ) -> Result<Option<Handle>, PoolError> {
        Self::timeout_to_none(self.admit_and_claim(deadline_after(timeout), Some(token)))
    }

    /// Claim a resource only if one is free right now and nobody is queued.
    ///
    /// # Errors
    ///
    /// Same as [`acquire`](Self::acquire).
    pub fn try_acquire(&self) -> Result<Option<Handle>, PoolError> {
        if !self.gate.try_acquire()? {
            return Ok(None);
        }
        self.claim().map(Some)
    }

    fn timeout_to_none(result: Result<Handle, PoolError>) -> Result<Option<Handle>, PoolError> {
        match result {
            Ok(handle) => Ok(Some(handle)),
            Err(PoolError::Timeout) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn admit_and_claim(
        &self,
        deadline: Option<Instant>,
        token: Option<&CancelToken>,
    ) -> Result<Handle, PoolError> {
        self.gate.acquire_until(deadline, token)?;
        self.claim()
    }

    /// Claim a table entry for an already admitted caller.
    fn claim(&self) -> Result<Handle, PoolError> {
        match self.table.try_claim_any() {
            Some(id) => {
                debug!(pool = %self.name, resource = id, "resource claimed");
                Ok(Handle { id, pool: self.id })
            }
            None => {
                error!(
                    pool = %self.name,
                    available_permits = self.gate.available_permits(),
                    "admitted caller found no free resource"
                );
                Err(PoolError::InvariantViolated(
                    "admission granted but every resource is busy".into(),
                ))
            }
        }
    }

    /// Return a resource to the pool.
    ///
    /// The entry is marked free before the permit is returned, so the waiter
    /// the permit goes to always finds it.
    ///
    /// # Errors
    ///
    /// - `PoolError::ForeignHandle` if the handle came from another pool
    /// - `PoolError::UnknownResource` / `PoolError::DoubleRelease` if the
    ///   entry cannot go from busy to free
    /// - `PoolError::InvariantViolated` if the gate had no permit out
    pub fn release(&self, handle: Handle) -> Result<(), PoolError> {
        if handle.pool != self.id {
            warn!(pool = %self.name, resource = handle.id, "rejected handle from another pool");
            return Err(PoolError::ForeignHandle);
        }
        self.table.release(handle.id).inspect_err(|e| {
            warn!(pool = %self.name, resource = handle.id, error = %e, "release rejected");
        })?;
        self.gate.release().map_err(|e| {
            error!(pool = %self.name, resource = handle.id, error = %e, "gate refused permit");
            PoolError::InvariantViolated(format!(
                "resource {} was busy but no permit was out: {e}",
                handle.id
            ))
        })?;
        debug!(pool = %self.name, resource = handle.id, "resource released");
        Ok(())
    }

    /// Payload of the resource `handle` refers to.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::ForeignHandle` or `PoolError::UnknownResource` for
    /// a handle this pool did not issue.
    pub fn resource(&self, handle: &Handle) -> Result<&R, PoolError> {
        if handle.pool != self.id {
            return Err(PoolError::ForeignHandle);
        }
        self.resources
            .get(handle.id)
            .ok_or(PoolError::UnknownResource { id: handle.id })
    }

    /// Blocking acquire returning a guard that releases on drop.
    ///
    /// # Errors
    ///
    /// Same as [`acquire`](Self::acquire).
    pub fn lease(&self) -> Result<ResourceGuard<'_, R>, PoolError> {
        self.acquire().map(|handle| self.guard(handle))
    }

    /// Cancellable acquire returning a guard that releases on drop.
    ///
    /// # Errors
    ///
    /// Same as [`acquire_cancellable`](Self::acquire_cancellable).
    pub fn lease_cancellable(&self, token: &CancelToken) -> Result<ResourceGuard<'_, R>, PoolError> {
        self.acquire_cancellable(token).map(|handle| self.guard(handle))
    }

    /// Bounded, cancellable acquire returning a guard. `Ok(None)` on timeout.
    ///
    /// # Errors
    ///
    /// Same as [`try_acquire_for`](Self::try_acquire_for).
    pub fn try_lease_for(
        &self,
        token: &CancelToken,
        timeout: Duration,
    ) -> Result<Option<ResourceGuard<'_, R>>, PoolError> {
        Ok(self
            .try_acquire_for(token, timeout)?
            .map(|handle| self.guard(handle)))
    }

    fn guard(&self, handle: Handle) -> ResourceGuard<'_, R> {
        ResourceGuard {
            pool: self,
            resource: &self.resources[handle.id],
            id: handle.id,
            handle: Some(handle),
        }
    }

    /// Wake every blocked caller with `PoolError::Shutdown` and refuse new
    /// acquires. Held resources can still be released. Idempotent.
    pub fn shutdown(&self) {
        if self.gate.close() {
            info!(pool = %self.name, "resource pool shut down");
        }
    }

    /// Whether [`shutdown`](Self::shutdown) has been called.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.gate.is_closed()
    }

    /// Best-effort count of free permits; diagnostics only.
    #[must_use]
    pub fn available_permits(&self) -> usize {
        self.gate.available_permits()
    }

    /// Number of callers blocked on admission.
    #[must_use]
    pub fn waiting(&self) -> usize {
        self.gate.waiting()
    }

    /// Number of resources.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.resources.len()
    }

    /// Table strategy chosen at construction.
    #[must_use]
    pub fn strategy(&self) -> TableStrategy {
        self.table.strategy()
    }

    /// Unique id of this pool instance.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Configured pool name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Gate counters and busy entries, read with the gate locked.
    #[must_use]
    pub fn snapshot(&self) -> PoolSnapshot {
        self.gate.with_view(|view| PoolSnapshot {
            capacity: self.capacity(),
            available_permits: view.permits,
            busy: self.table.busy_ids(),
            waiters: view.waiters,
            closed: view.closed,
            strategy: self.table.strategy(),
        })
    }
}

/// Deadline `timeout` from now, or none if it lies beyond what `Instant`
/// can represent.
fn deadline_after(timeout: Duration) -> Option<Instant> {
    Instant::now().checked_add(timeout)
}

/// Scoped checkout: derefs to the resource and releases it when dropped.
pub struct ResourceGuard<'a, R> {
    pool: &'a ResourcePool<R>,
    resource: &'a R,
    id: ResourceId,
    handle: Option<Handle>,
}

impl<R> ResourceGuard<'_, R> {
    /// Id of the held resource.
    #[must_use]
    pub const fn id(&self) -> ResourceId {
        self.id
    }

    /// Release now and report the outcome instead of logging it.
    ///
    /// # Errors
    ///
    /// Same as [`ResourcePool::release`].
    pub fn release(mut self) -> Result<(), PoolError> {
        match self.handle.take() {
            Some(handle) => self.pool.release(handle),
            None => Ok(()),
        }
    }

    /// Detach the handle; the caller becomes responsible for releasing it.
    pub fn into_handle(mut self) -> Option<Handle> {
        self.handle.take()
    }
}

impl<R> Deref for ResourceGuard<'_, R> {
    type Target = R;

    fn deref(&self) -> &R {
        self.resource
    }
}

impl<R> Drop for ResourceGuard<'_, R> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            if let Err(e) = self.pool.release(handle) {
                error!(pool = %self.pool.name, resource = self.id, error = %e, "release on drop failed");
            }
        }
    }
}
