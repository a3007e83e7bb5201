//! # Lease Pool
//!
//! A fixed-capacity pool of interchangeable, stateful resources shared by many
//! worker threads.
//!
//! ## Guarantees
//!
//! - **Bounded**: at most `K` resources are checked out at once.
//! - **Exclusive**: no resource is handed to two clients at the same time.
//! - **Fair**: blocked callers are admitted strictly in arrival order.
//! - **Pluggable bookkeeping**: availability is tracked by a mutex-guarded
//!   table or by a lock-free table of per-entry atomics, chosen at
//!   construction; both give the same external behavior.
//! - **Cancellable**: blocked acquires can be bounded by a timeout or
//!   withdrawn through a [`CancelToken`](crate::core::CancelToken), and held
//!   resources are released on every exit path through
//!   [`ResourceGuard`](crate::core::ResourceGuard).
//!
//! ## Components
//!
//! - [`core::ResourceTable`](crate::core::ResourceTable): which entries are free.
//! - [`core::AdmissionGate`](crate::core::AdmissionGate): FIFO counting semaphore of capacity `K`.
//! - [`core::ResourcePool`](crate::core::ResourcePool): composes the two into `acquire`/`release`.
//! - [`runtime::Supervisor`](crate::runtime::Supervisor): runs workers that acquire, operate for a random
//!   duration, and release, with lease expiry and shutdown.
//!
//! ```rust
//! use lease_pool::config::PoolConfig;
//! use lease_pool::core::{ResourcePool, TableStrategy};
//! use std::time::Duration;
//!
//! let pool = ResourcePool::new(
//!     vec!["scanner-a", "scanner-b"],
//!     PoolConfig::new("scanners").with_strategy(TableStrategy::LockFree),
//! )?;
//!
//! let handle = pool.acquire()?;
//! assert_eq!(pool.available_permits(), 1);
//! println!("using {}", pool.resource(&handle)?);
//! pool.release(handle)?;
//!
//! // Scoped form: released when the guard goes out of scope.
//! if let Some(guard) = pool.try_lease_for(&Default::default(), Duration::from_millis(50))? {
//!     println!("using {}", *guard);
//! }
//! assert_eq!(pool.available_permits(), 2);
//! # Ok::<(), lease_pool::core::PoolError>(())
//! ```

/// Core pool abstractions: table, gate, pool, cancellation.
pub mod core;
/// Configuration models for pools and the worker harness.
pub mod config;
/// Builders to construct pools from configuration.
pub mod builders;
/// Worker harness: simulated resources, worker loop, supervisor.
pub mod runtime;
/// Shared utilities.
pub mod util;
