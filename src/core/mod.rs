//! Core pool abstractions: availability table, admission gate, and the pool
//! composing them.

pub mod cancel;
pub mod error;
pub mod gate;
pub mod resource_pool;
pub mod table;

pub use cancel::CancelToken;
pub use error::{AppResult, PoolError};
pub use gate::{AdmissionGate, GateView};
pub use resource_pool::{Handle, PoolSnapshot, ResourceGuard, ResourcePool};
pub use table::{new_table, AtomicTable, LockedTable, ResourceId, ResourceTable, TableStrategy};
