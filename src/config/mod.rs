//! Configuration models for pools and the worker harness.

pub mod pool;

pub use pool::{HarnessConfig, PoolConfig};
