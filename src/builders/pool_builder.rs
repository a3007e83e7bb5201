//! Builders to construct resource pools from harness configuration.

use crate::config::HarnessConfig;
use crate::core::{PoolError, ResourcePool};
use crate::runtime::SimulatedOperation;

/// One simulated resource per configured slot, all sharing the configured
/// duration range.
#[must_use]
pub fn build_resources(cfg: &HarnessConfig) -> Vec<SimulatedOperation> {
    let (min, max) = cfg.operation_range();
    (0..cfg.resource_count)
        .map(|id| SimulatedOperation::new(id, min, max))
        .collect()
}

/// Build the pool described by `cfg`.
///
/// # Errors
///
/// Returns `PoolError::InvalidConfig` if the configuration is invalid.
pub fn build_pool(cfg: &HarnessConfig) -> Result<ResourcePool<SimulatedOperation>, PoolError> {
    cfg.validate()
        .map_err(|e| PoolError::InvalidConfig(format!("config invalid: {e}")))?;
    ResourcePool::new(build_resources(cfg), cfg.pool.clone())
}
