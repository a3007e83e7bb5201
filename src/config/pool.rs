//! Pool and harness configuration structures.

use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::core::{AppResult, TableStrategy};

/// Prefix for environment overrides read by [`HarnessConfig::from_env`].
pub const ENV_PREFIX: &str = "LEASE_POOL_";

/// Pool configuration passed to [`ResourcePool::new`](crate::core::ResourcePool::new).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Name used in log output.
    pub name: String,
    /// How resource availability is tracked.
    pub strategy: TableStrategy,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            name: "default".into(),
            strategy: TableStrategy::default(),
        }
    }
}

impl PoolConfig {
    /// Create a configuration with the given name and the default strategy.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Set the table strategy.
    #[must_use]
    pub const fn with_strategy(mut self, strategy: TableStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Validate pool configuration values.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("name must not be empty".into());
        }
        Ok(())
    }
}

/// Configuration of a supervised run: the pool, its simulated resources, and
/// the workers hammering it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Pool settings.
    pub pool: PoolConfig,
    /// Number of resources (`K`).
    pub resource_count: usize,
    /// Shortest simulated operation, in milliseconds.
    pub min_operation_ms: u64,
    /// Longest simulated operation, in milliseconds.
    pub max_operation_ms: u64,
    /// Number of worker threads.
    pub worker_count: usize,
    /// Acquire/operate/release cycles per worker.
    pub iterations: usize,
    /// Give up on an acquire after this long; wait forever when unset.
    pub acquire_timeout_ms: Option<u64>,
    /// Expire a lease after this long; leases never expire when unset.
    pub lease_ms: Option<u64>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            pool: PoolConfig::default(),
            resource_count: 3,
            min_operation_ms: 1,
            max_operation_ms: 5,
            worker_count: num_cpus::get().max(2),
            iterations: 100,
            acquire_timeout_ms: None,
            lease_ms: None,
        }
    }
}

impl HarnessConfig {
    /// Validate harness configuration values.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        self.pool.validate().map_err(|e| format!("pool invalid: {e}"))?;
        if self.resource_count == 0 {
            return Err("resource_count must be greater than 0".into());
        }
        if self.worker_count == 0 {
            return Err("worker_count must be greater than 0".into());
        }
        if self.min_operation_ms > self.max_operation_ms {
            return Err("min_operation_ms must not exceed max_operation_ms".into());
        }
        if self.acquire_timeout_ms == Some(0) {
            return Err("acquire_timeout_ms must be greater than 0".into());
        }
        if self.lease_ms == Some(0) {
            return Err("lease_ms must be greater than 0".into());
        }
        Ok(())
    }

    /// Parse harness configuration from a JSON string and validate.
    ///
    /// # Errors
    ///
    /// Returns a parse or validation message.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load defaults overridden by `LEASE_POOL_*` environment variables,
    /// reading a `.env` file first if one exists.
    ///
    /// Recognised keys: `RESOURCES`, `WORKERS`, `ITERATIONS`, `MIN_OP_MS`,
    /// `MAX_OP_MS`, `ACQUIRE_TIMEOUT_MS`, `LEASE_MS`, `STRATEGY`
    /// (`locked` or `lock_free`) and `NAME`.
    ///
    /// # Errors
    ///
    /// Fails if a variable does not parse or the result is invalid.
    pub fn from_env() -> AppResult<Self> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(format!("{ENV_PREFIX}{key}")).ok())
    }

    /// Build a configuration from an arbitrary key lookup (keys without the
    /// prefix). Used by [`from_env`](Self::from_env).
    ///
    /// # Errors
    ///
    /// Fails if a value does not parse or the result is invalid.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> AppResult<Self> {
        fn parse<T: std::str::FromStr>(key: &str, raw: Option<String>) -> AppResult<Option<T>>
        where
            T::Err: std::error::Error + Send + Sync + 'static,
        {
            raw.map(|value| {
                value
                    .trim()
                    .parse::<T>()
                    .with_context(|| format!("{ENV_PREFIX}{key}={value:?} is not valid"))
            })
            .transpose()
        }

        let mut cfg = Self::default();
        if let Some(v) = parse("RESOURCES", lookup("RESOURCES"))? {
            cfg.resource_count = v;
        }
        if let Some(v) = parse("WORKERS", lookup("WORKERS"))? {
            cfg.worker_count = v;
        }
        if let Some(v) = parse("ITERATIONS", lookup("ITERATIONS"))? {
            cfg.iterations = v;
        }
        if let Some(v) = parse("MIN_OP_MS", lookup("MIN_OP_MS"))? {
            cfg.min_operation_ms = v;
        }
        if let Some(v) = parse("MAX_OP_MS", lookup("MAX_OP_MS"))? {
            cfg.max_operation_ms = v;
        }
        if let Some(v) = parse("ACQUIRE_TIMEOUT_MS", lookup("ACQUIRE_TIMEOUT_MS"))? {
            cfg.acquire_timeout_ms = Some(v);
        }
        if let Some(v) = parse("LEASE_MS", lookup("LEASE_MS"))? {
            cfg.lease_ms = Some(v);
        }
        if let Some(name) = lookup("NAME") {
            cfg.pool.name = name;
        }
        if let Some(raw) = lookup("STRATEGY") {
            cfg.pool.strategy = serde_json::from_value(serde_json::Value::String(raw.trim().into()))
                .with_context(|| format!("{ENV_PREFIX}STRATEGY={raw:?} is not a table strategy"))?;
        }

        cfg.validate().map_err(anyhow::Error::msg)?;
        Ok(cfg)
    }

    /// Bounds of the simulated operation duration.
    #[must_use]
    pub const fn operation_range(&self) -> (Duration, Duration) {
        (
            Duration::from_millis(self.min_operation_ms),
            Duration::from_millis(self.max_operation_ms),
        )
    }

    /// Acquire timeout, if any.
    #[must_use]
    pub fn acquire_timeout(&self) -> Option<Duration> {
        self.acquire_timeout_ms.map(Duration::from_millis)
    }

    /// Lease limit, if any.
    #[must_use]
    pub fn lease_limit(&self) -> Option<Duration> {
        self.lease_ms.map(Duration::from_millis)
    }
}
