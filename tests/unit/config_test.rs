//! Tests for configuration validation

use lease_pool::config::{HarnessConfig, PoolConfig};
use lease_pool::core::TableStrategy;

#[test]
fn test_pool_config_validation() {
    assert!(PoolConfig::new("gazers").validate().is_ok());
    assert!(PoolConfig::new("  ").validate().is_err());
    assert_eq!(PoolConfig::default().strategy, TableStrategy::Locked);
}

#[test]
fn test_harness_config_defaults_are_valid() {
    let cfg = HarnessConfig::default();
    assert!(cfg.validate().is_ok());
    assert!(cfg.worker_count >= 2);
    assert_eq!(cfg.resource_count, 3);
}

#[test]
fn test_harness_config_invalid_ranges() {
    let invalid = HarnessConfig {
        min_operation_ms: 10,
        max_operation_ms: 5,
        ..HarnessConfig::default()
    };
    assert!(invalid.validate().is_err());

    let invalid = HarnessConfig {
        lease_ms: Some(0),
        ..HarnessConfig::default()
    };
    assert!(invalid.validate().is_err());

    let invalid = HarnessConfig {
        resource_count: 0,
        ..HarnessConfig::default()
    };
    assert!(invalid.validate().is_err());
}

#[test]
fn test_harness_config_from_json() {
    let json = r#"{
        "pool": { "name": "gazers", "strategy": "lock_free" },
        "resource_count": 5,
        "min_operation_ms": 2,
        "max_operation_ms": 8,
        "worker_count": 12,
        "iterations": 50,
        "lease_ms": 100
    }"#;

    let cfg = HarnessConfig::from_json_str(json).unwrap();
    assert_eq!(cfg.pool.strategy, TableStrategy::LockFree);
    assert_eq!(cfg.resource_count, 5);
    assert_eq!(cfg.acquire_timeout_ms, None);
    assert_eq!(cfg.lease_ms, Some(100));
}

#[test]
fn test_harness_config_from_json_rejects_invalid() {
    assert!(HarnessConfig::from_json_str(r#"{ "worker_count": 0 }"#).is_err());
    assert!(HarnessConfig::from_json_str("not json").is_err());
}
