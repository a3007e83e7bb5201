//! Tests for error types

use lease_pool::core::PoolError;

#[test]
fn test_double_release_error() {
    let err = PoolError::DoubleRelease { id: 2 };
    assert_eq!(format!("{}", err), "double release of resource 2");
    assert!(err.is_protocol_violation());
    assert!(err.is_fatal());
}

#[test]
fn test_permit_overflow_error() {
    let err = PoolError::PermitOverflow { capacity: 3 };
    assert_eq!(format!("{}", err), "permit overflow: gate capacity is 3");
    assert!(err.is_protocol_violation());
}

#[test]
fn test_invariant_violation_error() {
    let err = PoolError::InvariantViolated("no free entry".to_string());
    assert_eq!(format!("{}", err), "internal invariant violated: no free entry");
    assert!(err.is_fatal());
    assert!(!err.is_cancellation());
}

#[test]
fn test_cancellation_errors() {
    assert_eq!(format!("{}", PoolError::Cancelled), "acquire cancelled");
    assert_eq!(format!("{}", PoolError::Shutdown), "pool has been shut down");
    assert!(PoolError::Cancelled.is_cancellation());
    assert!(!PoolError::Cancelled.is_fatal());
    assert!(!PoolError::Timeout.is_cancellation());
}
