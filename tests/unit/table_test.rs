//! Tests for the public resource table strategies

use lease_pool::core::{AtomicTable, LockedTable, PoolError, ResourceTable};

fn exercise(table: &dyn ResourceTable) {
    assert_eq!(table.capacity(), 2);
    let first = table.try_claim_any().unwrap();
    let second = table.try_claim_any().unwrap();
    assert_ne!(first, second);
    assert!(table.try_claim_any().is_none());

    table.release(first).unwrap();
    assert_eq!(table.busy_ids(), vec![second]);
    assert_eq!(table.release(first), Err(PoolError::DoubleRelease { id: first }));
    assert_eq!(table.busy_ids(), vec![second]);
    assert_eq!(table.release(2), Err(PoolError::UnknownResource { id: 2 }));
}

#[test]
fn test_locked_table() {
    exercise(&LockedTable::new(2));
}

#[test]
fn test_atomic_table() {
    exercise(&AtomicTable::new(2));
}
