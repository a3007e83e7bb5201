//! Per-resource availability tracking.
//!
//! A [`ResourceTable`] knows, for each of its `K` entries, whether the entry is
//! free. Two interchangeable strategies are provided:
//!
//! - [`LockedTable`]: one `parking_lot::Mutex` serializes scan-and-flip.
//! - [`AtomicTable`]: one atomic flag per entry; claims race with
//!   compare-and-swap and never take a table-wide lock.
//!
//! Neither table knows about admission. Callers must only claim after the
//! admission gate granted a permit, which is what keeps a claim from coming
//! back empty.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::core::PoolError;

/// Index of a resource within its pool (`0..K`).
pub type ResourceId = usize;

/// Strategy used to track which resources are free.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableStrategy {
    /// Single mutex around the whole table.
    #[default]
    Locked,
    /// Independent atomic flag per entry.
    LockFree,
}

/// Availability table shared by all clients of a pool.
pub trait ResourceTable: Send + Sync {
    /// Number of entries.
    fn capacity(&self) -> usize;

    /// Flip one free entry to busy and return its id, or `None` if every entry
    /// is busy. The returned id is always one whose transition this call won.
    fn try_claim_any(&self) -> Option<ResourceId>;

    /// Flip entry `id` from busy back to free.
    ///
    /// # Errors
    ///
    /// - `PoolError::UnknownResource` if `id` is out of range
    /// - `PoolError::DoubleRelease` if the entry was already free
    fn release(&self, id: ResourceId) -> Result<(), PoolError>;

    /// Ids of busy entries. Entries are read one by one, so the result is only
    /// exact when no claim or release is in flight.
    fn busy_ids(&self) -> Vec<ResourceId>;

    /// Strategy implemented by this table.
    fn strategy(&self) -> TableStrategy;
}

/// Build a table of `capacity` free entries using `strategy`.
#[must_use]
pub fn new_table(strategy: TableStrategy, capacity: usize) -> Box<dyn ResourceTable> {
    match strategy {
        TableStrategy::Locked => Box::new(LockedTable::new(capacity)),
        TableStrategy::LockFree => Box::new(AtomicTable::new(capacity)),
    }
}

/// Mutex-guarded table. `available[i]` is true when entry `i` is free.
#[derive(Debug)]
pub struct LockedTable {
    available: Mutex<Vec<bool>>,
}

impl LockedTable {
    /// Create a table with every entry free.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            available: Mutex::new(vec![true; capacity]),
        }
    }
}

impl ResourceTable for LockedTable {
    fn capacity(&self) -> usize {
        self.available.lock().len()
    }

    fn try_claim_any(&self) -> Option<ResourceId> {
        let mut available = self.available.lock();
        let id = available.iter().position(|free| *free)?;
        available[id] = false;
        Some(id)
    }

    fn release(&self, id: ResourceId) -> Result<(), PoolError> {
        let mut available = self.available.lock();
        let slot = available
            .get_mut(id)
            .ok_or(PoolError::UnknownResource { id })?;
        if *slot {
            return Err(PoolError::DoubleRelease { id });
        }
        *slot = true;
        Ok(())
    }

    fn busy_ids(&self) -> Vec<ResourceId> {
        let available = self.available.lock();
        available
            .iter()
            .enumerate()
            .filter_map(|(id, free)| (!free).then_some(id))
            .collect()
    }

    fn strategy(&self) -> TableStrategy {
        TableStrategy::Locked
    }
}

/// Availability flag padded to its own cache line so neighbouring entries do
/// not contend.
#[derive(Debug)]
#[repr(align(64))]
struct Slot {
    available: AtomicBool,
}

/// Lock-free table: one CAS-guarded flag per entry.
#[derive(Debug)]
pub struct AtomicTable {
    slots: Box<[Slot]>,
}

impl AtomicTable {
    /// Create a table with every entry free.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let slots = (0..capacity)
            .map(|_| Slot {
                available: AtomicBool::new(true),
            })
            .collect();
        Self { slots }
    }
}

impl ResourceTable for AtomicTable {
    fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn try_claim_any(&self) -> Option<ResourceId> {
        self.slots.iter().position(|slot| {
            // Cheap read first so busy entries don't bounce their cache line.
            slot.available.load(Ordering::Relaxed)
                && slot
                    .available
                    .compare_exchange(true, false, Ordering::AcqRel, Ordering::Relaxed)
                    .is_ok()
        })
    }

    fn release(&self, id: ResourceId) -> Result<(), PoolError> {
        let slot = self.slots.get(id).ok_or(PoolError::UnknownResource { id })?;
        slot.available
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Relaxed)
            .map(|_| ())
            .map_err(|_| PoolError::DoubleRelease { id })
    }

    fn busy_ids(&self) -> Vec<ResourceId> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(id, slot)| (!slot.available.load(Ordering::Acquire)).then_some(id))
            .collect()
    }

    fn strategy(&self) -> TableStrategy {
        TableStrategy::LockFree
    }
}
