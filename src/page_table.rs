//! The page table: a fixed-capacity array of atomic 64-bit slots mapping a
//! logical page id to the address of its delta-chain head. The sole
//! cross-component synchronization point in this design.

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::trace;

use crate::delta::ChainLink;
use crate::error::{IndexError, IndexResult};

/// A fixed-capacity table of atomic head pointers, indexed by logical page
/// id. Slot 0 (unmapped) is the initial state of every slot; a nonzero
/// slot holds the address of a live [`crate::delta::ChainNode`] (invariant
/// I1).
pub struct PageTable {
    slots: Box<[AtomicU64]>,
}

impl PageTable {
    /// Create a table with `capacity` zero-initialized (unmapped) slots.
    #[must_use]
    pub fn new(capacity: u64) -> Self {
        let capacity = usize::try_from(capacity).expect("capacity must fit in usize");
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || AtomicU64::new(0));
        Self {
            slots: slots.into_boxed_slice(),
        }
    }

    /// The table's fixed capacity.
    #[must_use]
    pub fn capacity(&self) -> u64 {
        self.slots.len() as u64
    }

    fn slot(&self, id: u64) -> IndexResult<&AtomicU64> {
        self.slots
            .get(usize::try_from(id).unwrap_or(usize::MAX))
            .ok_or(IndexError::PageIdOutOfRange {
                page_id: id,
                capacity: self.capacity(),
            })
    }

    /// Load the current head pointer for `id` with acquire ordering.
    pub fn get(&self, id: u64) -> IndexResult<ChainLink> {
        Ok(self.slot(id)?.load(Ordering::Acquire) as ChainLink)
    }

    /// Unconditionally publish `value` as the head pointer for `id`, with
    /// release ordering.
    pub fn set(&self, id: u64, value: ChainLink) -> IndexResult<()> {
        self.slot(id)?.store(value as u64, Ordering::Release);
        Ok(())
    }

    /// Compare-and-swap the slot for `id` from `expected` to `desired` with
    /// acquire-release ordering on success. On failure, returns the
    /// observed current value so a retry loop can proceed without a
    /// second load.
    pub fn update(
        &self,
        id: u64,
        expected: ChainLink,
        desired: ChainLink,
    ) -> IndexResult<Result<(), ChainLink>> {
        let slot = self.slot(id)?;
        match slot.compare_exchange(
            expected as u64,
            desired as u64,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => Ok(Ok(())),
            Err(observed) => {
                trace!(page_id = id, "page table CAS failed, retry with observed head");
                Ok(Err(observed as ChainLink))
            }
        }
    }
}
