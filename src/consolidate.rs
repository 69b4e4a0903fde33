//! Consolidation: collapsing a delta chain into a fresh base node and
//! atomically swapping it into the page table slot.

use std::collections::BTreeMap;
use std::ptr;

use tracing::debug;

use crate::delta::{ChainLink, ChainNode, DeltaRecord, Outcome};
use crate::epoch::Participant;
use crate::error::{IndexError, IndexResult};
use crate::node::BaseNode;
use crate::page_table::PageTable;

/// Outcome of a consolidation attempt that didn't error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsolidationOutcome {
    /// A new base node was installed; it holds this many present entries.
    Installed { entry_count: usize },
    /// Another writer changed the slot before the CAS; nothing changed.
    Superseded,
}

/// Collapse the delta chain at `page_id` into a fresh base node.
///
/// Pins the epoch for the duration of the walk and the publishing CAS, per
/// the algorithm in the consolidation design: walk the chain newest to
/// oldest recording each key's first (i.e. newest) decided outcome, merge
/// in the terminating base node's entries for keys not yet decided,
/// materialize the present entries as a sorted base node, and CAS it into
/// the slot. On success the superseded chain is hand to the epoch manager
/// for deferred reclamation, one node at a time; on failure the candidate
/// base node is discarded and nothing is retried here — the caller may
/// retry.
pub fn consolidate(
    table: &PageTable,
    page_id: u64,
    participant: &Participant<'_>,
) -> IndexResult<ConsolidationOutcome> {
    let _guard = participant.pin();

    let old_head = table.get(page_id)?;
    if old_head.is_null() {
        return Err(IndexError::SlotUnmapped { page_id });
    }

    let mut decided: BTreeMap<i64, Outcome> = BTreeMap::new();
    let mut current = old_head;
    loop {
        if current.is_null() {
            break;
        }
        // SAFETY: `current` is reachable from the page table slot we just
        // loaded under an active epoch pin, so it is either still live or
        // its reclamation is blocked by that very pin (I6).
        match unsafe { &*current } {
            ChainNode::Delta(DeltaRecord::Insert { key, value }, next) => {
                decided.entry(*key).or_insert(Outcome::Present(*value));
                current = *next;
            }
            ChainNode::Delta(DeltaRecord::Delete { key }, next) => {
                decided.entry(*key).or_insert(Outcome::Absent);
                current = *next;
            }
            ChainNode::Delta(DeltaRecord::Split { .. }, _)
            | ChainNode::Delta(DeltaRecord::Merge { .. }, _) => {
                return Err(IndexError::NeedsTreeStructuralHandling { page_id });
            }
            ChainNode::Base(base) => {
                for (k, v) in base.iter() {
                    decided.entry(k).or_insert(Outcome::Present(v));
                }
                break;
            }
        }
    }

    let entries: Vec<(i64, u64)> = decided
        .into_iter()
        .filter_map(|(k, outcome)| match outcome {
            Outcome::Present(v) => Some((k, v)),
            Outcome::Absent => None,
        })
        .collect();
    let entry_count = entries.len();
    let new_base: ChainLink = crate::delta::new_base(BaseNode::from_sorted(entries));

    match table.update(page_id, old_head, new_base)? {
        Ok(()) => {
            debug!(page_id, entry_count, "consolidation installed");
            // SAFETY: the CAS above made `old_head`'s chain unreachable
            // from the page table; any reader still walking it pinned an
            // epoch no later than this one, so deferring through the same
            // participant before dropping this guard is sound.
            unsafe { defer_free_chain(old_head, participant) };
            Ok(ConsolidationOutcome::Installed { entry_count })
        }
        Err(_observed) => {
            // SAFETY: `new_base` was never published; we are its only
            // owner.
            unsafe { crate::delta::free_chain(new_base) };
            debug!(page_id, "consolidation superseded");
            Ok(ConsolidationOutcome::Superseded)
        }
    }
}

/// Hand every node in the chain starting at `head` to the epoch manager
/// for deferred reclamation, one node at a time.
///
/// # Safety
///
/// `head` must no longer be reachable from any page-table slot.
unsafe fn defer_free_chain(head: ChainLink, participant: &Participant<'_>) {
    let mut current = head;
    while !current.is_null() {
        let next = match &*current {
            ChainNode::Delta(_, next) => *next,
            ChainNode::Base(_) => ptr::null_mut(),
        };
        participant.defer_free(current);
        current = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::epoch::EpochManager;

    fn table_with_chain(capacity: u64, head: ChainLink) -> PageTable {
        let t = PageTable::new(capacity);
        t.set(0, head).unwrap();
        t
    }

    #[test]
    fn consolidates_inserts_into_sorted_base() {
        let mgr = EpochManager::new(64);
        let p = mgr.register();

        let mut head = crate::delta::end_of_chain();
        for i in (0..5).rev() {
            head = crate::delta::new_insert(i, (i as u64) * 10, head);
        }
        let table = table_with_chain(4, head);

        let outcome = consolidate(&table, 0, &p).unwrap();
        assert_eq!(outcome, ConsolidationOutcome::Installed { entry_count: 5 });

        let new_head = table.get(0).unwrap();
        unsafe {
            assert_eq!(crate::delta::chain_length(new_head), 0);
            assert_eq!(crate::delta::lookup(new_head, 3).unwrap(), Some(30));
        }
    }

    #[test]
    fn delete_drops_the_key_from_the_base() {
        let mgr = EpochManager::new(64);
        let p = mgr.register();

        let base = crate::delta::new_base(crate::node::BaseNode::empty());
        let d1 = crate::delta::new_insert(1, 100, base);
        let d2 = crate::delta::new_delete(1, d1);
        let table = table_with_chain(2, d2);

        let outcome = consolidate(&table, 0, &p).unwrap();
        assert_eq!(outcome, ConsolidationOutcome::Installed { entry_count: 0 });

        let new_head = table.get(0).unwrap();
        unsafe {
            assert_eq!(crate::delta::lookup(new_head, 1).unwrap(), None);
        }
    }

    #[test]
    fn consolidate_always_operates_on_the_current_head() {
        let mgr = EpochManager::new(64);
        let p = mgr.register();

        let head = crate::delta::new_insert(1, 1, crate::delta::end_of_chain());
        let table = table_with_chain(2, head);

        // A writer that raced ahead of us already swung the slot before we
        // ever called consolidate; consolidate must fold the chain that is
        // actually there, not one observed earlier by the caller.
        let other = crate::delta::new_insert(2, 2, crate::delta::end_of_chain());
        table.set(0, other).unwrap();

        let outcome = consolidate(&table, 0, &p).unwrap();
        assert_eq!(outcome, ConsolidationOutcome::Installed { entry_count: 1 });
        unsafe {
            assert_eq!(crate::delta::lookup(table.get(0).unwrap(), 2).unwrap(), Some(2));
        }
    }

    #[test]
    fn racing_consolidations_never_corrupt_the_index() {
        use std::sync::Arc;
        use std::thread;

        let mgr = Arc::new(EpochManager::new(64));
        let table = Arc::new({
            let t = PageTable::new(1);
            let base = crate::delta::new_base(crate::node::BaseNode::empty());
            t.set(0, base).unwrap();
            t
        });

        let mut handles = Vec::new();
        for t in 0..4 {
            let mgr = Arc::clone(&mgr);
            let table = Arc::clone(&table);
            handles.push(thread::spawn(move || {
                let participant = mgr.register();
                for i in 0..50 {
                    let key = t * 1000 + i;
                    let guard = participant.pin();
                    let mut backoff = crate::backoff::Backoff::new();
                    loop {
                        let head = table.get(0).unwrap();
                        let new_head = crate::delta::new_insert(key, key as u64, head);
                        match table.update(0, head, new_head).unwrap() {
                            Ok(()) => break,
                            Err(_) => {
                                unsafe { drop(Box::from_raw(new_head)) };
                                backoff.backoff();
                            }
                        }
                    }
                    drop(guard);
                    if i % 10 == 0 {
                        let _ = consolidate(&table, 0, &participant);
                    }
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        let final_head = table.get(0).unwrap();
        for t in 0..4i64 {
            for i in 0..50i64 {
                let key = t * 1000 + i;
                unsafe {
                    assert_eq!(
                        crate::delta::lookup(final_head, key).unwrap(),
                        Some(key as u64)
                    );
                }
            }
        }
    }

    #[test]
    fn structural_delta_is_surfaced_not_misapplied() {
        let mgr = EpochManager::new(64);
        let p = mgr.register();

        let split = Box::into_raw(Box::new(ChainNode::Delta(
            DeltaRecord::Split {
                split_key: 10,
                sibling_page_id: 1,
            },
            crate::delta::end_of_chain(),
        )));
        let table = table_with_chain(2, split);

        let outcome = consolidate(&table, 0, &p);
        assert!(matches!(
            outcome,
            Err(IndexError::NeedsTreeStructuralHandling { page_id: 0 })
        ));

        unsafe { drop(Box::from_raw(split)) };
    }

    #[test]
    fn unmapped_slot_is_an_error() {
        let mgr = EpochManager::new(64);
        let p = mgr.register();
        let table = PageTable::new(2);
        assert!(matches!(
            consolidate(&table, 0, &p),
            Err(IndexError::SlotUnmapped { page_id: 0 })
        ));
    }
}
