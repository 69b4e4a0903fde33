//! Randomized property tests for the universal invariants of the index
//! engine (page table identity, CAS semantics, backoff monotonicity,
//! write visibility, delete precedence, newest-wins, search agreement,
//! consolidation refinement, and chain acyclicity).

use std::collections::HashMap;

use proptest::prelude::*;

use bwtree_core::backoff::Backoff;
use bwtree_core::delta::{self, ChainLink};
use bwtree_core::epoch::EpochManager;
use bwtree_core::page_table::PageTable;
use bwtree_core::search::{lower_bound_scalar, lower_bound_vectorized};
use bwtree_core::{Config, Index};

proptest! {
    /// P1: a slot written with `set(id, v)` with no intervening successful
    /// `update` reads back exactly `v`.
    #[test]
    fn page_table_identity(id in 0u64..16, raw in any::<u64>()) {
        let table = PageTable::new(16);
        let value = raw as ChainLink;
        table.set(id, value).unwrap();
        prop_assert_eq!(table.get(id).unwrap(), value);
    }

    /// P2: `update(id, e, d)` mutates the slot iff it currently equals `e`;
    /// on failure the slot is unchanged.
    #[test]
    fn cas_semantics(actual in any::<u64>(), expected in any::<u64>(), desired in any::<u64>()) {
        let table = PageTable::new(1);
        table.set(0, actual as ChainLink).unwrap();

        let result = table.update(0, expected as ChainLink, desired as ChainLink).unwrap();
        if actual == expected {
            prop_assert!(result.is_ok());
            prop_assert_eq!(table.get(0).unwrap(), desired as ChainLink);
        } else {
            prop_assert_eq!(result, Err(actual as ChainLink));
            prop_assert_eq!(table.get(0).unwrap(), actual as ChainLink);
        }
    }

    /// P3: after N `backoff()` calls with no `reset()`, the attempt
    /// counter is N, and `should_retry(M)` holds iff `N < M`.
    #[test]
    fn backoff_monotonicity(n in 0u32..30, m in 0u32..30) {
        let mut b = Backoff::new();
        for _ in 0..n {
            b.backoff();
        }
        prop_assert_eq!(b.attempts(), n);
        prop_assert_eq!(b.should_retry(m), n < m);
    }

    /// P8: scalar and vectorized ordered search return identical indices
    /// for every (sorted array, target) input.
    #[test]
    fn search_agreement(
        mut keys in prop::collection::vec(-200i64..200, 0..200),
        target in -250i64..250,
    ) {
        keys.sort_unstable();
        prop_assert_eq!(
            lower_bound_scalar(&keys, target),
            lower_bound_vectorized(&keys, target),
        );
    }

    /// P5/P6/P7: a randomized sequence of inserts and deletes on a small
    /// key space, replayed both against the index and against a plain
    /// `HashMap` reference model, must agree on every lookup — this
    /// covers write visibility, delete precedence, and newest-wins
    /// together, since a model replay is the natural way to check all
    /// three against the same trace.
    #[test]
    fn write_sequence_matches_reference_model(
        ops in prop::collection::vec(
            (0i64..8, any::<bool>(), any::<u64>()),
            0..200,
        ),
    ) {
        let idx = Index::new(Config::default()).unwrap();
        let p = idx.register();
        let mut model: HashMap<i64, u64> = HashMap::new();

        for (key, is_insert, value) in ops {
            if is_insert {
                idx.insert(&p, key, value).unwrap();
                model.insert(key, value);
            } else {
                idx.delete(&p, key).unwrap();
                model.remove(&key);
            }
        }

        for key in 0i64..8 {
            prop_assert_eq!(idx.lookup(&p, key).unwrap(), model.get(&key).copied());
        }
    }

    /// P9: a successful consolidation preserves the observable mapping —
    /// lookups before and immediately after agree for every key, with no
    /// intervening write.
    #[test]
    fn consolidation_preserves_lookups(
        ops in prop::collection::vec(
            (0i64..8, any::<bool>(), any::<u64>()),
            1..100,
        ),
    ) {
        let idx = Index::new(Config::default()).unwrap();
        let p = idx.register();
        for (key, is_insert, value) in ops {
            if is_insert {
                idx.insert(&p, key, value).unwrap();
            } else {
                idx.delete(&p, key).unwrap();
            }
        }

        let before: Vec<_> = (0i64..8).map(|k| idx.lookup(&p, k).unwrap()).collect();
        let _ = idx.consolidate(&p);
        let after: Vec<_> = (0i64..8).map(|k| idx.lookup(&p, k).unwrap()).collect();
        prop_assert_eq!(before, after);
    }

    /// P10: starting from any observed head, the `next` walk terminates
    /// within a bounded number of steps (no chain cycle), for chains built
    /// from arbitrary insert/delete sequences.
    #[test]
    fn chain_walk_terminates(n in 0usize..500) {
        let mut head: ChainLink = delta::end_of_chain();
        for i in 0..n {
            head = if i % 3 == 0 {
                delta::new_delete(i as i64, head)
            } else {
                delta::new_insert(i as i64, i as u64, head)
            };
        }
        let len = unsafe { delta::chain_length(head) };
        prop_assert!(len <= n);
        unsafe { delta::free_chain(head) };
    }
}

/// P4: EBR safety, checked as a bounded randomized stress sequence rather
/// than an exhaustive model — every freed address is dropped exactly once
/// and only after the manager's own accounting considers it safe, so a
/// double-free or use-after-free here would show up as a crash under
/// Miri/ASan rather than a silent assertion failure.
#[test]
fn ebr_randomized_pin_defer_collect_sequence() {
    let mgr = EpochManager::new(8);
    let writer = mgr.register();
    let reader = mgr.register();

    let mut reader_guard = None;
    for step in 0..2000u32 {
        match step % 7 {
            0 => reader_guard = Some(reader.pin()),
            1 => reader_guard = None,
            2 => {
                let ptr: *mut u64 = Box::into_raw(Box::new(step as u64));
                unsafe { writer.defer_free(ptr) };
            }
            3 => mgr.advance_global(),
            4 => writer.try_collect(),
            5 => reader.try_collect(),
            _ => {}
        }
    }
    drop(reader_guard);
    writer.flush();
    reader.flush();
    assert_eq!(writer.pending_garbage(), 0);
    assert_eq!(reader.pending_garbage(), 0);
}
