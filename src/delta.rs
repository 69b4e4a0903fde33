//! The delta-chain data model: a tagged sum type of immutable update
//! records, singly linked newest-to-oldest, terminated by a base node or
//! null.
//!
//! The chain is heterogeneous — Insert, Delete, Split, and Merge records
//! coexist on the same chain, and a base node can terminate it directly
//! (a page whose chain was just consolidated with nothing layered on top
//! yet). Rather than identify a record's kind by casting its address
//! through a heuristic (the defect this design explicitly replaces — see
//! the design notes on heterogeneous delta-chain types), every allocation
//! in a chain is the same Rust type, [`ChainNode`], an explicit tagged sum:
//! the discriminant is a `match` arm, not a pointer shape.

use std::ptr;

use crate::node::BaseNode;

/// One link in a delta chain: either an update record with a `next` link,
/// or the base node that terminates the chain.
pub enum ChainNode {
    /// An immutable update record.
    Delta(DeltaRecord, ChainLink),
    /// The sorted snapshot terminating the chain.
    Base(BaseNode),
}

/// The next link from a delta record: another chain node, or the end of
/// the chain (a logical node that was never consolidated after its last
/// delete brought it to empty).
pub type ChainLink = *mut ChainNode;

/// Null chain link, spelled for readability at call sites.
#[must_use]
pub const fn end_of_chain() -> ChainLink {
    ptr::null_mut()
}

/// An immutable update record (invariant I5: never mutated after its
/// address becomes reachable from a page-table slot).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaRecord {
    /// Establishes `key -> value` at this chain position.
    Insert { key: i64, value: u64 },
    /// Tombstones `key` at this chain position.
    Delete { key: i64 },
    /// Keys `>= split_key` logically live at `sibling_page_id`.
    Split { split_key: i64, sibling_page_id: u64 },
    /// This node has been folded into `merged_into_page_id`.
    Merge { merged_into_page_id: u64 },
}

/// The per-key outcome of walking a chain: what the newest delta mentioning
/// a key says should happen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The key is present with this value.
    Present(u64),
    /// The key is absent (a Delete decided it).
    Absent,
}

/// Allocate a new Insert delta chained onto `next`.
#[must_use]
pub fn new_insert(key: i64, value: u64, next: ChainLink) -> ChainLink {
    Box::into_raw(Box::new(ChainNode::Delta(
        DeltaRecord::Insert { key, value },
        next,
    )))
}

/// Allocate a new Delete delta chained onto `next`.
#[must_use]
pub fn new_delete(key: i64, next: ChainLink) -> ChainLink {
    Box::into_raw(Box::new(ChainNode::Delta(DeltaRecord::Delete { key }, next)))
}

/// Allocate a base node as a (terminal) chain node.
#[must_use]
pub fn new_base(base: BaseNode) -> ChainLink {
    Box::into_raw(Box::new(ChainNode::Base(base)))
}

/// Chain length from `head` to the terminator (a base node or null),
/// counting only delta links. Bounded by construction (I2: acyclic) — the
/// walk cannot loop, since every `next` was set once, before publication,
/// to a value observed before this allocation existed.
///
/// # Safety
///
/// `head` and every reachable `next` must be a live `ChainNode` (or null);
/// the caller must hold an epoch pin for the duration of the walk.
#[must_use]
pub unsafe fn chain_length(head: ChainLink) -> usize {
    let mut len = 0;
    let mut current = head;
    while !current.is_null() {
        match &*current {
            ChainNode::Delta(_, next) => {
                len += 1;
                current = *next;
            }
            ChainNode::Base(_) => break,
        }
    }
    len
}

/// Walk the chain from `head` looking for `key`, applying "first match
/// wins" (the newest delta mentioning the key decides the outcome). If the
/// walk reaches a Split or Merge delta before deciding the key, traversal
/// stops and reports that the page needs tree-structural handling — this
/// core does not attempt to apply those as data deltas (see design notes).
///
/// # Safety
///
/// Same as [`chain_length`].
pub unsafe fn lookup(head: ChainLink, key: i64) -> Result<Option<u64>, StructuralDelta> {
    let mut current = head;
    while !current.is_null() {
        match &*current {
            ChainNode::Delta(DeltaRecord::Insert { key: k, value }, next) => {
                if *k == key {
                    return Ok(Some(*value));
                }
                current = *next;
            }
            ChainNode::Delta(DeltaRecord::Delete { key: k }, next) => {
                if *k == key {
                    return Ok(None);
                }
                current = *next;
            }
            ChainNode::Delta(DeltaRecord::Split { .. }, _)
            | ChainNode::Delta(DeltaRecord::Merge { .. }, _) => {
                return Err(StructuralDelta);
            }
            ChainNode::Base(base) => {
                return Ok(base.get(key));
            }
        }
    }
    Ok(None)
}

/// Walk the chain collecting every key's newest-wins outcome in the
/// half-open range `[lo, hi)`. Present entries are returned in ascending
/// key order; tombstoned and superseded entries are dropped.
///
/// # Safety
///
/// Same as [`chain_length`].
pub unsafe fn scan(head: ChainLink, lo: i64, hi: i64) -> Result<Vec<(i64, u64)>, StructuralDelta> {
    use std::collections::BTreeMap;

    let mut decided: BTreeMap<i64, Outcome> = BTreeMap::new();
    let mut current = head;
    while !current.is_null() {
        match &*current {
            ChainNode::Delta(DeltaRecord::Insert { key, value }, next) => {
                if *key >= lo && *key < hi {
                    decided.entry(*key).or_insert(Outcome::Present(*value));
                }
                current = *next;
            }
            ChainNode::Delta(DeltaRecord::Delete { key }, next) => {
                if *key >= lo && *key < hi {
                    decided.entry(*key).or_insert(Outcome::Absent);
                }
                current = *next;
            }
            ChainNode::Delta(DeltaRecord::Split { .. }, _)
            | ChainNode::Delta(DeltaRecord::Merge { .. }, _) => {
                return Err(StructuralDelta);
            }
            ChainNode::Base(base) => {
                for (k, v) in base.range(lo, hi) {
                    decided.entry(k).or_insert(Outcome::Present(v));
                }
                break;
            }
        }
    }
    Ok(decided
        .into_iter()
        .filter_map(|(k, outcome)| match outcome {
            Outcome::Present(v) => Some((k, v)),
            Outcome::Absent => None,
        })
        .collect())
}

/// A chain walk reached a Split or Merge delta. Tree-structural extension
/// is out of scope for this single-node core (see design notes); the
/// caller surfaces this as [`crate::error::IndexError::NeedsTreeStructuralHandling`].
#[derive(Debug, Clone, Copy)]
pub struct StructuralDelta;

/// Free an entire chain of `ChainNode`s starting at `head` (not including
/// anything reachable only through a prior consolidation — this is used to
/// hand a superseded chain to the epoch manager one node at a time).
///
/// # Safety
///
/// Every node in the chain must be unreachable from any page-table slot
/// and must not be freed more than once.
pub unsafe fn free_chain(head: ChainLink) {
    let mut current = head;
    while !current.is_null() {
        let boxed = Box::from_raw(current);
        current = match &*boxed {
            ChainNode::Delta(_, next) => *next,
            ChainNode::Base(_) => ptr::null_mut(),
        };
    }
}
