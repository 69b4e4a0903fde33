//! The index façade: binds backoff, epoch reclamation, the page table,
//! delta chains, and consolidation into the public Insert / Lookup /
//! Delete / Range-Scan / Consolidate / Collect operations.
//!
//! One logical page id, the root (0), serves as the sole node; tree-
//! structural extension (splits/merges across many pages) is out of scope
//! for this core (see the design notes on tree-structural deltas).

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tracing::trace;

use crate::backoff::Backoff;
use crate::config::Config;
use crate::consolidate::{consolidate, ConsolidationOutcome};
use crate::delta::{self, ChainLink};
use crate::epoch::{EpochManager, Participant};
use crate::error::{IndexError, IndexResult};
use crate::page_table::PageTable;

/// The sole logical page id this core operates on.
pub const ROOT_PAGE_ID: u64 = 0;

/// Writes between each opportunistic `advance_global` + collection attempt.
const ADVANCE_INTERVAL: u64 = 8;

/// A latch-free ordered key-value index over a single root node.
pub struct Index {
    table: PageTable,
    epoch: EpochManager,
    config: Config,
    writes_since_advance: AtomicU64,
}

impl Index {
    /// Build an index from `config`, rejecting an invalid one.
    pub fn new(config: Config) -> IndexResult<Self> {
        config.validate()?;
        Ok(Self {
            table: PageTable::new(config.page_table_capacity),
            epoch: EpochManager::new(config.garbage_batch_size),
            config,
            writes_since_advance: AtomicU64::new(0),
        })
    }

    /// The configuration this index was built with.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Register a new participant (one per reader/writer thread) for use
    /// with every other operation on this index.
    #[must_use]
    pub fn register(&self) -> Participant<'_> {
        self.epoch.register()
    }

    /// Append an Insert delta for `key -> value`. Repeated inserts of the
    /// same key do not overwrite in place; the newest delta wins at read
    /// time until a consolidation deduplicates.
    pub fn insert(&self, participant: &Participant<'_>, key: i64, value: u64) -> IndexResult<()> {
        self.write(participant, |next| delta::new_insert(key, value, next))
    }

    /// Append a Delete delta tombstoning `key`.
    pub fn delete(&self, participant: &Participant<'_>, key: i64) -> IndexResult<()> {
        self.write(participant, |next| delta::new_delete(key, next))
    }

    /// `(present, value)` for `key`, per the chain's newest-wins semantics.
    /// `present` is false if the newest delta for `key` is a Delete, or if
    /// the key never appears.
    pub fn lookup(&self, participant: &Participant<'_>, key: i64) -> IndexResult<Option<u64>> {
        let _guard = participant.pin();
        let head = self.table.get(ROOT_PAGE_ID)?;
        unsafe { delta::lookup(head, key) }.map_err(|_| IndexError::NeedsTreeStructuralHandling {
            page_id: ROOT_PAGE_ID,
        })
    }

    /// Entries with `lo <= key < hi`, in ascending key order, each key's
    /// outcome decided by its newest delta.
    pub fn scan(&self, participant: &Participant<'_>, lo: i64, hi: i64) -> IndexResult<Vec<(i64, u64)>> {
        let _guard = participant.pin();
        let head = self.table.get(ROOT_PAGE_ID)?;
        unsafe { delta::scan(head, lo, hi) }.map_err(|_| IndexError::NeedsTreeStructuralHandling {
            page_id: ROOT_PAGE_ID,
        })
    }

    /// Collapse the root's delta chain into a fresh base node. See
    /// [`crate::consolidate::consolidate`] for the algorithm.
    pub fn consolidate(&self, participant: &Participant<'_>) -> IndexResult<ConsolidationOutcome> {
        consolidate(&self.table, ROOT_PAGE_ID, participant)
    }

    /// Best-effort EBR collection against `participant`'s own deferred
    /// queue. Never blocks and never fails.
    pub fn collect_garbage(&self, participant: &Participant<'_>) {
        participant.try_collect();
    }

    /// Append-delta protocol shared by `insert` and `delete`: pin the
    /// epoch, loop allocating a delta chained onto the observed head and
    /// CASing it into the root slot, backing off on conflict, requesting
    /// consolidation once published if the chain grew past threshold, and
    /// periodically nudging the epoch forward.
    fn write(
        &self,
        participant: &Participant<'_>,
        make_delta: impl Fn(ChainLink) -> ChainLink,
    ) -> IndexResult<()> {
        let _guard = participant.pin();
        let mut backoff = Backoff::with_bounds(
            Duration::from_nanos(self.config.backoff_min_ns),
            Duration::from_nanos(self.config.backoff_max_ns),
        );

        loop {
            let head = self.table.get(ROOT_PAGE_ID)?;
            let candidate = make_delta(head);

            match self.table.update(ROOT_PAGE_ID, head, candidate)? {
                Ok(()) => {
                    // SAFETY: candidate was just published and is reachable
                    // only through the slot we hold a pin over; walking it
                    // under that same pin is sound.
                    let len = unsafe { delta::chain_length(candidate) };
                    if len > self.config.max_delta_chain_length {
                        let _ = self.consolidate(participant);
                    }
                    self.maybe_advance_and_collect(participant);
                    return Ok(());
                }
                Err(_observed) => {
                    // SAFETY: candidate was never published; we are its
                    // only owner, and freeing it does not touch `head`.
                    unsafe { drop(Box::from_raw(candidate)) };
                    if !backoff.should_retry(self.config.cas_max_retries) {
                        trace!(
                            page_id = ROOT_PAGE_ID,
                            retries = self.config.cas_max_retries,
                            "write retry cap exhausted"
                        );
                        return Err(IndexError::CapacityExceeded {
                            page_id: ROOT_PAGE_ID,
                            retries: self.config.cas_max_retries,
                        });
                    }
                    backoff.backoff();
                }
            }
        }
    }

    fn maybe_advance_and_collect(&self, participant: &Participant<'_>) {
        let count = self.writes_since_advance.fetch_add(1, Ordering::Relaxed) + 1;
        if count % ADVANCE_INTERVAL == 0 {
            self.epoch.advance_global();
            participant.try_collect();
        }
    }
}
