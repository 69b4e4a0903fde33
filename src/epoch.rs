//! Epoch-based safe memory reclamation.
//!
//! Epoch-based reclamation (EBR) defers freeing memory that a concurrent
//! reader might still be observing. A process-wide global epoch advances
//! periodically; each participant publishes the epoch it last observed
//! while pinned. A retired pointer is only freed once every participant
//! that could have seen it has advanced at least two epochs past its
//! retirement — the two-epoch margin guarantees that any reader which had
//! already loaded the pointer before retirement has since exited.
//!
//! The global epoch, the participant list, and each participant's deferred
//! free queue live in an explicit [`EpochManager`] value rather than a
//! module-level static, so a test (or an embedding application) can run
//! several independent instances side by side.

use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicU64, Ordering};

use crossbeam_utils::CachePadded;
use tracing::{debug, trace};

/// Epochs a retired pointer must survive before it may be freed.
const EPOCH_GRACE: u64 = 2;

/// Sentinel stored in a participant's pinned-epoch slot when it is not
/// inside a critical section. Chosen as the maximum value so an unpinned
/// participant never appears to bound the minimum pinned epoch.
const UNPINNED: u64 = u64::MAX;

struct Retired {
    ptr: *mut (),
    free: unsafe fn(*mut ()),
    retire_epoch: u64,
}

// SAFETY: a `Retired` is only ever touched by the participant that queued
// it, and the pointer it carries was allocated via `Box` by that same
// participant.
unsafe impl Send for Retired {}

#[repr(C)]
struct ParticipantRecord {
    // Every other participant's `min_pinned_epoch` scan reads this field
    // across threads on every pin/unpin; padding it to its own cache line
    // keeps that traffic off the line backing `garbage`, which only the
    // owning thread ever touches.
    pinned_epoch: CachePadded<AtomicU64>,
    next: AtomicPtr<ParticipantRecord>,
    garbage: std::cell::UnsafeCell<Vec<Retired>>,
}

impl ParticipantRecord {
    fn new() -> Self {
        Self {
            pinned_epoch: CachePadded::new(AtomicU64::new(UNPINNED)),
            next: AtomicPtr::new(ptr::null_mut()),
            garbage: std::cell::UnsafeCell::new(Vec::new()),
        }
    }
}

/// Process-wide (or test-scoped) epoch reclamation state.
///
/// Create one `EpochManager` at system start and share it (typically
/// behind an `Arc`) with every component that registers a [`Participant`].
pub struct EpochManager {
    global: AtomicU64,
    records: AtomicPtr<ParticipantRecord>,
    garbage_batch_size: usize,
}

impl EpochManager {
    /// Create a new epoch manager with the given auto-collect batch size.
    #[must_use]
    pub fn new(garbage_batch_size: usize) -> Self {
        Self {
            global: AtomicU64::new(0),
            records: AtomicPtr::new(ptr::null_mut()),
            garbage_batch_size,
        }
    }

    /// The current global epoch.
    #[must_use]
    pub fn global_epoch(&self) -> u64 {
        self.global.load(Ordering::Acquire)
    }

    /// Advance the global epoch by one. Invoked periodically from writer
    /// paths; never blocks and never fails.
    pub fn advance_global(&self) {
        let prev = self.global.fetch_add(1, Ordering::AcqRel);
        debug!(from = prev, to = prev + 1, "epoch advanced");
    }

    /// Register a new participant (typically one per thread). The returned
    /// handle owns its slot in the participant list for as long as it
    /// lives; registering leaks the slot's backing allocation for the life
    /// of the manager, matching the append-only participant registry this
    /// design is grounded on.
    pub fn register(&self) -> Participant<'_> {
        let record = Box::into_raw(Box::new(ParticipantRecord::new()));
        loop {
            let head = self.records.load(Ordering::Relaxed);
            unsafe {
                (*record).next.store(head, Ordering::Relaxed);
            }
            if self
                .records
                .compare_exchange_weak(head, record, Ordering::Release, Ordering::Relaxed)
                .is_ok()
            {
                break;
            }
        }
        Participant {
            manager: self,
            record,
            _not_send_sync: std::marker::PhantomData,
        }
    }

    /// Minimum pinned epoch across all participants, or `None` if no
    /// participant is currently pinned (nothing bounds reclamation).
    fn min_pinned_epoch(&self) -> Option<u64> {
        let mut min = None;
        let mut current = self.records.load(Ordering::Acquire);
        while !current.is_null() {
            let record = unsafe { &*current };
            let pinned = record.pinned_epoch.load(Ordering::Acquire);
            if pinned != UNPINNED {
                min = Some(match min {
                    Some(m) if m <= pinned => m,
                    _ => pinned,
                });
            }
            current = record.next.load(Ordering::Acquire);
        }
        min
    }
}

/// A registered participant (one per reader/writer thread).
///
/// Not `Send`/`Sync`: a participant's deferred-free queue is touched only
/// by the thread that owns it.
pub struct Participant<'a> {
    manager: &'a EpochManager,
    record: *mut ParticipantRecord,
    _not_send_sync: std::marker::PhantomData<*mut ()>,
}

impl<'a> Participant<'a> {
    /// Pin the current global epoch, returning a scoped guard. The guard's
    /// `Drop` clears the pinned slot unconditionally, so a pin is released
    /// on every exit path of the enclosing operation — including early
    /// returns and panics.
    pub fn pin(&self) -> Guard<'a, '_> {
        let record = unsafe { &*self.record };
        let epoch = self.manager.global_epoch();
        record.pinned_epoch.store(epoch, Ordering::Release);
        Guard {
            participant: self,
            epoch,
        }
    }

    /// Defer freeing `ptr` until no pinned participant could still observe
    /// it. If the queue has grown past the configured batch size, attempt
    /// a collection immediately.
    ///
    /// # Safety
    ///
    /// `ptr` must have been allocated with `Box::new` and must not be
    /// freed or dereferenced by anyone else afterwards.
    pub unsafe fn defer_free<T>(&self, ptr: *mut T) {
        let record = &*self.record;
        let retire_epoch = self.manager.global_epoch();
        let garbage = &mut *record.garbage.get();
        garbage.push(Retired {
            ptr: ptr as *mut (),
            free: |p| drop(Box::from_raw(p as *mut T)),
            retire_epoch,
        });
        if garbage.len() >= self.manager.garbage_batch_size {
            self.try_collect();
        }
    }

    /// Best-effort collection: free every entry in this participant's own
    /// queue whose retire epoch is at least [`EPOCH_GRACE`] behind the
    /// minimum pinned epoch across all participants. Never blocks; if the
    /// computed bound doesn't clear anything, it simply returns having
    /// freed nothing.
    pub fn try_collect(&self) {
        let bound = self.manager.min_pinned_epoch();
        let record = unsafe { &*self.record };
        let garbage = unsafe { &mut *record.garbage.get() };

        let before = garbage.len();
        garbage.retain(|item| {
            let safe = match bound {
                None => true,
                Some(min) => item.retire_epoch + EPOCH_GRACE <= min,
            };
            if safe {
                unsafe { (item.free)(item.ptr) };
            }
            !safe
        });
        let freed = before - garbage.len();
        if freed > 0 {
            trace!(freed, remaining = garbage.len(), "epoch collection");
        }
    }

    /// Free the entire deferred queue unconditionally. Shutdown-only: the
    /// caller must ensure no participant could still be observing anything
    /// in the queue (e.g. all threads have joined).
    pub fn flush(&self) {
        let record = unsafe { &*self.record };
        let garbage = unsafe { &mut *record.garbage.get() };
        for item in garbage.drain(..) {
            unsafe { (item.free)(item.ptr) };
        }
    }

    /// Number of entries currently queued for this participant.
    #[must_use]
    pub fn pending_garbage(&self) -> usize {
        let record = unsafe { &*self.record };
        unsafe { (*record.garbage.get()).len() }
    }
}

impl Drop for Participant<'_> {
    fn drop(&mut self) {
        // Leaked intentionally: the record may still be linked into the
        // manager's list and read by `min_pinned_epoch` from other
        // threads. Mark it permanently unpinned so it never blocks
        // reclamation again.
        let record = unsafe { &*self.record };
        record.pinned_epoch.store(UNPINNED, Ordering::Release);
    }
}

/// A scoped epoch pin. Dropping the guard clears the participant's pinned
/// slot, signalling that it may no longer be observing anything retired
/// before this pin.
pub struct Guard<'a, 'p> {
    participant: &'p Participant<'a>,
    epoch: u64,
}

impl Guard<'_, '_> {
    /// The global epoch observed when this guard was created.
    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.epoch
    }
}

impl Drop for Guard<'_, '_> {
    fn drop(&mut self) {
        let record = unsafe { &*self.participant.record };
        record.pinned_epoch.store(UNPINNED, Ordering::Release);
    }
}
