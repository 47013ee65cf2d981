//! Epoch-protected single-writer, many-reader cell.
//!
//! Readers announce themselves by publishing the current epoch into one of
//! a fixed array of cache-line-isolated slots, then dereference the
//! current value inside a closure. A writer swaps the value pointer and
//! bumps the global epoch; the displaced value may be freed once no slot
//! still holds an epoch at or below the retirement epoch. Reads never
//! block writers and writers never block reads; only writers serialize
//! against each other.

use core::cell::Cell;
use core::ops::Deref;
use core::ptr;
use core::sync::atomic::{AtomicPtr, AtomicU64, Ordering};

use crossbeam_utils::{Backoff, CachePadded};
use rand::Rng;

use crate::sync::SpinMutex;

/// Number of reader slots. More concurrent readers than slots is legal
/// (latecomers scan for a free slot), but up to this many readers can run
/// without ever colliding.
const EPOCH_SLOTS: usize = 128;

thread_local! {
    /// Preferred slot index of this thread, chosen once so steady-state
    /// reads skip the randomization.
    static READER_SLOT: Cell<Option<usize>> = const { Cell::new(None) };
}

/// Slot index for the calling thread, seeded uniformly on first use so
/// threads disperse across the slot array.
fn thread_slot() -> usize {
    READER_SLOT.with(|slot| match slot.get() {
        Some(index) => index,
        None => {
            let index = rand::rng().random_range(0..EPOCH_SLOTS);
            slot.set(Some(index));
            index
        }
    })
}

/// Clears the claimed slot on every exit path, including a panicking
/// visitor. A reader that unwinds without publishing its departure would
/// wedge every future reclamation check.
struct SlotGuard<'a> {
    slot: &'a AtomicU64,
}

impl Drop for SlotGuard<'_> {
    #[inline]
    fn drop(&mut self) {
        // Pairs with the SeqCst loads in `can_reclaim`: once this store
        // is visible the reader no longer holds the value.
        self.slot.store(0, Ordering::Release);
    }
}

/// An epoch-protected shared value: one writer, many non-blocking readers.
///
/// The protocol is a bounded-slot variant of epoch-based reclamation.
/// `slots[i]` is nonzero exactly while some reader is inside its read
/// scope on slot `i`; a value retired at epoch `E` is freed only when
/// every nonzero slot holds an epoch strictly greater than `E`.
pub struct RcuCell<T> {
    /// The live value. Null only during destruction.
    current: AtomicPtr<T>,
    /// Monotonically increasing; starts at 1 because 0 in a slot means
    /// "not reading".
    global_epoch: AtomicU64,
    /// One epoch slot per cache line; readers CAS themselves in.
    slots: Box<[CachePadded<AtomicU64>]>,
    /// Serializes writers only.
    writer_lock: SpinMutex<()>,
}

// Values may be created on one thread and dropped on another (T: Send);
// readers on any thread receive `&T` (T: Sync).
unsafe impl<T: Send + Sync> Send for RcuCell<T> {}
unsafe impl<T: Send + Sync> Sync for RcuCell<T> {}

impl<T> RcuCell<T> {
    /// Creates a cell owning `initial` as its current value.
    pub fn new(initial: T) -> Self {
        Self {
            current: AtomicPtr::new(Box::into_raw(Box::new(initial))),
            global_epoch: AtomicU64::new(1),
            slots: (0..EPOCH_SLOTS)
                .map(|_| CachePadded::new(AtomicU64::new(0)))
                .collect(),
            writer_lock: SpinMutex::new(()),
        }
    }

    /// Runs `visitor` with a shared reference to the current value and
    /// returns its result.
    ///
    /// Lock-free in the common case: the thread's preferred slot is
    /// claimed with one CAS. If that slot is occupied the claim degrades
    /// to a circular scan over the slot array, which must terminate
    /// because each concurrent reader occupies exactly one slot.
    ///
    /// Returns `R::default()` without running the visitor in the
    /// (destruction-only) case where no value is present.
    pub fn read<F, R>(&self, visitor: F) -> R
    where
        F: FnOnce(&T) -> R,
        R: Default,
    {
        let mut index = thread_slot();
        let epoch = self.global_epoch.load(Ordering::Acquire);

        // Claim a slot by publishing our epoch. SeqCst on the CAS puts
        // the claim into a single total order with the writer's pointer
        // exchange: a reader that goes on to observe the pre-retirement
        // pointer published an epoch <= the retire epoch beforehand, and
        // is therefore visible to `can_reclaim`.
        let guard = loop {
            let slot = &*self.slots[index];
            if slot
                .compare_exchange(0, epoch, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                break SlotGuard { slot };
            }
            // Occupied; advance circularly and retry.
            index += 1;
            if index == EPOCH_SLOTS {
                index = 0;
            }
        };

        let ptr = self.current.load(Ordering::Acquire);
        let result = if ptr.is_null() {
            R::default()
        } else {
            // SAFETY: the claimed slot holds an epoch no greater than
            // any retirement that could free this value, so the writer
            // side will not reclaim it before `guard` drops.
            visitor(unsafe { &*ptr })
        };

        drop(guard);
        result
    }

    /// Replaces the current value, returning a handle that owns the
    /// displaced value together with its retirement epoch.
    ///
    /// New readers see the replacement immediately; readers already in
    /// their scope may still hold the old value. The returned
    /// [`Retired`] refuses to release the old value until
    /// [`can_reclaim`](Self::can_reclaim) over its epoch holds.
    pub fn update(&self, new_value: T) -> Retired<'_, T> {
        let _writer = self.writer_lock.lock();

        let new_ptr = Box::into_raw(Box::new(new_value));
        // SeqCst exchange, then the epoch bump: any reader that loaded
        // the old pointer had already published its epoch (SeqCst CAS)
        // before this point in the total order, so its slot value is
        // <= the epoch returned by the fetch_add below.
        let old = self.current.swap(new_ptr, Ordering::SeqCst);
        let retire_epoch = self.global_epoch.fetch_add(1, Ordering::Release);

        Retired {
            cell: self,
            ptr: old,
            epoch: retire_epoch,
        }
    }

    /// Whether no live reader is still inside a read scope it entered at
    /// or before `retire_epoch`.
    ///
    /// A value retired at that epoch may be freed once this returns true.
    /// The check is a point-in-time scan: a later reader may of course
    /// enter afterwards, but it can only see the post-retirement value.
    pub fn can_reclaim(&self, retire_epoch: u64) -> bool {
        for slot in self.slots.iter() {
            let epoch = slot.load(Ordering::SeqCst);
            if epoch != 0 && epoch <= retire_epoch {
                return false;
            }
        }
        true
    }
}

impl<T> Drop for RcuCell<T> {
    fn drop(&mut self) {
        let old = self.current.swap(ptr::null_mut(), Ordering::SeqCst);
        let final_epoch = self.global_epoch.fetch_add(1, Ordering::Release);
        if !old.is_null() {
            let backoff = Backoff::new();
            while !self.can_reclaim(final_epoch) {
                backoff.snooze();
            }
            // SAFETY: the value was unlinked above and every reader that
            // could see it has departed.
            unsafe { drop(Box::from_raw(old)) };
        }
    }
}

/// A value displaced by [`RcuCell::update`], still possibly referenced by
/// in-flight readers.
///
/// The handle dereferences to the displaced value and records the epoch
/// at which it was retired. Release it with [`try_reclaim`] /
/// [`reclaim`], or just drop it: dropping spin-yields until every
/// reader that could see the value has left its scope, then frees it.
///
/// [`try_reclaim`]: Retired::try_reclaim
/// [`reclaim`]: Retired::reclaim
pub struct Retired<'a, T> {
    cell: &'a RcuCell<T>,
    /// Never null: `update` only ever displaces a live value.
    ptr: *mut T,
    epoch: u64,
}

impl<'a, T> Retired<'a, T> {
    /// The epoch at which the value was retired. Values retired by
    /// successive updates carry strictly increasing epochs.
    #[inline]
    pub fn retire_epoch(&self) -> u64 {
        self.epoch
    }

    /// Takes ownership of the displaced value if no reader can still see
    /// it; otherwise returns the handle unchanged.
    pub fn try_reclaim(self) -> Result<Box<T>, Self> {
        if self.cell.can_reclaim(self.epoch) {
            Ok(self.into_box())
        } else {
            Err(self)
        }
    }

    /// Takes ownership of the displaced value, spin-yielding until every
    /// reader that could see it has departed.
    pub fn reclaim(self) -> Box<T> {
        let backoff = Backoff::new();
        while !self.cell.can_reclaim(self.epoch) {
            backoff.snooze();
        }
        self.into_box()
    }

    fn into_box(self) -> Box<T> {
        let ptr = self.ptr;
        core::mem::forget(self);
        // SAFETY: callers reach this only after `can_reclaim` held for
        // `epoch`; no reader reference to the value remains, and the
        // pointer originated from `Box::into_raw`.
        unsafe { Box::from_raw(ptr) }
    }
}

impl<T: core::fmt::Debug> core::fmt::Debug for Retired<'_, T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Retired")
            .field("epoch", &self.epoch)
            .field("value", &**self)
            .finish()
    }
}

impl<T> Deref for Retired<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the handle owns the allocation; it is not freed until
        // the handle is consumed or dropped.
        unsafe { &*self.ptr }
    }
}

impl<T> Drop for Retired<'_, T> {
    fn drop(&mut self) {
        let backoff = Backoff::new();
        while !self.cell.can_reclaim(self.epoch) {
            backoff.snooze();
        }
        // SAFETY: as in `into_box`.
        unsafe { drop(Box::from_raw(self.ptr)) };
    }
}
