//! Memory-bounded append-only log with ring-buffered history.
//!
//! One "active" [`AppendList`] receives all appends. Once the bytes
//! accounted into it cross a threshold, exactly one producer rotates: a
//! fresh list replaces the active one, the retired list enters a
//! fixed-size ring of frozen lists, and the list evicted from the ring is
//! queued for deferred release. Memory stays bounded by roughly
//! `threshold * capacity` with a small documented overshoot.

use std::fmt;
use std::mem;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use crossbeam_utils::CachePadded;

use crate::append_list::AppendList;
use crate::error::ConfigError;
use crate::sync::SpinMutex;

/// Byte-size estimation for log records.
///
/// The log never inspects a record beyond this estimate; it only sums the
/// reported sizes to decide when to rotate. The estimate should include
/// owned substructures (heap buffers, nested allocations).
pub trait MemoryUsage {
    /// Estimated size of this record in bytes, including owned
    /// substructures.
    fn memory_usage(&self) -> usize;
}

impl MemoryUsage for String {
    fn memory_usage(&self) -> usize {
        mem::size_of::<String>() + self.capacity()
    }
}

impl MemoryUsage for Vec<u8> {
    fn memory_usage(&self) -> usize {
        mem::size_of::<Vec<u8>>() + self.capacity()
    }
}

/// Ring bookkeeping. `history` and `trash` are only ever touched under
/// the enclosing lock.
struct Ring<T> {
    /// Frozen lists, oldest overwritten first. An entry stays `None`
    /// until the ring has filled once.
    history: Box<[Option<Arc<AppendList<T>>>]>,
    /// Slot the next retired list lands in.
    next_slot: usize,
    /// Lists evicted from `history`, awaiting [`BoundedLog::drain_trash`].
    trash: Vec<Arc<AppendList<T>>>,
}

/// A nearly lock-free log bounded by memory usage.
///
/// Appending is two atomic operations in the common case. Scans visit
/// every live record exactly once, newest first, while producers keep
/// appending. Records must implement [`MemoryUsage`].
///
/// Dropping the log requires that no thread is still inside [`append`] or
/// [`scan`]; the borrow checker enforces this for safe callers.
///
/// [`append`]: BoundedLog::append
/// [`scan`]: BoundedLog::scan
pub struct BoundedLog<T> {
    /// The list currently receiving appends. Loads pin the list for the
    /// duration of a prepend, so a concurrent rotation can never free it
    /// out from under a producer.
    active: ArcSwap<AppendList<T>>,
    /// Bytes accounted into `active`. May transiently overshoot: a
    /// producer that crosses the threshold prepends first and rotates
    /// after.
    memory_used: AtomicUsize,
    /// Single-rotator gate. On its own cache line so gate traffic does
    /// not bounce the line every producer hammers with `memory_used`.
    rotating: CachePadded<AtomicBool>,
    ring: SpinMutex<Ring<T>>,
    memory_threshold: usize,
    capacity: usize,
}

impl<T> fmt::Debug for BoundedLog<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundedLog")
            .field("memory_threshold", &self.memory_threshold)
            .field("capacity", &self.capacity)
            .field("memory_used", &self.memory_used.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl<T: MemoryUsage> BoundedLog<T> {
    /// Creates a log that rotates the active list once `memory_threshold`
    /// bytes are accounted into it, and retains `capacity` frozen lists of
    /// history.
    ///
    /// # Errors
    ///
    /// [`ConfigError::ZeroMemoryThreshold`] if `memory_threshold == 0`;
    /// [`ConfigError::HistoryTooShort`] if `capacity < 2`.
    pub fn new(memory_threshold: usize, capacity: usize) -> Result<Self, ConfigError> {
        if memory_threshold == 0 {
            return Err(ConfigError::ZeroMemoryThreshold);
        }
        if capacity < 2 {
            return Err(ConfigError::HistoryTooShort { capacity });
        }
        Ok(Self {
            active: ArcSwap::from_pointee(AppendList::new()),
            memory_used: AtomicUsize::new(0),
            rotating: CachePadded::new(AtomicBool::new(false)),
            ring: SpinMutex::new(Ring {
                history: (0..capacity).map(|_| None).collect(),
                next_slot: 0,
                trash: Vec::new(),
            }),
            memory_threshold,
            capacity,
        })
    }

    /// Appends a record to the log.
    ///
    /// Never fails and never blocks on other producers; when the
    /// accounted bytes cross the threshold, the calling thread may also
    /// perform the rotation (a short, bounded amount of extra work).
    pub fn append(&self, record: T) {
        let size = record.memory_usage();

        // Pins the loaded list: even if a rotation retires it and the
        // ring later evicts it, the guard keeps it alive until the
        // prepend has finished.
        let current = self.active.load();
        current.prepend(record);

        let new_total = self.memory_used.fetch_add(size, Ordering::Relaxed) + size;
        if new_total >= self.memory_threshold {
            self.try_rotate(&current);
        }
    }

    /// Attempts to retire the active list. `expected` is the list the
    /// caller accounted its bytes against; rotation only proceeds if it
    /// is still the active one.
    #[cold]
    fn try_rotate(&self, expected: &Arc<AppendList<T>>) {
        // Race on the gate; every producer over the threshold lands
        // here, only one wins this generation.
        if self
            .rotating
            .compare_exchange(false, true, Ordering::Relaxed, Ordering::Relaxed)
            .is_err()
        {
            return;
        }

        // The gate alone is not enough: this thread may have been
        // delayed and the list it crossed the threshold on may already
        // be retired by a previous winner.
        let still_current = {
            let reloaded = self.active.load();
            Arc::ptr_eq(&reloaded, expected)
        };
        if !still_current {
            self.rotating.store(false, Ordering::Release);
            return;
        }

        // Reset the counter first so other producers stop attempting
        // rotations for bytes that will land in the fresh list.
        self.memory_used.store(0, Ordering::Relaxed);

        // Publish the fresh list and take back the retired one. From
        // here on new producers append to the fresh list. Producers that
        // loaded the old list before the swap may still prepend to it;
        // their bytes were already accounted and simply fold into the
        // frozen tail as bounded overshoot.
        let retired = self.active.swap(Arc::new(AppendList::new()));

        {
            // Only scans contend on this lock; producers never take it
            // and other rotators are excluded by the gate.
            let mut ring = self.ring.lock();
            let slot = ring.next_slot;
            let evicted = ring.history[slot].replace(retired);
            ring.next_slot = (slot + 1) % self.capacity;
            if let Some(list) = evicted {
                ring.trash.push(list);
            }
        }

        self.rotating.store(false, Ordering::Release);
    }

    /// Invokes `visitor` for every live record, newest first: the active
    /// list, then the frozen lists from the most recently retired to the
    /// oldest retained.
    ///
    /// Each visited list is a stable snapshot taken at the moment the
    /// scan captured it; records appended concurrently to the active
    /// list after that point are not visited. The internal lock is held
    /// only while capturing at most `capacity + 1` references; visitor
    /// execution never blocks producers.
    pub fn scan<F>(&self, mut visitor: F)
    where
        F: FnMut(&T),
    {
        let mut lists: Vec<Arc<AppendList<T>>> = Vec::with_capacity(self.capacity + 1);
        {
            let ring = self.ring.lock();
            lists.push(self.active.load_full());
            // Walk the ring backwards from the slot behind `next_slot`,
            // i.e. most recently frozen first.
            for age in 0..self.capacity {
                let pos = (ring.next_slot + self.capacity - 1 - age) % self.capacity;
                if let Some(list) = &ring.history[pos] {
                    lists.push(Arc::clone(list));
                }
            }
        }

        for list in &lists {
            for record in list.snapshot() {
                visitor(record);
            }
        }
    }

    /// Releases every list evicted from the history ring since the last
    /// drain, returning how many were released.
    ///
    /// Intended to be called from a cleanup thread outside any hot path;
    /// the actual node deallocation happens on the calling thread.
    pub fn drain_trash(&self) -> usize {
        let drained = {
            let mut ring = self.ring.lock();
            mem::take(&mut ring.trash)
        };
        let count = drained.len();
        // Node chains are freed here, outside the spinlock.
        drop(drained);
        count
    }

    /// The configured per-list rotation threshold in bytes.
    #[inline]
    pub fn memory_threshold(&self) -> usize {
        self.memory_threshold
    }

    /// The configured number of frozen history slots.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
