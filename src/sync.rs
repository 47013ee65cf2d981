//! Internal synchronization: a minimal spin mutex.
//!
//! The two locks in this crate guard critical sections of a few pointer
//! moves each: the log's ring bookkeeping (snapshot capture and rotation)
//! and the cell's writer serialization. Parking machinery would cost more
//! than it saves at that scale. Contended acquires wait with [`Backoff`],
//! which escalates from spinning to yielding the timeslice, so a waiter
//! sharing a core with a descheduled holder still makes progress.

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, Ordering};

use crossbeam_utils::Backoff;

/// Mutex that spins, then yields, instead of parking.
pub(crate) struct SpinMutex<T: ?Sized> {
    held: AtomicBool,
    data: UnsafeCell<T>,
}

unsafe impl<T: ?Sized + Send> Send for SpinMutex<T> {}
unsafe impl<T: ?Sized + Send> Sync for SpinMutex<T> {}

impl<T> SpinMutex<T> {
    pub(crate) const fn new(data: T) -> Self {
        Self {
            held: AtomicBool::new(false),
            data: UnsafeCell::new(data),
        }
    }
}

impl<T: ?Sized> SpinMutex<T> {
    /// Acquire the mutex.
    ///
    /// The uncontended path is a single CAS; everything else lives in
    /// the cold contended path.
    #[inline]
    pub(crate) fn lock(&self) -> SpinMutexGuard<'_, T> {
        if self
            .held
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            return SpinMutexGuard { mutex: self };
        }
        self.lock_contended()
    }

    #[cold]
    fn lock_contended(&self) -> SpinMutexGuard<'_, T> {
        let backoff = Backoff::new();
        loop {
            // Wait on plain loads so the line stays shared; `snooze`
            // starts yielding once it has spun long enough.
            while self.held.load(Ordering::Relaxed) {
                backoff.snooze();
            }
            if self
                .held
                .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                return SpinMutexGuard { mutex: self };
            }
        }
    }
}

/// Unlocks the owning [`SpinMutex`] on drop.
pub(crate) struct SpinMutexGuard<'a, T: ?Sized> {
    mutex: &'a SpinMutex<T>,
}

impl<T: ?Sized> Deref for SpinMutexGuard<'_, T> {
    type Target = T;
    #[inline]
    fn deref(&self) -> &T {
        unsafe { &*self.mutex.data.get() }
    }
}

impl<T: ?Sized> DerefMut for SpinMutexGuard<'_, T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.mutex.data.get() }
    }
}

impl<T: ?Sized> Drop for SpinMutexGuard<'_, T> {
    #[inline]
    fn drop(&mut self) {
        self.mutex.held.store(false, Ordering::Release);
    }
}
