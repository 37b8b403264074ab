//! Condition variables over the global memory manager lock.
//!
//! The memory manager never blocks on anything but a predicate over its own state, so a
//! condition here is a counter of sleepers and a counter of outstanding wake permits. A
//! sleeper registers itself while still holding the lock, so a wake issued under the lock
//! can never be missed. Each wake hands out exactly one permit.
//!
//! Sleepers wait by relaxing with `R` until a permit is available. [`spin::relax::Spin`]
//! suits a single-address-space kernel; hosted builds use [`spin::relax::Yield`] (with
//! the `std` feature) to give the CPU back to the scheduler.

use core::marker::PhantomData;
use core::sync::atomic::{AtomicUsize, Ordering};

use spin::relax::{RelaxStrategy, Spin};
use spin::{Mutex, MutexGuard};

/// A condition variable tied to a [`spin::Mutex`].
pub struct Condition<R = Spin> {
    waiting: AtomicUsize,
    permits: AtomicUsize,
    relax: PhantomData<fn() -> R>,
}

impl<R: RelaxStrategy> Condition<R> {
    /// Creates a condition with no sleepers.
    pub const fn new() -> Self {
        Self {
            waiting: AtomicUsize::new(0),
            permits: AtomicUsize::new(0),
            relax: PhantomData,
        }
    }

    /// Atomically releases `guard`, waits for a wake, and reacquires `lock`.
    ///
    /// Wakes are not tied to a particular predicate, so callers must re-check the
    /// condition they are waiting for after this returns.
    pub fn sleep<'a, T>(
        &self,
        lock: &'a Mutex<T>,
        guard: MutexGuard<'a, T>,
    ) -> MutexGuard<'a, T> {
        self.waiting.fetch_add(1, Ordering::AcqRel);
        drop(guard);

        while self
            .permits
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |permits| {
                permits.checked_sub(1)
            })
            .is_err()
        {
            R::relax();
        }

        lock.lock()
    }

    /// Wakes at most one sleeper. Must be called with the lock held.
    pub fn wake(&self) {
        let woken = self
            .waiting
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |waiting| {
                waiting.checked_sub(1)
            })
            .is_ok();
        if woken {
            self.permits.fetch_add(1, Ordering::AcqRel);
        }
    }

    /// Wakes every sleeper. Must be called with the lock held.
    pub fn wake_all(&self) {
        let waiting = self.waiting.swap(0, Ordering::AcqRel);
        if waiting > 0 {
            self.permits.fetch_add(waiting, Ordering::AcqRel);
        }
    }

    /// Returns the number of threads currently asleep.
    pub fn sleepers(&self) -> usize {
        self.waiting.load(Ordering::Acquire)
    }
}

impl<R: RelaxStrategy> Default for Condition<R> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spin::relax::Yield;
    use std::thread;

    #[test]
    fn wake_without_sleepers_is_a_no_op() {
        let condition = Condition::<Yield>::new();
        condition.wake();
        condition.wake_all();
        assert_eq!(condition.sleepers(), 0);
        assert_eq!(condition.permits.load(Ordering::Acquire), 0);
    }

    #[test]
    fn wake_releases_a_sleeper() {
        let lock = Mutex::new(false);
        let condition = Condition::<Yield>::new();

        thread::scope(|s| {
            let sleeper = s.spawn(|| {
                let mut ready = lock.lock();
                while !*ready {
                    ready = condition.sleep(&lock, ready);
                }
            });

            loop {
                let mut ready = lock.lock();
                if condition.sleepers() == 1 {
                    *ready = true;
                    condition.wake();
                    break;
                }
                drop(ready);
                thread::yield_now();
            }

            sleeper.join().unwrap();
        });

        assert_eq!(condition.sleepers(), 0);
    }

    #[test]
    fn each_wake_releases_exactly_one_sleeper() {
        let lock = Mutex::new(());
        let condition = Condition::<Yield>::new();
        let released = AtomicUsize::new(0);

        thread::scope(|s| {
            for _ in 0..3 {
                s.spawn(|| {
                    let guard = lock.lock();
                    let guard = condition.sleep(&lock, guard);
                    released.fetch_add(1, Ordering::AcqRel);
                    drop(guard);
                });
            }

            while condition.sleepers() < 3 {
                thread::yield_now();
            }

            {
                let _guard = lock.lock();
                condition.wake();
            }
            while released.load(Ordering::Acquire) < 1 {
                thread::yield_now();
            }
            assert_eq!(condition.sleepers(), 2);
            assert_eq!(released.load(Ordering::Acquire), 1);

            {
                let _guard = lock.lock();
                condition.wake_all();
            }
        });

        assert_eq!(released.load(Ordering::Acquire), 3);
    }

    #[test]
    fn wake_all_releases_every_sleeper() {
        let lock = Mutex::new(0usize);
        let condition: crate::Condition<Yield> = crate::Condition::default();

        thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    let mut woken = lock.lock();
                    woken = condition.sleep(&lock, woken);
                    *woken += 1;
                });
            }

            while condition.sleepers() < 4 {
                thread::yield_now();
            }
            let _guard = lock.lock();
            condition.wake_all();
        });

        assert_eq!(*lock.lock(), 4);
        assert_eq!(condition.sleepers(), 0);
    }
}
