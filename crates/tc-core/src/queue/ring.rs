//! Bounded lock-free single-producer / single-consumer ring buffer.
//!
//! `head` and `tail` are monotonically increasing counters (wrapping); the
//! slot index is `counter % capacity`. The producer owns `tail`, the consumer
//! owns `head`, and each publishes its counter with `Release` after touching
//! the slot, so the other side's `Acquire` load sees the slot contents.
//!
//! ```text
//!   head (consumer)            tail (producer)
//!        │                          │
//!   ┌────▼────┬─────────┬─────────┬─▼───────┬─────────┐
//!   │  item   │  item   │  item   │  empty  │  empty  │
//!   └─────────┴─────────┴─────────┴─────────┴─────────┘
//!        len = tail - head, full when len == capacity
//! ```
//!
//! # Contract
//!
//! At most one thread may push and at most one thread may pop at any moment.
//! The roles may move between threads over time (e.g. a test draining the
//! queue after the consumer thread has been joined). A concurrent second
//! pusher or popper is caught by a role flag and panics; it is a caller bug,
//! not a supported mode.

use std::{
    cell::UnsafeCell,
    mem::MaybeUninit,
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
};

use crossbeam_utils::CachePadded;

pub struct SpscRing<T> {
    head: CachePadded<AtomicUsize>,
    tail: CachePadded<AtomicUsize>,
    pushing: CachePadded<AtomicBool>,
    popping: CachePadded<AtomicBool>,
    slots: Box<[UnsafeCell<MaybeUninit<T>>]>,
}

// SAFETY: a slot is only ever accessed by the single thread currently holding
// the matching role flag, and ownership of the value moves between threads
// through the Release/Acquire pair on `head`/`tail`.
unsafe impl<T: Send> Send for SpscRing<T> {}
unsafe impl<T: Send> Sync for SpscRing<T> {}

/// Exclusive claim on the producer or consumer role.
struct RoleGuard<'a>(&'a AtomicBool);

impl<'a> RoleGuard<'a> {
    #[inline]
    fn claim(flag: &'a AtomicBool, role: &str) -> Self {
        if flag.swap(true, Ordering::Acquire) {
            panic!("SpscRing: concurrent {role} detected (single-producer/single-consumer contract violated)");
        }
        Self(flag)
    }
}

impl Drop for RoleGuard<'_> {
    #[inline]
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl<T> SpscRing<T> {
    /// Create a ring holding at most `capacity` items.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "SpscRing capacity must be non-zero");
        let slots = (0..capacity).map(|_| UnsafeCell::new(MaybeUninit::uninit())).collect();
        Self {
            head: CachePadded::new(AtomicUsize::new(0)),
            tail: CachePadded::new(AtomicUsize::new(0)),
            pushing: CachePadded::new(AtomicBool::new(false)),
            popping: CachePadded::new(AtomicBool::new(false)),
            slots,
        }
    }

    /// Enqueue without blocking. Hands the item back if the ring is full.
    #[inline]
    pub fn try_push(&self, item: T) -> Result<(), T> {
        let _role = RoleGuard::claim(&self.pushing, "push");
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Acquire);
        if tail.wrapping_sub(head) == self.slots.len() {
            return Err(item);
        }
        let slot = &self.slots[tail % self.slots.len()];
        // SAFETY: the slot lies outside [head, tail) so the consumer does not
        // read it, and we hold the producer role.
        unsafe { (*slot.get()).write(item) };
        self.tail.store(tail.wrapping_add(1), Ordering::Release);
        Ok(())
    }

    /// Dequeue without blocking.
    #[inline]
    pub fn try_pop(&self) -> Option<T> {
        let _role = RoleGuard::claim(&self.popping, "pop");
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Acquire);
        if head == tail {
            return None;
        }
        let slot = &self.slots[head % self.slots.len()];
        // SAFETY: the slot lies in [head, tail) so it was initialised by the
        // producer, whose write is visible through the Acquire on `tail`.
        let item = unsafe { (*slot.get()).assume_init_read() };
        self.head.store(head.wrapping_add(1), Ordering::Release);
        Some(item)
    }

    /// Snapshot; may be stale by the time the caller looks at it.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the number of queued items.
    #[inline]
    pub fn len(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        tail.wrapping_sub(head).min(self.slots.len())
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}

impl<T> Drop for SpscRing<T> {
    fn drop(&mut self) {
        let head = *self.head.get_mut();
        let tail = *self.tail.get_mut();
        let mut idx = head;
        while idx != tail {
            // SAFETY: exclusive access; every slot in [head, tail) is initialised.
            unsafe { self.slots[idx % self.slots.len()].get_mut().assume_init_drop() };
            idx = idx.wrapping_add(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn fifo_order() {
        let ring = SpscRing::with_capacity(4);
        for i in 0..4 {
            ring.try_push(i).unwrap();
        }
        assert_eq!(ring.len(), 4);
        for i in 0..4 {
            assert_eq!(ring.try_pop(), Some(i));
        }
        assert_eq!(ring.try_pop(), None);
        assert!(ring.is_empty());
    }

    #[test]
    fn full_returns_item() {
        let ring = SpscRing::with_capacity(2);
        ring.try_push(1).unwrap();
        ring.try_push(2).unwrap();
        assert_eq!(ring.try_push(3), Err(3));
        assert_eq!(ring.try_pop(), Some(1));
        ring.try_push(3).unwrap();
        assert_eq!(ring.try_pop(), Some(2));
        assert_eq!(ring.try_pop(), Some(3));
    }

    #[test]
    fn wraps_many_times() {
        let ring = SpscRing::with_capacity(3);
        for i in 0..1000 {
            ring.try_push(i).unwrap();
            assert_eq!(ring.try_pop(), Some(i));
        }
        assert!(ring.is_empty());
    }

    #[test]
    fn drops_remaining_items() {
        let marker = Arc::new(());
        {
            let ring = SpscRing::with_capacity(4);
            ring.try_push(Arc::clone(&marker)).unwrap();
            ring.try_push(Arc::clone(&marker)).unwrap();
            assert_eq!(Arc::strong_count(&marker), 3);
        }
        assert_eq!(Arc::strong_count(&marker), 1);
    }

    #[test]
    fn threaded_producer_consumer() {
        const N: u64 = 100_000;
        let ring = Arc::new(SpscRing::with_capacity(64));
        let producer = {
            let ring = Arc::clone(&ring);
            std::thread::spawn(move || {
                for i in 0..N {
                    let mut item = i;
                    while let Err(back) = ring.try_push(item) {
                        item = back;
                        std::hint::spin_loop();
                    }
                }
            })
        };

        let mut expected = 0;
        while expected < N {
            if let Some(v) = ring.try_pop() {
                assert_eq!(v, expected);
                expected += 1;
            }
        }
        producer.join().unwrap();
    }

    #[test]
    #[should_panic(expected = "capacity must be non-zero")]
    fn zero_capacity_panics() {
        let _ = SpscRing::<u8>::with_capacity(0);
    }
}
