//! SPSC queue with a cancellable blocking wait.
//!
//! [`WaitableQueue`] composes two independently testable layers:
//!
//! - [`SpscRing`]: the lock-free storage (`try_push` / `try_pop`);
//! - [`WaitGate`]: an atomic `has_data` flag plus a condvar the consumer
//!   sleeps on. The flag is a wake-up hint, not a length.
//!
//! The producer never takes a lock unless the consumer is actually asleep,
//! and the consumer only sleeps after observing `has_data == false`.
//!
//! # Missed-wakeup argument
//!
//! `pop` clears the flag with a `swap` *after* a failed dequeue and then tries
//! once more. If a push landed between the failed dequeue and the clear, the
//! `swap` reads the producer's `true` (synchronising with its ring write) and
//! the retry finds the item. If the push lands after the clear, its flag store
//! comes later and the next `wait` returns immediately.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use parking_lot::{Condvar, Mutex};

use super::ring::SpscRing;
use crate::cancel::CancellationToken;

/// Wait/wake gate keyed off a single boolean.
pub struct WaitGate {
    has_data: AtomicBool,
    sleepers: AtomicUsize,
    lock: Mutex<()>,
    cond: Condvar,
}

impl WaitGate {
    pub fn new() -> Self {
        Self { has_data: AtomicBool::new(false), sleepers: AtomicUsize::new(0), lock: Mutex::new(()), cond: Condvar::new() }
    }

    /// Raise the flag and wake one sleeper, if any.
    #[inline]
    pub fn signal_one(&self) {
        self.has_data.store(true, Ordering::SeqCst);
        if self.sleepers.load(Ordering::SeqCst) > 0 {
            let _guard = self.lock.lock();
            self.cond.notify_one();
        }
    }

    /// Raise the flag and wake every sleeper unconditionally.
    pub fn signal_all(&self) {
        self.has_data.store(true, Ordering::SeqCst);
        let _guard = self.lock.lock();
        self.cond.notify_all();
    }

    /// Lower the flag, returning its previous value.
    #[inline]
    pub fn clear(&self) -> bool {
        self.has_data.swap(false, Ordering::AcqRel)
    }

    #[inline]
    pub fn is_set(&self) -> bool {
        self.has_data.load(Ordering::Acquire)
    }

    /// Sleep until the flag is raised or `token` is cancelled.
    pub fn wait(&self, token: &CancellationToken) {
        self.wait_inner(token, None);
    }

    /// Like [`WaitGate::wait`] but gives up after `timeout`. Returns whether
    /// the flag was observed raised.
    pub fn wait_timeout(&self, token: &CancellationToken, timeout: Duration) -> bool {
        self.wait_inner(token, Some(timeout))
    }

    fn wait_inner(&self, token: &CancellationToken, timeout: Option<Duration>) -> bool {
        if self.is_set() {
            return true;
        }
        // Announce ourselves before re-checking the flag; `signal_one` reads
        // `sleepers` after storing the flag, so one of the two sees the other.
        self.sleepers.fetch_add(1, Ordering::SeqCst);
        let deadline = timeout.map(|t| std::time::Instant::now() + t);
        let mut guard = self.lock.lock();
        while !self.has_data.load(Ordering::SeqCst) && !token.is_cancelled() {
            match deadline {
                Some(deadline) => {
                    if self.cond.wait_until(&mut guard, deadline).timed_out() {
                        break;
                    }
                }
                None => self.cond.wait(&mut guard),
            }
        }
        drop(guard);
        self.sleepers.fetch_sub(1, Ordering::SeqCst);
        self.is_set()
    }
}

impl Default for WaitGate {
    fn default() -> Self {
        Self::new()
    }
}

/// Default slot count for the quote and trade queues.
pub const DEFAULT_QUEUE_CAPACITY: usize = 10_000;

/// Fixed-capacity SPSC queue whose consumer can block until data arrives.
///
/// Same single-producer / single-consumer contract as [`SpscRing`]. `wait`
/// belongs to the consumer role.
pub struct WaitableQueue<T> {
    ring: SpscRing<T>,
    gate: Arc<WaitGate>,
}

impl<T> WaitableQueue<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        Self { ring: SpscRing::with_capacity(capacity), gate: Arc::new(WaitGate::new()) }
    }

    /// Non-blocking enqueue. On success the consumer is woken; on a full
    /// queue the item is handed back and the caller decides what to do.
    #[inline]
    pub fn push(&self, item: T) -> Result<(), T> {
        self.ring.try_push(item)?;
        self.gate.signal_one();
        Ok(())
    }

    /// Non-blocking dequeue with the flag-clear retry.
    #[inline]
    pub fn pop(&self) -> Option<T> {
        match self.ring.try_pop() {
            Some(item) => Some(item),
            None => self.pop_after_miss(),
        }
    }

    /// Second half of `pop`: clear the flag, then look once more. A push may
    /// have completed between the failed dequeue and the clear; its flag was
    /// swallowed, so it is raised again.
    fn pop_after_miss(&self) -> Option<T> {
        self.gate.clear();
        let item = self.ring.try_pop()?;
        self.gate.signal_one();
        Some(item)
    }

    /// Block until data may be available or `token` is cancelled.
    ///
    /// Spurious returns are possible (e.g. after cancellation the flag stays
    /// raised); callers loop on `pop` and re-check the token.
    pub fn wait(&self, token: &CancellationToken) {
        if token.is_cancelled() {
            return;
        }
        let gate = Arc::clone(&self.gate);
        let _wake_on_cancel = token.on_cancel(move || gate.signal_all());
        self.gate.wait(token);
    }

    /// [`WaitableQueue::wait`] bounded by `timeout`.
    pub fn wait_timeout(&self, token: &CancellationToken, timeout: Duration) -> bool {
        if token.is_cancelled() {
            return self.gate.is_set();
        }
        let gate = Arc::clone(&self.gate);
        let _wake_on_cancel = token.on_cancel(move || gate.signal_all());
        self.gate.wait_timeout(token, timeout)
    }

    /// Snapshot; no ordering guarantee against concurrent push/pop.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    #[cfg(test)]
    pub(crate) fn gate(&self) -> &WaitGate {
        &self.gate
    }
}

impl<T> Default for WaitableQueue<T> {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_QUEUE_CAPACITY)
    }
}
