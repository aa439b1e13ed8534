//! Cooperative cancellation shared by every worker thread.
//!
//! A [`CancellationToken`] is a cloneable handle: cancelling any clone cancels
//! all of them. Workers poll [`CancellationToken::is_cancelled`] at every
//! suspension point; blocking primitives additionally register a callback with
//! [`CancellationToken::on_cancel`] so a sleeping thread is woken instead of
//! waiting for its next poll.

use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicU64, Ordering},
};

use parking_lot::Mutex;

type Callback = Box<dyn FnOnce() + Send>;

struct Inner {
    cancelled: AtomicBool,
    next_id: AtomicU64,
    callbacks: Mutex<Vec<(u64, Callback)>>,
}

/// Shared cancellation flag with wake-up callbacks.
#[derive(Clone)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                next_id: AtomicU64::new(0),
                callbacks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Request cancellation.
    ///
    /// Only the first call has an effect: it runs every registered callback
    /// once, on the calling thread, outside the registration lock.
    pub fn cancel(&self) {
        if self.inner.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        let callbacks = std::mem::take(&mut *self.inner.callbacks.lock());
        for (_, callback) in callbacks {
            callback();
        }
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Run `callback` when the token is cancelled.
    ///
    /// If the token is already cancelled the callback runs immediately on the
    /// caller. Dropping the returned guard unregisters a callback that has not
    /// run yet.
    pub fn on_cancel<F>(&self, callback: F) -> CancelCallback
    where
        F: FnOnce() + Send + 'static,
    {
        let mut callbacks = self.inner.callbacks.lock();
        // Checked under the lock: `cancel` flips the flag before draining, so
        // either we see the flag here or the drain sees our entry.
        if self.inner.cancelled.load(Ordering::SeqCst) {
            drop(callbacks);
            callback();
            return CancelCallback { token: None, id: 0 };
        }
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        callbacks.push((id, Box::new(callback)));
        CancelCallback { token: Some(Arc::clone(&self.inner)), id }
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken").field("cancelled", &self.is_cancelled()).finish()
    }
}

/// Registration guard returned by [`CancellationToken::on_cancel`].
#[must_use = "dropping the guard unregisters the callback"]
pub struct CancelCallback {
    token: Option<Arc<Inner>>,
    id: u64,
}

impl Drop for CancelCallback {
    fn drop(&mut self) {
        if let Some(inner) = self.token.take() {
            inner.callbacks.lock().retain(|(id, _)| *id != self.id);
        }
    }
}
