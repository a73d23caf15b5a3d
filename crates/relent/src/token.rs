//! Single-producer cancellation token.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use crate::handler::CancelHandler;
use crate::slot::{HazardSlot, Registered};
use crate::CancelToken;

/// A cancellation token owned by a single producer that can cancel it once.
///
/// This is the workhorse token: one side holds it (usually behind an `Arc`
/// or in a structure shared with the consumer) and calls
/// [`cancel()`](Self::cancel); any number of successive consumers check it
/// and run cancellable blocking calls against it.
///
/// The token must outlive every blocking call that registers against it —
/// the borrow taken by guards and blocking primitives enforces this.
///
/// # Example
///
/// ```rust
/// use relent::{CancelToken, StandaloneToken};
/// use std::sync::Arc;
/// use std::thread;
/// use std::time::Duration;
///
/// let token = Arc::new(StandaloneToken::new());
///
/// let worker = {
///     let token = Arc::clone(&token);
///     thread::spawn(move || {
///         while token.is_active() {
///             // Wakes immediately when the token is cancelled.
///             token.sleep_for(Duration::from_millis(50));
///         }
///     })
/// };
///
/// token.cancel();
/// worker.join().unwrap();
/// ```
///
/// # Memory ordering
///
/// | Operation | Ordering | Effect |
/// |-----------|----------|--------|
/// | `cancel()` flag store | Release | Writes before `cancel()` are visible to waiters that observe the cancellation. |
/// | `is_cancelled()` | Acquire | Synchronises with the canceller's Release. |
pub struct StandaloneToken {
    slot: HazardSlot,
    cancelled: AtomicBool,
    /// Cancellation-complete flag: set strictly after the registered
    /// handler (if any) has returned from its `cancel` callback.
    done: Mutex<bool>,
    wake: Condvar,
}

impl StandaloneToken {
    /// Create a token in the not-cancelled state.
    #[inline]
    pub const fn new() -> Self {
        Self {
            slot: HazardSlot::new(),
            cancelled: AtomicBool::new(false),
            done: Mutex::new(false),
            wake: Condvar::new(),
        }
    }

    /// Signal cancellation.
    ///
    /// Idempotent: the first call wins, later calls return immediately. If a
    /// handler is registered at the instant of cancellation it is invoked
    /// exactly once, on this thread, with no token lock held. Waiters
    /// sleeping in [`sleep_for`](CancelToken::sleep_for) are woken.
    pub fn cancel(&self) {
        {
            let _done = self.done.lock().unwrap_or_else(PoisonError::into_inner);
            if self.cancelled.load(Ordering::Relaxed) {
                return;
            }
            self.cancelled.store(true, Ordering::Release);
        }

        if let Some(handler) = self.slot.take_for_cancel() {
            // SAFETY: the waiter cannot finish deregistration (and so cannot
            // destroy the handler) until `done` is set below.
            unsafe { handler.as_ref() }.cancel();
        }

        let mut done = self.done.lock().unwrap_or_else(PoisonError::into_inner);
        *done = true;
        self.wake.notify_all();
    }

    /// Return a cancelled token to the not-cancelled state.
    ///
    /// Permitted only while the token is quiescent: no handler registered
    /// and no cancellation in flight. Violations are programming errors and
    /// trip debug assertions. After `reset()` the token is functionally new.
    pub fn reset(&self) {
        let mut done = self.done.lock().unwrap_or_else(PoisonError::into_inner);
        debug_assert!(
            !self.slot.is_occupied(),
            "resetting a token with a registered handler"
        );
        debug_assert!(
            *done == self.cancelled.load(Ordering::Relaxed),
            "resetting a token while a cancellation is in flight"
        );
        self.cancelled.store(false, Ordering::Release);
        *done = false;
        self.slot.clear();
    }

    /// Cancel this token after `delay`, from a spawned thread.
    ///
    /// Convenience for simple timeout scenarios; for anything finer use a
    /// dedicated timer.
    ///
    /// # Example
    ///
    /// ```rust
    /// use relent::{CancelToken, StandaloneToken};
    /// use std::sync::Arc;
    /// use std::time::Duration;
    ///
    /// let token = Arc::new(StandaloneToken::new());
    /// token.cancel_after(Duration::from_millis(10));
    ///
    /// // Returns well before the requested minute.
    /// token.sleep_for(Duration::from_secs(60));
    /// assert!(token.is_cancelled());
    /// ```
    pub fn cancel_after(self: &Arc<Self>, delay: Duration) {
        let token = Arc::clone(self);
        thread::spawn(move || {
            thread::sleep(delay);
            token.cancel();
        });
    }
}

impl CancelToken for StandaloneToken {
    #[inline]
    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    fn sleep_for(&self, duration: Duration) {
        let done = self.done.lock().unwrap_or_else(PoisonError::into_inner);
        if self.cancelled.load(Ordering::Acquire) {
            return;
        }
        // The canceller notifies `wake` while holding `done`, so there is no
        // window between the check above and the wait below. Spurious
        // wake-ups re-wait for the remaining time.
        let _ = self
            .wake
            .wait_timeout_while(done, duration, |_| {
                !self.cancelled.load(Ordering::Acquire)
            })
            .unwrap_or_else(PoisonError::into_inner);
    }

    unsafe fn try_register_handler(&self, handler: &dyn CancelHandler) -> bool {
        match unsafe { self.slot.register(handler) } {
            Registered::Yes => true,
            Registered::AlreadyCancelled => false,
            Registered::Unattached => unreachable!("standalone slots start empty"),
        }
    }

    unsafe fn try_deregister_handler(&self, handler: &dyn CancelHandler) -> bool {
        unsafe { self.slot.try_deregister(handler) }
    }

    unsafe fn deregister_handler_slow(&self, handler: &dyn CancelHandler) {
        {
            let mut done = self.done.lock().unwrap_or_else(PoisonError::into_inner);
            while !*done {
                done = self.wake.wait(done).unwrap_or_else(PoisonError::into_inner);
            }
        }
        // The canceller has returned from `cancel`; pair it with `reset`.
        handler.reset();
    }
}

impl Default for StandaloneToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for StandaloneToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StandaloneToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
