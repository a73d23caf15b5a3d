//! One-to-many cancellation: a source fanning out to many tokens.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

use smallvec::SmallVec;

use crate::handler::CancelHandler;
use crate::slot::{HazardSlot, Registered};
use crate::CancelToken;

/// Shared record behind a source and all of its tokens.
///
/// The last owner — the source or any live token — releases it.
struct SourceShared {
    cancelled: AtomicBool,
    registry: Mutex<Registry>,
    wake: Condvar,
}

struct Registry {
    /// Set strictly after every attached handler has returned from its
    /// `cancel` callback.
    cancel_done: bool,
    /// Slots of tokens that have registered a handler at least once.
    /// Tokens attach lazily on first registration and detach on drop.
    slots: SmallVec<[Arc<HazardSlot>; 4]>,
}

impl SourceShared {
    fn new() -> Self {
        Self {
            cancelled: AtomicBool::new(false),
            registry: Mutex::new(Registry {
                cancel_done: false,
                slots: SmallVec::new(),
            }),
            wake: Condvar::new(),
        }
    }

    fn cancel(&self) {
        let snapshot = {
            let mut registry = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
            if self.cancelled.load(Ordering::Relaxed) {
                return;
            }
            self.cancelled.store(true, Ordering::Release);
            // Nothing attaches after the flag is set, so the registry is
            // finished; take it and walk without the lock. The Arcs keep the
            // slots alive even if their tokens are dropped mid-walk.
            std::mem::take(&mut registry.slots)
        };

        for slot in &snapshot {
            if let Some(handler) = slot.take_for_cancel() {
                // SAFETY: the waiter blocks in the deregistration slow path
                // until `cancel_done` is set below; the handler outlives
                // this call. No lock is held across it.
                unsafe { handler.as_ref() }.cancel();
            }
        }

        let mut registry = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
        registry.cancel_done = true;
        self.wake.notify_all();
    }
}

/// Produces any number of [`SourcedToken`]s sharing one cancellation state.
///
/// Cancelling the source cancels every token issued from it, waking every
/// waiter currently blocked against one of them. Dropping the source
/// cancels implicitly.
///
/// # Example
///
/// ```rust
/// use relent::{CancelSource, CancelToken};
/// use std::thread;
/// use std::time::Duration;
///
/// let source = CancelSource::new();
///
/// let workers: Vec<_> = (0..4)
///     .map(|_| {
///         let token = source.token();
///         thread::spawn(move || {
///             while token.is_active() {
///                 token.sleep_for(Duration::from_secs(60));
///             }
///         })
///     })
///     .collect();
///
/// source.cancel();
/// for worker in workers {
///     worker.join().unwrap();
/// }
/// ```
pub struct CancelSource {
    shared: Arc<SourceShared>,
}

impl CancelSource {
    /// Create a source in the not-cancelled state.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(SourceShared::new()),
        }
    }

    /// Issue a new token sharing this source's cancellation state.
    ///
    /// Tokens may be created before or after cancellation; a token issued
    /// from a cancelled source is born cancelled.
    pub fn token(&self) -> SourcedToken {
        SourcedToken {
            shared: Arc::clone(&self.shared),
            slot: Arc::new(HazardSlot::unattached()),
        }
    }

    /// Cancel every token issued from this source.
    ///
    /// Idempotent. Handlers of currently-registered waiters are each invoked
    /// exactly once, with no source lock held.
    pub fn cancel(&self) {
        self.shared.cancel();
    }

    /// Whether this source has been cancelled.
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.shared.cancelled.load(Ordering::Acquire)
    }

    /// Replace the internal state with a fresh, not-cancelled one.
    ///
    /// The old state is cancelled first, so tokens issued before the reset
    /// are detached and observe cancellation for the rest of their lives;
    /// they never spring back to life. Tokens issued after the reset share
    /// the new state.
    pub fn reset(&mut self) {
        self.shared.cancel();
        self.shared = Arc::new(SourceShared::new());
    }
}

impl Default for CancelSource {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for CancelSource {
    fn drop(&mut self) {
        self.shared.cancel();
    }
}

impl std::fmt::Debug for CancelSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelSource")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// A token issued by a [`CancelSource`].
///
/// Reflects the source's cancellation state; it cannot be cancelled on its
/// own. The token holds shared ownership of the source's state, so it stays
/// valid after the source is dropped (at which point it is cancelled, since
/// dropping the source cancels).
///
/// Each token supports one registered handler at a time, like any other
/// token; create one token per consumer.
pub struct SourcedToken {
    shared: Arc<SourceShared>,
    slot: Arc<HazardSlot>,
}

impl SourcedToken {
    /// Attach this token's slot to the source registry, unless the source
    /// has already been cancelled.
    ///
    /// Called with the handler freshly installed in the slot; on the
    /// already-cancelled branch the installation is withdrawn.
    ///
    /// # Safety
    ///
    /// `handler` must be the handler just installed by the `register` call
    /// that returned [`Registered::Unattached`].
    unsafe fn attach(&self, handler: &dyn CancelHandler) -> bool {
        let mut registry = self
            .shared
            .registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if self.shared.cancelled.load(Ordering::Relaxed) {
            // The cancel walk never saw this slot; commit the sentinel and
            // report the late join.
            unsafe { self.slot.withdraw(handler) };
            return false;
        }
        registry.slots.push(Arc::clone(&self.slot));
        true
    }
}

impl CancelToken for SourcedToken {
    #[inline]
    fn is_cancelled(&self) -> bool {
        self.shared.cancelled.load(Ordering::Acquire)
    }

    fn sleep_for(&self, duration: Duration) {
        let registry = self
            .shared
            .registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if self.shared.cancelled.load(Ordering::Acquire) {
            return;
        }
        let _ = self
            .shared
            .wake
            .wait_timeout_while(registry, duration, |_| {
                !self.shared.cancelled.load(Ordering::Acquire)
            })
            .unwrap_or_else(PoisonError::into_inner);
    }

    unsafe fn try_register_handler(&self, handler: &dyn CancelHandler) -> bool {
        match unsafe { self.slot.register(handler) } {
            Registered::Yes => true,
            Registered::AlreadyCancelled => false,
            // First registration: attach under the source mutex.
            Registered::Unattached => unsafe { self.attach(handler) },
        }
    }

    unsafe fn try_deregister_handler(&self, handler: &dyn CancelHandler) -> bool {
        unsafe { self.slot.try_deregister(handler) }
    }

    unsafe fn deregister_handler_slow(&self, handler: &dyn CancelHandler) {
        {
            let mut registry = self
                .shared
                .registry
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            while !registry.cancel_done {
                registry = self
                    .shared
                    .wake
                    .wait(registry)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        }
        handler.reset();
    }
}

impl Drop for SourcedToken {
    fn drop(&mut self) {
        // Detach from the registry. Cheap for tokens that never registered
        // (they were never attached) and after cancellation (the registry
        // was drained by the walk).
        let mut registry = self
            .shared
            .registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        registry.slots.retain(|slot| !Arc::ptr_eq(slot, &self.slot));
    }
}

impl std::fmt::Debug for SourcedToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourcedToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
