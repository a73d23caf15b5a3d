//! Scoped handler registration.

use crate::handler::CancelHandler;
use crate::CancelToken;

/// Binds a handler to a token for the duration of one blocking call.
///
/// Construction registers the handler; dropping the guard deregisters it,
/// taking the slow path (wait for the canceller, then pair the handler's
/// `reset`) when a cancellation raced the blocking call. Once the guard is
/// dropped the handler may be destroyed: no canceller thread will touch it
/// again.
///
/// If the token was already cancelled at construction, nothing is registered
/// and [`is_cancelled`](Self::is_cancelled) reports that the blocking call
/// should be skipped entirely.
///
/// Prefer [`CancelGuard::with`], which cannot be misused. The raw
/// constructor exists for adapters that need to interleave the guard with
/// other scoped state (the poll adapter does).
///
/// # Example
///
/// ```rust
/// use relent::{CancelGuard, CancelHandler, StandaloneToken};
/// use std::sync::atomic::{AtomicBool, Ordering};
///
/// struct FlagHandler(AtomicBool);
///
/// impl CancelHandler for FlagHandler {
///     fn cancel(&self) {
///         self.0.store(true, Ordering::Release);
///     }
///     fn reset(&self) {
///         self.0.store(false, Ordering::Release);
///     }
/// }
///
/// let token = StandaloneToken::new();
/// let handler = FlagHandler(AtomicBool::new(false));
///
/// CancelGuard::with(&token, &handler, |guard| {
///     if guard.is_cancelled() {
///         return; // cancelled before we could block
///     }
///     // ... blocking call woken by the handler ...
/// });
/// ```
pub struct CancelGuard<'a, C: CancelToken + ?Sized> {
    token: &'a C,
    handler: &'a dyn CancelHandler,
    registered: bool,
}

impl<'a, C: CancelToken + ?Sized> CancelGuard<'a, C> {
    /// Register `handler` with `token`.
    ///
    /// # Safety
    ///
    /// The guard must be dropped — not leaked — before `handler` is
    /// destroyed or moved. `std::mem::forget` on a registered guard leaves
    /// the token holding a pointer to a handler that is about to die.
    pub unsafe fn new(token: &'a C, handler: &'a dyn CancelHandler) -> Self {
        let registered = unsafe { token.try_register_handler(handler) };
        Self {
            token,
            handler,
            registered,
        }
    }

    /// Register `handler` for the duration of `f`.
    ///
    /// The guard lives on this call's frame, so the closure cannot leak it;
    /// deregistration is guaranteed even if `f` unwinds.
    pub fn with<R>(
        token: &C,
        handler: &dyn CancelHandler,
        f: impl FnOnce(&CancelGuard<'_, C>) -> R,
    ) -> R {
        // SAFETY: the guard is dropped when this frame unwinds or returns,
        // strictly before `handler`'s borrow ends.
        let guard = unsafe { CancelGuard::new(token, handler) };
        f(&guard)
    }

    /// Whether the token was already cancelled when the guard was created.
    ///
    /// When `true`, no handler is registered and the blocking call should be
    /// skipped.
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        !self.registered
    }
}

impl<C: CancelToken + ?Sized> Drop for CancelGuard<'_, C> {
    fn drop(&mut self) {
        if !self.registered {
            return;
        }
        // SAFETY: `handler` is the handler registered in `new`, still alive
        // because this guard borrows it.
        if unsafe { self.token.try_deregister_handler(self.handler) } {
            return;
        }
        // A canceller won the race: wait until it has returned from the
        // handler, then pair the reset.
        unsafe { self.token.deregister_handler_slow(self.handler) };
    }
}

impl<C: CancelToken + ?Sized> std::fmt::Debug for CancelGuard<'_, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelGuard")
            .field("registered", &self.registered)
            .finish()
    }
}
