//! # relent
//!
//! Cooperative cancellation for blocking code.
//!
//! This crate makes a set of commonly blocking operations — condvar waits,
//! sleeps, and (via `relent-poll`) file-descriptor readiness waits —
//! cancellable from another thread, deterministically and without
//! allocation on the hot path.
//!
//! The moving parts:
//!
//! - A [`CancelToken`] is checked by waiters and driven by a canceller.
//!   Concrete tokens: [`StandaloneToken`] (one producer),
//!   [`SourcedToken`]s issued by a [`CancelSource`] (one-to-many fan-out),
//!   and [`NeverToken`] (never cancels).
//! - A [`CancelHandler`] is a waiter-supplied wake-up callback registered
//!   with a token for the duration of one blocking call. Registration and
//!   deregistration each cost a single atomic exchange when no cancellation
//!   races them.
//! - A [`CancelGuard`] scopes the registration.
//!
//! Most users never touch handlers or guards: the blocking primitives
//! ([`cv::wait`] and friends, [`sleep_for`], `relent-poll`'s `poll`/`read`)
//! wrap the protocol, and [`Thread`] ties a token's lifetime to a worker
//! thread.
//!
//! ## Example
//!
//! ```rust
//! use relent::{sleep_for, CancelToken, Thread};
//! use std::time::Duration;
//!
//! let mut worker = Thread::spawn(|token| {
//!     while token.is_active() {
//!         // Any cancellable blocking call wakes when the token cancels.
//!         sleep_for(Duration::from_millis(100), token);
//!     }
//! });
//!
//! // Cancels the token and joins; the sleep is interrupted, so this
//! // returns promptly rather than waiting out the 100ms.
//! worker.reset();
//! ```
//!
//! ## Guarantees
//!
//! - `is_cancelled()` is monotonic: once `true`, it stays `true` until an
//!   explicit `reset()` on a quiescent token.
//! - Once cancellation is signalled, an in-flight handler is invoked
//!   exactly once, and every later registration observes the cancelled
//!   state.
//! - A waiter may destroy its handler as soon as its guard is dropped; no
//!   canceller thread touches the handler after that.
//! - Cancellation is a wake-up, not an error: blocking primitives report it
//!   through ordinary return values and the caller decides what it means.

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::time::Duration;

pub mod cv;
mod guard;
mod handler;
mod never;
mod slot;
mod source;
pub mod thread;
mod token;

pub use cv::WaitOutcome;
pub use guard::CancelGuard;
pub use handler::CancelHandler;
pub use never::NeverToken;
pub use source::{CancelSource, SourcedToken};
pub use thread::{sleep_for, sleep_until, Thread};
pub use token::StandaloneToken;

/// The cancellation state object checked by waiters and driven by
/// cancellers.
///
/// The safe surface is [`is_cancelled`](Self::is_cancelled) /
/// [`is_active`](Self::is_active) and [`sleep_for`](Self::sleep_for). The
/// three `unsafe` methods are the handler registration protocol used by
/// [`CancelGuard`] and the blocking primitives; custom token
/// implementations must uphold its guarantees:
///
/// - at most one handler is registered at any instant;
/// - once cancellation is signalled, a registered handler is invoked
///   exactly once and later registrations return `false`;
/// - [`deregister_handler_slow`](Self::deregister_handler_slow) returns
///   only after the canceller has returned from the handler's `cancel`,
///   and pairs it with exactly one `reset`.
pub trait CancelToken {
    /// Whether cancellation has been signalled.
    ///
    /// Monotonic: once `true`, stays `true` (absent an explicit reset on a
    /// quiescent token).
    fn is_cancelled(&self) -> bool;

    /// `!is_cancelled()`, for `while token.is_active()` loops.
    #[inline]
    fn is_active(&self) -> bool {
        !self.is_cancelled()
    }

    /// Sleep for `duration`, returning early if the token is cancelled.
    fn sleep_for(&self, duration: Duration);

    /// Register `handler` so a canceller can wake the coming blocking call.
    ///
    /// Returns `false` when the token is already cancelled; nothing is
    /// registered and the blocking call should be skipped.
    ///
    /// # Safety
    ///
    /// The handler must outlive the registration: the caller must
    /// deregister (via [`try_deregister_handler`] and, on failure,
    /// [`deregister_handler_slow`]) before the handler is moved or
    /// destroyed. No other handler may currently be registered.
    ///
    /// [`try_deregister_handler`]: Self::try_deregister_handler
    /// [`deregister_handler_slow`]: Self::deregister_handler_slow
    unsafe fn try_register_handler(&self, handler: &dyn CancelHandler) -> bool;

    /// Fast-path deregistration.
    ///
    /// Returns `true` when no cancellation raced; the handler may be
    /// destroyed immediately. Returns `false` when a canceller is in
    /// flight; the caller must call
    /// [`deregister_handler_slow`](Self::deregister_handler_slow).
    ///
    /// # Safety
    ///
    /// `handler` must be the currently registered handler.
    unsafe fn try_deregister_handler(&self, handler: &dyn CancelHandler) -> bool;

    /// Slow-path deregistration: wait until the canceller has returned from
    /// the handler's `cancel`, then invoke the handler's `reset`.
    ///
    /// # Safety
    ///
    /// Must only be called after [`try_deregister_handler`] returned
    /// `false` for this handler, exactly once.
    ///
    /// [`try_deregister_handler`]: Self::try_deregister_handler
    unsafe fn deregister_handler_slow(&self, handler: &dyn CancelHandler);
}

impl<T: CancelToken + ?Sized> CancelToken for &T {
    #[inline]
    fn is_cancelled(&self) -> bool {
        (**self).is_cancelled()
    }

    fn sleep_for(&self, duration: Duration) {
        (**self).sleep_for(duration)
    }

    unsafe fn try_register_handler(&self, handler: &dyn CancelHandler) -> bool {
        unsafe { (**self).try_register_handler(handler) }
    }

    unsafe fn try_deregister_handler(&self, handler: &dyn CancelHandler) -> bool {
        unsafe { (**self).try_deregister_handler(handler) }
    }

    unsafe fn deregister_handler_slow(&self, handler: &dyn CancelHandler) {
        unsafe { (**self).deregister_handler_slow(handler) }
    }
}

impl<T: CancelToken + ?Sized> CancelToken for std::sync::Arc<T> {
    #[inline]
    fn is_cancelled(&self) -> bool {
        (**self).is_cancelled()
    }

    fn sleep_for(&self, duration: Duration) {
        (**self).sleep_for(duration)
    }

    unsafe fn try_register_handler(&self, handler: &dyn CancelHandler) -> bool {
        unsafe { (**self).try_register_handler(handler) }
    }

    unsafe fn try_deregister_handler(&self, handler: &dyn CancelHandler) -> bool {
        unsafe { (**self).try_deregister_handler(handler) }
    }

    unsafe fn deregister_handler_slow(&self, handler: &dyn CancelHandler) {
        unsafe { (**self).deregister_handler_slow(handler) }
    }
}
