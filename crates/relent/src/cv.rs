//! Cancellable condition-variable waits.
//!
//! These functions wrap [`std::sync::Condvar`] waits so that a concurrent
//! [`cancel`](crate::StandaloneToken::cancel) wakes the waiter. The wake-up
//! handler re-acquires the waiter's mutex before notifying; without that, the
//! notification could slip between the waiter's last predicate check and its
//! wait and be lost.
//!
//! A `MutexGuard` does not expose the mutex it came from, so every function
//! takes both the mutex and the guard. The guard must have been produced by
//! that mutex; this is a precondition, not something the functions can check.
//!
//! When a cancellation races the end of a wait, deregistration must wait for
//! the canceller to finish — and the canceller may itself be blocked
//! acquiring the waiter's mutex inside the handler. The functions resolve
//! this by releasing the user mutex for the duration of that wait and
//! re-acquiring it afterwards; predicates are re-checked across the transient
//! drop, and the plain [`wait`] may return spuriously (as any condvar wait
//! may).
//!
//! Poisoned mutexes are treated as recovered throughout
//! (`PoisonError::into_inner`).
//!
//! # Example
//!
//! ```rust
//! use relent::{cv, StandaloneToken, WaitOutcome};
//! use std::sync::{Arc, Condvar, Mutex};
//! use std::thread;
//! use std::time::Duration;
//!
//! let shared = Arc::new((Mutex::new(false), Condvar::new()));
//! let token = Arc::new(StandaloneToken::new());
//!
//! let waiter = {
//!     let shared = Arc::clone(&shared);
//!     let token = Arc::clone(&token);
//!     thread::spawn(move || {
//!         let (mutex, condvar) = &*shared;
//!         let guard = mutex.lock().unwrap();
//!         let (_guard, outcome) =
//!             cv::wait_while(condvar, mutex, guard, &*token, |ready| !*ready);
//!         outcome
//!     })
//! };
//!
//! // No notifier ever runs; cancellation wakes the waiter.
//! thread::sleep(Duration::from_millis(20));
//! token.cancel();
//! assert_eq!(waiter.join().unwrap(), WaitOutcome::Cancelled);
//! ```

use std::fmt;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::handler::CancelHandler;
use crate::CancelToken;

/// Result of a cancellable wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WaitOutcome {
    /// The wait ended normally: the predicate cleared, or — for the
    /// predicate-less timed waits — the condvar woke before the timeout.
    Satisfied,
    /// The token was cancelled. Cancellation is not an error; the caller
    /// decides what it means for the outer operation.
    Cancelled,
    /// The timeout or deadline passed. Distinct from cancellation.
    TimedOut,
}

impl WaitOutcome {
    /// Returns `true` for [`WaitOutcome::Satisfied`].
    #[inline]
    pub fn is_satisfied(&self) -> bool {
        matches!(self, Self::Satisfied)
    }

    /// Returns `true` for [`WaitOutcome::Cancelled`].
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Returns `true` for [`WaitOutcome::TimedOut`].
    #[inline]
    pub fn is_timed_out(&self) -> bool {
        matches!(self, Self::TimedOut)
    }
}

impl fmt::Display for WaitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Satisfied => write!(f, "wait satisfied"),
            Self::Cancelled => write!(f, "wait cancelled"),
            Self::TimedOut => write!(f, "wait timed out"),
        }
    }
}

/// Wakes a condvar waiter from the canceller's thread.
struct CvHandler<'a, T> {
    condvar: &'a Condvar,
    mutex: &'a Mutex<T>,
}

impl<T: Send> CancelHandler for CvHandler<'_, T> {
    fn cancel(&self) {
        // Taking the lock orders this notification after the waiter's last
        // predicate check; dropping it immediately keeps the canceller out
        // of the waiter's critical section.
        let _guard = self.mutex.lock().unwrap_or_else(PoisonError::into_inner);
        self.condvar.notify_all();
    }
}

/// Deregisters on drop. Keeps the exact-once cancel/reset pairing intact
/// when a predicate unwinds while the handler is registered; the user-mutex
/// guard is declared after this and therefore released first.
struct Registration<'a, C: CancelToken + ?Sized> {
    token: &'a C,
    handler: &'a dyn CancelHandler,
    armed: bool,
}

impl<C: CancelToken + ?Sized> Drop for Registration<'_, C> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        // SAFETY: `handler` is registered and outlives this guard.
        if !unsafe { self.token.try_deregister_handler(self.handler) } {
            unsafe { self.token.deregister_handler_slow(self.handler) };
        }
    }
}

/// Deregister after the blocking call, re-acquiring the user mutex if the
/// slow path had to release it. Returns the guard and whether a cancellation
/// raced (i.e. the slow path ran).
fn finish<'a, T: Send, C: CancelToken + ?Sized>(
    token: &C,
    handler: &dyn CancelHandler,
    mutex: &'a Mutex<T>,
    guard: MutexGuard<'a, T>,
) -> (MutexGuard<'a, T>, bool) {
    // SAFETY: `handler` is the handler registered for this call.
    if unsafe { token.try_deregister_handler(handler) } {
        return (guard, false);
    }
    // The canceller may be blocked on our mutex inside the handler; release
    // it so the canceller can finish, then wait out the cancellation.
    drop(guard);
    unsafe { token.deregister_handler_slow(handler) };
    let guard = mutex.lock().unwrap_or_else(PoisonError::into_inner);
    (guard, true)
}

/// Wait on `condvar` until notified, woken by cancellation, or spuriously.
///
/// Returns with the mutex held, like [`Condvar::wait`]. If the token is
/// already cancelled the wait is skipped entirely. The caller re-checks its
/// predicate and the token, exactly as with a plain condvar.
pub fn wait<'a, T: Send, C: CancelToken + ?Sized>(
    condvar: &Condvar,
    mutex: &'a Mutex<T>,
    guard: MutexGuard<'a, T>,
    token: &C,
) -> MutexGuard<'a, T> {
    let handler = CvHandler { condvar, mutex };
    // SAFETY: the handler outlives the registration; it is deregistered by
    // `finish` before this frame returns, and nothing in between unwinds.
    if !unsafe { token.try_register_handler(&handler) } {
        return guard;
    }
    let guard = condvar.wait(guard).unwrap_or_else(PoisonError::into_inner);
    finish(token, &handler, mutex, guard).0
}

/// Wait on `condvar` while `condition` returns `true`.
///
/// The condition is evaluated once before anything else (cheap
/// short-circuit), then under the mutex after every wake-up. Returns
/// [`WaitOutcome::Satisfied`] once the condition clears, or
/// [`WaitOutcome::Cancelled`] if the token is cancelled while the condition
/// still holds; when both race, the condition at the point of return
/// decides. Never returns [`WaitOutcome::TimedOut`].
pub fn wait_while<'a, T: Send, C: CancelToken + ?Sized, F: FnMut(&mut T) -> bool>(
    condvar: &Condvar,
    mutex: &'a Mutex<T>,
    mut guard: MutexGuard<'a, T>,
    token: &C,
    mut condition: F,
) -> (MutexGuard<'a, T>, WaitOutcome) {
    if !condition(&mut guard) {
        return (guard, WaitOutcome::Satisfied);
    }
    let handler = CvHandler { condvar, mutex };
    // SAFETY: deregistered by `finish` or by `registration` on unwind,
    // before the handler's frame dies.
    if !unsafe { token.try_register_handler(&handler) } {
        return (guard, WaitOutcome::Cancelled);
    }
    let mut registration = Registration {
        token,
        handler: &handler,
        armed: true,
    };
    // Rebound after `registration`: on unwind the lock is released before
    // the registration deregisters, so the slow path cannot deadlock.
    let mut guard = guard;

    let outcome = loop {
        guard = condvar.wait(guard).unwrap_or_else(PoisonError::into_inner);
        if !condition(&mut guard) {
            break WaitOutcome::Satisfied;
        }
        if token.is_cancelled() {
            break WaitOutcome::Cancelled;
        }
    };

    registration.armed = false;
    let (mut guard, raced) = finish(token, &handler, mutex, guard);
    // The slow path dropped the lock; the condition at the point of return
    // decides between satisfied and cancelled.
    let outcome = if raced {
        if !condition(&mut guard) {
            WaitOutcome::Satisfied
        } else {
            WaitOutcome::Cancelled
        }
    } else {
        outcome
    };
    (guard, outcome)
}

/// Wait on `condvar` with a timeout.
///
/// The predicate-less timed wait: returns [`WaitOutcome::TimedOut`] when the
/// timeout elapsed, [`WaitOutcome::Cancelled`] when the token is observed
/// cancelled at return, and [`WaitOutcome::Satisfied`] otherwise — which,
/// like [`Condvar::wait_timeout`], covers notifications and spurious
/// wake-ups alike; the caller re-checks its predicate.
pub fn wait_timeout<'a, T: Send, C: CancelToken + ?Sized>(
    condvar: &Condvar,
    mutex: &'a Mutex<T>,
    guard: MutexGuard<'a, T>,
    timeout: Duration,
    token: &C,
) -> (MutexGuard<'a, T>, WaitOutcome) {
    let handler = CvHandler { condvar, mutex };
    // SAFETY: deregistered by `finish` before this frame returns.
    if !unsafe { token.try_register_handler(&handler) } {
        return (guard, WaitOutcome::Cancelled);
    }
    let (guard, result) = condvar
        .wait_timeout(guard, timeout)
        .unwrap_or_else(PoisonError::into_inner);
    let (guard, _raced) = finish(token, &handler, mutex, guard);
    let outcome = if result.timed_out() {
        WaitOutcome::TimedOut
    } else if token.is_cancelled() {
        WaitOutcome::Cancelled
    } else {
        WaitOutcome::Satisfied
    };
    (guard, outcome)
}

/// Wait on `condvar` until `deadline`.
///
/// Deadline flavour of [`wait_timeout`]; a deadline in the past reports
/// [`WaitOutcome::TimedOut`] without blocking (after the usual cancellation
/// check).
pub fn wait_until<'a, T: Send, C: CancelToken + ?Sized>(
    condvar: &Condvar,
    mutex: &'a Mutex<T>,
    guard: MutexGuard<'a, T>,
    deadline: Instant,
    token: &C,
) -> (MutexGuard<'a, T>, WaitOutcome) {
    let remaining = deadline.saturating_duration_since(Instant::now());
    wait_timeout(condvar, mutex, guard, remaining, token)
}

/// Wait on `condvar` while `condition` returns `true`, up to `timeout`.
///
/// Three-valued: [`WaitOutcome::Satisfied`] when the condition clears,
/// [`WaitOutcome::Cancelled`] on cancellation, [`WaitOutcome::TimedOut`]
/// when the timeout elapses with the condition still holding. The condition
/// is preferred over cancellation, cancellation over the timeout.
pub fn wait_timeout_while<'a, T: Send, C: CancelToken + ?Sized, F: FnMut(&mut T) -> bool>(
    condvar: &Condvar,
    mutex: &'a Mutex<T>,
    guard: MutexGuard<'a, T>,
    timeout: Duration,
    token: &C,
    condition: F,
) -> (MutexGuard<'a, T>, WaitOutcome) {
    wait_until_while(
        condvar,
        mutex,
        guard,
        Instant::now() + timeout,
        token,
        condition,
    )
}

/// Wait on `condvar` while `condition` returns `true`, up to `deadline`.
///
/// Deadline flavour of [`wait_timeout_while`].
pub fn wait_until_while<'a, T: Send, C: CancelToken + ?Sized, F: FnMut(&mut T) -> bool>(
    condvar: &Condvar,
    mutex: &'a Mutex<T>,
    mut guard: MutexGuard<'a, T>,
    deadline: Instant,
    token: &C,
    mut condition: F,
) -> (MutexGuard<'a, T>, WaitOutcome) {
    if !condition(&mut guard) {
        return (guard, WaitOutcome::Satisfied);
    }
    let handler = CvHandler { condvar, mutex };
    // SAFETY: deregistered by `finish` or by `registration` on unwind.
    if !unsafe { token.try_register_handler(&handler) } {
        return (guard, WaitOutcome::Cancelled);
    }
    let mut registration = Registration {
        token,
        handler: &handler,
        armed: true,
    };
    let mut guard = guard;

    let outcome = loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break WaitOutcome::TimedOut;
        }
        let (woken, _result) = condvar
            .wait_timeout(guard, remaining)
            .unwrap_or_else(PoisonError::into_inner);
        guard = woken;
        if !condition(&mut guard) {
            break WaitOutcome::Satisfied;
        }
        if token.is_cancelled() {
            break WaitOutcome::Cancelled;
        }
    };

    registration.armed = false;
    let (mut guard, raced) = finish(token, &handler, mutex, guard);
    let outcome = if raced && !outcome.is_timed_out() {
        if !condition(&mut guard) {
            WaitOutcome::Satisfied
        } else {
            WaitOutcome::Cancelled
        }
    } else {
        outcome
    };
    (guard, outcome)
}
