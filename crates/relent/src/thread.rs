//! An owned thread that is cancelled on drop, plus cancellable sleeps.

use std::panic;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::token::StandaloneToken;
use crate::CancelToken;

/// Sleep for `duration`, returning early if `token` is cancelled.
///
/// Cancellation is not reported through the return value; check the token.
///
/// # Example
///
/// ```rust
/// use relent::{sleep_for, CancelToken, StandaloneToken};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let token = Arc::new(StandaloneToken::new());
/// token.cancel_after(Duration::from_millis(10));
///
/// sleep_for(Duration::from_secs(60), &*token); // returns in ~10ms
/// assert!(token.is_cancelled());
/// ```
pub fn sleep_for<C: CancelToken + ?Sized>(duration: Duration, token: &C) {
    token.sleep_for(duration);
}

/// Sleep until `deadline`, returning early if `token` is cancelled.
pub fn sleep_until<C: CancelToken + ?Sized>(deadline: Instant, token: &C) {
    token.sleep_for(deadline.saturating_duration_since(Instant::now()));
}

/// A thread wrapper that owns a cancellation token and cancels it on drop.
///
/// The token is passed by reference to the thread closure; the wrapper
/// guarantees it outlives every blocking call the thread registers against
/// it. Dropping the wrapper cancels the token and joins — a `Thread` never
/// outlives its owner silently.
///
/// The wrapper is move-only; [`reset`](Self::reset) is equivalent to
/// dropping and default-constructing in place.
///
/// # Example
///
/// ```rust
/// use relent::{sleep_for, CancelToken, Thread};
/// use std::time::Duration;
///
/// let mut worker = Thread::spawn(|token| {
///     while token.is_active() {
///         sleep_for(Duration::from_millis(100), token);
///     }
/// });
///
/// assert!(worker.joinable());
/// worker.reset(); // cancel + join; returns promptly
/// assert!(!worker.joinable());
/// ```
pub struct Thread {
    inner: Option<Inner>,
}

struct Inner {
    handle: JoinHandle<()>,
    token: Arc<StandaloneToken>,
}

impl Thread {
    /// An empty wrapper owning no thread.
    pub const fn new() -> Self {
        Self { inner: None }
    }

    /// Spawn a thread running `f` with a reference to the wrapper's token.
    pub fn spawn<F>(f: F) -> Self
    where
        F: FnOnce(&StandaloneToken) + Send + 'static,
    {
        let token = Arc::new(StandaloneToken::new());
        let handle = {
            let token = Arc::clone(&token);
            thread::spawn(move || f(&token))
        };
        Self {
            inner: Some(Inner { handle, token }),
        }
    }

    /// Whether this wrapper currently owns a thread.
    pub fn joinable(&self) -> bool {
        self.inner.is_some()
    }

    /// The owner-side view of the thread's token, if a thread is running.
    ///
    /// Useful for cancelling without joining, or for checking state.
    pub fn token(&self) -> Option<&StandaloneToken> {
        self.inner.as_ref().map(|inner| &*inner.token)
    }

    /// Join without cancelling. A panic in the thread is propagated.
    pub fn join(&mut self) {
        if let Some(inner) = self.inner.take() {
            join_handle(inner.handle);
        }
    }

    /// Cancel the token, join, and return to the empty state.
    ///
    /// Equivalent to dropping the wrapper and default-constructing a new
    /// one. A panic in the thread is propagated unless this thread is
    /// already unwinding.
    pub fn reset(&mut self) {
        if let Some(inner) = self.inner.take() {
            inner.token.cancel();
            join_handle(inner.handle);
        }
    }
}

fn join_handle(handle: JoinHandle<()>) {
    if let Err(payload) = handle.join() {
        if !thread::panicking() {
            panic::resume_unwind(payload);
        }
    }
}

impl Default for Thread {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Thread {
    fn drop(&mut self) {
        self.reset();
    }
}

impl std::fmt::Debug for Thread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Thread")
            .field("joinable", &self.joinable())
            .finish()
    }
}
