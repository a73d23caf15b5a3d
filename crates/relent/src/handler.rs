//! The wake-up handler contract.

/// A waiter-supplied wake-up callback associated with one blocking call.
///
/// A handler is registered with a token for the duration of a single
/// blocking operation (a condvar wait, a `poll`, a sleep). When the token is
/// cancelled while the handler is registered, the canceller invokes
/// [`cancel`](Self::cancel) exactly once from its own thread; the handler
/// must wake the associated blocking call.
///
/// # Contract
///
/// - For every `cancel` invocation the owner observes exactly one matching
///   [`reset`](Self::reset) invocation before the handler is destroyed.
///   `reset` is driven by the deregistration slow path, never by the
///   canceller.
/// - `cancel` may be called from an arbitrary thread, hence the `Sync`
///   bound.
/// - `cancel` must not block indefinitely and must not call back into the
///   token it is registered with.
/// - Unwinding out of `cancel` is a programming error.
///
/// Handlers live on the waiter's stack and are registered by reference;
/// they are never copied or moved while registered.
///
/// # Example
///
/// ```rust
/// use relent::CancelHandler;
/// use std::sync::atomic::{AtomicBool, Ordering};
///
/// /// Wakes a spin-waiter by flipping a flag.
/// struct FlagHandler {
///     woken: AtomicBool,
/// }
///
/// impl CancelHandler for FlagHandler {
///     fn cancel(&self) {
///         self.woken.store(true, Ordering::Release);
///     }
///
///     fn reset(&self) {
///         self.woken.store(false, Ordering::Release);
///     }
/// }
/// ```
pub trait CancelHandler: Sync {
    /// Wake the associated blocking call.
    fn cancel(&self);

    /// Return to the pre-`cancel` quiescent state.
    ///
    /// The default does nothing, which is correct for handlers whose wake-up
    /// mechanism needs no rearming.
    fn reset(&self) {}
}
