//! A token that never cancels.

use std::thread;
use std::time::Duration;

use crate::handler::CancelHandler;
use crate::CancelToken;

/// A [`CancelToken`] that never cancels.
///
/// The default for callers that have no cancellation to offer: registration
/// trivially succeeds, the handler is never invoked, and sleeping delegates
/// to the platform sleep.
///
/// # Example
///
/// ```rust
/// use relent::{CancelToken, NeverToken};
/// use std::time::Duration;
///
/// fn run(token: &impl CancelToken) {
///     while token.is_active() {
///         // ... one unit of work ...
///         # break;
///     }
/// }
///
/// // Caller does not need cancellation.
/// run(&NeverToken);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct NeverToken;

impl CancelToken for NeverToken {
    #[inline(always)]
    fn is_cancelled(&self) -> bool {
        false
    }

    fn sleep_for(&self, duration: Duration) {
        thread::sleep(duration);
    }

    unsafe fn try_register_handler(&self, _handler: &dyn CancelHandler) -> bool {
        true
    }

    unsafe fn try_deregister_handler(&self, _handler: &dyn CancelHandler) -> bool {
        true
    }

    unsafe fn deregister_handler_slow(&self, _handler: &dyn CancelHandler) {
        debug_assert!(false, "never-token deregistration cannot race a cancel");
    }
}
