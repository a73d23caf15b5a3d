//! The hazard slot: one atomic word that linearises handler registration,
//! deregistration, and cancellation.
//!
//! Every cancellable token owns one slot. The slot holds one of four logical
//! values:
//!
//! | Value | Meaning |
//! |-------|---------|
//! | `EMPTY` | No handler registered; a waiter may register one. |
//! | handler address | A handler is registered and may be invoked by a canceller. |
//! | `CANCELLED` | Cancellation has been committed. Terminal, apart from transient swaps that immediately restore it. |
//! | `UNATTACHED` | The slot belongs to a sourced token that has never registered; the first registration must attach it to its source. |
//!
//! The sentinels are the addresses `1` and `2`, which are never valid object
//! addresses on the platforms this crate supports. Rust trait objects are fat
//! pointers, so the slot word carries only the handler's *data* address; the
//! full `*const dyn CancelHandler` sits in a companion cell that is written
//! before the swap publishing the address (release) and read only by the
//! thread whose swap removed the address (acquire). At most one swap can ever
//! observe a given handler address, so the cell has exactly one reader per
//! registration.
//!
//! # Memory ordering
//!
//! | Operation | Ordering | Effect |
//! |-----------|----------|--------|
//! | `register` swap | AcqRel | Publishes the handler cell to the canceller. |
//! | `try_deregister` swap | AcqRel | Synchronises with the canceller's sentinel swap. |
//! | `take_for_cancel` swap | AcqRel | Acquires the handler cell, releases the sentinel. |
//!
//! The completion handshake (waiting until the canceller has returned from
//! the handler) is not the slot's job; tokens provide it with a mutex and a
//! condvar.

use core::cell::UnsafeCell;
use core::mem;
use core::ptr::{self, NonNull};
use core::sync::atomic::{AtomicPtr, Ordering};

use crate::handler::CancelHandler;

const EMPTY: usize = 0;
const CANCELLED: usize = 1;
const UNATTACHED: usize = 2;

const fn sentinel(value: usize) -> *mut () {
    ptr::without_provenance_mut(value)
}

fn data_addr(handler: &dyn CancelHandler) -> *mut () {
    handler as *const dyn CancelHandler as *const () as *mut ()
}

fn erase<'a>(handler: &'a (dyn CancelHandler + 'a)) -> NonNull<dyn CancelHandler + 'static> {
    let ptr = NonNull::from(handler);
    // SAFETY: lifetime erasure only; the pointer layout is unchanged. The
    // registration protocol guarantees the pointee outlives every read.
    unsafe {
        mem::transmute::<NonNull<dyn CancelHandler + 'a>, NonNull<dyn CancelHandler + 'static>>(ptr)
    }
}

/// Outcome of a registration attempt.
pub(crate) enum Registered {
    /// The handler is installed; the blocking call may proceed.
    Yes,
    /// The slot was already cancelled; the sentinel has been restored and
    /// the handler will never be invoked.
    AlreadyCancelled,
    /// The handler is installed, but the slot has never been attached to its
    /// source. The caller must attach it under the source mutex, or
    /// [`withdraw`](HazardSlot::withdraw) it if the source is already gone.
    Unattached,
}

pub(crate) struct HazardSlot {
    /// `EMPTY` | `CANCELLED` | `UNATTACHED` | address of the registered handler.
    state: AtomicPtr<()>,
    /// The fat pointer behind the address in `state`. Valid only while
    /// `state` holds the matching address.
    handler: UnsafeCell<Option<NonNull<dyn CancelHandler>>>,
}

// SAFETY: the atomic `state` word serialises all access to `handler`: the
// cell is written before a release swap publishes the handler address and
// read only by the single thread whose AcqRel swap removed that address.
unsafe impl Send for HazardSlot {}
unsafe impl Sync for HazardSlot {}

impl HazardSlot {
    /// A slot ready for registration.
    pub(crate) const fn new() -> Self {
        Self {
            state: AtomicPtr::new(sentinel(EMPTY)),
            handler: UnsafeCell::new(None),
        }
    }

    /// A slot that must be attached to a source before its first use.
    pub(crate) const fn unattached() -> Self {
        Self {
            state: AtomicPtr::new(sentinel(UNATTACHED)),
            handler: UnsafeCell::new(None),
        }
    }

    /// Install `handler` with a single atomic exchange.
    ///
    /// # Safety
    ///
    /// The handler must stay alive until it is deregistered (or withdrawn),
    /// and no other handler may currently be registered on this slot.
    pub(crate) unsafe fn register(&self, handler: &dyn CancelHandler) -> Registered {
        let addr = data_addr(handler);
        debug_assert!(
            addr as usize > UNATTACHED,
            "handler lives at a sentinel address"
        );
        // Publish the fat pointer; the swap below releases this write.
        unsafe { *self.handler.get() = Some(erase(handler)) };
        match self.state.swap(addr, Ordering::AcqRel) as usize {
            EMPTY => Registered::Yes,
            CANCELLED => {
                // Late joiner: put the terminal sentinel back. No canceller
                // can race this store, cancellation has already committed.
                self.state.store(sentinel(CANCELLED), Ordering::Release);
                Registered::AlreadyCancelled
            }
            UNATTACHED => Registered::Unattached,
            _ => {
                debug_assert!(false, "a handler is already registered on this token");
                Registered::AlreadyCancelled
            }
        }
    }

    /// Fast-path deregistration: a single atomic exchange.
    ///
    /// Returns `true` when no cancellation raced the blocking call; the
    /// handler may be destroyed immediately. Returns `false` when a canceller
    /// has reserved the slot; the caller must wait for the token's
    /// cancellation-complete signal and then invoke the handler's `reset`.
    ///
    /// # Safety
    ///
    /// `handler` must be the handler passed to the matching [`register`].
    ///
    /// [`register`]: Self::register
    pub(crate) unsafe fn try_deregister(&self, handler: &dyn CancelHandler) -> bool {
        let prev = self.state.swap(sentinel(EMPTY), Ordering::AcqRel);
        if ptr::eq(prev, data_addr(handler)) {
            return true;
        }
        debug_assert!(
            prev as usize == CANCELLED,
            "deregistering a handler that is not registered"
        );
        // A canceller is in flight; restore the terminal sentinel.
        self.state.store(sentinel(CANCELLED), Ordering::Release);
        false
    }

    /// Canceller side: commit the cancelled sentinel and take whatever
    /// handler was registered at that instant.
    ///
    /// At most one caller ever receives `Some` for a given registration; the
    /// returned pointer is valid until the owning token signals
    /// cancellation-complete, because the waiter's slow path blocks on that
    /// signal before destroying the handler.
    pub(crate) fn take_for_cancel(&self) -> Option<NonNull<dyn CancelHandler>> {
        let prev = self.state.swap(sentinel(CANCELLED), Ordering::AcqRel) as usize;
        debug_assert!(prev != CANCELLED, "slot cancelled twice");
        match prev {
            EMPTY | UNATTACHED | CANCELLED => None,
            // SAFETY: our swap removed the handler address, so the cell is
            // ours to read; the release half of the registering swap makes
            // the cell write visible to our acquire half.
            _ => unsafe { *self.handler.get() },
        }
    }

    /// Replace a just-installed handler with the cancelled sentinel.
    ///
    /// Used when the attach step of a sourced token's first registration
    /// finds the source already cancelled: the handler went in, nothing else
    /// has touched the slot, and it must come straight back out.
    ///
    /// # Safety
    ///
    /// `handler` must be the handler installed by the immediately preceding
    /// [`register`](Self::register) call that returned
    /// [`Registered::Unattached`].
    pub(crate) unsafe fn withdraw(&self, handler: &dyn CancelHandler) {
        let prev = self.state.swap(sentinel(CANCELLED), Ordering::AcqRel);
        debug_assert!(
            ptr::eq(prev, data_addr(handler)),
            "withdrawing a handler that is not installed"
        );
        let _ = prev;
    }

    /// Whether a handler is currently registered.
    pub(crate) fn is_occupied(&self) -> bool {
        !matches!(
            self.state.load(Ordering::Acquire) as usize,
            EMPTY | CANCELLED | UNATTACHED
        )
    }

    /// Return the slot to `EMPTY`. The token must be quiescent: no handler
    /// registered and no cancellation in flight.
    pub(crate) fn clear(&self) {
        debug_assert!(!self.is_occupied(), "clearing a slot with a live handler");
        self.state.store(sentinel(EMPTY), Ordering::Release);
    }

    #[cfg(test)]
    fn raw_state(&self) -> usize {
        self.state.load(Ordering::Acquire) as usize
    }
}
