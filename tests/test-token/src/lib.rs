//! Tests for the token state machine: monotonicity, exact-once pairing,
//! late-joiner behaviour, and the cancellation-delay scan.
#![allow(dead_code)]

use relent::{CancelGuard, CancelHandler, CancelToken, StandaloneToken};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Counts cancel/reset invocations.
#[derive(Default)]
struct Recording {
    cancelled: AtomicUsize,
    reset: AtomicUsize,
}

impl CancelHandler for Recording {
    fn cancel(&self) {
        self.cancelled.fetch_add(1, Ordering::SeqCst);
    }

    fn reset(&self) {
        self.reset.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn is_cancelled_is_monotonic() {
    let token = StandaloneToken::new();
    assert!(!token.is_cancelled());
    token.cancel();
    for _ in 0..1000 {
        assert!(token.is_cancelled());
    }
    token.reset();
    assert!(!token.is_cancelled());
    token.cancel();
    assert!(token.is_cancelled());
}

#[test]
fn cancel_with_no_handler_invokes_nothing() {
    let token = StandaloneToken::new();
    token.cancel();

    // Every later registration observes the cancelled state.
    for _ in 0..10 {
        let handler = Recording::default();
        CancelGuard::with(&token, &handler, |guard| {
            assert!(guard.is_cancelled());
        });
        assert_eq!(handler.cancelled.load(Ordering::SeqCst), 0);
        assert_eq!(handler.reset.load(Ordering::SeqCst), 0);
    }
}

#[test]
fn cancel_from_another_thread_pairs_exactly_once() {
    let token = Arc::new(StandaloneToken::new());
    let handler = Recording::default();
    let release = Arc::new(AtomicBool::new(false));

    let canceller = {
        let token = Arc::clone(&token);
        let release = Arc::clone(&release);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            token.cancel();
            release.store(true, Ordering::SeqCst);
        })
    };

    CancelGuard::with(&*token, &handler, |guard| {
        assert!(!guard.is_cancelled());
        while !release.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(1));
        }
    });

    canceller.join().unwrap();
    assert_eq!(handler.cancelled.load(Ordering::SeqCst), 1);
    assert_eq!(handler.reset.load(Ordering::SeqCst), 1);
}

#[test]
fn handler_destroyed_immediately_after_guard() {
    // The handler is dropped right after each guard; a canceller thread
    // running concurrently must never touch a dead handler. Exercised by
    // churning registrations while a cancel lands somewhere in the middle.
    let token = Arc::new(StandaloneToken::new());

    let canceller = {
        let token = Arc::clone(&token);
        thread::spawn(move || {
            thread::sleep(Duration::from_micros(500));
            token.cancel();
        })
    };

    while token.is_active() {
        let handler = Recording::default();
        CancelGuard::with(&*token, &handler, |_guard| {
            std::hint::spin_loop();
        });
        let cancelled = handler.cancelled.load(Ordering::SeqCst);
        let reset = handler.reset.load(Ordering::SeqCst);
        assert!(cancelled <= 1);
        assert_eq!(cancelled, reset);
        // `handler` dropped here, immediately after the guard.
    }

    canceller.join().unwrap();
}

#[test]
fn reset_requires_quiescence_and_restores_service() {
    let token = StandaloneToken::new();

    // cancel -> quiescent -> reset -> full service again
    token.cancel();
    token.reset();

    let handler = Recording::default();
    CancelGuard::with(&token, &handler, |guard| {
        assert!(!guard.is_cancelled());
        token.cancel();
    });
    assert_eq!(handler.cancelled.load(Ordering::SeqCst), 1);
    assert_eq!(handler.reset.load(Ordering::SeqCst), 1);

    token.reset();
    assert!(!token.is_cancelled());
}

/// One run of the cancellation-delay race: a thread registers a guard
/// `delay` after start while the driver cancels `delay` after start. Either
/// the guard observes the cancellation at registration, or the handler's
/// cancel and reset are each invoked exactly once — never both outcomes,
/// never neither.
fn delay_case(delay: Duration) {
    let token = Arc::new(StandaloneToken::new());
    let handler = Arc::new(Recording::default());
    let alive = Arc::new(AtomicBool::new(true));
    let guard_cancelled = Arc::new(AtomicBool::new(false));

    let waiter = {
        let token = Arc::clone(&token);
        let handler = Arc::clone(&handler);
        let alive = Arc::clone(&alive);
        let guard_cancelled = Arc::clone(&guard_cancelled);
        thread::spawn(move || {
            thread::sleep(delay);
            CancelGuard::with(&*token, &*handler, |guard| {
                if guard.is_cancelled() {
                    guard_cancelled.store(true, Ordering::SeqCst);
                    return;
                }
                while alive.load(Ordering::SeqCst) {
                    thread::sleep(Duration::from_millis(1));
                }
            });
        })
    };

    thread::sleep(delay);
    token.cancel();
    alive.store(false, Ordering::SeqCst);
    waiter.join().unwrap();

    let cancelled = handler.cancelled.load(Ordering::SeqCst);
    let reset = handler.reset.load(Ordering::SeqCst);
    if guard_cancelled.load(Ordering::SeqCst) {
        assert_eq!(cancelled, 0, "late registration must not see a cancel call");
        assert_eq!(reset, 0);
    } else {
        assert_eq!(cancelled, 1, "registered handler must be cancelled exactly once");
        assert_eq!(reset, 1, "each cancel pairs with exactly one reset");
    }
}

#[test]
fn cancellation_delay_scan_smoke() {
    let mut delay = Duration::ZERO;
    while delay < Duration::from_millis(10) {
        delay_case(delay);
        delay += Duration::from_micros(500);
    }
}

/// The full scan from 0 to 100ms in 200µs steps. Takes tens of seconds;
/// run with `cargo test -- --ignored` when hunting for races.
#[test]
#[ignore]
fn cancellation_delay_scan_full() {
    let mut delay = Duration::ZERO;
    while delay < Duration::from_millis(100) {
        delay_case(delay);
        delay += Duration::from_micros(200);
    }
}

#[test]
fn cancel_wakes_a_sleeping_waiter() {
    let token = Arc::new(StandaloneToken::new());
    let finished = Arc::new(AtomicBool::new(false));

    let sleeper = {
        let token = Arc::clone(&token);
        let finished = Arc::clone(&finished);
        thread::spawn(move || {
            while token.is_active() {
                token.sleep_for(Duration::from_secs(60));
            }
            finished.store(true, Ordering::SeqCst);
        })
    };

    thread::sleep(Duration::from_millis(50));
    assert!(!finished.load(Ordering::SeqCst));

    let start = Instant::now();
    token.cancel();
    sleeper.join().unwrap();
    assert!(start.elapsed() < Duration::from_secs(10));
    assert!(finished.load(Ordering::SeqCst));
}
