//! Tests for one-to-many cancellation through a source.
#![allow(dead_code)]

use relent::{cv, CancelGuard, CancelHandler, CancelSource, CancelToken, WaitOutcome};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

#[test]
fn fan_out_wakes_every_sleeping_consumer() {
    // One source, 32 tokens, each consumed by a thread sleeping cancellably
    // for a minute. A single source cancel wakes them all promptly.
    let source = CancelSource::new();
    let woken = Arc::new(AtomicUsize::new(0));

    let consumers: Vec<_> = (0..32)
        .map(|_| {
            let token = source.token();
            let woken = Arc::clone(&woken);
            thread::spawn(move || {
                while token.is_active() {
                    token.sleep_for(Duration::from_secs(60));
                }
                woken.fetch_add(1, Ordering::SeqCst);
            })
        })
        .collect();

    thread::sleep(Duration::from_millis(100));
    assert_eq!(woken.load(Ordering::SeqCst), 0);

    let start = Instant::now();
    source.cancel();
    for consumer in consumers {
        consumer.join().unwrap();
    }
    assert!(start.elapsed() < Duration::from_secs(10));
    assert_eq!(woken.load(Ordering::SeqCst), 32);
}

#[test]
fn every_token_reports_cancelled_after_source_cancel() {
    let source = CancelSource::new();
    let issued_before: Vec<_> = (0..8).map(|_| source.token()).collect();

    source.cancel();

    for token in &issued_before {
        assert!(token.is_cancelled());
    }
    // Tokens obtained after the cancel are born cancelled.
    assert!(source.token().is_cancelled());
}

#[test]
fn cv_waiters_against_sourced_tokens_are_woken() {
    let source = CancelSource::new();
    let shared = Arc::new((Mutex::new(false), Condvar::new()));

    let waiters: Vec<_> = (0..4)
        .map(|_| {
            let token = source.token();
            let shared = Arc::clone(&shared);
            thread::spawn(move || {
                let (mutex, condvar) = &*shared;
                let guard = mutex.lock().unwrap();
                let (_guard, outcome) =
                    cv::wait_while(condvar, mutex, guard, &token, |ready| !*ready);
                outcome
            })
        })
        .collect();

    thread::sleep(Duration::from_millis(50));
    source.cancel();

    for waiter in waiters {
        assert_eq!(waiter.join().unwrap(), WaitOutcome::Cancelled);
    }
}

#[test]
fn dropping_tokens_detaches_them() {
    struct Counting(AtomicUsize);
    impl CancelHandler for Counting {
        fn cancel(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    let source = CancelSource::new();
    let handler = Counting(AtomicUsize::new(0));

    // Attach-and-drop a batch of tokens, then cancel; nothing to wake.
    for _ in 0..16 {
        let token = source.token();
        CancelGuard::with(&token, &handler, |guard| {
            assert!(!guard.is_cancelled());
        });
        drop(token);
    }
    source.cancel();
    assert!(source.is_cancelled());
    assert_eq!(handler.0.load(Ordering::SeqCst), 0);
}

#[test]
fn reset_starts_a_fresh_generation() {
    let mut source = CancelSource::new();
    let old_a = source.token();
    let old_b = source.token();

    source.reset();

    // Detached tokens are cancelled for the rest of their lives.
    assert!(old_a.is_cancelled());
    assert!(old_b.is_cancelled());

    // The source itself is fresh.
    assert!(!source.is_cancelled());
    let new = source.token();
    assert!(!new.is_cancelled());

    source.cancel();
    assert!(new.is_cancelled());
    assert!(old_a.is_cancelled());
}

#[test]
fn sleepers_from_different_generations_do_not_interfere() {
    let mut source = CancelSource::new();
    let old = source.token();
    source.reset();

    let new = source.token();
    let sleeper = thread::spawn(move || {
        let start = Instant::now();
        new.sleep_for(Duration::from_secs(60));
        start.elapsed()
    });

    // The old token is already cancelled; sleeping on it returns at once
    // and does not disturb the new generation.
    let start = Instant::now();
    old.sleep_for(Duration::from_secs(60));
    assert!(start.elapsed() < Duration::from_secs(1));

    thread::sleep(Duration::from_millis(50));
    source.cancel();
    assert!(sleeper.join().unwrap() < Duration::from_secs(10));
}

#[test]
fn tokens_created_mid_cancel_observe_the_cancellation() {
    // Spawn creators racing a cancel; every token they get must observe
    // cancelled once cancel() has returned.
    let source = Arc::new(CancelSource::new());

    let creators: Vec<_> = (0..4)
        .map(|_| {
            let source = Arc::clone(&source);
            thread::spawn(move || {
                let mut tokens = Vec::new();
                for _ in 0..100 {
                    tokens.push(source.token());
                }
                tokens
            })
        })
        .collect();

    thread::sleep(Duration::from_micros(100));
    source.cancel();

    for creator in creators {
        for token in creator.join().unwrap() {
            // A token issued before the cancel returned may have been born
            // either way, but after cancel() has returned they all read
            // cancelled.
            assert!(token.is_cancelled());
        }
    }
}

#[test]
fn source_cancel_is_idempotent_across_threads() {
    let source = Arc::new(CancelSource::new());
    let token = source.token();

    let cancellers: Vec<_> = (0..8)
        .map(|_| {
            let source = Arc::clone(&source);
            thread::spawn(move || source.cancel())
        })
        .collect();
    for canceller in cancellers {
        canceller.join().unwrap();
    }
    assert!(token.is_cancelled());
}
