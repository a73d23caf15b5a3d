//! Tests for the RAII thread wrapper and the cancellable sleeps.
#![allow(dead_code)]

use relent::{sleep_for, sleep_until, CancelToken, StandaloneToken, Thread};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

#[test]
fn reset_interrupts_a_sleeping_worker() {
    let finished = Arc::new(AtomicBool::new(false));
    let mut worker = {
        let finished = Arc::clone(&finished);
        Thread::spawn(move |token| {
            while token.is_active() {
                sleep_for(Duration::from_millis(100), token);
            }
            finished.store(true, Ordering::SeqCst);
        })
    };

    thread::sleep(Duration::from_millis(200));
    assert!(!finished.load(Ordering::SeqCst));

    let start = Instant::now();
    worker.reset();
    // The worker is woken mid-sleep, not waited out; generous bound for
    // loaded CI machines.
    assert!(start.elapsed() < Duration::from_secs(10));
    assert!(finished.load(Ordering::SeqCst));
    assert!(!worker.joinable());
}

#[test]
fn drop_is_equivalent_to_reset() {
    let finished = Arc::new(AtomicBool::new(false));
    {
        let finished = Arc::clone(&finished);
        let _worker = Thread::spawn(move |token| {
            while token.is_active() {
                sleep_for(Duration::from_secs(60), token);
            }
            finished.store(true, Ordering::SeqCst);
        });
        thread::sleep(Duration::from_millis(50));
    }
    assert!(finished.load(Ordering::SeqCst));
}

#[test]
fn long_sleep_is_cut_short_by_cancel() {
    let finished = Arc::new(AtomicBool::new(false));
    let mut worker = {
        let finished = Arc::clone(&finished);
        Thread::spawn(move |token| {
            while token.is_active() {
                sleep_for(Duration::from_secs(60), token);
            }
            finished.store(true, Ordering::SeqCst);
        })
    };

    thread::sleep(Duration::from_millis(100));
    assert!(!finished.load(Ordering::SeqCst));

    let start = Instant::now();
    worker.reset();
    assert!(start.elapsed() < Duration::from_secs(10));
    assert!(finished.load(Ordering::SeqCst));
}

#[test]
fn sleep_runs_to_completion_without_cancel() {
    let token = StandaloneToken::new();
    let start = Instant::now();
    sleep_for(Duration::from_millis(50), &token);
    assert!(start.elapsed() >= Duration::from_millis(50));
}

#[test]
fn sleep_until_honours_the_deadline() {
    let token = StandaloneToken::new();
    let deadline = Instant::now() + Duration::from_millis(50);
    sleep_until(deadline, &token);
    assert!(Instant::now() >= deadline);
}

#[test]
fn sleep_on_cancelled_token_is_immediate() {
    let token = StandaloneToken::new();
    token.cancel();
    let start = Instant::now();
    sleep_for(Duration::from_secs(60), &token);
    assert!(start.elapsed() < Duration::from_secs(1));
}

#[test]
fn owner_can_cancel_through_the_token_accessor() {
    let mut worker = Thread::spawn(|token| {
        while token.is_active() {
            sleep_for(Duration::from_secs(60), token);
        }
    });

    worker.token().expect("running").cancel();
    // join() after an external cancel must not hang.
    worker.join();
    assert!(!worker.joinable());
}

#[test]
fn wrapper_is_reusable_after_reset() {
    let mut worker = Thread::new();
    assert!(!worker.joinable());

    for _ in 0..3 {
        worker = Thread::spawn(|token| {
            while token.is_active() {
                sleep_for(Duration::from_millis(50), token);
            }
        });
        assert!(worker.joinable());
        worker.reset();
        assert!(!worker.joinable());
    }
}
