//! Wait/signal handshake semantics

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use workshare::{SignalGate, WaitOutcome};

fn wait_for_waiters(gate: &SignalGate, count: usize) {
    while gate.waiters().unwrap() < count {
        thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn test_wait_blocks_until_signal() {
    let gate = SignalGate::new();
    let woke = Arc::new(AtomicUsize::new(0));

    let waiter = {
        let gate = gate.clone();
        let woke = Arc::clone(&woke);
        thread::spawn(move || {
            let guard = gate.wait().unwrap();
            woke.fetch_add(1, Ordering::SeqCst);
            drop(guard);
        })
    };

    wait_for_waiters(&gate, 1);
    thread::sleep(Duration::from_millis(20));
    assert_eq!(woke.load(Ordering::SeqCst), 0);

    gate.signal().unwrap();
    waiter.join().unwrap();
    assert_eq!(woke.load(Ordering::SeqCst), 1);
}

#[test]
fn test_broadcast_wakes_everyone() {
    let gate = SignalGate::new();
    let waiters: Vec<_> = (0..5)
        .map(|_| {
            let gate = gate.clone();
            thread::spawn(move || {
                gate.wait().unwrap().unlock();
            })
        })
        .collect();

    wait_for_waiters(&gate, 5);
    gate.broadcast().unwrap();
    for waiter in waiters {
        waiter.join().unwrap();
    }
    assert_eq!(gate.stats().broadcasts, 1);
    assert_eq!(gate.waiters().unwrap(), 0);
}

#[test]
fn test_signal_wakes_at_least_one() {
    let gate = SignalGate::new();
    let woke = Arc::new(AtomicUsize::new(0));
    let waiters: Vec<_> = (0..3)
        .map(|_| {
            let gate = gate.clone();
            let woke = Arc::clone(&woke);
            thread::spawn(move || {
                let guard = gate.lock().unwrap();
                let (_guard, outcome) = guard.wait_timeout(Duration::from_millis(300)).unwrap();
                if outcome == WaitOutcome::Signaled {
                    woke.fetch_add(1, Ordering::SeqCst);
                }
            })
        })
        .collect();

    wait_for_waiters(&gate, 3);
    gate.signal().unwrap();
    for waiter in waiters {
        waiter.join().unwrap();
    }
    assert!(woke.load(Ordering::SeqCst) >= 1);
}

#[test]
fn test_earlier_signal_does_not_satisfy_later_wait() {
    let gate = SignalGate::new();
    gate.signal().unwrap();
    gate.broadcast().unwrap();

    let (_guard, outcome) = gate
        .lock()
        .unwrap()
        .wait_timeout(Duration::from_millis(25))
        .unwrap();
    assert_eq!(outcome, WaitOutcome::TimedOut);
}
