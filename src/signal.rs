//! Mutex + condition variable pair for producer/consumer handshakes.
//!
//! The protocol the gate is built for:
//!
//! - a producer changes shared state (typically a [`SharedMap`](crate::SharedMap)
//!   insert, guarded by the map's own lock), then takes the gate lock and
//!   signals;
//! - the consumer takes the gate lock, checks its predicate and, if there is
//!   nothing to do, waits. [`GateGuard::wait`] returns with the lock held, so
//!   the drain that follows runs under the same lock that the next producer
//!   needs to signal.
//!
//! Signals are not counted. A `signal()` with nobody waiting is dropped; a
//! waiter only returns after a signal or broadcast issued after it started
//! waiting. Consumers therefore always check their predicate under the lock
//! before waiting.
//!
//! The gate lock does not poison; a waiter or signaller that panics while
//! holding it only releases it.

use crate::core::errors::Result;
use parking_lot::{Condvar, Mutex, MutexGuard};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::trace;

#[derive(Debug)]
struct GateState {
    generation: u64,
    waiters: usize,
}

#[derive(Debug, Default)]
struct GateCounters {
    signals: AtomicU64,
    broadcasts: AtomicU64,
    wakeups: AtomicU64,
    timeouts: AtomicU64,
}

#[derive(Debug)]
struct GateInner {
    state: Mutex<GateState>,
    condvar: Condvar,
    counters: GateCounters,
}

/// Counters for a [`SignalGate`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GateStats {
    pub signals: u64,
    pub broadcasts: u64,
    pub wakeups: u64,
    pub timeouts: u64,
}

/// How a timed wait ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Signaled,
    TimedOut,
}

/// One mutex paired with one condition variable
#[derive(Debug, Clone)]
pub struct SignalGate {
    inner: Arc<GateInner>,
}

impl Default for SignalGate {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalGate {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(GateInner {
                state: Mutex::new(GateState {
                    generation: 0,
                    waiters: 0,
                }),
                condvar: Condvar::new(),
                counters: GateCounters::default(),
            }),
        }
    }

    /// Acquire the gate lock; it is released when the guard drops
    pub fn lock(&self) -> Result<GateGuard<'_>> {
        Ok(GateGuard {
            gate: &self.inner,
            guard: self.inner.state.lock(),
        })
    }

    /// Lock, then block until signaled. Returns with the lock held.
    pub fn wait(&self) -> Result<GateGuard<'_>> {
        self.lock()?.wait()
    }

    /// Wake at least one waiter
    pub fn signal(&self) -> Result<()> {
        self.lock()?.signal();
        Ok(())
    }

    /// Wake every waiter
    pub fn broadcast(&self) -> Result<()> {
        self.lock()?.broadcast();
        Ok(())
    }

    /// Number of threads currently blocked in a wait
    pub fn waiters(&self) -> Result<usize> {
        Ok(self.lock()?.guard.waiters)
    }

    pub fn stats(&self) -> GateStats {
        let counters = &self.inner.counters;
        GateStats {
            signals: counters.signals.load(Ordering::Relaxed),
            broadcasts: counters.broadcasts.load(Ordering::Relaxed),
            wakeups: counters.wakeups.load(Ordering::Relaxed),
            timeouts: counters.timeouts.load(Ordering::Relaxed),
        }
    }
}

/// Held gate lock
pub struct GateGuard<'a> {
    gate: &'a GateInner,
    guard: MutexGuard<'a, GateState>,
}

impl<'a> GateGuard<'a> {
    /// Release the lock, block until a signal or broadcast, re-acquire
    ///
    /// Spurious wakeups are absorbed: the call only returns once the signal
    /// generation has moved past the one observed on entry.
    pub fn wait(self) -> Result<GateGuard<'a>> {
        let GateGuard { gate, mut guard } = self;
        let observed = guard.generation;
        guard.waiters += 1;

        while guard.generation == observed {
            gate.condvar.wait(&mut guard);
        }

        guard.waiters -= 1;
        gate.counters.wakeups.fetch_add(1, Ordering::Relaxed);
        trace!(generation = guard.generation, "Gate waiter woke");
        Ok(GateGuard { gate, guard })
    }

    /// [`wait`](Self::wait) with an upper bound on the blocking time
    ///
    /// A timeout too large to be represented as a deadline waits without one.
    pub fn wait_timeout(self, timeout: Duration) -> Result<(GateGuard<'a>, WaitOutcome)> {
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            return Ok((self.wait()?, WaitOutcome::Signaled));
        };
        let GateGuard { gate, mut guard } = self;
        let observed = guard.generation;
        guard.waiters += 1;

        while guard.generation == observed {
            if gate.condvar.wait_until(&mut guard, deadline).timed_out() {
                break;
            }
        }

        guard.waiters -= 1;
        let outcome = if guard.generation != observed {
            gate.counters.wakeups.fetch_add(1, Ordering::Relaxed);
            WaitOutcome::Signaled
        } else {
            gate.counters.timeouts.fetch_add(1, Ordering::Relaxed);
            WaitOutcome::TimedOut
        };
        Ok((GateGuard { gate, guard }, outcome))
    }

    /// Wake at least one waiter without releasing the lock
    pub fn signal(&mut self) {
        self.guard.generation = self.guard.generation.wrapping_add(1);
        self.gate.counters.signals.fetch_add(1, Ordering::Relaxed);
        self.gate.condvar.notify_one();
    }

    /// Wake every waiter without releasing the lock
    pub fn broadcast(&mut self) {
        self.guard.generation = self.guard.generation.wrapping_add(1);
        self.gate.counters.broadcasts.fetch_add(1, Ordering::Relaxed);
        self.gate.condvar.notify_all();
    }

    pub fn unlock(self) {}
}
