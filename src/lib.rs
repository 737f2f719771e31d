//! Shared-state work distribution for a pool of worker threads.
//!
//! The crate provides four cooperating primitives and two helpers built on them:
//!
//! - [`SequenceCursor`] hands out work-item indices (or chunks of them) exactly once;
//! - [`SharedMap`] collects results under one mutex with an atomic [`SharedMap::flush`];
//! - [`SignalGate`] pairs a mutex with a condition variable for notify/drain handshakes;
//! - [`WorkerPool`] spawns numbered worker threads and joins them without leaking any;
//! - [`Collector`] runs the wait → flush → sort loop over a map and a gate;
//! - [`SharedSink`] lets many workers write whole lines to one output.
//!
//! ```
//! use workshare::{Collector, PoolConfig, SequenceCursor, WorkerPool};
//!
//! let cursor = SequenceCursor::new(1, 30, 1).unwrap();
//! let collector = Collector::new(3);
//! let pool: WorkerPool = WorkerPool::new(PoolConfig::default()).unwrap();
//!
//! {
//!     let cursor = cursor.clone();
//!     let collector = collector.clone();
//!     pool.spawn_many(3, move |_id| {
//!         let producer = collector.producer_guard();
//!         while let Some(n) = cursor.next() {
//!             if n % 7 == 0 {
//!                 producer.publish(n, n / 7)?;
//!             }
//!         }
//!         Ok(())
//!     })
//!     .unwrap();
//! }
//!
//! let mut found = Vec::new();
//! collector
//!     .drain(|batch| {
//!         found.extend(batch.into_iter().map(|(n, _)| n));
//!         Ok(())
//!     })
//!     .unwrap();
//! pool.join_all().unwrap();
//! found.sort_unstable();
//! assert_eq!(found, vec![7, 14, 21, 28]);
//! ```

// Core infrastructure modules
pub mod core {
    pub mod config;
    pub mod errors;
    pub mod telemetry;
}

pub mod collector;
pub mod pool;
pub mod sequence;
pub mod shared_map;
pub mod signal;
pub mod sink;

// Re-exports for convenience
pub use crate::core::config::{PoolConfig, SequenceConfig, WorkshareConfig};
pub use crate::core::errors::{Result, WorkshareError};
pub use crate::core::telemetry::init_tracing;

pub use collector::{Collector, CollectorReport, ProducerGuard};
pub use pool::{
    JoinReport, WorkerFailureInfo, WorkerHandle, WorkerId, WorkerInfo, WorkerPool, WorkerState,
};
pub use sequence::{SequenceCursor, WorkRange};
pub use shared_map::{SharedMap, SharedMapStats};
pub use signal::{GateGuard, GateStats, SignalGate, WaitOutcome};
pub use sink::SharedSink;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_worker_ids_map_to_results() {
        let pool: WorkerPool = WorkerPool::new(PoolConfig::conservative()).unwrap();
        let results = SharedMap::new();

        {
            let results = results.clone();
            pool.spawn_many(3, move |id| {
                results.set(id, id * 10)?;
                Ok(())
            })
            .unwrap();
        }
        pool.join_all().unwrap();

        assert_eq!(results.flush_sorted().unwrap(), vec![(1, 10), (2, 20), (3, 30)]);
        assert!(results.flush().unwrap().is_empty());
    }
}
