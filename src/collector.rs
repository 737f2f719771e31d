use crate::core::errors::{Result, WorkshareError};
use crate::shared_map::SharedMap;
use crate::signal::SignalGate;
use serde::Serialize;
use std::hash::Hash;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Totals for one [`Collector::drain`] run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CollectorReport {
    pub batches: u64,
    pub records: u64,
    pub elapsed_ms: u64,
}

/// Producer/collector handshake over a [`SharedMap`] and a [`SignalGate`]
///
/// Producers `publish` results and call `producer_finished` when done, or
/// hold a [`ProducerGuard`] that does so when dropped. One collector thread
/// runs `drain`, which hands each flushed batch, sorted by key, to a callback
/// until every producer has finished and nothing is left.
#[derive(Debug)]
pub struct Collector<K, V> {
    map: SharedMap<K, V>,
    gate: SignalGate,
    live_producers: Arc<AtomicUsize>,
}

impl<K, V> Clone for Collector<K, V> {
    fn clone(&self) -> Self {
        Self {
            map: self.map.clone(),
            gate: self.gate.clone(),
            live_producers: Arc::clone(&self.live_producers),
        }
    }
}

impl<K, V> Collector<K, V> {
    pub fn live_producers(&self) -> usize {
        self.live_producers.load(Ordering::Acquire)
    }

    /// Take one of the registered producer slots as a guard
    ///
    /// The slot is released when the guard drops, on every exit path of the
    /// task holding it: normal return, early `?` return or panic.
    pub fn producer_guard(&self) -> ProducerGuard<K, V> {
        ProducerGuard {
            collector: self.clone(),
        }
    }

    fn release_producer(&self) -> Result<()> {
        let mut guard = self.gate.lock()?;
        self.live_producers
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .map_err(|_| {
                WorkshareError::invalid_state(
                    "producer_finished",
                    "more producers finished than were registered",
                )
            })?;
        guard.broadcast();
        Ok(())
    }
}

impl<K, V> Collector<K, V>
where
    K: Eq + Hash + Ord,
{
    pub fn new(producers: usize) -> Self {
        Self::with_parts(SharedMap::new(), SignalGate::new(), producers)
    }

    /// Build on an existing map and gate
    pub fn with_parts(map: SharedMap<K, V>, gate: SignalGate, producers: usize) -> Self {
        Self {
            map,
            gate,
            live_producers: Arc::new(AtomicUsize::new(producers)),
        }
    }

    pub fn map(&self) -> &SharedMap<K, V> {
        &self.map
    }

    pub fn gate(&self) -> &SignalGate {
        &self.gate
    }

    /// Store a result and wake the collector
    pub fn publish(&self, key: K, value: V) -> Result<()> {
        self.map.set(key, value)?;
        let mut guard = self.gate.lock()?;
        guard.signal();
        Ok(())
    }

    /// Mark one producer as done
    pub fn producer_finished(&self) -> Result<()> {
        self.release_producer()
    }

    /// Run the collector loop on the calling thread
    ///
    /// The map is flushed while the gate lock is held, so a producer's
    /// insert-then-signal can never fall between the check and the wait.
    /// `on_batch` runs with the lock released.
    pub fn drain<F>(&self, mut on_batch: F) -> Result<CollectorReport>
    where
        F: FnMut(Vec<(K, V)>) -> Result<()>,
    {
        let started = Instant::now();
        let mut report = CollectorReport::default();

        loop {
            let mut guard = self.gate.lock()?;
            while self.map.is_empty()? && self.live_producers() > 0 {
                guard = guard.wait()?;
            }
            let batch = self.map.flush_sorted()?;
            let finished = self.live_producers() == 0;
            drop(guard);

            if !batch.is_empty() {
                report.batches += 1;
                report.records += batch.len() as u64;
                debug!(records = batch.len(), "Collector received batch");
                on_batch(batch)?;
            }

            if finished && self.map.is_empty()? {
                break;
            }
        }

        report.elapsed_ms = started.elapsed().as_millis() as u64;
        info!(
            batches = report.batches,
            records = report.records,
            "Collector drained all producers"
        );
        Ok(report)
    }
}

/// One registered producer of a [`Collector`]
///
/// Dropping the guard marks the producer finished and wakes the collector.
#[must_use = "dropping the guard immediately marks the producer finished"]
pub struct ProducerGuard<K, V> {
    collector: Collector<K, V>,
}

impl<K, V> ProducerGuard<K, V>
where
    K: Eq + Hash + Ord,
{
    pub fn publish(&self, key: K, value: V) -> Result<()> {
        self.collector.publish(key, value)
    }
}

impl<K, V> ProducerGuard<K, V> {
    /// Release the slot now instead of at end of scope
    pub fn finish(self) {}
}

impl<K, V> Drop for ProducerGuard<K, V> {
    fn drop(&mut self) {
        if let Err(err) = self.collector.release_producer() {
            warn!("Producer guard outlived its registration: {}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::thread;

    #[test]
    fn test_no_producers_returns_immediately() {
        let collector: Collector<u32, u32> = Collector::new(0);
        let report = collector.drain(|_| Ok(())).unwrap();
        assert_eq!(report.batches, 0);
        assert_eq!(report.records, 0);
    }

    #[test]
    fn test_published_before_drain_is_collected() {
        let collector = Collector::new(1);
        collector.publish(2, "b").unwrap();
        collector.publish(1, "a").unwrap();
        collector.producer_finished().unwrap();

        let mut seen = Vec::new();
        collector
            .drain(|batch| {
                seen.extend(batch);
                Ok(())
            })
            .unwrap();
        assert_eq!(seen, vec![(1, "a"), (2, "b")]);
    }

    #[test]
    fn test_too_many_finishes() {
        let collector: Collector<u8, u8> = Collector::new(1);
        collector.producer_finished().unwrap();
        let err = collector.producer_finished().unwrap_err();
        assert!(matches!(err, WorkshareError::InvalidState { .. }));
    }

    #[test]
    fn test_threaded_producers() {
        let collector = Collector::new(3);
        let producers: Vec<_> = (0..3u64)
            .map(|p| {
                let collector = collector.clone();
                thread::spawn(move || {
                    for i in 0..50 {
                        collector.publish(p * 1000 + i, i).unwrap();
                    }
                    collector.producer_finished().unwrap();
                })
            })
            .collect();

        let mut total = 0;
        let report = collector
            .drain(|batch| {
                assert!(batch.windows(2).all(|w| w[0].0 < w[1].0));
                total += batch.len();
                Ok(())
            })
            .unwrap();

        for producer in producers {
            producer.join().unwrap();
        }
        assert_eq!(total, 150);
        assert_eq!(report.records, 150);
    }

    #[test]
    fn test_callback_error_stops_drain() {
        let collector = Collector::new(1);
        collector.publish(1, 1).unwrap();
        let err = collector
            .drain(|_| Err(WorkshareError::invalid_state("sink", "closed")))
            .unwrap_err();
        assert_eq!(err.category(), "state");
    }

    #[test]
    fn test_guard_released_on_error_return() {
        let collector: Collector<u32, u32> = Collector::new(2);
        let producers: Vec<_> = (0..2u32)
            .map(|p| {
                let collector = collector.clone();
                thread::spawn(move || -> Result<()> {
                    let producer = collector.producer_guard();
                    producer.publish(p, p)?;
                    if p == 1 {
                        return Err(WorkshareError::invalid_state("parse", "bad record"));
                    }
                    producer.finish();
                    Ok(())
                })
            })
            .collect();

        let report = collector.drain(|_| Ok(())).unwrap();
        let results: Vec<_> = producers.into_iter().map(|p| p.join().unwrap()).collect();
        assert_eq!(report.records, 2);
        assert!(results[0].is_ok());
        assert!(results[1].is_err());
        assert_eq!(collector.live_producers(), 0);
    }

    #[test]
    fn test_guard_released_on_panic() {
        let collector: Collector<u32, u32> = Collector::new(1);
        let crashed = {
            let collector = collector.clone();
            thread::spawn(move || {
                let producer = collector.producer_guard();
                producer.publish(7, 49).unwrap();
                panic!("producer crashed mid-chunk");
            })
        };

        let mut seen = Vec::new();
        collector
            .drain(|batch| {
                seen.extend(batch);
                Ok(())
            })
            .unwrap();
        assert!(crashed.join().is_err());
        assert_eq!(seen, vec![(7, 49)]);
    }

    #[test]
    fn test_panic_in_update_does_not_block_drain() {
        let collector: Collector<u32, u32> = Collector::new(2);
        let producers: Vec<_> = (1..=2u32)
            .map(|p| {
                let collector = collector.clone();
                thread::spawn(move || {
                    let _producer = collector.producer_guard();
                    if p == 1 {
                        collector
                            .map()
                            .update(p, |_| panic!("update closure failed"))
                            .ok();
                    }
                    collector.publish(p, p * 10).unwrap();
                })
            })
            .collect();

        let mut seen = Vec::new();
        collector
            .drain(|batch| {
                seen.extend(batch);
                Ok(())
            })
            .unwrap();
        let outcomes: Vec<bool> = producers.into_iter().map(|p| p.join().is_ok()).collect();
        assert_eq!(outcomes, vec![false, true]);
        assert_eq!(seen, vec![(2, 20)]);
    }
}
