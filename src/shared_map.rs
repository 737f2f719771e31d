use crate::core::errors::Result;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::ops::AddAssign;
use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;
use tracing::debug;

/// Operation counters for a [`SharedMap`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SharedMapStats {
    pub inserts: u64,
    pub overwrites: u64,
    pub removals: u64,
    pub flushes: u64,
    pub flushed_entries: u64,
}

#[derive(Debug)]
struct MapState<K, V> {
    entries: HashMap<K, V>,
    stats: SharedMapStats,
}

/// Key/value store shared by every worker of a pool
///
/// One mutex guards the whole map, so each public operation is atomic and
/// [`flush`](Self::flush) can never split or duplicate a concurrent `set`.
/// The lock does not poison: a worker that panics inside
/// [`update`](Self::update) leaves the map untouched and usable by its
/// siblings. Clones share the same storage.
#[derive(Debug)]
pub struct SharedMap<K, V> {
    state: Arc<Mutex<MapState<K, V>>>,
}

impl<K, V> Clone for SharedMap<K, V> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<K, V> Default for SharedMap<K, V>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> SharedMap<K, V>
where
    K: Eq + Hash,
{
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MapState {
                entries: HashMap::new(),
                stats: SharedMapStats::default(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MapState<K, V>> {
        self.state.lock()
    }

    /// Insert or overwrite, returning the previous value
    pub fn set(&self, key: K, value: V) -> Result<Option<V>> {
        let mut state = self.lock();
        let previous = state.entries.insert(key, value);
        state.stats.inserts += 1;
        if previous.is_some() {
            state.stats.overwrites += 1;
        }
        Ok(previous)
    }

    pub fn get(&self, key: &K) -> Result<Option<V>>
    where
        V: Clone,
    {
        Ok(self.lock().entries.get(key).cloned())
    }

    pub fn remove(&self, key: &K) -> Result<Option<V>> {
        let mut state = self.lock();
        let removed = state.entries.remove(key);
        if removed.is_some() {
            state.stats.removals += 1;
        }
        Ok(removed)
    }

    pub fn contains_key(&self, key: &K) -> Result<bool> {
        Ok(self.lock().entries.contains_key(key))
    }

    /// Snapshot of the current keys, in no particular order
    pub fn keys(&self) -> Result<HashSet<K>>
    where
        K: Clone,
    {
        Ok(self.lock().entries.keys().cloned().collect())
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.lock().entries.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.lock().entries.is_empty())
    }

    /// Take the entire content and leave the map empty, atomically
    pub fn flush(&self) -> Result<HashMap<K, V>> {
        let mut state = self.lock();
        let drained = std::mem::take(&mut state.entries);
        state.stats.flushes += 1;
        state.stats.flushed_entries += drained.len() as u64;
        drop(state);

        debug!(entries = drained.len(), "Shared map flushed");
        Ok(drained)
    }

    /// [`flush`](Self::flush), then order the batch by key
    pub fn flush_sorted(&self) -> Result<Vec<(K, V)>>
    where
        K: Ord,
    {
        let mut batch: Vec<(K, V)> = self.flush()?.into_iter().collect();
        batch.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(batch)
    }

    /// Atomic read-modify-write on one entry
    ///
    /// `f` sees the current value (if any) and returns the value to store,
    /// or `None` to remove the entry. The closure runs under the map lock and
    /// must not touch this map.
    pub fn update<F>(&self, key: K, f: F) -> Result<Option<V>>
    where
        V: Clone,
        F: FnOnce(Option<&V>) -> Option<V>,
    {
        let mut state = self.lock();
        let next = f(state.entries.get(&key));
        match next {
            Some(value) => {
                let previous = state.entries.insert(key, value.clone());
                state.stats.inserts += 1;
                if previous.is_some() {
                    state.stats.overwrites += 1;
                }
                Ok(Some(value))
            }
            None => {
                if state.entries.remove(&key).is_some() {
                    state.stats.removals += 1;
                }
                Ok(None)
            }
        }
    }

    /// Add `delta` to a numeric entry (missing entries start at `V::default()`)
    pub fn incr_by(&self, key: K, delta: V) -> Result<V>
    where
        V: AddAssign + Default + Clone,
    {
        let mut state = self.lock();
        let is_new = !state.entries.contains_key(&key);
        let slot = state.entries.entry(key).or_default();
        *slot += delta;
        let value = slot.clone();
        state.stats.inserts += 1;
        if !is_new {
            state.stats.overwrites += 1;
        }
        Ok(value)
    }

    pub fn stats(&self) -> Result<SharedMapStats> {
        Ok(self.lock().stats.clone())
    }
}
