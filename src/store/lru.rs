//! Provides a size constrained store which evicts the least recently used entry.
//!
//! The record caches of an [InfoService](crate::info::InfoService) grow with every student who
//! ever queried the system. Backing such a cache by an [LruStore] keeps the footprint bounded:
//! once the capacity is reached, the entry which was neither read nor written for the longest
//! time is dropped. An evicted record simply shows up as a miss on its next read and is fetched
//! again in the background.
//!
//! Note that freshness is not handled here at all. This is the job of the
//! [validators](crate::validator).
//!
//! # Examples
//! ```
//! # use ems_plat::store::KeyValueStore;
//! # use ems_plat::store::lru::LruStore;
//! # #[tokio::main]
//! # async fn main() -> anyhow::Result<()> {
//! let store = LruStore::new(2);
//! store.set("A", 1).await?;
//! store.set("B", 2).await?;
//!
//! // Touching "A" makes "B" the least recently used entry...
//! assert_eq!(store.get("A").await?, Some(1));
//!
//! // ..which is therefore evicted once a third entry shows up.
//! store.set("C", 3).await?;
//! assert_eq!(store.get("B").await?, None);
//! assert_eq!(store.len().await?, 2);
//! # Ok(())
//! # }
//! ```
use std::sync::{Mutex, MutexGuard};

use linked_hash_map::LinkedHashMap;

use crate::store::KeyValueStore;

/// A key value store which holds at most **capacity** entries.
pub struct LruStore<V> {
    inner: Mutex<Inner<V>>,
}

struct Inner<V> {
    capacity: usize,
    reads: usize,
    hits: usize,
    writes: usize,
    evictions: usize,
    map: LinkedHashMap<String, V>,
}

impl<V> Inner<V> {
    fn enforce_capacity(&mut self) {
        while self.map.len() > self.capacity {
            if self.map.pop_front().is_none() {
                return;
            }
            self.evictions += 1;
        }
    }
}

impl<V> LruStore<V> {
    /// Creates a new store which keeps up to **capacity** entries.
    ///
    /// A capacity of zero is bumped to one, as such a store couldn't even hold the record which
    /// is currently being refreshed.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        LruStore {
            inner: Mutex::new(Inner {
                capacity,
                reads: 0,
                hits: 0,
                writes: 0,
                evictions: 0,
                map: LinkedHashMap::with_capacity(capacity),
            }),
        }
    }

    fn inner(&self) -> MutexGuard<'_, Inner<V>> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Returns the max number of entries.
    pub fn capacity(&self) -> usize {
        self.inner().capacity
    }

    /// Changes the max number of entries, evicting entries if the store is now overcrowded.
    pub fn set_capacity(&self, capacity: usize) {
        let mut inner = self.inner();
        inner.capacity = capacity.max(1);
        inner.enforce_capacity();
    }

    /// Returns the utilization in percent.
    pub fn utilization(&self) -> f32 {
        let inner = self.inner();
        inner.map.len() as f32 / inner.capacity as f32 * 100.
    }

    /// Returns the hit rate in percent.
    pub fn hit_rate(&self) -> f32 {
        let inner = self.inner();
        match inner.reads {
            0 => 0.,
            n => inner.hits as f32 / n as f32 * 100.,
        }
    }

    /// Returns the total number of reads.
    pub fn reads(&self) -> usize {
        self.inner().reads
    }

    /// Returns the total number of writes (including deletes).
    pub fn writes(&self) -> usize {
        self.inner().writes
    }

    /// Returns the number of entries which were dropped to make room for others.
    pub fn evictions(&self) -> usize {
        self.inner().evictions
    }
}

#[async_trait::async_trait]
impl<V> KeyValueStore<V> for LruStore<V>
where
    V: Clone + Send + Sync + 'static,
{
    async fn get(&self, key: &str) -> anyhow::Result<Option<V>> {
        let mut inner = self.inner();
        inner.reads += 1;

        let value = inner.map.get_refresh(key).map(|value| value.clone());
        if value.is_some() {
            inner.hits += 1;
        }

        Ok(value)
    }

    async fn set(&self, key: &str, value: V) -> anyhow::Result<()> {
        let mut inner = self.inner();
        inner.writes += 1;

        // Re-inserting an existing key moves it to the back, as a write counts as usage...
        let _ = inner.map.insert(key.to_owned(), value);
        inner.enforce_capacity();

        Ok(())
    }

    async fn delete(&self, key: &str) -> anyhow::Result<()> {
        let mut inner = self.inner();
        inner.writes += 1;
        let _ = inner.map.remove(key);

        Ok(())
    }

    async fn keys(&self) -> anyhow::Result<Vec<String>> {
        Ok(self.inner().map.keys().cloned().collect())
    }

    async fn len(&self) -> anyhow::Result<usize> {
        Ok(self.inner().map.len())
    }
}
