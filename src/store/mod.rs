//! Provides the minimal key value storage capability used by all services.
//!
//! Every record (accounts, the token index and the cached records of each
//! [InfoService](crate::info::InfoService)) lives in a [KeyValueStore]. The trait only exposes
//! what the services actually need: point reads and writes, deletes, a snapshot of all keys and
//! the number of entries.
//!
//! Backends:
//! * [MemoryStore]: a plain hash map which never fails.
//! * [LruStore](crate::store::lru::LruStore): a size constrained store which evicts the least recently used
//!   entry once it grows beyond its capacity.
//! * [RedisStore](crate::store::redis::RedisStore): a remote store which encodes values via an explicit
//!   [Codec](crate::store::codec::Codec).
//!
//! # Examples
//! ```
//! # use ems_plat::store::{KeyValueStore, MemoryStore};
//! # #[tokio::main]
//! # async fn main() -> anyhow::Result<()> {
//! let store = MemoryStore::new();
//! store.set("202105", "Alice".to_owned()).await?;
//!
//! assert_eq!(store.get("202105").await?, Some("Alice".to_owned()));
//! assert_eq!(store.len().await?, 1);
//!
//! store.delete("202105").await?;
//! assert_eq!(store.get("202105").await?, None);
//! # Ok(())
//! # }
//! ```
use std::sync::{Arc, Mutex};

use fnv::FnvHashMap;

pub mod codec;
pub mod lru;
pub mod redis;

/// A shared handle to a store as passed around between the services.
pub type Store<V> = Arc<dyn KeyValueStore<V>>;

/// Describes the capabilities of a key value store.
///
/// Note that no ordering is guaranteed for [keys](KeyValueStore::keys). Backend errors are
/// passed on to the caller.
#[async_trait::async_trait]
pub trait KeyValueStore<V>: Send + Sync
where
    V: Clone + Send + Sync + 'static,
{
    /// Returns the value stored for the given key.
    async fn get(&self, key: &str) -> anyhow::Result<Option<V>>;

    /// Stores the given value for the given key.
    async fn set(&self, key: &str, value: V) -> anyhow::Result<()>;

    /// Removes the value stored for the given key (if present).
    async fn delete(&self, key: &str) -> anyhow::Result<()>;

    /// Returns a snapshot of all keys.
    ///
    /// Calling this again restarts the iteration with the then current contents.
    async fn keys(&self) -> anyhow::Result<Vec<String>>;

    /// Returns the number of stored entries.
    async fn len(&self) -> anyhow::Result<usize>;

    /// Determines if the store is empty.
    async fn is_empty(&self) -> anyhow::Result<bool> {
        Ok(self.len().await? == 0)
    }

    /// Releases all resources held by the store.
    async fn close(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Provides a plain in-memory store.
///
/// The lock is only held for the duration of a map operation, never across an await point.
pub struct MemoryStore<V> {
    data: Mutex<FnvHashMap<String, V>>,
}

impl<V> Default for MemoryStore<V> {
    fn default() -> Self {
        MemoryStore {
            data: Mutex::new(FnvHashMap::default()),
        }
    }
}

impl<V> MemoryStore<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Creates a new and empty store.
    pub fn new() -> Self {
        MemoryStore::default()
    }

    /// Creates a new and empty store which is already wrapped as shared [Store].
    pub fn shared() -> Store<V> {
        Arc::new(MemoryStore::new())
    }

    fn data(&self) -> std::sync::MutexGuard<'_, FnvHashMap<String, V>> {
        // A panic while holding the lock cannot leave the map in a broken state, as every
        // operation is a single map call...
        self.data
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait::async_trait]
impl<V> KeyValueStore<V> for MemoryStore<V>
where
    V: Clone + Send + Sync + 'static,
{
    async fn get(&self, key: &str) -> anyhow::Result<Option<V>> {
        Ok(self.data().get(key).cloned())
    }

    async fn set(&self, key: &str, value: V) -> anyhow::Result<()> {
        let _ = self.data().insert(key.to_owned(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> anyhow::Result<()> {
        let _ = self.data().remove(key);
        Ok(())
    }

    async fn keys(&self) -> anyhow::Result<Vec<String>> {
        Ok(self.data().keys().cloned().collect())
    }

    async fn len(&self) -> anyhow::Result<usize> {
        Ok(self.data().len())
    }
}

#[cfg(test)]
mod tests {
    use crate::store::{KeyValueStore, MemoryStore, Store};

    #[test]
    fn keys_are_a_restartable_snapshot() {
        crate::testing::test_async(async {
            let store: Store<i32> = MemoryStore::shared();
            store.set("a", 1).await.unwrap();
            store.set("b", 2).await.unwrap();

            let mut keys = store.keys().await.unwrap();
            keys.sort();
            assert_eq!(keys, vec!["a".to_owned(), "b".to_owned()]);

            // Mutating the store while walking a snapshot is fine...
            for key in keys {
                store.delete(&key).await.unwrap();
            }
            assert_eq!(store.is_empty().await.unwrap(), true);
            assert_eq!(store.keys().await.unwrap().is_empty(), true);
        });
    }

    #[test]
    fn overwriting_keeps_a_single_entry() {
        crate::testing::test_async(async {
            let store = MemoryStore::new();
            store.set("a", "first".to_owned()).await.unwrap();
            store.set("a", "second".to_owned()).await.unwrap();

            assert_eq!(store.len().await.unwrap(), 1);
            assert_eq!(store.get("a").await.unwrap().as_deref(), Some("second"));

            // Deleting an unknown key is a no-op...
            store.delete("unknown").await.unwrap();
            assert_eq!(store.len().await.unwrap(), 1);
        });
    }
}
