//! Provides the two-tier read path which answers from the local store and refreshes ahead.
//!
//! A [RefreshAheadCache] combines a local [Store] with a [Validator] and a set of
//! [RefreshHooks]:
//! * a read which finds a valid record returns it as is,
//! * otherwise [on_refresh](RefreshHooks::on_refresh) is invoked with the stale record (if any).
//!   The hook is expected to only do some bookkeeping and to schedule the actual work in the
//!   background. Its result is handed to the caller.
//!
//! Therefore a read never waits for the upstream system. It only waits for the local store and
//! the synchronous part of the refresh hook.
//!
//! The validator can be swapped at any time (e.g. once the config changed), which is why it is
//! kept in an [ArcSwap].
use std::sync::Arc;

use anyhow::Context;
use arc_swap::ArcSwap;
use tokio::task::JoinHandle;

use crate::store::Store;
use crate::validator::Validator;

/// Provides the callbacks of a [RefreshAheadCache].
#[async_trait::async_trait]
pub trait RefreshHooks<V>: Send + Sync
where
    V: Send + Sync + 'static,
{
    /// Invoked for every value written via [RefreshAheadCache::set].
    ///
    /// This can be used to forward the value into a remote system. By default nothing happens.
    async fn on_write_back(&self, _key: &str, _value: V) -> anyhow::Result<()> {
        Ok(())
    }

    /// Invoked for every read which didn't find a valid record.
    ///
    /// Receives the stale record (if present) along with the local store. The returned value is
    /// handed to the reader. This must not wait for the upstream system.
    async fn on_refresh(
        &self,
        key: &str,
        stale: Option<V>,
        store: &Store<V>,
    ) -> anyhow::Result<Option<V>>;
}

/// Represents a write which has been started by [RefreshAheadCache::set].
///
/// The write is performed in the background. Dropping this handle doesn't abort it.
pub struct PendingWrite {
    write: JoinHandle<anyhow::Result<()>>,
    write_back: JoinHandle<anyhow::Result<()>>,
}

impl PendingWrite {
    /// Waits until both, the write into the local store and the write-back hook completed.
    ///
    /// Reports the first error which occurred.
    pub async fn wait(self) -> anyhow::Result<()> {
        let write = self.write.await.context("The store write panicked");
        let write_back = self.write_back.await.context("The write-back hook panicked");

        write??;
        write_back??;

        Ok(())
    }
}

/// Answers reads from a local store and triggers refreshes for invalid records.
pub struct RefreshAheadCache<V, F>
where
    V: Clone + Send + Sync + 'static,
{
    store: Store<V>,
    validator: ArcSwap<F>,
    hooks: Arc<dyn RefreshHooks<V>>,
}

impl<V, F> RefreshAheadCache<V, F>
where
    V: Clone + Send + Sync + 'static,
    F: Validator<V>,
{
    /// Creates a new cache on top of the given store.
    pub fn new(store: Store<V>, validator: F, hooks: Arc<dyn RefreshHooks<V>>) -> Self {
        RefreshAheadCache {
            store,
            validator: ArcSwap::from_pointee(validator),
            hooks,
        }
    }

    /// Returns the local store.
    pub fn store(&self) -> &Store<V> {
        &self.store
    }

    /// Returns the currently active validator.
    pub fn validator(&self) -> Arc<F> {
        self.validator.load_full()
    }

    /// Replaces the validator used by all subsequent reads.
    pub fn set_validator(&self, validator: F) {
        self.validator.store(Arc::new(validator));
    }

    /// Reads the record for the given key.
    ///
    /// A valid record is returned as is. Otherwise the result of the refresh hook is returned,
    /// which is most probably the stale (or an empty) record.
    pub async fn get(&self, key: &str) -> anyhow::Result<Option<V>> {
        let local = self.store.get(key).await?;
        if self.validator.load().validate(local.as_ref()) {
            return Ok(local);
        }

        self.hooks.on_refresh(key, local, &self.store).await
    }

    /// Writes the given value into the local store and invokes the write-back hook.
    ///
    /// Both operations are started as independent background tasks. The returned handle can be
    /// used to wait for them, or dropped.
    pub fn set(&self, key: &str, value: V) -> PendingWrite {
        let store = self.store.clone();
        let store_key = key.to_owned();
        let store_value = value.clone();
        let write = tokio::spawn(async move { store.set(&store_key, store_value).await });

        let hooks = self.hooks.clone();
        let hook_key = key.to_owned();
        let write_back = tokio::spawn(async move { hooks.on_write_back(&hook_key, value).await });

        PendingWrite { write, write_back }
    }

    /// Closes the underlying store.
    pub async fn close(&self) -> anyhow::Result<()> {
        self.store.close().await
    }
}
