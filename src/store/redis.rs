//! Provides a store which keeps its entries in a Redis instance.
//!
//! All keys are namespaced with a prefix so that several services (e.g. the account store and
//! the score cache) can share one Redis database. Values pass through a [Codec], so that the
//! caller decides how a record is laid out on the wire.
//!
//! Queries are executed using the blocking client within **spawn_blocking** so that tokio is
//! never blocked. A single connection is kept around and re-established once a query fails.
//!
//! # Examples
//! ```no_run
//! # use ems_plat::entity::Account;
//! # use ems_plat::store::codec::Codec;
//! # use ems_plat::store::redis::RedisStore;
//! # use ems_plat::store::KeyValueStore;
//! # #[tokio::main]
//! # async fn main() -> anyhow::Result<()> {
//! let accounts = RedisStore::new("redis://127.0.0.1:6379", "account:", Codec::<Account>::json())?;
//! accounts.set("202105", Account::new("202105", "secret")).await?;
//!
//! // Keys are reported without their prefix...
//! assert_eq!(accounts.keys().await?, vec!["202105".to_owned()]);
//! # Ok(())
//! # }
//! ```
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context;
use redis::{Client, Connection, RedisResult};

use crate::store::codec::Codec;
use crate::store::KeyValueStore;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// A remote store backed by Redis.
pub struct RedisStore<V> {
    client: Client,
    connection: Arc<Mutex<Option<Connection>>>,
    prefix: String,
    codec: Codec<V>,
    closed: AtomicBool,
}

impl<V> RedisStore<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Creates a store talking to the given Redis URL.
    ///
    /// Note that no connection is established here. This happens lazily on the first query.
    ///
    /// # Errors
    /// Fails if the given URL cannot be parsed.
    pub fn new(url: &str, prefix: impl Into<String>, codec: Codec<V>) -> anyhow::Result<Self> {
        let client =
            Client::open(url).with_context(|| format!("Invalid Redis URL: {}", url))?;

        Ok(RedisStore {
            client,
            connection: Arc::new(Mutex::new(None)),
            prefix: prefix.into(),
            codec,
            closed: AtomicBool::new(false),
        })
    }

    /// Returns the namespace prefix of this store.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn prefixed(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    fn strip_prefix<'a>(&self, key: &'a str) -> Option<&'a str> {
        key.strip_prefix(self.prefix.as_str())
    }

    /// Executes the given query on the shared connection.
    async fn query<T, Q>(&self, query: Q) -> anyhow::Result<T>
    where
        Q: FnOnce(&mut Connection) -> RedisResult<T> + Send + 'static,
        T: Send + 'static,
    {
        if self.closed.load(Ordering::Acquire) {
            return Err(anyhow::anyhow!("The store ({}) has been closed.", self.prefix));
        }

        let client = self.client.clone();
        let connection = self.connection.clone();

        tokio::task::spawn_blocking(move || {
            let mut connection = connection
                .lock()
                .map_err(|_| anyhow::anyhow!("The Redis connection lock is poisoned."))?;

            if connection.is_none() {
                *connection = Some(
                    client
                        .get_connection_with_timeout(CONNECT_TIMEOUT)
                        .context("Failed to connect to Redis")?,
                );
            }

            let result = match connection.as_mut() {
                Some(con) => query(con),
                None => return Err(anyhow::anyhow!("No Redis connection available.")),
            };

            // A broken connection is dropped so that the next query reconnects...
            if result.is_err() {
                *connection = None;
            }

            result.context("Redis query failed")
        })
        .await
        .context("A Redis query panicked")?
    }
}

#[async_trait::async_trait]
impl<V> KeyValueStore<V> for RedisStore<V>
where
    V: Clone + Send + Sync + 'static,
{
    async fn get(&self, key: &str) -> anyhow::Result<Option<V>> {
        let key = self.prefixed(key);
        let data = self
            .query(move |con| redis::cmd("GET").arg(key).query::<Option<Vec<u8>>>(con))
            .await?;

        match data {
            Some(data) => Ok(Some(self.codec.decode(&data)?)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: V) -> anyhow::Result<()> {
        let key = self.prefixed(key);
        let data = self.codec.encode(&value)?;
        self.query(move |con| redis::cmd("SET").arg(key).arg(data).query::<()>(con))
            .await
    }

    async fn delete(&self, key: &str) -> anyhow::Result<()> {
        let key = self.prefixed(key);
        self.query(move |con| redis::cmd("DEL").arg(key).query::<()>(con))
            .await
    }

    async fn keys(&self) -> anyhow::Result<Vec<String>> {
        let pattern = format!("{}*", self.prefix);
        let keys = self
            .query(move |con| redis::cmd("KEYS").arg(pattern).query::<Vec<String>>(con))
            .await?;

        Ok(keys
            .iter()
            .filter_map(|key| self.strip_prefix(key))
            .map(str::to_owned)
            .collect())
    }

    async fn len(&self) -> anyhow::Result<usize> {
        Ok(self.keys().await?.len())
    }

    async fn close(&self) -> anyhow::Result<()> {
        self.closed.store(true, Ordering::Release);
        if let Ok(mut connection) = self.connection.lock() {
            *connection = None;
        }

        Ok(())
    }
}
