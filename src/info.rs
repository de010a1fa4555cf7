//! Provides the record services as used by the HTTP layer.
//!
//! An [InfoService] serves one kind of record (e.g. transcripts or the teaching calendar). It
//! wires a [RefreshAheadCache] with a [TaskValidator] and schedules an [UpdateTask] for every
//! record which is found to be invalid:
//! 1. the stale (or a new, empty) record is stamped with a fresh submit time,
//! 2. the stamped record is written into the store, so that concurrent reads see the refresh
//!    being in flight,
//! 3. the update task is spawned via the [TaskRegistry],
//! 4. the stamped record is handed to the reader.
//!
//! Note that two concurrent misses of the same key may both schedule a refresh, as reading and
//! stamping the record isn't atomic. This only costs an additional upstream call.
//!
//! # Examples
//! ```no_run
//! # use std::sync::Arc;
//! # use ems_plat::account::AccountService;
//! # use ems_plat::config::CacheSettings;
//! # use ems_plat::entity::Session;
//! # use ems_plat::info::{InfoService, Scope};
//! # use ems_plat::store::MemoryStore;
//! # use ems_plat::task::Handler;
//! struct Transcript;
//!
//! #[async_trait::async_trait]
//! impl Handler for Transcript {
//!     type Output = Vec<String>;
//!
//!     async fn handle_async(&self, session: &Session) -> anyhow::Result<Vec<String>> {
//!         // Scrape the transcript using the given session...
//!         Ok(vec!["Compilers: 1.3".to_owned()])
//!     }
//! }
//!
//! # async fn example(accounts: Arc<AccountService>) -> anyhow::Result<()> {
//! let scores = InfoService::new(
//!     "scores",
//!     Scope::Personal,
//!     Transcript,
//!     MemoryStore::shared(),
//!     accounts,
//!     CacheSettings::scores(),
//! );
//!
//! // Returns None on the very first call, as the transcript is fetched in the background...
//! let transcript = scores.get("202105").await?;
//! # Ok(())
//! # }
//! ```
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::account::AccountService;
use crate::cache::{RefreshAheadCache, RefreshHooks};
use crate::config::{CacheSettings, Config};
use crate::entity::TaskEntity;
use crate::fmt::format_duration;
use crate::platform::Platform;
use crate::pool::BoundedTaskPool;
use crate::store::Store;
use crate::task::{AccountSource, Handler, TaskOutcome, TaskRegistry, UpdateSettings, UpdateTask};
use crate::validator::TaskValidator;

/// Determines whose data a service provides.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Scope {
    /// Each student has an own record, keyed by the student id.
    Personal,
    /// A single record is shared by all students (e.g. the teaching calendar). It is stored
    /// under the given name and fetched using any live session.
    Public {
        /// The key of the shared record.
        name: String,
    },
}

impl Scope {
    fn storage_key<'a>(&'a self, key: &'a str) -> &'a str {
        match self {
            Scope::Personal => key,
            Scope::Public { name } => name.as_str(),
        }
    }
}

/// Schedules the update tasks of a service.
struct Refresher<H: Handler> {
    handler: Arc<H>,
    accounts: Arc<AccountService>,
    registry: Arc<TaskRegistry>,
    scope: Scope,
    settings: ArcSwap<UpdateSettings>,
}

impl<H: Handler> Refresher<H> {
    fn task(&self, key: &str, store: Store<TaskEntity<H::Output>>) -> UpdateTask<H> {
        let source = match self.scope {
            Scope::Personal => AccountSource::Personal,
            Scope::Public { .. } => AccountSource::Shared(self.accounts.session_validator()),
        };

        UpdateTask::new(key, self.handler.clone(), store, self.accounts.clone(), source)
            .with_settings(**self.settings.load())
    }
}

#[async_trait::async_trait]
impl<H: Handler> RefreshHooks<TaskEntity<H::Output>> for Refresher<H> {
    async fn on_refresh(
        &self,
        key: &str,
        stale: Option<TaskEntity<H::Output>>,
        store: &Store<TaskEntity<H::Output>>,
    ) -> anyhow::Result<Option<TaskEntity<H::Output>>> {
        let mut record = stale.unwrap_or_default();
        record.mark_submitted();

        // The stamp has to be persisted before the task is started, otherwise it might
        // overwrite the fresh data written by the task...
        store.set(key, record.clone()).await?;

        let task = self.task(key, store.clone());
        self.registry.spawn(async move {
            match task.run().await {
                TaskOutcome::Updated => log::debug!("Refreshed {}.", task.key()),
                outcome => log::debug!("Refreshing {} yielded {:?}.", task.key(), outcome),
            }
        });

        Ok(Some(record))
    }
}

/// Serves one kind of record, refreshing it in the background once it becomes stale.
pub struct InfoService<H: Handler> {
    name: String,
    cache: RefreshAheadCache<TaskEntity<H::Output>, TaskValidator>,
    refresher: Arc<Refresher<H>>,
}

impl<H: Handler> InfoService<H> {
    /// Creates a new service.
    ///
    /// The **name** is used for logging and to look up the cache windows in the config (see
    /// [watch_config](InfoService::watch_config)).
    pub fn new(
        name: impl Into<String>,
        scope: Scope,
        handler: H,
        store: Store<TaskEntity<H::Output>>,
        accounts: Arc<AccountService>,
        settings: CacheSettings,
    ) -> Self {
        let refresher = Arc::new(Refresher {
            handler: Arc::new(handler),
            accounts,
            registry: Arc::new(TaskRegistry::new()),
            scope,
            settings: ArcSwap::from_pointee(UpdateSettings::default()),
        });

        InfoService {
            name: name.into(),
            cache: RefreshAheadCache::new(
                store,
                TaskValidator::from_settings(&settings),
                refresher.clone(),
            ),
            refresher,
        }
    }

    /// Returns the name of this service.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the scope of this service.
    pub fn scope(&self) -> &Scope {
        &self.refresher.scope
    }

    /// Reads the data for the given key (the student id for personal services).
    ///
    /// Returns the cached data, even if it is stale. **None** is returned if no data has been
    /// fetched so far. Either way, a refresh is scheduled if required.
    pub async fn get(&self, key: &str) -> anyhow::Result<Option<H::Output>> {
        let key = self.refresher.scope.storage_key(key);
        Ok(self.cache.get(key).await?.and_then(|record| record.data))
    }

    /// Reads the shared record of a public service.
    pub async fn get_public(&self) -> anyhow::Result<Option<H::Output>> {
        self.get("").await
    }

    /// Applies new cache windows.
    pub fn reconfigure(&self, settings: CacheSettings) {
        log::info!(
            "Using update_expire: {}, submit_expire: {} for {}.",
            format_duration(settings.update_expire),
            format_duration(settings.submit_expire),
            self.name
        );
        self.cache.set_validator(TaskValidator::from_settings(&settings));
        let _ = self.budget_exceeded();
    }

    /// Warns if a refresh may outlive the submit window, which permits duplicate refreshes.
    fn budget_exceeded(&self) -> bool {
        let budget = self.refresher.settings.load().budget();
        let submit_expire = self.cache.validator().submit_expire();
        if budget <= submit_expire {
            return false;
        }

        log::warn!(
            "A refresh of {} may take up to {}, which exceeds its submit_expire of {}. \
             Slow refreshes might therefore be scheduled twice.",
            self.name,
            format_duration(budget),
            format_duration(submit_expire)
        );
        true
    }

    /// Returns the cache windows which are currently in use.
    pub fn cache_settings(&self) -> CacheSettings {
        let validator = self.cache.validator();
        CacheSettings::new(validator.update_expire(), validator.submit_expire())
    }

    /// Specifies the timeout and retry policy of all subsequently scheduled update tasks.
    ///
    /// Logs a warning if the [budget](UpdateSettings::budget) of the settings exceeds the submit
    /// window of this service.
    pub fn set_update_settings(&self, settings: UpdateSettings) {
        self.refresher.settings.store(Arc::new(settings));
        let _ = self.budget_exceeded();
    }

    /// Returns the number of update tasks which are still running.
    pub fn pending_tasks(&self) -> usize {
        self.refresher.registry.len()
    }

    /// Refreshes all records in bulk, using up to **workers** concurrent update tasks.
    ///
    /// A personal service refreshes the record of every valid account, a public service its
    /// shared record. Returns the number of updated records.
    pub async fn refresh_all(&self, workers: usize) -> anyhow::Result<usize> {
        let store = self.cache.store().clone();
        let updated = Arc::new(AtomicUsize::new(0));
        let pool = BoundedTaskPool::new(workers);

        let keys = match &self.refresher.scope {
            Scope::Public { name } => vec![name.clone()],
            Scope::Personal => {
                let mut keys = Vec::new();
                for student_id in self.refresher.accounts.student_ids().await? {
                    let valid = self
                        .refresher
                        .accounts
                        .find(&student_id)
                        .await?
                        .map(|account| account.is_valid())
                        .unwrap_or(false);
                    if valid {
                        keys.push(student_id);
                    }
                }
                keys
            }
        };

        for key in keys {
            let task = self.refresher.task(&key, store.clone());
            let updated = updated.clone();
            pool.add(async move {
                if task.run().await == TaskOutcome::Updated {
                    let _ = updated.fetch_add(1, Ordering::SeqCst);
                }
            });
        }

        let report = pool.run().await;
        let updated = updated.load(Ordering::SeqCst);
        log::info!(
            "Refreshed {} of {} records of {}.",
            updated,
            report.completed,
            self.name
        );

        Ok(updated)
    }

    /// Waits for all running update tasks and closes the store.
    pub async fn shutdown(&self) -> anyhow::Result<()> {
        self.refresher.registry.drain().await;
        self.cache.close().await
    }
}

impl<H: Handler> InfoService<H> {
    /// Applies the cache windows of the config and re-applies them once the config changes.
    ///
    /// The windows are read from `caches.<name>` (see [CacheSettings::from_config]), missing
    /// values are replaced by **defaults**. Nothing happens if no [Config] is installed.
    pub fn watch_config(self: &Arc<Self>, platform: Arc<Platform>, defaults: CacheSettings) {
        let config = match platform.find::<Config>() {
            Some(config) => config,
            None => return,
        };

        self.reconfigure(CacheSettings::from_config(
            &config.current(),
            &self.name,
            defaults,
        ));

        let service = self.clone();
        let mut notifier = config.notifier();
        crate::spawn!(async move {
            loop {
                tokio::select! {
                    change = notifier.recv() => match change {
                        Ok(_) | Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {
                            service.reconfigure(CacheSettings::from_config(
                                &config.current(),
                                &service.name,
                                defaults,
                            ));
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
                    },
                    _ = platform.terminated() => return,
                }
            }
        });
    }
}
