//! Contains the background refresh machinery.
//!
//! * [Handler] and [SessionValidator] are the capabilities provided by the scraping layer.
//! * An [UpdateTask] obtains a usable account, invokes a handler with its session and writes the
//!   fetched data back into the record store.
//! * The [TaskRegistry] keeps track of all fire-and-forget tasks, so that they can be drained
//!   once the system shuts down.
//!
//! Update tasks never report errors to anyone waiting for the data (as nobody waits for them).
//! Instead, the outcome is reported as [TaskOutcome] and logged. A failing handler demotes the
//! account which was used, so that the user is asked to log in again.
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::account::AccountService;
use crate::entity::{Account, Session, TaskEntity};
use crate::fmt::format_duration;
use crate::store::Store;

/// Fetches data from the upstream system using a given session.
///
/// Handlers have to be idempotent and must not have side effects visible to the cache.
#[async_trait::async_trait]
pub trait Handler: Send + Sync + 'static {
    /// The data produced by this handler.
    type Output: Clone + Send + Sync + 'static;

    /// Returns a name used for logging.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Fetches the data using the given session.
    async fn handle_async(&self, session: &Session) -> anyhow::Result<Self::Output>;

    /// Fetches the data in a blocking fashion.
    ///
    /// Note that this must not be called from within the tokio runtime, as it blocks the current
    /// thread until the data is available.
    fn handle(&self, session: &Session) -> anyhow::Result<Self::Output> {
        futures::executor::block_on(self.handle_async(session))
    }
}

/// Checks if an upstream session is still alive.
#[async_trait::async_trait]
pub trait SessionValidator: Send + Sync {
    /// Determines if the given session is still usable.
    ///
    /// An **Err** signals that the check itself failed (e.g. a timeout) and may be retried.
    async fn validate(&self, session: &Session) -> anyhow::Result<bool>;

    /// Performs the check in a blocking fashion (never call this within the tokio runtime).
    fn validate_blocking(&self, session: &Session) -> anyhow::Result<bool> {
        futures::executor::block_on(self.validate(session))
    }
}

/// Controls how an [UpdateTask] talks to its handler.
///
/// While a refresh runs, its record is only protected by the submit window (see
/// [TaskValidator](crate::validator::TaskValidator)). Once this window lapses, the next read
/// schedules another refresh. Therefore the [budget](UpdateSettings::budget) of a task should
/// stay below the submit window of its records. The defaults fit into
/// [DEFAULT_SUBMIT_EXPIRE](crate::config::DEFAULT_SUBMIT_EXPIRE).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UpdateSettings {
    /// The max duration of a single handler call.
    pub timeout: Duration,
    /// The number of retries after the first failed call.
    pub max_retry: usize,
    /// The pause between two calls.
    pub retry_delay: Duration,
}

impl Default for UpdateSettings {
    fn default() -> Self {
        UpdateSettings {
            timeout: Duration::from_secs(10),
            max_retry: 3,
            retry_delay: Duration::from_millis(100),
        }
    }
}

impl UpdateSettings {
    /// Returns the longest time a task may spend calling its handler (all attempts and pauses).
    pub fn budget(&self) -> Duration {
        let retries = u32::try_from(self.max_retry).unwrap_or(u32::MAX);
        self.timeout
            .saturating_mul(retries.saturating_add(1))
            .saturating_add(self.retry_delay.saturating_mul(retries))
    }
}

/// Determines which account is used to fetch data.
#[derive(Clone)]
pub enum AccountSource {
    /// Public data can be fetched using any account. The first account which carries a session
    /// accepted by the given validator is used.
    Shared(Arc<dyn SessionValidator>),
    /// Personal data is fetched using the account stored under the key of the record. Its
    /// validity isn't checked upfront, but discovered by calling the handler.
    Personal,
}

/// Reports what an [UpdateTask] did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Fresh data has been written into the record store.
    Updated,
    /// No usable account was found, therefore nothing happened.
    NoAccount,
    /// The handler failed and the given account has been marked as expired (unless it logged in
    /// again in the meantime).
    Failed {
        /// The student id of the demoted account.
        student_id: String,
    },
    /// A store could not be accessed.
    Aborted,
}

/// Fetches the data for a single record and writes it back into the record store.
pub struct UpdateTask<H: Handler> {
    key: String,
    handler: Arc<H>,
    storage: Store<TaskEntity<H::Output>>,
    accounts: Arc<AccountService>,
    source: AccountSource,
    settings: UpdateSettings,
}

impl<H: Handler> UpdateTask<H> {
    /// Creates a task which updates the record stored under **key**.
    pub fn new(
        key: impl Into<String>,
        handler: Arc<H>,
        storage: Store<TaskEntity<H::Output>>,
        accounts: Arc<AccountService>,
        source: AccountSource,
    ) -> Self {
        UpdateTask {
            key: key.into(),
            handler,
            storage,
            accounts,
            source,
            settings: UpdateSettings::default(),
        }
    }

    /// Specifies the timeout and retry policy to use.
    pub fn with_settings(mut self, settings: UpdateSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Returns the key of the record to update.
    pub fn key(&self) -> &str {
        &self.key
    }

    async fn find_account(&self) -> anyhow::Result<Option<Account>> {
        match &self.source {
            AccountSource::Personal => self.accounts.find(&self.key).await,
            AccountSource::Shared(validator) => {
                for student_id in self.accounts.student_ids().await? {
                    let account = match self.accounts.find(&student_id).await? {
                        Some(account) => account,
                        None => continue,
                    };
                    let session = match account.session() {
                        Some(session) => session,
                        None => continue,
                    };

                    match validator.validate(&session).await {
                        Ok(true) => return Ok(Some(account)),
                        Ok(false) => (),
                        Err(error) => log::debug!(
                            "Cannot validate the session of {}: {:#}",
                            student_id,
                            error
                        ),
                    }
                }

                Ok(None)
            }
        }
    }

    async fn call_handler(&self, session: &Session) -> anyhow::Result<H::Output> {
        let attempts = self.settings.max_retry + 1;
        let mut attempt = 0;

        loop {
            attempt += 1;
            let result =
                match tokio::time::timeout(self.settings.timeout, self.handler.handle_async(session))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(anyhow::anyhow!(
                        "The handler did not respond within {}",
                        format_duration(self.settings.timeout)
                    )),
                };

            match result {
                Ok(data) => return Ok(data),
                Err(error) if attempt < attempts => {
                    log::warn!(
                        "{} failed for {} (attempt {} of {}): {:#}",
                        self.handler.name(),
                        self.key,
                        attempt,
                        attempts,
                        error
                    );
                    tokio::time::sleep(self.settings.retry_delay).await;
                }
                Err(error) => return Err(error),
            }
        }
    }

    async fn write_back(&self, data: H::Output) -> anyhow::Result<()> {
        let mut record = self.storage.get(&self.key).await?.unwrap_or_default();
        record.update(data);
        self.storage.set(&self.key, record).await
    }

    /// Runs the task.
    ///
    /// This never fails, all errors are logged and reported as [TaskOutcome].
    pub async fn run(&self) -> TaskOutcome {
        let account = match self.find_account().await {
            Ok(Some(account)) => account,
            Ok(None) => {
                log::debug!(
                    "No usable account to run {} for {}.",
                    self.handler.name(),
                    self.key
                );
                return TaskOutcome::NoAccount;
            }
            Err(error) => {
                log::error!(
                    "Failed to obtain an account to run {} for {}: {:#}",
                    self.handler.name(),
                    self.key,
                    error
                );
                return TaskOutcome::Aborted;
            }
        };

        let result = match account.session() {
            Some(session) => self.call_handler(&session).await,
            None => Err(anyhow::anyhow!("The account has no session.")),
        };

        match result {
            Ok(data) => match self.write_back(data).await {
                Ok(_) => TaskOutcome::Updated,
                Err(error) => {
                    log::error!("Failed to store the record {}: {:#}", self.key, error);
                    TaskOutcome::Aborted
                }
            },
            Err(error) => {
                log::info!(
                    "The session of {} probably expired, a new login is required.",
                    account.student_id
                );
                log::error!(
                    "{} failed for {}: {:#}",
                    self.handler.name(),
                    self.key,
                    error
                );

                if let Err(error) = self
                    .accounts
                    .expire_session(&account.student_id, account.session.as_deref())
                    .await
                {
                    log::error!(
                        "Failed to mark {} as expired: {}",
                        account.student_id,
                        error
                    );
                }

                TaskOutcome::Failed {
                    student_id: account.student_id,
                }
            }
        }
    }
}

/// Keeps track of all running fire-and-forget tasks.
///
/// Each task removes itself once it completes (or panics). During shutdown,
/// [drain](TaskRegistry::drain) awaits everything which is still running.
#[derive(Default)]
pub struct TaskRegistry {
    tasks: Arc<Mutex<HashMap<u64, JoinHandle<()>>>>,
    sequence: AtomicU64,
}

/// Removes a task from its registry once the task is dropped.
struct Deregister {
    tasks: Arc<Mutex<HashMap<u64, JoinHandle<()>>>>,
    id: u64,
}

impl Drop for Deregister {
    fn drop(&mut self) {
        if let Ok(mut tasks) = self.tasks.lock() {
            let _ = tasks.remove(&self.id);
        }
    }
}

impl TaskRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        TaskRegistry::default()
    }

    /// Spawns the given future and tracks it until it completes.
    pub fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let id = self.sequence.fetch_add(1, Ordering::Relaxed);
        let deregister = Deregister {
            tasks: self.tasks.clone(),
            id,
        };

        // The lock is held until the handle is stored, so that a task completing right away
        // cannot deregister itself before it was registered...
        let mut tasks = match self.tasks.lock() {
            Ok(tasks) => tasks,
            Err(poisoned) => poisoned.into_inner(),
        };
        let handle = tokio::spawn(async move {
            let _deregister = deregister;
            future.await;
        });
        let _ = tasks.insert(id, handle);
    }

    /// Returns the number of tasks which are still running.
    pub fn len(&self) -> usize {
        self.tasks.lock().map(|tasks| tasks.len()).unwrap_or(0)
    }

    /// Determines if no task is running.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Awaits all tracked tasks, including the ones spawned while draining.
    pub async fn drain(&self) {
        loop {
            let handles: Vec<JoinHandle<()>> = match self.tasks.lock() {
                Ok(mut tasks) => tasks.drain().map(|(_, handle)| handle).collect(),
                Err(_) => return,
            };

            if handles.is_empty() {
                return;
            }

            log::debug!("Waiting for {} background tasks...", handles.len());
            for handle in handles {
                if let Err(error) = handle.await {
                    log::error!("A background task failed: {}", error);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::account::AccountService;
    use crate::config::DEFAULT_SUBMIT_EXPIRE;
    use crate::entity::{AccountStatus, Session, TaskEntity};
    use crate::store::{KeyValueStore, MemoryStore, Store};
    use crate::task::{
        AccountSource, Handler, SessionValidator, TaskOutcome, TaskRegistry, UpdateSettings,
        UpdateTask,
    };
    use crate::testing::{MockSessionValidator, TestAccounts};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::Notify;

    struct TranscriptHandler {
        calls: AtomicUsize,
        failures: usize,
    }

    #[async_trait::async_trait]
    impl Handler for TranscriptHandler {
        type Output = String;

        async fn handle_async(&self, session: &Session) -> anyhow::Result<String> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(anyhow::anyhow!("Upstream returned a login page"))
            } else {
                Ok(format!("Transcript via {}", session))
            }
        }
    }

    fn handler(failures: usize) -> Arc<TranscriptHandler> {
        Arc::new(TranscriptHandler {
            calls: AtomicUsize::new(0),
            failures,
        })
    }

    fn fast() -> UpdateSettings {
        UpdateSettings {
            timeout: Duration::from_secs(1),
            max_retry: 2,
            retry_delay: Duration::from_millis(1),
        }
    }

    #[test]
    fn default_settings_fit_into_the_submit_window() {
        let settings = UpdateSettings::default();
        assert_eq!(settings.budget(), Duration::from_millis(40_300));
        assert_eq!(settings.budget() < DEFAULT_SUBMIT_EXPIRE, true);

        assert_eq!(fast().budget(), Duration::from_millis(3_002));
        assert_eq!(
            UpdateSettings {
                timeout: Duration::MAX,
                max_retry: usize::MAX,
                retry_delay: Duration::MAX,
            }
            .budget(),
            Duration::MAX
        );
    }

    #[test]
    fn personal_tasks_use_the_account_of_the_key() {
        crate::testing::test_async(async {
            let accounts = TestAccounts::new();
            let _ = accounts.service.login("202101", "secret").await.unwrap();
            let _ = accounts.service.login("202102", "secret").await.unwrap();

            let storage: Store<TaskEntity<String>> = MemoryStore::shared();
            let handler = handler(0);
            let task = UpdateTask::new(
                "202102",
                handler.clone(),
                storage.clone(),
                accounts.service.clone(),
                AccountSource::Personal,
            )
            .with_settings(fast());

            assert_eq!(task.run().await, TaskOutcome::Updated);

            let record = storage.get("202102").await.unwrap().unwrap();
            assert_eq!(record.data.as_deref(), Some("Transcript via SESSION-202102-2"));
            assert_eq!(record.update_time.is_some(), true);
        });
    }

    #[test]
    fn unknown_accounts_are_a_no_op() {
        crate::testing::test_async(async {
            let accounts = TestAccounts::new();
            let storage: Store<TaskEntity<String>> = MemoryStore::shared();
            let handler = handler(0);

            let task = UpdateTask::new(
                "202199",
                handler.clone(),
                storage.clone(),
                accounts.service.clone(),
                AccountSource::Personal,
            );

            assert_eq!(task.run().await, TaskOutcome::NoAccount);
            assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
            assert_eq!(storage.is_empty().await.unwrap(), true);
        });
    }

    #[test]
    fn transient_failures_are_retried() {
        crate::testing::test_async(async {
            let accounts = TestAccounts::new();
            let _ = accounts.service.login("202101", "secret").await.unwrap();

            let storage: Store<TaskEntity<String>> = MemoryStore::shared();
            let handler = handler(2);
            let task = UpdateTask::new(
                "202101",
                handler.clone(),
                storage.clone(),
                accounts.service.clone(),
                AccountSource::Personal,
            )
            .with_settings(fast());

            assert_eq!(task.run().await, TaskOutcome::Updated);
            assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
        });
    }

    #[test]
    fn failing_handlers_expire_the_account() {
        crate::testing::test_async(async {
            let accounts = TestAccounts::new();
            let _ = accounts.service.login("202101", "secret").await.unwrap();

            let storage: Store<TaskEntity<String>> = MemoryStore::shared();
            let handler = handler(usize::MAX);
            let task = UpdateTask::new(
                "202101",
                handler.clone(),
                storage.clone(),
                accounts.service.clone(),
                AccountSource::Personal,
            )
            .with_settings(fast());

            assert_eq!(
                task.run().await,
                TaskOutcome::Failed {
                    student_id: "202101".to_owned()
                }
            );
            assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
            assert_eq!(storage.get("202101").await.unwrap(), None);

            let account = accounts.service.find("202101").await.unwrap().unwrap();
            assert_eq!(account.status, AccountStatus::Expired);
        });
    }

    #[test]
    fn relogins_during_a_failing_call_survive() {
        struct GatedHandler {
            entered: Notify,
            release: Notify,
        }

        #[async_trait::async_trait]
        impl Handler for GatedHandler {
            type Output = String;

            async fn handle_async(&self, _session: &Session) -> anyhow::Result<String> {
                self.entered.notify_one();
                self.release.notified().await;
                Err(anyhow::anyhow!("Upstream returned a login page"))
            }
        }

        crate::testing::test_async(async {
            let accounts = TestAccounts::new();
            let _ = accounts.service.login("202101", "secret").await.unwrap();

            let handler = Arc::new(GatedHandler {
                entered: Notify::new(),
                release: Notify::new(),
            });
            let task = UpdateTask::new(
                "202101",
                handler.clone(),
                MemoryStore::shared(),
                accounts.service.clone(),
                AccountSource::Personal,
            )
            .with_settings(UpdateSettings {
                timeout: Duration::from_secs(5),
                max_retry: 0,
                retry_delay: Duration::from_millis(1),
            });
            let running = tokio::spawn(async move { task.run().await });

            // The user logs in again while the handler still works with the old session...
            handler.entered.notified().await;
            let _ = accounts.service.expire_account("202101").await.unwrap();
            let fresh = accounts.service.login("202101", "secret").await.unwrap();
            assert_eq!(fresh.session.as_deref(), Some("SESSION-202101-2"));

            handler.release.notify_one();
            assert_eq!(
                running.await.unwrap(),
                TaskOutcome::Failed {
                    student_id: "202101".to_owned()
                }
            );

            // ...which must not expire the fresh login.
            let account = accounts.service.find("202101").await.unwrap().unwrap();
            assert_eq!(account.status, AccountStatus::Normal);
            assert_eq!(
                accounts
                    .service
                    .auth_with_token(fresh.token().unwrap())
                    .await
                    .unwrap(),
                Some(fresh)
            );
        });
    }

    #[test]
    fn shared_tasks_pick_the_first_live_session() {
        crate::testing::test_async(async {
            let accounts = TestAccounts::new();
            let first = accounts.service.login("202101", "secret").await.unwrap();
            let _ = accounts.service.login("202102", "secret").await.unwrap();

            // Kill the session of the first account, so that the second one has to be used...
            let validator = Arc::new(MockSessionValidator::new());
            validator.kill(first.session.as_deref().unwrap());
            assert_eq!(
                validator
                    .validate(&first.session().unwrap())
                    .await
                    .unwrap(),
                false
            );

            let storage: Store<TaskEntity<String>> = MemoryStore::shared();
            let task = UpdateTask::new(
                "calendar",
                handler(0),
                storage.clone(),
                accounts.service.clone(),
                AccountSource::Shared(validator.clone()),
            )
            .with_settings(fast());

            assert_eq!(task.run().await, TaskOutcome::Updated);
            let record = storage.get("calendar").await.unwrap().unwrap();
            assert_eq!(record.data.as_deref(), Some("Transcript via SESSION-202102-2"));

            // Without any live session, nothing happens...
            validator.kill("SESSION-202102-2");
            assert_eq!(task.run().await, TaskOutcome::NoAccount);
        });
    }

    #[test]
    fn slow_handlers_time_out() {
        struct SlowHandler;

        #[async_trait::async_trait]
        impl Handler for SlowHandler {
            type Output = String;

            async fn handle_async(&self, _session: &Session) -> anyhow::Result<String> {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok("too late".to_owned())
            }
        }

        crate::testing::test_async(async {
            let accounts = TestAccounts::new();
            let _ = accounts.service.login("202101", "secret").await.unwrap();

            let task = UpdateTask::new(
                "202101",
                Arc::new(SlowHandler),
                MemoryStore::shared(),
                accounts.service.clone(),
                AccountSource::Personal,
            )
            .with_settings(UpdateSettings {
                timeout: Duration::from_millis(10),
                max_retry: 0,
                retry_delay: Duration::from_millis(1),
            });

            assert_eq!(
                task.run().await,
                TaskOutcome::Failed {
                    student_id: "202101".to_owned()
                }
            );
        });
    }

    #[test]
    fn registry_tracks_tasks_until_they_complete() {
        crate::testing::test_async(async {
            let registry = TaskRegistry::new();
            let counter = Arc::new(AtomicUsize::new(0));

            for _ in 0..5 {
                let counter = counter.clone();
                registry.spawn(async move {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    let _ = counter.fetch_add(1, Ordering::SeqCst);
                });
            }
            registry.spawn(async { panic!("Broken handler") });

            assert_eq!(registry.len(), 6);
            registry.drain().await;

            assert_eq!(registry.is_empty(), true);
            assert_eq!(counter.load(Ordering::SeqCst), 5);
        });
    }

    #[test]
    fn completed_tasks_deregister_themselves() {
        crate::testing::test_async(async {
            let registry = TaskRegistry::new();
            registry.spawn(async {});
            registry.spawn(async { panic!("Broken handler") });

            tokio::time::sleep(Duration::from_millis(50)).await;
            assert_eq!(registry.len(), 0);
        });
    }

    #[test]
    fn blocking_handlers_work_outside_of_the_runtime() {
        let handler = handler(0);
        let session = Session::new("ABC").unwrap();
        assert_eq!(handler.handle(&session).unwrap(), "Transcript via ABC");
    }
}
