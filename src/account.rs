//! Manages student accounts, their upstream sessions and the locally issued tokens.
//!
//! The [AccountService] is the only component which mutates accounts. Everyone else (e.g. an
//! [UpdateTask](crate::task::UpdateTask)) reads accounts via [find](AccountService::find) and
//! reports dead sessions via [expire_account](AccountService::expire_account).
//!
//! Two stores are involved:
//! * the account store maps a student id to its [Account],
//! * the token index maps a token to the student id of its account.
//!
//! A token is only accepted if the account it points to still carries exactly this token. Stale
//! index entries are therefore harmless.
//!
//! Sessions die upstream without further notice. Therefore [install] starts a loop which
//! periodically revalidates the session of each valid account and demotes the dead ones.
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;

use crate::config::SessionSettings;
use crate::entity::{Account, AccountStatus, Session};
use crate::fmt::format_duration;
use crate::platform::Platform;
use crate::store::Store;
use crate::task::SessionValidator;

/// Enumerates the errors reported by an [Authenticator].
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The username or password is wrong.
    #[error("Invalid username or password.")]
    InvalidCredentials,
    /// The captcha was mis-recognized.
    #[error("The captcha was not accepted.")]
    InvalidCaptcha,
    /// The account exists but its initial password was never changed.
    #[error("The password of this account has not been initialized.")]
    UninitializedPassword,
    /// The upstream system did not respond in time.
    #[error("The upstream system did not respond in time.")]
    Timeout,
    /// Any other upstream failure.
    #[error(transparent)]
    Upstream(#[from] anyhow::Error),
}

impl AuthError {
    /// Determines if another attempt might succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, AuthError::InvalidCaptcha | AuthError::Timeout)
    }
}

/// Logs into the upstream system.
#[async_trait::async_trait]
pub trait Authenticator: Send + Sync {
    /// Performs a login (including solving the captcha) and returns the new session.
    async fn authenticate(&self, username: &str, password: &str) -> Result<Session, AuthError>;
}

/// Enumerates the errors reported to the clients of the [AccountService].
#[derive(Debug, thiserror::Error)]
pub enum AccountError {
    /// The username or password is wrong.
    #[error("Invalid username or password.")]
    InvalidCredentials,
    /// The session of the account died, a new login is required.
    #[error("The session of {username} has expired. Please log in again.")]
    Expired {
        /// The student id of the account.
        username: String,
    },
    /// The account must not be used anymore.
    #[error("The account {username} has been banned.")]
    Banned {
        /// The student id of the account.
        username: String,
    },
    /// The initial password has to be changed in the upstream system first.
    #[error("The password of this account has not been initialized.")]
    UninitializedPassword,
    /// The captcha was rejected for every attempt.
    #[error("The upstream system is busy. Please try again later.")]
    Busy,
    /// The upstream system did not respond in time (for every attempt).
    #[error("The upstream system did not respond in time.")]
    Timeout,
    /// Any other upstream failure.
    #[error("The upstream system failed: {0:#}")]
    Upstream(anyhow::Error),
    /// The account store or token index failed.
    #[error("Failed to access the account store: {0:#}")]
    Store(anyhow::Error),
}

impl From<AuthError> for AccountError {
    fn from(error: AuthError) -> Self {
        match error {
            AuthError::InvalidCredentials => AccountError::InvalidCredentials,
            AuthError::InvalidCaptcha => AccountError::Busy,
            AuthError::UninitializedPassword => AccountError::UninitializedPassword,
            AuthError::Timeout => AccountError::Timeout,
            AuthError::Upstream(error) => AccountError::Upstream(error),
        }
    }
}

/// Summarizes a revalidation pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RefreshReport {
    /// The number of valid accounts whose session was checked.
    pub checked: usize,
    /// The number of accounts which have been demoted.
    pub expired: usize,
    /// The number of accounts which couldn't be read or demoted due to a store error.
    pub failed: usize,
}

/// Provides login, token authentication and session revalidation.
pub struct AccountService {
    accounts: Store<Account>,
    tokens: Store<String>,
    authenticator: Arc<dyn Authenticator>,
    validator: Arc<dyn SessionValidator>,
    settings: SessionSettings,
}

impl AccountService {
    /// Creates a new service operating on the given account store and token index.
    pub fn new(
        accounts: Store<Account>,
        tokens: Store<String>,
        authenticator: Arc<dyn Authenticator>,
        validator: Arc<dyn SessionValidator>,
        settings: SessionSettings,
    ) -> Self {
        AccountService {
            accounts,
            tokens,
            authenticator,
            validator,
            settings,
        }
    }

    /// Returns the settings used for logins and revalidation.
    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Returns the validator used to check upstream sessions.
    pub fn session_validator(&self) -> Arc<dyn SessionValidator> {
        self.validator.clone()
    }

    /// Reads the account of the given student.
    pub async fn find(&self, student_id: &str) -> anyhow::Result<Option<Account>> {
        self.accounts.get(student_id).await
    }

    /// Lists the ids of all known accounts.
    pub async fn student_ids(&self) -> anyhow::Result<Vec<String>> {
        self.accounts.keys().await
    }

    /// Logs the given user in.
    ///
    /// A valid local account is checked against the given password without contacting the
    /// upstream system. Otherwise a fresh upstream session is obtained, the account is (re-)set
    /// to **Normal** and receives a new token.
    pub async fn login(&self, username: &str, password: &str) -> Result<Account, AccountError> {
        let existing = self.accounts.get(username).await.map_err(AccountError::Store)?;

        if let Some(account) = &existing {
            if account.is_valid() {
                return if account.password == password {
                    Ok(account.clone())
                } else {
                    Err(AccountError::InvalidCredentials)
                };
            }
        }

        let session = self.authenticate(username, password).await?;

        let mut account = existing.unwrap_or_else(|| Account::new(username, password));
        account.password = password.to_owned();
        account.session = Some(session.id().to_owned());
        account.status = AccountStatus::Normal;
        account.last_login_time = Utc::now();

        self.rotate_token(&mut account).await?;
        self.accounts
            .set(username, account.clone())
            .await
            .map_err(AccountError::Store)?;

        log::info!("{} logged in successfully.", username);
        Ok(account)
    }

    async fn authenticate(&self, username: &str, password: &str) -> Result<Session, AccountError> {
        let attempts = self.settings.login_retries.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self.authenticator.authenticate(username, password).await {
                Ok(session) => return Ok(session),
                Err(error) if error.is_transient() && attempt < attempts => {
                    log::debug!(
                        "Login of {} failed (attempt {} of {}): {}",
                        username,
                        attempt,
                        attempts,
                        error
                    );
                }
                Err(error) => return Err(error.into()),
            }
        }
    }

    /// Replaces the token of the given account and updates the token index accordingly.
    ///
    /// The old index entry is removed first, then new tokens are generated until one is found
    /// which isn't in the index yet.
    async fn rotate_token(&self, account: &mut Account) -> Result<(), AccountError> {
        if let Some(previous) = account.token().map(str::to_owned) {
            self.tokens
                .delete(&previous)
                .await
                .map_err(AccountError::Store)?;
        }

        loop {
            let token = account.rotate_token().to_owned();
            let collision = self
                .tokens
                .get(&token)
                .await
                .map_err(AccountError::Store)?;

            if collision.is_none() {
                return self
                    .tokens
                    .set(&token, account.student_id.clone())
                    .await
                    .map_err(AccountError::Store);
            }
        }
    }

    /// Resolves the account which owns the given token.
    ///
    /// Returns **None** for unknown or stale tokens as well as for accounts which are neither
    /// **Normal**, **Expired** nor **Banned**.
    ///
    /// # Errors
    /// Expired and banned accounts are reported as [AccountError::Expired] and
    /// [AccountError::Banned], so that the client can be asked to log in again.
    pub async fn auth_with_token(&self, token: &str) -> Result<Option<Account>, AccountError> {
        let student_id = match self.tokens.get(token).await.map_err(AccountError::Store)? {
            Some(student_id) => student_id,
            None => return Ok(None),
        };

        let account = match self
            .accounts
            .get(&student_id)
            .await
            .map_err(AccountError::Store)?
        {
            Some(account) if account.token() == Some(token) => account,
            _ => return Ok(None),
        };

        match account.status {
            AccountStatus::Normal => Ok(Some(account)),
            AccountStatus::Expired => Err(AccountError::Expired {
                username: account.student_id,
            }),
            AccountStatus::Banned => Err(AccountError::Banned {
                username: account.student_id,
            }),
            AccountStatus::Undefined | AccountStatus::Invalid => Ok(None),
        }
    }

    /// Marks the account of the given user as expired.
    ///
    /// Returns the updated account or **None** if no such account exists (in which case nothing
    /// is written).
    pub async fn expire_account(&self, username: &str) -> Result<Option<Account>, AccountError> {
        let mut account = match self.accounts.get(username).await.map_err(AccountError::Store)? {
            Some(account) => account,
            None => return Ok(None),
        };

        account.status = AccountStatus::Expired;
        self.accounts
            .set(username, account.clone())
            .await
            .map_err(AccountError::Store)?;

        log::debug!("The account {} has been marked as expired.", username);
        Ok(Some(account))
    }

    /// Marks the account of the given user as expired, as long as it still holds **session**.
    ///
    /// This is used once a session has been found dead. If the user logged in again in the
    /// meantime, the account carries another session and is left alone. Returns the updated
    /// account or **None** if nothing was written.
    pub async fn expire_session(
        &self,
        username: &str,
        session: Option<&str>,
    ) -> Result<Option<Account>, AccountError> {
        let mut account = match self.accounts.get(username).await.map_err(AccountError::Store)? {
            Some(account) => account,
            None => return Ok(None),
        };

        if account.session.as_deref() != session {
            log::debug!(
                "Not expiring {} as its session has been replaced in the meantime.",
                username
            );
            return Ok(None);
        }

        account.status = AccountStatus::Expired;
        self.accounts
            .set(username, account.clone())
            .await
            .map_err(AccountError::Store)?;

        log::debug!("The session of {} has been marked as expired.", username);
        Ok(Some(account))
    }

    /// Periodically revalidates all sessions until the platform is terminated.
    ///
    /// Every **interval** a revalidation pass is started in the background. The next pass is
    /// scheduled without waiting for the previous one to complete.
    pub async fn refresh_session(self: Arc<Self>, platform: Arc<Platform>, interval: Duration) {
        while platform.is_running() {
            log::info!("Revalidating all sessions...");

            let service = self.clone();
            crate::spawn!(async move {
                let watch = Instant::now();
                match service.refresh_task().await {
                    Ok(report) => log::info!(
                        "Revalidated {} sessions ({} expired, {} failed) in {}.",
                        report.checked,
                        report.expired,
                        report.failed,
                        format_duration(watch.elapsed())
                    ),
                    Err(error) => log::error!("Failed to revalidate the sessions: {:#}", error),
                }
            });

            tokio::select! {
                _ = tokio::time::sleep(interval) => (),
                _ = platform.terminated() => return,
            }
        }
    }

    /// Performs a single revalidation pass over all valid accounts.
    ///
    /// Pauses for the configured throttle between two accounts to keep the load on the upstream
    /// system low. Errors while reading or demoting a single account are logged and counted, the
    /// pass continues with the next one. Only a failure to list the accounts aborts the pass.
    pub async fn refresh_task(&self) -> anyhow::Result<RefreshReport> {
        let mut report = RefreshReport::default();

        for student_id in self.accounts.keys().await? {
            let account = match self.accounts.get(&student_id).await {
                Ok(Some(account)) if account.is_valid() => account,
                Ok(_) => continue,
                Err(error) => {
                    log::error!("Failed to read the account {}: {:#}", student_id, error);
                    report.failed += 1;
                    continue;
                }
            };

            report.checked += 1;
            if self
                .refresh_single_session(&account, self.settings.max_retry)
                .await
            {
                log::debug!("The session of {} is still alive.", student_id);
            } else {
                log::debug!("The session of {} is dead.", student_id);
                match self
                    .expire_session(&student_id, account.session.as_deref())
                    .await
                {
                    Ok(Some(_)) => report.expired += 1,
                    Ok(None) => (),
                    Err(error) => {
                        log::error!("Failed to expire the account {}: {}", student_id, error);
                        report.failed += 1;
                    }
                }
            }

            tokio::time::sleep(self.settings.throttle).await;
        }

        Ok(report)
    }

    /// Checks if the session of the given account is still alive.
    ///
    /// A failing check is retried up to **max_retry** times. An account without session, a
    /// rejected session or a check which failed for every attempt yields **false**.
    pub async fn refresh_single_session(&self, account: &Account, max_retry: usize) -> bool {
        let session = match account.session() {
            Some(session) => session,
            None => return false,
        };

        for attempt in 0..=max_retry {
            match self.validator.validate(&session).await {
                Ok(alive) => return alive,
                Err(error) => log::warn!(
                    "Failed to validate the session of {} (attempt {} of {}): {:#}",
                    account.student_id,
                    attempt + 1,
                    max_retry + 1,
                    error
                ),
            }
        }

        false
    }
}

/// Registers the given service in the platform and starts the periodic session revalidation.
pub fn install(platform: Arc<Platform>, service: Arc<AccountService>) {
    platform.register::<AccountService>(service.clone());

    let interval = service.settings().refresh_interval;
    log::info!(
        "Revalidating all sessions every {}.",
        format_duration(interval)
    );
    crate::spawn!(service.refresh_session(platform, interval));
}

#[cfg(test)]
mod tests {
    use crate::account::{install, AccountError, AccountService, AuthError, RefreshReport};
    use crate::config::SessionSettings;
    use crate::entity::{Account, AccountStatus};
    use crate::platform::Platform;
    use crate::store::{KeyValueStore, MemoryStore, Store};
    use crate::testing::{MockAuthenticator, MockSessionValidator, TestAccounts};
    use std::collections::HashSet;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use std::time::Duration;

    /// Fails all reads of one key and all writes of another one.
    struct BrokenStore {
        inner: Store<Account>,
        broken_get: &'static str,
        broken_set: &'static str,
    }

    #[async_trait::async_trait]
    impl KeyValueStore<Account> for BrokenStore {
        async fn get(&self, key: &str) -> anyhow::Result<Option<Account>> {
            if key == self.broken_get {
                return Err(anyhow::anyhow!("Backend hiccup"));
            }
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: Account) -> anyhow::Result<()> {
            if key == self.broken_set {
                return Err(anyhow::anyhow!("Backend hiccup"));
            }
            self.inner.set(key, value).await
        }

        async fn delete(&self, key: &str) -> anyhow::Result<()> {
            self.inner.delete(key).await
        }

        async fn keys(&self) -> anyhow::Result<Vec<String>> {
            self.inner.keys().await
        }

        async fn len(&self) -> anyhow::Result<usize> {
            self.inner.len().await
        }
    }

    #[test]
    fn tokens_are_unique_and_rotated() {
        crate::testing::test_async(async {
            let accounts = TestAccounts::new();

            let mut tokens = HashSet::new();
            for index in 0..50 {
                let account = accounts
                    .service
                    .login(&format!("2021{:04}", index), "secret")
                    .await
                    .unwrap();
                assert_eq!(tokens.insert(account.token().unwrap().to_owned()), true);
            }
            assert_eq!(accounts.tokens.len().await.unwrap(), 50);

            // A re-login of an expired account rotates its token and drops the old one...
            let old = accounts.service.find("20210007").await.unwrap().unwrap();
            let _ = accounts.service.expire_account("20210007").await.unwrap();
            let new = accounts.service.login("20210007", "secret").await.unwrap();

            assert_ne!(old.token(), new.token());
            assert_eq!(new.status, AccountStatus::Normal);
            assert_eq!(
                accounts.tokens.get(old.token().unwrap()).await.unwrap(),
                None
            );
            assert_eq!(accounts.tokens.len().await.unwrap(), 50);
        });
    }

    #[test]
    fn valid_accounts_log_in_locally() {
        crate::testing::test_async(async {
            let accounts = TestAccounts::new();
            let first = accounts.service.login("202105", "secret").await.unwrap();
            assert_eq!(accounts.authenticator.calls.load(Ordering::SeqCst), 1);

            let second = accounts.service.login("202105", "secret").await.unwrap();
            assert_eq!(accounts.authenticator.calls.load(Ordering::SeqCst), 1);
            assert_eq!(first.token(), second.token());

            assert_eq!(
                matches!(
                    accounts.service.login("202105", "wrong").await,
                    Err(AccountError::InvalidCredentials)
                ),
                true
            );
        });
    }

    #[test]
    fn captcha_failures_are_retried() {
        crate::testing::test_async(async {
            let accounts = TestAccounts::new();
            accounts.authenticator.fail_with(AuthError::InvalidCaptcha);
            accounts.authenticator.fail_with(AuthError::Timeout);

            let account = accounts.service.login("202105", "secret").await.unwrap();
            assert_eq!(account.is_valid(), true);
            assert_eq!(accounts.authenticator.calls.load(Ordering::SeqCst), 3);

            // Exhausting all attempts reports a busy upstream system...
            for _ in 0..3 {
                accounts.authenticator.fail_with(AuthError::InvalidCaptcha);
            }
            assert_eq!(
                matches!(
                    accounts.service.login("202106", "secret").await,
                    Err(AccountError::Busy)
                ),
                true
            );

            // ...whereas invalid credentials are never retried.
            let calls = accounts.authenticator.calls.load(Ordering::SeqCst);
            assert_eq!(
                matches!(
                    accounts.service.login("202106", "wrong").await,
                    Err(AccountError::InvalidCredentials)
                ),
                true
            );
            assert_eq!(accounts.authenticator.calls.load(Ordering::SeqCst), calls + 1);
            assert_eq!(accounts.service.find("202106").await.unwrap(), None);
        });
    }

    #[test]
    fn expired_tokens_report_the_username() {
        crate::testing::test_async(async {
            let accounts = TestAccounts::new();
            let account = accounts.service.login("202105", "secret").await.unwrap();
            let token = account.token().unwrap().to_owned();

            assert_eq!(
                accounts.service.auth_with_token(&token).await.unwrap(),
                Some(account)
            );

            let _ = accounts.service.expire_account("202105").await.unwrap();
            match accounts.service.auth_with_token(&token).await {
                Err(AccountError::Expired { username }) => assert_eq!(username, "202105"),
                other => panic!("Expected an expired account but got {:?}", other),
            }
        });
    }

    #[test]
    fn banned_and_unknown_tokens() {
        crate::testing::test_async(async {
            let accounts = TestAccounts::new();
            let mut account = accounts.service.login("202105", "secret").await.unwrap();
            let token = account.token().unwrap().to_owned();

            account.status = AccountStatus::Banned;
            accounts.accounts.set("202105", account.clone()).await.unwrap();
            match accounts.service.auth_with_token(&token).await {
                Err(AccountError::Banned { username }) => assert_eq!(username, "202105"),
                other => panic!("Expected a banned account but got {:?}", other),
            }

            account.status = AccountStatus::Invalid;
            accounts.accounts.set("202105", account.clone()).await.unwrap();
            assert_eq!(accounts.service.auth_with_token(&token).await.unwrap(), None);

            assert_eq!(
                accounts.service.auth_with_token("unknown").await.unwrap(),
                None
            );

            // An index entry which points to an account with another token is stale...
            accounts
                .tokens
                .set("stale", "202105".to_owned())
                .await
                .unwrap();
            assert_eq!(accounts.service.auth_with_token("stale").await.unwrap(), None);
        });
    }

    #[test]
    fn expiring_unknown_accounts_changes_nothing() {
        crate::testing::test_async(async {
            let accounts = TestAccounts::new();
            let _ = accounts.service.login("202105", "secret").await.unwrap();
            let before = accounts.accounts.get("202105").await.unwrap();

            assert_eq!(
                accounts.service.expire_account("202199").await.unwrap(),
                None
            );
            assert_eq!(accounts.accounts.len().await.unwrap(), 1);
            assert_eq!(accounts.accounts.get("202105").await.unwrap(), before);
        });
    }

    #[test]
    fn refresh_task_demotes_dead_sessions() {
        crate::testing::test_async(async {
            let accounts = TestAccounts::new();
            let alive = accounts.service.login("202101", "secret").await.unwrap();
            let dead = accounts.service.login("202102", "secret").await.unwrap();
            let flaky = accounts.service.login("202103", "secret").await.unwrap();
            let _ = accounts.service.login("202104", "secret").await.unwrap();
            let _ = accounts.service.expire_account("202104").await.unwrap();

            accounts.validator.kill(dead.session.as_deref().unwrap());

            // Validation errors are retried...
            accounts.validator.fail_times(2);
            assert_eq!(
                accounts.service.refresh_single_session(&flaky, 3).await,
                true
            );

            // ...but not forever.
            accounts.validator.fail_times(10);
            assert_eq!(
                accounts.service.refresh_single_session(&alive, 3).await,
                false
            );
            accounts.validator.fail_times(0);

            let report = accounts.service.refresh_task().await.unwrap();
            assert_eq!(report.checked, 3);
            assert_eq!(report.expired, 1);

            let status = |id: &'static str| {
                let service = accounts.service.clone();
                async move { service.find(id).await.unwrap().unwrap().status }
            };
            assert_eq!(status("202101").await, AccountStatus::Normal);
            assert_eq!(status("202102").await, AccountStatus::Expired);
            assert_eq!(status("202103").await, AccountStatus::Normal);
            assert_eq!(status("202104").await, AccountStatus::Expired);
        });
    }

    #[test]
    fn replaced_sessions_are_not_expired() {
        crate::testing::test_async(async {
            let accounts = TestAccounts::new();
            let first = accounts.service.login("202105", "secret").await.unwrap();
            let _ = accounts.service.expire_account("202105").await.unwrap();
            let second = accounts.service.login("202105", "secret").await.unwrap();
            assert_ne!(first.session, second.session);

            // The old session is gone, therefore nothing happens...
            assert_eq!(
                accounts
                    .service
                    .expire_session("202105", first.session.as_deref())
                    .await
                    .unwrap(),
                None
            );
            let account = accounts.service.find("202105").await.unwrap().unwrap();
            assert_eq!(account.status, AccountStatus::Normal);

            // ...whereas the current one can be expired.
            let expired = accounts
                .service
                .expire_session("202105", second.session.as_deref())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(expired.status, AccountStatus::Expired);
            assert_eq!(
                accounts
                    .service
                    .expire_session("202199", Some("SESSION-202199-1"))
                    .await
                    .unwrap(),
                None
            );
        });
    }

    #[test]
    fn store_errors_do_not_abort_the_revalidation() {
        crate::testing::test_async(async {
            let inner: Store<Account> = MemoryStore::shared();
            let validator = Arc::new(MockSessionValidator::new());
            for student_id in ["202101", "202102", "202103", "202104"] {
                let session = format!("SESSION-{}", student_id);
                validator.kill(&session);
                inner
                    .set(
                        student_id,
                        Account::new(student_id, "secret")
                            .with_session(session, AccountStatus::Normal),
                    )
                    .await
                    .unwrap();
            }

            let service = AccountService::new(
                Arc::new(BrokenStore {
                    inner: inner.clone(),
                    broken_get: "202102",
                    broken_set: "202101",
                }),
                MemoryStore::shared(),
                Arc::new(MockAuthenticator::new()),
                validator,
                SessionSettings {
                    throttle: Duration::from_millis(1),
                    ..SessionSettings::default()
                },
            );

            assert_eq!(
                service.refresh_task().await.unwrap(),
                RefreshReport {
                    checked: 3,
                    expired: 2,
                    failed: 2,
                }
            );

            let status = |id: &'static str| {
                let inner = inner.clone();
                async move { inner.get(id).await.unwrap().unwrap().status }
            };
            assert_eq!(status("202101").await, AccountStatus::Normal);
            assert_eq!(status("202102").await, AccountStatus::Normal);
            assert_eq!(status("202103").await, AccountStatus::Expired);
            assert_eq!(status("202104").await, AccountStatus::Expired);
        });
    }

    #[test]
    fn install_revalidates_until_terminated() {
        crate::testing::test_async(async {
            let accounts = TestAccounts::new();
            let dead = accounts.service.login("202101", "secret").await.unwrap();
            accounts.validator.kill(dead.session.as_deref().unwrap());

            let platform = Platform::new();
            install(platform.clone(), accounts.service.clone());
            assert_eq!(platform.find::<crate::account::AccountService>().is_some(), true);

            tokio::time::sleep(Duration::from_millis(100)).await;
            let account = accounts.service.find("202101").await.unwrap().unwrap();
            assert_eq!(account.status, AccountStatus::Expired);

            platform.terminate();
            tokio::time::sleep(Duration::from_millis(10)).await;
        });
    }
}
