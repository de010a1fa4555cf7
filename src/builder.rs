//! Provides a builder which can be used to setup and initialize the framework.
//!
//! The builder selectively enables the ambient parts (logging, signal handling and the config)
//! and installs the [AccountService](crate::account::AccountService) along with its session
//! revalidation loop.
//!
//! # Example
//! Setting up the framework with all features enabled:
//! ```no_run
//! # use std::sync::Arc;
//! # use ems_plat::account::{AuthError, Authenticator, AccountService};
//! # use ems_plat::builder::Builder;
//! # use ems_plat::entity::Session;
//! # use ems_plat::task::SessionValidator;
//! struct Upstream;
//!
//! #[async_trait::async_trait]
//! impl Authenticator for Upstream {
//!     async fn authenticate(&self, username: &str, _password: &str) -> Result<Session, AuthError> {
//!         Ok(Session::new(format!("SESSION-{}", username))?)
//!     }
//! }
//!
//! #[async_trait::async_trait]
//! impl SessionValidator for Upstream {
//!     async fn validate(&self, _session: &Session) -> anyhow::Result<bool> {
//!         Ok(true)
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let upstream = Arc::new(Upstream);
//!     let platform = Builder::new()
//!         .enable_all()
//!         .enable_accounts(upstream.clone(), upstream)
//!         .build()
//!         .await;
//!
//!     // Set up the info services here...
//!     let accounts = platform.require::<AccountService>();
//!
//!     // Wait until CTRL-C or SIGTERM is received...
//!     platform.terminated().await;
//! }
//! ```
use std::sync::Arc;

use crate::account::{AccountService, Authenticator};
use crate::config::{Config, SessionSettings};
use crate::entity::Account;
use crate::platform::Platform;
use crate::store::{MemoryStore, Store};
use crate::task::SessionValidator;
use crate::{init_logging, EMS_PLAT_REVISION, EMS_PLAT_VERSION};

/// Describes how the account service is set up.
struct AccountSetup {
    authenticator: Arc<dyn Authenticator>,
    validator: Arc<dyn SessionValidator>,
    accounts: Option<Store<Account>>,
    tokens: Option<Store<String>>,
}

/// Initializes the framework by creating and initializing all core components.
#[derive(Default)]
pub struct Builder {
    setup_logging: bool,
    enable_signals: bool,
    setup_config: bool,
    accounts: Option<AccountSetup>,
}

impl Builder {
    /// Creates a new builder.
    pub fn new() -> Self {
        Builder::default()
    }

    /// Enables logging, signal handling and the config.
    ///
    /// Note that the account service still has to be enabled explicitly, as it requires the
    /// upstream capabilities.
    pub fn enable_all(mut self) -> Self {
        self.setup_logging = true;
        self.enable_signals = true;
        self.setup_config = true;

        self
    }

    /// Enables the automatic setup of the logging system.
    ///
    /// Using this, we properly initialize **simplelog** to log to stdout.
    pub fn enable_logging(mut self) -> Self {
        self.setup_logging = true;
        self
    }

    /// Disables the automatic setup of the logging system after [enable_all()](Builder::enable_all)
    /// has been used.
    pub fn disable_logging(mut self) -> Self {
        self.setup_logging = false;
        self
    }

    /// Installs a signal listener which terminates the platform once **CTRL-C**, **SIGHUP** or
    /// **SIGTERM** is received.
    ///
    /// For more details see: [signals](crate::signals)
    pub fn enable_signals(mut self) -> Self {
        self.enable_signals = true;
        self
    }

    /// Disables installing the signal listener after [enable_all()](Builder::enable_all)
    /// has been used.
    pub fn disable_signals(mut self) -> Self {
        self.enable_signals = false;
        self
    }

    /// Installs [Config](crate::config::Config) and loads the **settings.yml**.
    ///
    /// For more details see: [config](crate::config)
    pub fn enable_config(mut self) -> Self {
        self.setup_config = true;
        self
    }

    /// Disables setting up a **Config** instance after [enable_all()](Builder::enable_all)
    /// has been used.
    pub fn disable_config(mut self) -> Self {
        self.setup_config = false;
        self
    }

    /// Installs an [AccountService] using the given upstream capabilities.
    ///
    /// Unless [with_account_stores](Builder::with_account_stores) is used, the accounts and the
    /// token index are kept in memory.
    pub fn enable_accounts(
        mut self,
        authenticator: Arc<dyn Authenticator>,
        validator: Arc<dyn SessionValidator>,
    ) -> Self {
        self.accounts = Some(AccountSetup {
            authenticator,
            validator,
            accounts: None,
            tokens: None,
        });
        self
    }

    /// Specifies the stores used by the [AccountService].
    ///
    /// This has no effect unless [enable_accounts](Builder::enable_accounts) was called before.
    pub fn with_account_stores(mut self, accounts: Store<Account>, tokens: Store<String>) -> Self {
        if let Some(setup) = self.accounts.as_mut() {
            setup.accounts = Some(accounts);
            setup.tokens = Some(tokens);
        }
        self
    }

    /// Builds the [Platform](crate::platform::Platform) registry with all the enabled components
    /// being registered.
    pub async fn build(self) -> Arc<Platform> {
        let platform = Platform::new();

        if self.setup_logging {
            init_logging();
        }

        log::info!(
            "||. EMS-PLAT (v {} - rev {}) running on {} core(s) in {} CPU(s)",
            EMS_PLAT_VERSION,
            EMS_PLAT_REVISION,
            num_cpus::get(),
            num_cpus::get_physical()
        );

        if self.enable_signals {
            crate::signals::install(platform.clone());
        }

        if self.setup_config {
            crate::config::install(platform.clone()).await;
        }

        if let Some(setup) = self.accounts {
            let settings = platform
                .find::<Config>()
                .map(|config| SessionSettings::from_config(&config.current()))
                .unwrap_or_default();

            let service = Arc::new(AccountService::new(
                setup.accounts.unwrap_or_else(MemoryStore::shared),
                setup.tokens.unwrap_or_else(MemoryStore::shared),
                setup.authenticator,
                setup.validator,
                settings,
            ));
            crate::account::install(platform.clone(), service);
        }

        platform
    }
}

#[cfg(test)]
mod tests {
    use crate::account::AccountService;
    use crate::builder::Builder;
    use crate::config::Config;
    use crate::testing::{MockAuthenticator, MockSessionValidator};
    use std::sync::Arc;

    #[test]
    fn accounts_are_installed_on_request() {
        crate::testing::test_async(async {
            let platform = Builder::new().build().await;
            assert_eq!(platform.find::<AccountService>().is_none(), true);
            assert_eq!(platform.find::<Config>().is_none(), true);

            let platform = Builder::new()
                .enable_accounts(
                    Arc::new(MockAuthenticator::new()),
                    Arc::new(MockSessionValidator::new()),
                )
                .build()
                .await;

            let accounts = platform.require::<AccountService>();
            let account = accounts.login("202105", "secret").await.unwrap();
            assert_eq!(account.is_valid(), true);

            platform.terminate();
        });
    }
}
