//! Contains the system configuration.
//!
//! The configuration is loaded from **config/settings.yml**. The file is observed for changes
//! and re-loaded once a change is detected. Each user of the config should therefore attach itself
//! to the [Config::notifier](Config::notifier) and re-process the settings once a change message
//! is received (see [InfoService::watch_config](crate::info::InfoService::watch_config)).
//!
//! # Settings
//!
//! ```yaml
//! session:
//!     # Specifies how often all sessions are revalidated against the upstream system.
//!     refresh_interval: 2m
//!     # Specifies how often a failing validator call is retried before giving up.
//!     max_retry: 3
//!     # Specifies the pause between two accounts during a revalidation pass.
//!     throttle: 500ms
//!     # Specifies how often a login is attempted if the captcha was mis-recognized.
//!     login_retries: 3
//! caches:
//!     scores:
//!         # A record is considered stale once it wasn't updated for this period...
//!         update_expire: 1d
//!         # ...and once no refresh was submitted for this period.
//!         submit_expire: 15m
//! ```
//!
//! # Examples
//!
//! ```
//! # use ems_plat::config::{Config, CacheSettings, SessionSettings};
//! # use std::time::Duration;
//! let config = Config::new("somefile.yml");
//! config.load_from_string("
//! session:
//!     refresh_interval: 5m
//! caches:
//!     scores:
//!         update_expire: 2d
//! ", None).unwrap();
//!
//! let handle = config.current();
//! let session = SessionSettings::from_config(&handle);
//! assert_eq!(session.refresh_interval, Duration::from_secs(5 * 60));
//!
//! let scores = CacheSettings::from_config(&handle, "scores", CacheSettings::scores());
//! assert_eq!(scores.update_expire, Duration::from_secs(2 * 24 * 60 * 60));
//! assert_eq!(scores.submit_expire, Duration::from_secs(60));
//! ```
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use anyhow::Context;
use arc_swap::ArcSwap;
use yaml_rust::{Yaml, YamlLoader};

use crate::fmt::{format_duration, parse_duration};
use crate::platform::Platform;

/// Provides access to the system configuration.
///
/// Most probably a config instance is installed by the [Builder](crate::builder::Builder) and
/// can be obtained via `platform.require::<Config>()`.
pub struct Config {
    filename: String,
    tx: tokio::sync::broadcast::Sender<()>,
    config: ArcSwap<(Yaml, Option<SystemTime>)>,
}

/// Represents the change listener.
///
/// The message itself carries no data. Once it is received, the config has changed and needs to
/// be re-processed.
pub type ChangeNotifier = tokio::sync::broadcast::Receiver<()>;

/// Represents a handle to the currently loaded configuration.
///
/// Note that this handle should not be kept around, as it will not be updated if the underlying
/// config changes.
pub struct Handle {
    config: Arc<(Yaml, Option<SystemTime>)>,
}

impl Config {
    /// Creates a new config reading the given file.
    ///
    /// Note that this will not install a change listener. This is only done by
    /// [install](install).
    pub fn new(file: &str) -> Self {
        let (tx, _) = tokio::sync::broadcast::channel(1);
        Config {
            filename: file.to_owned(),
            config: ArcSwap::new(Arc::new((Yaml::Hash(Default::default()), None))),
            tx,
        }
    }

    /// Obtains a change notifier which receives a message once the config changed.
    pub fn notifier(&self) -> ChangeNotifier {
        self.tx.subscribe()
    }

    /// Obtains a handle to the currently loaded configuration.
    pub fn current(&self) -> Handle {
        Handle {
            config: self.config.load_full(),
        }
    }

    #[cfg(not(test))]
    async fn last_modified(&self) -> Option<SystemTime> {
        tokio::fs::metadata(&self.filename)
            .await
            .ok()
            .filter(|meta| meta.is_file())
            .and_then(|meta| meta.modified().ok())
    }

    /// Reads the underlying file.
    ///
    /// A missing file (or an unmounted docker volume, which shows up as directory) is skipped
    /// so that the defaults remain active.
    pub async fn load(&self) -> anyhow::Result<()> {
        log::info!("Loading config file {}...", &self.filename);

        match tokio::fs::metadata(&self.filename).await {
            Ok(metadata) if metadata.is_file() => (),
            _ => {
                log::info!("Config file doesn't exist - using the built-in defaults.");
                return Ok(());
            }
        }

        let config_data = tokio::fs::read_to_string(&self.filename)
            .await
            .with_context(|| format!("Cannot load config file {}", &self.filename))?;

        let last_modified = tokio::fs::metadata(&self.filename)
            .await
            .ok()
            .and_then(|metadata| metadata.modified().ok());

        self.load_from_string(config_data.as_str(), last_modified)
    }

    /// Loads a configuration from the given string instead of a file.
    ///
    /// A malformed document is rejected and leaves the current config untouched.
    ///
    /// # Example
    ///
    /// ```
    /// # use ems_plat::config::Config;
    /// let config = Config::new("somefile.yml");
    /// config.load_from_string("session:\n    max_retry: 5", None).unwrap();
    /// assert_eq!(config.current().query("session.max_retry").as_i64(), Some(5));
    ///
    /// assert_eq!(config.load_from_string("session: 'broken", None).is_err(), true);
    /// assert_eq!(config.current().query("session.max_retry").as_i64(), Some(5));
    /// ```
    pub fn load_from_string(
        &self,
        data: &str,
        last_modified: Option<SystemTime>,
    ) -> anyhow::Result<()> {
        let docs = YamlLoader::load_from_str(data)
            .with_context(|| format!("Cannot parse config file {}", &self.filename))?;

        let doc = match docs.into_iter().next() {
            Some(doc @ Yaml::Hash(_)) => doc,
            _ => Yaml::Hash(Default::default()),
        };

        self.config.store(Arc::new((doc, last_modified)));

        // Notify all listeners - we ignore if there are none...
        let _ = self.tx.send(());

        Ok(())
    }
}

impl Handle {
    /// Provides access to the root of the currently loaded configuration.
    pub fn root(&self) -> &Yaml {
        &self.config.0
    }

    /// Resolves a dot separated path like `caches.scores.update_expire`.
    ///
    /// Returns **Yaml::BadValue** if any part of the path is missing.
    pub fn query(&self, path: impl AsRef<str>) -> &Yaml {
        path.as_ref()
            .split('.')
            .fold(self.root(), |node, key| &node[key])
    }

    /// Reads a duration at the given path.
    ///
    /// Returns **None** if no value is present and an **Err** if the value cannot be parsed.
    pub fn duration(&self, path: impl AsRef<str>) -> Option<anyhow::Result<Duration>> {
        match self.query(path.as_ref()) {
            Yaml::BadValue | Yaml::Null => None,
            Yaml::String(value) => Some(parse_duration(value)),
            Yaml::Integer(value) if *value >= 0 => Some(Ok(Duration::from_millis(*value as u64))),
            other => Some(Err(anyhow::anyhow!(
                "Expected a duration for '{}' but found {:?}",
                path.as_ref(),
                other
            ))),
        }
    }
}

/// Reads a duration or falls back to the given default, logging a broken value.
fn duration_or(handle: &Handle, path: &str, default: Duration) -> Duration {
    match handle.duration(path) {
        None => default,
        Some(Ok(duration)) => duration,
        Some(Err(error)) => {
            log::error!(
                "Ignoring '{}' and using {} instead: {}",
                path,
                format_duration(default),
                error
            );
            default
        }
    }
}

/// Reads a non-negative integer or falls back to the given default.
fn count_or(handle: &Handle, path: &str, default: usize) -> usize {
    match handle.query(path) {
        Yaml::BadValue | Yaml::Null => default,
        Yaml::Integer(value) if *value >= 0 => *value as usize,
        other => {
            log::error!(
                "Ignoring '{}' ({:?}) and using {} instead.",
                path,
                other,
                default
            );
            default
        }
    }
}

/// The default period after which a submitted refresh is considered lost.
pub const DEFAULT_SUBMIT_EXPIRE: Duration = Duration::from_secs(60);

const DAY: Duration = Duration::from_secs(24 * 60 * 60);
const HOUR: Duration = Duration::from_secs(60 * 60);

/// Describes the freshness windows of one cached record type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CacheSettings {
    /// The period for which fetched data is considered fresh.
    pub update_expire: Duration,
    /// The cooldown during which a submitted refresh is assumed to be in flight.
    pub submit_expire: Duration,
}

impl CacheSettings {
    /// Creates settings with the given windows.
    pub fn new(update_expire: Duration, submit_expire: Duration) -> Self {
        CacheSettings {
            update_expire,
            submit_expire,
        }
    }

    /// Personal student info rarely changes.
    pub fn personal_info() -> Self {
        CacheSettings::new(DAY * 10, DEFAULT_SUBMIT_EXPIRE)
    }

    /// Major and minor transcripts.
    pub fn scores() -> Self {
        CacheSettings::new(DAY, DEFAULT_SUBMIT_EXPIRE)
    }

    /// Course schedules.
    pub fn courses() -> Self {
        CacheSettings::new(DAY, DEFAULT_SUBMIT_EXPIRE)
    }

    /// Exam schedules.
    pub fn exams() -> Self {
        CacheSettings::new(DAY * 2, DEFAULT_SUBMIT_EXPIRE)
    }

    /// Rankings.
    pub fn ranks() -> Self {
        CacheSettings::new(DAY, DEFAULT_SUBMIT_EXPIRE)
    }

    /// The teaching calendar.
    pub fn calendar() -> Self {
        CacheSettings::new(DAY, DEFAULT_SUBMIT_EXPIRE)
    }

    /// Classroom status for today or tomorrow.
    pub fn classrooms() -> Self {
        CacheSettings::new(HOUR, DEFAULT_SUBMIT_EXPIRE)
    }

    /// Reads `caches.<name>.update_expire` and `caches.<name>.submit_expire`.
    ///
    /// Missing or broken values are replaced by the given defaults, so that an accidental config
    /// change never disables a cache.
    pub fn from_config(handle: &Handle, name: &str, defaults: CacheSettings) -> Self {
        CacheSettings {
            update_expire: duration_or(
                handle,
                &format!("caches.{}.update_expire", name),
                defaults.update_expire,
            ),
            submit_expire: duration_or(
                handle,
                &format!("caches.{}.submit_expire", name),
                defaults.submit_expire,
            ),
        }
    }
}

/// Describes how sessions are revalidated and how logins are retried.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionSettings {
    /// The pause between two revalidation passes.
    pub refresh_interval: Duration,
    /// The number of retries for a failing session validator call.
    pub max_retry: usize,
    /// The pause between two accounts within a revalidation pass.
    pub throttle: Duration,
    /// The number of login attempts for transient (captcha / timeout) failures.
    pub login_retries: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        SessionSettings {
            refresh_interval: Duration::from_secs(2 * 60),
            max_retry: 3,
            throttle: Duration::from_millis(500),
            login_retries: 3,
        }
    }
}

impl SessionSettings {
    /// Reads the `session` section, using the defaults for all missing values.
    pub fn from_config(handle: &Handle) -> Self {
        let defaults = SessionSettings::default();
        SessionSettings {
            refresh_interval: duration_or(
                handle,
                "session.refresh_interval",
                defaults.refresh_interval,
            ),
            max_retry: count_or(handle, "session.max_retry", defaults.max_retry),
            throttle: duration_or(handle, "session.throttle", defaults.throttle),
            login_retries: count_or(handle, "session.login_retries", defaults.login_retries)
                .max(1),
        }
    }
}

/// Creates and installs a **Config** for the given platform.
///
/// This reads **config/settings.yml** and installs a change listener for this file. The listener
/// only watches the "last modified" date of the file, therefore each config user has to handle
/// partial changes gracefully.
pub async fn install(platform: Arc<Platform>) {
    let path = Path::new("config").to_path_buf();
    if let Err(error) = tokio::fs::create_dir_all(path.clone()).await {
        log::warn!(
            "Failed to create config base directory {}: {}",
            path.to_string_lossy(),
            error
        )
    }

    let config = Arc::new(Config::new("config/settings.yml"));
    platform.register::<Config>(config.clone());

    if let Err(error) = config.load().await {
        log::error!("{:#}", error);
    }

    run_config_change_monitor(platform, config);
}

#[cfg(test)]
fn run_config_change_monitor(_platform: Arc<Platform>, _config: Arc<Config>) {
    // No automatic updates during testing...
}

#[cfg(not(test))]
fn run_config_change_monitor(platform: Arc<Platform>, config: Arc<Config>) {
    crate::spawn!(async move {
        while platform.is_running() {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(2)) => (),
                _ = platform.terminated() => return,
            }

            let last_modified = config.last_modified().await;
            let last_loaded = config.config.load().1;

            if last_modified.is_some() && (last_loaded.is_none() || last_modified > last_loaded) {
                match config.load().await {
                    Ok(_) => log::info!("System configuration was re-loaded."),
                    Err(error) => log::error!("Failed to re-load system config: {:#}", error),
                }
            }
        }
    });
}
