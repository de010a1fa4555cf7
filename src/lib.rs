//! EMS-PLAT is a refresh-ahead cache with session lifecycle management for slow upstream systems.
//!
//! # Introduction
//! Academic records (courses, scores, exams, rankings, classroom status or calendars) are scraped
//! from an educational management system which is slow, rate limited and guarded by a captcha
//! protected login. Clients on the other hand read these records frequently and expect an
//! immediate answer.
//!
//! Therefore, all reads are answered from a local store, even if the record is stale. A stale
//! record triggers a single background refresh which fetches the data using the upstream session
//! of a student and writes it back into the store. The next read will then see the fresh data.
//!
//! # Features
//! * **Stale while revalidate**: An [InfoService](info::InfoService) never waits for the upstream
//!   system. At most one refresh per record is triggered within the configurable submit window
//!   (see [TaskValidator](validator::TaskValidator)).
//! * **Session management**: The [AccountService](account::AccountService) handles logins,
//!   issues local tokens and periodically revalidates the upstream sessions of all accounts.
//! * **Bounded bulk refreshes**: A [BoundedTaskPool](pool::BoundedTaskPool) warms up the caches
//!   of many accounts without overloading the upstream system.
//! * **Pluggable storage**: All records live in a [KeyValueStore](store::KeyValueStore), which is
//!   either kept in memory, bounded by an LRU strategy or kept in Redis.
//! * **Reload-aware config facility** which permits to update the cache windows during operation.
//!
//! # Modules
//! * [entity]: the records kept in the stores.
//! * [store]: the storage backends.
//! * [validator]: the freshness policies.
//! * [cache]: the two-tier read path.
//! * [task]: the background refresh tasks.
//! * [info]: the record services as used by an HTTP layer.
//! * [account]: logins, tokens and session revalidation.
//! * [pool]: the bounded worker pool.
//!
//! A short example on how to initialize the library can be found here [Builder](builder::Builder).
#![warn(missing_docs, unused_results)]
#![deny(
    trivial_casts,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_import_braces
)]
use simplelog::{format_description, ConfigBuilder, LevelFilter, SimpleLogger};
use std::sync::Once;

pub mod account;
pub mod builder;
pub mod cache;
pub mod config;
pub mod entity;
pub mod fmt;
pub mod info;
pub mod platform;
pub mod pool;
pub mod signals;
pub mod store;
pub mod task;
pub mod validator;

/// Contains the version of the EMS-PLAT library.
pub const EMS_PLAT_VERSION: &str = "DEVELOPMENT-SNAPSHOT";

/// Contains the git commit hash of the EMS-PLAT build being used.
pub const EMS_PLAT_REVISION: &str = "NO-REVISION";

/// Initializes the logging system.
///
/// Note that most probably the simplest way is to use a [Builder](builder::Builder) to set up the
/// framework, which will also set up logging if enabled.
pub fn init_logging() {
    static INIT_LOGGING: Once = Once::new();

    // We need to do this as otherwise the integration tests might crash as the logging system
    // is initialized several times...
    INIT_LOGGING.call_once(|| {
        if let Err(error) = SimpleLogger::init(
            LevelFilter::Debug,
            ConfigBuilder::new()
                .set_time_format_custom(format_description!(
                    "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3]"
                ))
                .set_thread_level(LevelFilter::Trace)
                .set_target_level(LevelFilter::Error)
                .set_location_level(LevelFilter::Trace)
                .build(),
        ) {
            panic!("Failed to initialize logging system: {}", error);
        }
    });
}

/// Provides a simple macro to execute an async lambda within `tokio::spawn`.
///
/// Note that this also applies std::mem::drop on the returned closure to make
/// clippy happy.
///
/// # Example
/// ```rust
/// # #[macro_use] extern crate ems_plat;
/// # #[tokio::main]
/// # async fn main() {
/// spawn!(async move {
///     // perform some async stuff here...
/// });
/// # }
/// ```
#[macro_export]
macro_rules! spawn {
    ($e:expr) => {{
        std::mem::drop(tokio::spawn($e));
    }};
}
