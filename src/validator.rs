//! Decides whether a stored record can still be served.
//!
//! A [RefreshAheadCache](crate::cache::RefreshAheadCache) consults its validator on every read.
//! An invalid record is still handed out, but a background refresh is scheduled for it.
//!
//! * [ExpireValidator] judges a record purely by its age.
//! * [TaskValidator] additionally suppresses a second refresh while one is assumed to be in
//!   flight (the "submit window").
//!
//! # Examples
//! ```
//! # use ems_plat::entity::TaskEntity;
//! # use ems_plat::validator::{TaskValidator, Validator};
//! # use std::time::Duration;
//! let validator = TaskValidator::new(Duration::from_secs(24 * 60 * 60), Duration::from_secs(60));
//!
//! // An unknown record needs to be fetched...
//! assert_eq!(validator.validate(None::<&TaskEntity<String>>), false);
//!
//! // ...but once a refresh is submitted, nothing happens during the submit window.
//! let mut record = TaskEntity::<String>::new();
//! record.mark_submitted();
//! assert_eq!(validator.validate(Some(&record)), true);
//! ```
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::config::CacheSettings;
use crate::entity::{TaskEntity, Timestamped};

/// Determines if a record is usable as is.
pub trait Validator<V>: Send + Sync {
    /// Returns **true** if the given record is still valid, **false** if it is absent or a
    /// refresh is required.
    fn validate(&self, record: Option<&V>) -> bool;
}

/// Computes how long ago the given timestamp was, where timestamps in the future count as "now".
fn elapsed(since: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (now - since).to_std().unwrap_or(Duration::ZERO)
}

/// Considers records valid as long as their last update is younger than **expire**.
#[derive(Clone, Copy, Debug)]
pub struct ExpireValidator {
    expire: Duration,
}

impl ExpireValidator {
    /// Creates a validator with the given max age.
    pub fn new(expire: Duration) -> Self {
        ExpireValidator { expire }
    }

    /// Returns the max age of a valid record.
    pub fn expire(&self) -> Duration {
        self.expire
    }

    /// Validates the given record as if the current time was **now**.
    pub fn validate_at<V: Timestamped>(&self, record: Option<&V>, now: DateTime<Utc>) -> bool {
        match record.and_then(Timestamped::update_time) {
            Some(update_time) => elapsed(update_time, now) < self.expire,
            None => false,
        }
    }
}

impl<V: Timestamped> Validator<V> for ExpireValidator {
    fn validate(&self, record: Option<&V>) -> bool {
        self.validate_at(record, Utc::now())
    }
}

/// Validates cached [TaskEntity] records using two windows.
///
/// A record becomes invalid once **both** windows have lapsed:
/// * the update window: how long fetched data is considered fresh,
/// * the submit window: how long a scheduled refresh is assumed to be still running.
///
/// An unset timestamp counts as lapsed. Therefore a freshly created (and never submitted) record
/// is invalid, whereas a record which was just submitted stays valid until its submit window
/// lapses, even if it carries no data yet.
#[derive(Clone, Copy, Debug)]
pub struct TaskValidator {
    update_expire: Duration,
    submit_expire: Duration,
}

impl TaskValidator {
    /// Creates a validator with the given update and submit windows.
    pub fn new(update_expire: Duration, submit_expire: Duration) -> Self {
        TaskValidator {
            update_expire,
            submit_expire,
        }
    }

    /// Creates a validator using the windows of the given settings.
    pub fn from_settings(settings: &CacheSettings) -> Self {
        TaskValidator::new(settings.update_expire, settings.submit_expire)
    }

    /// Returns the update window.
    pub fn update_expire(&self) -> Duration {
        self.update_expire
    }

    /// Returns the submit window.
    pub fn submit_expire(&self) -> Duration {
        self.submit_expire
    }

    /// Validates the given record as if the current time was **now**.
    ///
    /// # Example
    /// ```
    /// # use ems_plat::entity::TaskEntity;
    /// # use ems_plat::validator::TaskValidator;
    /// # use chrono::{Duration, Utc};
    /// let validator = TaskValidator::new(
    ///     std::time::Duration::from_secs(60 * 60),
    ///     std::time::Duration::from_secs(60),
    /// );
    ///
    /// let now = Utc::now();
    /// let mut record = TaskEntity::<String>::new();
    /// record.update_time = Some(now - Duration::minutes(30));
    /// assert_eq!(validator.validate_at(Some(&record), now), true);
    ///
    /// // Both windows lapsed...
    /// assert_eq!(validator.validate_at(Some(&record), now + Duration::hours(1)), false);
    /// ```
    pub fn validate_at<D>(&self, record: Option<&TaskEntity<D>>, now: DateTime<Utc>) -> bool {
        let record = match record {
            Some(record) => record,
            None => return false,
        };

        let lapsed = |timestamp: Option<DateTime<Utc>>, window: Duration| match timestamp {
            Some(timestamp) => elapsed(timestamp, now) > window,
            None => true,
        };

        let submit_lapsed = lapsed(record.submit_time, self.submit_expire);
        let update_lapsed = lapsed(record.update_time, self.update_expire);

        !(submit_lapsed && update_lapsed)
    }
}

impl<D> Validator<TaskEntity<D>> for TaskValidator
where
    D: Send + Sync,
{
    fn validate(&self, record: Option<&TaskEntity<D>>) -> bool {
        self.validate_at(record, Utc::now())
    }
}
