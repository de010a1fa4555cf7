//! Contains the records which are kept in the stores.
//!
//! * [Account] is the identity and auth state of a student, keyed by the student id.
//! * [TaskEntity] wraps a cached payload along with the timestamps which drive the
//!   [TaskValidator](crate::validator::TaskValidator).
//! * [Session] is the opaque upstream session handed to handlers and validators.
use std::fmt::{Display, Formatter};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Provides the last modification timestamp of a record.
///
/// This is what an [ExpireValidator](crate::validator::ExpireValidator) checks.
pub trait Timestamped {
    /// Returns when the record was last updated or **None** if it never was.
    fn update_time(&self) -> Option<DateTime<Utc>>;
}

/// Enumerates the states of an [Account].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountStatus {
    /// The account was never logged in successfully.
    Undefined,
    /// The upstream session is alive.
    Normal,
    /// The upstream session died, a re-login is required.
    Expired,
    /// The account must not be used anymore.
    Banned,
    /// The credentials are known to be invalid, a re-login is required.
    Invalid,
}

impl Default for AccountStatus {
    fn default() -> Self {
        AccountStatus::Undefined
    }
}

/// Represents a student account along with its upstream session and local token.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Account {
    /// The student id, which is the primary key of an account.
    pub student_id: String,
    /// The password used to log into the upstream system.
    pub password: String,
    /// The id of the current upstream session.
    pub session: Option<String>,
    token: Option<String>,
    /// The current state of the account.
    pub status: AccountStatus,
    /// The timestamp of the last successful upstream login.
    pub last_login_time: DateTime<Utc>,
}

impl Account {
    /// Creates a new account without session or token.
    pub fn new(student_id: impl Into<String>, password: impl Into<String>) -> Self {
        Account {
            student_id: student_id.into(),
            password: password.into(),
            session: None,
            token: None,
            status: AccountStatus::Undefined,
            last_login_time: Utc::now(),
        }
    }

    /// Attaches the given session and status.
    ///
    /// # Example
    /// ```
    /// # use ems_plat::entity::{Account, AccountStatus};
    /// let account = Account::new("202105", "secret").with_session("JSESSIONID", AccountStatus::Normal);
    /// assert_eq!(account.is_valid(), true);
    /// assert_eq!(account.session().unwrap().id(), "JSESSIONID");
    /// ```
    pub fn with_session(mut self, session: impl Into<String>, status: AccountStatus) -> Self {
        self.session = Some(session.into());
        self.status = status;
        self
    }

    /// Determines if the account can be used, which is only the case for **Normal** accounts.
    pub fn is_valid(&self) -> bool {
        self.status == AccountStatus::Normal
    }

    /// Returns the current token if one has been issued.
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// Returns the current token, generating one if none has been issued yet.
    pub fn ensure_token(&mut self) -> &str {
        self.token.get_or_insert_with(generate_token)
    }

    /// Replaces the current token by a freshly generated one.
    ///
    /// Note that only the [AccountService](crate::account::AccountService) rotates tokens, as
    /// it also has to maintain the token index.
    pub fn rotate_token(&mut self) -> &str {
        self.token.insert(generate_token())
    }

    /// Wraps the upstream session so that it can be passed to handlers and validators.
    ///
    /// Returns **None** if no (or an empty) session is present.
    pub fn session(&self) -> Option<Session> {
        self.session.as_deref().and_then(|id| Session::new(id).ok())
    }
}

impl Timestamped for Account {
    fn update_time(&self) -> Option<DateTime<Utc>> {
        Some(self.last_login_time)
    }
}

fn generate_token() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Wraps a cached payload along with the timestamps required to judge its freshness.
///
/// * **update_time** is bumped by every successful write-back of fresh data.
/// * **submit_time** is stamped whenever a refresh is scheduled and never moves backwards.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskEntity<D> {
    /// The payload, **None** until the first successful refresh.
    pub data: Option<D>,
    /// The creation timestamp of this record.
    pub create_time: DateTime<Utc>,
    /// The timestamp of the last successful write-back.
    pub update_time: Option<DateTime<Utc>>,
    /// The timestamp of the last scheduled refresh.
    pub submit_time: Option<DateTime<Utc>>,
}

impl<D> Default for TaskEntity<D> {
    fn default() -> Self {
        TaskEntity {
            data: None,
            create_time: Utc::now(),
            update_time: None,
            submit_time: None,
        }
    }
}

impl<D> TaskEntity<D> {
    /// Creates an empty record as used on the first miss.
    pub fn new() -> Self {
        TaskEntity::default()
    }

    /// Stores fresh data and bumps the update timestamp.
    pub fn update(&mut self, data: D) {
        self.data = Some(data);
        self.update_time = Some(Utc::now());
    }

    /// Marks that a refresh has been scheduled for this record.
    ///
    /// # Example
    /// ```
    /// # use ems_plat::entity::TaskEntity;
    /// let mut record = TaskEntity::<String>::new();
    /// assert_eq!(record.submit_time.is_none(), true);
    ///
    /// record.mark_submitted();
    /// let first = record.submit_time.unwrap();
    /// record.mark_submitted();
    /// assert_eq!(record.submit_time.unwrap() >= first, true);
    /// ```
    pub fn mark_submitted(&mut self) {
        self.mark_submitted_at(Utc::now());
    }

    /// Marks a refresh as scheduled at the given time, unless a later submission is known.
    pub fn mark_submitted_at(&mut self, now: DateTime<Utc>) {
        if self.submit_time.map_or(true, |submitted| submitted < now) {
            self.submit_time = Some(now);
        }
    }
}

impl<D> Timestamped for TaskEntity<D> {
    fn update_time(&self) -> Option<DateTime<Utc>> {
        self.update_time
    }
}

/// Represents an opaque, non-empty upstream session.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Session {
    session_id: String,
}

impl Session {
    /// Wraps the given session id.
    ///
    /// # Errors
    /// Fails if the given id is empty or blank.
    pub fn new(session_id: impl Into<String>) -> anyhow::Result<Self> {
        let session_id = session_id.into();
        if session_id.trim().is_empty() {
            Err(anyhow::anyhow!("A session id must not be empty."))
        } else {
            Ok(Session { session_id })
        }
    }

    /// Returns the upstream session id.
    pub fn id(&self) -> &str {
        &self.session_id
    }
}

impl Display for Session {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.session_id)
    }
}
