//! Account store: internal accounts, provider links and profile snapshots.
//!
//! # Key layout
//!
//! ```text
//! <profiles>.<uid>.<app>            account record (JSON)
//! <profiles>.<uid>.<provider>       provider-scoped profile snapshot (JSON)
//! <links>.<provider>.<subject>      linked user id (plain text)
//! ```
//!
//! With the default configuration the namespaces are `user_info`, `auth_link`
//! and `app`, so GitHub user 583231 is linked through
//! `auth_link.github.583231`.
//!
//! Link creation relies on the backend's atomic create-if-absent: the first
//! writer wins and every later attempt observes [`AccountError::AlreadyLinked`].

pub mod kv;
pub mod lister;
pub mod login;
pub mod store;
pub mod subject;

pub use kv::{DEFAULT_MAX_LISTERS, InMemoryKeyValue, KeyLister, KeyValue, KvEntry, KvError};
pub use lister::Enumeration;
pub use login::{Login, LoginOutcome};
pub use store::{Account, AccountStore, Keyspace, LinkResolver};
pub use subject::{PatternError, SubjectPattern, match_subject};

use crate::ids::{UserId, UserIdError};

/// Account store failures.
#[derive(Debug, thiserror::Error)]
pub enum AccountError {
    /// The (provider, subject) pair is already linked.
    #[error("{provider} identity {subject} is already linked")]
    AlreadyLinked {
        /// Provider name.
        provider: String,
        /// Provider subject.
        subject: String,
    },

    /// No link exists for the (provider, subject) pair.
    #[error("{provider} identity {subject} is not linked")]
    NotLinked {
        /// Provider name.
        provider: String,
        /// Provider subject.
        subject: String,
    },

    /// No account (or provider snapshot) stored for the user id.
    #[error("account {0} not found")]
    NotFound(UserId),

    /// A provider name, subject or pattern cannot be used as a key segment.
    #[error("invalid key segment {0:?}")]
    InvalidSegment(String),

    /// A freshly generated user id already exists.
    #[error("user id {0} already exists")]
    IdCollision(UserId),

    /// A stored record could not be decoded.
    #[error("corrupt record at {key}: {reason}")]
    Corrupt {
        /// Key of the record.
        key: String,
        /// Decoder message.
        reason: String,
    },

    /// Enumeration pattern is invalid.
    #[error("invalid pattern: {0}")]
    Pattern(#[from] PatternError),

    /// Backend failure.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(#[source] KvError),
}

impl AccountError {
    pub(crate) fn corrupt_id(key: &str, err: &UserIdError) -> Self {
        Self::Corrupt {
            key: key.to_string(),
            reason: err.to_string(),
        }
    }

    /// `true` for [`AccountError::NotLinked`].
    #[must_use]
    pub fn is_not_linked(&self) -> bool {
        matches!(self, Self::NotLinked { .. })
    }
}

impl From<KvError> for AccountError {
    fn from(err: KvError) -> Self {
        match err {
            KvError::InvalidKey(key) => Self::InvalidSegment(key),
            other => Self::StorageUnavailable(other),
        }
    }
}
