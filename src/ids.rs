//! Internal user identifiers.
//!
//! A [`UserId`] is a prefixed, time-ordered UUID (`usr_<32 hex chars>`).
//! Ids are generated once at account creation and never reused; the UUID v7
//! layout keeps them sortable by creation time.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

/// Type prefix carried by every user id.
pub const USER_ID_PREFIX: &str = "usr";

/// Errors produced while parsing a [`UserId`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UserIdError {
    /// The `usr_` prefix is missing or different.
    #[error("user id {0:?} does not start with 'usr_'")]
    Prefix(String),

    /// The suffix is not a valid UUID.
    #[error("user id {id:?} has an invalid suffix: {reason}")]
    Suffix {
        /// The rejected input.
        id: String,
        /// Parser message.
        reason: String,
    },
}

/// Globally unique internal user identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UserId(Uuid);

impl UserId {
    /// Generate a fresh, time-ordered id.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::now_v7())
    }

    /// Parse the textual `usr_<hex>` form.
    pub fn parse(input: &str) -> Result<Self, UserIdError> {
        let suffix = input
            .strip_prefix(USER_ID_PREFIX)
            .and_then(|rest| rest.strip_prefix('_'))
            .ok_or_else(|| UserIdError::Prefix(input.to_string()))?;

        // Only the compact form is accepted so that one id has one spelling.
        if suffix.len() != 32 {
            return Err(UserIdError::Suffix {
                id: input.to_string(),
                reason: format!("expected 32 hex characters, got {}", suffix.len()),
            });
        }

        Uuid::try_parse(suffix)
            .map(Self)
            .map_err(|e| UserIdError::Suffix {
                id: input.to_string(),
                reason: e.to_string(),
            })
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{USER_ID_PREFIX}_{}", self.0.simple())
    }
}

impl FromStr for UserId {
    type Err = UserIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for UserId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for UserId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}
