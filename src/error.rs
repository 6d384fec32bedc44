//! Error types for amble-auth

use std::io;

use thiserror::Error;

use crate::accounts::{AccountError, KvError, PatternError};
use crate::callout::{CalloutError, JwtError};
use crate::identity::TokenError;

/// Result type alias for amble-auth
pub type Result<T> = std::result::Result<T, Error>;

/// amble-auth errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Secret material missing or unusable
    #[error("Secret error: {0}")]
    Secret(String),

    /// Identity token error
    #[error("Token error: {0}")]
    Token(#[from] TokenError),

    /// Account store error
    #[error("Account error: {0}")]
    Account(#[from] AccountError),

    /// Key/value backend error
    #[error("Storage error: {0}")]
    Storage(#[from] KvError),

    /// Invalid subject pattern
    #[error("Pattern error: {0}")]
    Pattern(#[from] PatternError),

    /// Callout exchange error
    #[error("Callout error: {0}")]
    Callout(#[from] CalloutError),

    /// Broker JWT error
    #[error("Broker JWT error: {0}")]
    Jwt(#[from] JwtError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl Error {
    /// Shorthand for a secret error.
    pub fn secret(message: impl Into<String>) -> Self {
        Self::Secret(message.into())
    }
}
