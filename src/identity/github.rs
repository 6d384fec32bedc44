//! GitHub user-info documents mapped onto identity claims.

use std::time::Duration;

use serde::Deserialize;

use super::TokenError;
use super::claims::{IdentityClaims, Profile};

/// Provider name used for GitHub links and claims.
pub const PROVIDER: &str = "github";

/// Audience of GitHub-derived identity tokens.
pub const AUDIENCE: &str = "app";

/// Subset of `GET https://api.github.com/user` the application consumes.
#[derive(Debug, Clone, Deserialize)]
pub struct GithubUserInfo {
    /// Numeric GitHub account id; the stable subject.
    pub id: u64,
    /// Login handle.
    #[serde(default)]
    pub login: Option<String>,
    /// Display name.
    #[serde(default)]
    pub name: Option<String>,
    /// Public email.
    #[serde(default)]
    pub email: Option<String>,
    /// Avatar URL.
    #[serde(default)]
    pub avatar_url: Option<String>,
}

impl GithubUserInfo {
    /// Parse the raw JSON body returned by GitHub.
    pub fn from_json(body: &[u8]) -> Result<Self, TokenError> {
        serde_json::from_slice(body)
            .map_err(|e| TokenError::Malformed(format!("github user info: {e}")))
    }

    /// Subject string: the decimal account id.
    #[must_use]
    pub fn subject(&self) -> String {
        self.id.to_string()
    }

    /// Profile snapshot. The display name falls back to the login handle.
    #[must_use]
    pub fn profile(&self) -> Profile {
        Profile {
            uid: None,
            name: self.name.clone().or_else(|| self.login.clone()),
            email: self.email.clone(),
            picture: self.avatar_url.clone(),
        }
    }

    /// Identity claims asserted by GitHub for this user.
    pub fn claims(&self, ttl: Duration) -> Result<IdentityClaims, TokenError> {
        IdentityClaims::builder(PROVIDER, self.subject())
            .audience([AUDIENCE])
            .ttl(ttl)
            .profile(self.profile())
            .build()
    }
}
