//! Identity token claims.
//!
//! [`IdentityClaims`] is a closed structure: the registered claims (`iss`,
//! `sub`, `aud`, `iat`, `nbf`, `exp`, `jti`) plus a flattened [`Profile`].
//! Values can only be produced through [`ClaimsBuilder`] (or by decoding a
//! verified token), so a claims value in hand always satisfies
//! `exp > nbf` and `exp > iat` with non-empty issuer and subject.
//!
//! Optional profile fields are read through accessors that return
//! [`TokenError::MissingClaim`] instead of a default.

use std::time::Duration;

use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use super::TokenError;
use crate::ids::UserId;

/// Default lifetime of an identity token.
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Profile snapshot embedded in tokens and stored with accounts.
///
/// Every field is optional; absent fields are omitted from JSON.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    /// Internal user id, once the identity is linked to an account.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<UserId>,
    /// Display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Email address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Avatar URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
}

impl Profile {
    /// Profile with only a display name.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    /// Overlay the fields that are present in `update`.
    pub fn merge(&mut self, update: Profile) {
        if update.uid.is_some() {
            self.uid = update.uid;
        }
        if update.name.is_some() {
            self.name = update.name;
        }
        if update.email.is_some() {
            self.email = update.email;
        }
        if update.picture.is_some() {
            self.picture = update.picture;
        }
    }

    /// `true` when no field is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.uid.is_none() && self.name.is_none() && self.email.is_none() && self.picture.is_none()
    }
}

/// Claims carried by an identity token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityClaims {
    iss: String,
    sub: String,
    #[serde(default, deserialize_with = "one_or_many")]
    aud: Vec<String>,
    #[serde(with = "chrono::serde::ts_seconds")]
    iat: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_seconds")]
    nbf: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_seconds")]
    exp: DateTime<Utc>,
    #[serde(default)]
    jti: String,
    #[serde(flatten)]
    profile: Profile,
}

impl IdentityClaims {
    /// Start building claims for `subject` as asserted by `issuer`.
    pub fn builder(issuer: impl Into<String>, subject: impl Into<String>) -> ClaimsBuilder {
        ClaimsBuilder::new(issuer, subject)
    }

    /// Trust domain or provider that asserted the identity.
    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.iss
    }

    /// Opaque identifier of the identity within the issuer.
    #[must_use]
    pub fn subject(&self) -> &str {
        &self.sub
    }

    /// Intended recipients.
    #[must_use]
    pub fn audience(&self) -> &[String] {
        &self.aud
    }

    /// Issued-at time.
    #[must_use]
    pub fn issued_at(&self) -> DateTime<Utc> {
        self.iat
    }

    /// Not-before time.
    #[must_use]
    pub fn not_before(&self) -> DateTime<Utc> {
        self.nbf
    }

    /// Expiry time.
    #[must_use]
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.exp
    }

    /// Unique token identifier.
    #[must_use]
    pub fn token_id(&self) -> &str {
        &self.jti
    }

    /// Embedded profile snapshot.
    #[must_use]
    pub fn profile(&self) -> &Profile {
        &self.profile
    }

    /// Internal user id (`uid` claim).
    pub fn user_id(&self) -> Result<UserId, TokenError> {
        self.profile.uid.ok_or(TokenError::MissingClaim("uid"))
    }

    /// Display name (`name` claim).
    pub fn name(&self) -> Result<&str, TokenError> {
        self.profile
            .name
            .as_deref()
            .ok_or(TokenError::MissingClaim("name"))
    }

    /// Email (`email` claim).
    pub fn email(&self) -> Result<&str, TokenError> {
        self.profile
            .email
            .as_deref()
            .ok_or(TokenError::MissingClaim("email"))
    }

    /// Avatar URL (`picture` claim).
    pub fn picture(&self) -> Result<&str, TokenError> {
        self.profile
            .picture
            .as_deref()
            .ok_or(TokenError::MissingClaim("picture"))
    }

    /// Re-check the construction invariants.
    ///
    /// Decoded tokens pass through here as well, so a correctly signed token
    /// whose payload violates them is still rejected.
    pub(crate) fn check(&self) -> Result<(), TokenError> {
        if self.iss.trim().is_empty() {
            return Err(TokenError::InvalidClaims("issuer must not be empty".into()));
        }
        if self.sub.trim().is_empty() {
            return Err(TokenError::InvalidClaims("subject must not be empty".into()));
        }
        if self.exp <= self.nbf {
            return Err(TokenError::InvalidClaims(
                "expires-at must be after not-before".into(),
            ));
        }
        if self.exp <= self.iat {
            return Err(TokenError::InvalidClaims(
                "expires-at must be after issued-at".into(),
            ));
        }
        Ok(())
    }
}

/// Builder for [`IdentityClaims`].
///
/// Defaults: issued-at = now, not-before = issued-at, lifetime =
/// [`DEFAULT_TOKEN_TTL`], random UUID token id. All times are truncated to
/// whole seconds, which is the precision the token carries.
#[derive(Debug, Clone)]
pub struct ClaimsBuilder {
    issuer: String,
    subject: String,
    audience: Vec<String>,
    issued_at: Option<DateTime<Utc>>,
    not_before: Option<DateTime<Utc>>,
    expires_at: Option<DateTime<Utc>>,
    ttl: Duration,
    token_id: Option<String>,
    profile: Profile,
}

impl ClaimsBuilder {
    /// Start a builder.
    pub fn new(issuer: impl Into<String>, subject: impl Into<String>) -> Self {
        Self {
            issuer: issuer.into(),
            subject: subject.into(),
            audience: Vec::new(),
            issued_at: None,
            not_before: None,
            expires_at: None,
            ttl: DEFAULT_TOKEN_TTL,
            token_id: None,
            profile: Profile::default(),
        }
    }

    /// Set the audience list.
    #[must_use]
    pub fn audience<I, S>(mut self, audience: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.audience = audience.into_iter().map(Into::into).collect();
        self
    }

    /// Set the issued-at time.
    #[must_use]
    pub fn issued_at(mut self, at: DateTime<Utc>) -> Self {
        self.issued_at = Some(at);
        self
    }

    /// Set the not-before time.
    ///
    /// Either side of issued-at is accepted: a token may be back-dated to
    /// absorb clock skew (`nbf < iat`) or post-dated (`nbf > iat`). Only
    /// `exp > nbf` and `exp > iat` are enforced.
    #[must_use]
    pub fn not_before(mut self, at: DateTime<Utc>) -> Self {
        self.not_before = Some(at);
        self
    }

    /// Set an absolute expiry, overriding the lifetime.
    #[must_use]
    pub fn expires_at(mut self, at: DateTime<Utc>) -> Self {
        self.expires_at = Some(at);
        self
    }

    /// Set the lifetime counted from issued-at.
    #[must_use]
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Set the token id.
    #[must_use]
    pub fn token_id(mut self, jti: impl Into<String>) -> Self {
        self.token_id = Some(jti.into());
        self
    }

    /// Set the embedded profile.
    #[must_use]
    pub fn profile(mut self, profile: Profile) -> Self {
        self.profile = profile;
        self
    }

    /// Set the internal user id.
    #[must_use]
    pub fn user_id(mut self, uid: UserId) -> Self {
        self.profile.uid = Some(uid);
        self
    }

    /// Validate and produce the claims.
    pub fn build(self) -> Result<IdentityClaims, TokenError> {
        let iat = whole_seconds(self.issued_at.unwrap_or_else(Utc::now));
        let nbf = whole_seconds(self.not_before.unwrap_or(iat));
        let exp = match self.expires_at {
            Some(at) => whole_seconds(at),
            None => {
                let ttl = chrono::Duration::from_std(self.ttl)
                    .map_err(|e| TokenError::InvalidClaims(format!("lifetime out of range: {e}")))?;
                iat.checked_add_signed(ttl)
                    .ok_or_else(|| TokenError::InvalidClaims("lifetime out of range".into()))?
            }
        };

        let claims = IdentityClaims {
            iss: self.issuer,
            sub: self.subject,
            aud: self.audience,
            iat,
            nbf,
            exp,
            jti: self
                .token_id
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            profile: self.profile,
        };
        claims.check()?;
        Ok(claims)
    }
}

fn whole_seconds(at: DateTime<Utc>) -> DateTime<Utc> {
    at.with_nanosecond(0).unwrap_or(at)
}

/// `aud` may be a single string or a list.
fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Audience {
        One(String),
        Many(Vec<String>),
    }

    Ok(match Option::<Audience>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(Audience::One(aud)) => vec![aud],
        Some(Audience::Many(aud)) => aud,
    })
}
