//! Account store operations over a [`KeyValue`] backend.

use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::kv::{KeyValue, KvError};
use super::lister::Enumeration;
use super::subject::SubjectPattern;
use super::AccountError;
use crate::identity::Profile;
use crate::ids::UserId;

/// Namespace segments that shape every store key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keyspace {
    profiles: String,
    links: String,
    app: String,
}

impl Keyspace {
    /// Build a keyspace; each name must be a single valid key segment and
    /// the two namespaces must differ.
    pub fn new(
        profiles: impl Into<String>,
        links: impl Into<String>,
        app: impl Into<String>,
    ) -> Result<Self, AccountError> {
        let keyspace = Self {
            profiles: profiles.into(),
            links: links.into(),
            app: app.into(),
        };
        check_segment(&keyspace.profiles)?;
        check_segment(&keyspace.links)?;
        check_segment(&keyspace.app)?;
        if keyspace.profiles == keyspace.links {
            return Err(AccountError::InvalidSegment(keyspace.links));
        }
        Ok(keyspace)
    }

    /// Namespace of account records and provider snapshots.
    #[must_use]
    pub fn profiles(&self) -> &str {
        &self.profiles
    }

    /// Namespace of identity links.
    #[must_use]
    pub fn links(&self) -> &str {
        &self.links
    }

    /// Trailing segment of account records.
    #[must_use]
    pub fn app(&self) -> &str {
        &self.app
    }

    /// `<profiles>.<uid>.<scope>`
    #[must_use]
    pub fn profile_key(&self, uid: &UserId, scope: &str) -> String {
        format!("{}.{uid}.{scope}", self.profiles)
    }

    /// `<links>.<provider>.<subject>`
    #[must_use]
    pub fn link_key(&self, provider: &str, subject: &str) -> String {
        format!("{}.{provider}.{subject}", self.links)
    }

    /// Pattern matching every account record.
    pub fn accounts_pattern(&self) -> Result<SubjectPattern, AccountError> {
        Ok(SubjectPattern::parse(&format!(
            "{}.*.{}",
            self.profiles, self.app
        ))?)
    }

    /// The user-id segment of an account-record key, if `key` is one.
    #[must_use]
    pub fn account_uid_segment<'a>(&self, key: &'a str) -> Option<&'a str> {
        let mut parts = key.split('.');
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(ns), Some(uid), Some(scope), None) if ns == self.profiles && scope == self.app => {
                Some(uid)
            }
            _ => None,
        }
    }
}

impl Default for Keyspace {
    fn default() -> Self {
        Self {
            profiles: "user_info".to_string(),
            links: "auth_link".to_string(),
            app: "app".to_string(),
        }
    }
}

/// An application account record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Internal user id.
    pub uid: UserId,
    /// Display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Email address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Avatar URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl Account {
    /// Profile snapshot with the user id filled in.
    #[must_use]
    pub fn profile(&self) -> Profile {
        Profile {
            uid: Some(self.uid),
            name: self.name.clone(),
            email: self.email.clone(),
            picture: self.picture.clone(),
        }
    }

    fn apply(&mut self, update: Profile) {
        let mut profile = self.profile();
        profile.merge(Profile { uid: None, ..update });
        self.name = profile.name;
        self.email = profile.email;
        self.picture = profile.picture;
    }
}

/// Resolves provider identities to internal users.
///
/// The authorization bridge depends on this seam rather than on the whole
/// store.
#[async_trait::async_trait]
pub trait LinkResolver: Send + Sync + 'static {
    /// User id linked to (`provider`, `subject`).
    async fn resolve_link(&self, provider: &str, subject: &str) -> Result<UserId, AccountError>;
}

/// Durable mapping between internal accounts and provider identities.
#[derive(Clone)]
pub struct AccountStore {
    kv: Arc<dyn KeyValue>,
    keys: Arc<Keyspace>,
}

impl AccountStore {
    /// Store over `kv` with the given keyspace.
    pub fn new(kv: Arc<dyn KeyValue>, keys: Keyspace) -> Self {
        Self {
            kv,
            keys: Arc::new(keys),
        }
    }

    /// Key layout in use.
    #[must_use]
    pub fn keyspace(&self) -> &Keyspace {
        &self.keys
    }

    /// Create a new account holding `profile`. Any `uid` in `profile` is ignored.
    pub async fn create_account(&self, profile: Profile) -> Result<UserId, AccountError> {
        let uid = UserId::generate();
        let account = Account {
            uid,
            name: profile.name,
            email: profile.email,
            picture: profile.picture,
            created_at: Utc::now(),
        };
        let key = self.keys.profile_key(&uid, &self.keys.app);

        match self.kv.create(&key, encode(&account)?).await {
            Ok(_) => {
                info!(uid = %uid, "Account created");
                Ok(uid)
            }
            Err(KvError::KeyExists(_)) => Err(AccountError::IdCollision(uid)),
            Err(e) => Err(e.into()),
        }
    }

    /// Link (`provider`, `subject`) to `uid`. Fails with
    /// [`AccountError::AlreadyLinked`] if the pair is linked already, leaving
    /// the existing link untouched.
    pub async fn link(&self, provider: &str, subject: &str, uid: &UserId) -> Result<(), AccountError> {
        check_segment(provider)?;
        check_segment(subject)?;
        let key = self.keys.link_key(provider, subject);

        match self.kv.create(&key, Bytes::from(uid.to_string())).await {
            Ok(_) => {
                info!(provider = %provider, subject = %subject, uid = %uid, "Identity linked");
                Ok(())
            }
            Err(KvError::KeyExists(_)) => {
                debug!(provider = %provider, subject = %subject, "Link already present");
                Err(AccountError::AlreadyLinked {
                    provider: provider.to_string(),
                    subject: subject.to_string(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// User id linked to (`provider`, `subject`).
    pub async fn resolve_link(&self, provider: &str, subject: &str) -> Result<UserId, AccountError> {
        check_segment(provider)?;
        check_segment(subject)?;
        let key = self.keys.link_key(provider, subject);

        let entry = self.kv.get(&key).await?.ok_or_else(|| AccountError::NotLinked {
            provider: provider.to_string(),
            subject: subject.to_string(),
        })?;

        let raw = std::str::from_utf8(&entry.value).map_err(|e| AccountError::Corrupt {
            key: key.clone(),
            reason: e.to_string(),
        })?;
        UserId::parse(raw.trim()).map_err(|e| AccountError::corrupt_id(&key, &e))
    }

    /// Account record for `uid`.
    pub async fn get_account(&self, uid: &UserId) -> Result<Account, AccountError> {
        let key = self.keys.profile_key(uid, &self.keys.app);
        let entry = self
            .kv
            .get(&key)
            .await?
            .ok_or(AccountError::NotFound(*uid))?;
        decode(&key, &entry.value)
    }

    /// Write a provider-scoped profile snapshot for `uid`.
    ///
    /// For a provider the snapshot is replaced wholesale. For the
    /// application scope (`app`) the present fields are merged into the
    /// account record. The account must exist in both cases; concurrent
    /// writers are last-write-wins.
    pub async fn update_profile(
        &self,
        provider: &str,
        uid: &UserId,
        update: Profile,
    ) -> Result<(), AccountError> {
        check_segment(provider)?;
        let mut account = self.get_account(uid).await?;

        if provider == self.keys.app {
            account.apply(update);
            let key = self.keys.profile_key(uid, &self.keys.app);
            self.kv.put(&key, encode(&account)?).await?;
        } else {
            let snapshot = Profile {
                uid: Some(*uid),
                ..update
            };
            let key = self.keys.profile_key(uid, provider);
            self.kv.put(&key, encode(&snapshot)?).await?;
        }

        debug!(provider = %provider, uid = %uid, "Profile updated");
        Ok(())
    }

    /// Provider-scoped snapshot last written by [`update_profile`](Self::update_profile).
    pub async fn provider_profile(&self, provider: &str, uid: &UserId) -> Result<Profile, AccountError> {
        check_segment(provider)?;
        if provider == self.keys.app {
            return self.get_account(uid).await.map(|a| a.profile());
        }
        let key = self.keys.profile_key(uid, provider);
        let entry = self
            .kv
            .get(&key)
            .await?
            .ok_or(AccountError::NotFound(*uid))?;
        decode(&key, &entry.value)
    }

    /// Lazily enumerate accounts whose record key matches `pattern`.
    pub async fn enumerate(&self, pattern: &str) -> Result<Enumeration, AccountError> {
        let pattern = SubjectPattern::parse(pattern)?;
        self.enumerate_matching(pattern).await
    }

    /// Lazily enumerate every account.
    pub async fn enumerate_all(&self) -> Result<Enumeration, AccountError> {
        let pattern = self.keys.accounts_pattern()?;
        self.enumerate_matching(pattern).await
    }

    async fn enumerate_matching(&self, pattern: SubjectPattern) -> Result<Enumeration, AccountError> {
        let keys = self.kv.list_keys().await?;
        debug!(pattern = %pattern, "Enumerating accounts");
        Ok(Enumeration::new(self.clone(), pattern, keys))
    }
}

#[async_trait::async_trait]
impl LinkResolver for AccountStore {
    async fn resolve_link(&self, provider: &str, subject: &str) -> Result<UserId, AccountError> {
        AccountStore::resolve_link(self, provider, subject).await
    }
}

/// A provider name or subject must be one non-empty key segment.
fn check_segment(segment: &str) -> Result<(), AccountError> {
    let valid = !segment.is_empty()
        && !segment
            .chars()
            .any(|c| c == '.' || c == '*' || c == '>' || c.is_whitespace() || c.is_control());
    if valid {
        Ok(())
    } else {
        Err(AccountError::InvalidSegment(segment.to_string()))
    }
}

fn encode<T: Serialize>(value: &T) -> Result<Bytes, AccountError> {
    serde_json::to_vec(value)
        .map(Bytes::from)
        .map_err(|e| AccountError::Corrupt {
            key: String::new(),
            reason: e.to_string(),
        })
}

fn decode<T: for<'de> Deserialize<'de>>(key: &str, raw: &[u8]) -> Result<T, AccountError> {
    serde_json::from_slice(raw).map_err(|e| AccountError::Corrupt {
        key: key.to_string(),
        reason: e.to_string(),
    })
}
