//! Lazy account enumeration with a deferred error list.
//!
//! [`Enumeration`] walks the backend's key lister, keeps the account-record
//! keys that match the pattern and loads each record on demand. A record
//! that cannot be read does not end the walk: the failure is appended to
//! [`Enumeration::errors`] and the next key is tried. Stopping early (or
//! dropping the enumeration) releases the key lister.

use tracing::{debug, warn};

use super::AccountError;
use super::kv::KeyLister;
use super::store::{Account, AccountStore};
use super::subject::SubjectPattern;
use crate::ids::UserId;

/// Forward-only, finite sequence of accounts.
pub struct Enumeration {
    store: AccountStore,
    pattern: SubjectPattern,
    keys: Option<Box<dyn KeyLister>>,
    errors: Vec<AccountError>,
    yielded: usize,
}

impl Enumeration {
    pub(crate) fn new(store: AccountStore, pattern: SubjectPattern, keys: Box<dyn KeyLister>) -> Self {
        Self {
            store,
            pattern,
            keys: Some(keys),
            errors: Vec::new(),
            yielded: 0,
        }
    }

    /// Next matching account, or `None` when the walk is over.
    pub async fn next(&mut self) -> Option<Account> {
        loop {
            let next = self.keys.as_mut()?.next_key().await;
            let key = match next {
                Some(Ok(key)) => key,
                Some(Err(e)) => {
                    warn!(error = %e, "Key lister failed, ending enumeration");
                    self.errors.push(e.into());
                    self.stop();
                    return None;
                }
                None => {
                    debug!(yielded = self.yielded, errors = self.errors.len(), "Enumeration finished");
                    self.keys = None;
                    return None;
                }
            };

            if !self.pattern.matches(&key) {
                continue;
            }
            let Some(segment) = self.store.keyspace().account_uid_segment(&key) else {
                continue;
            };

            let uid = match UserId::parse(segment) {
                Ok(uid) => uid,
                Err(e) => {
                    self.errors.push(AccountError::corrupt_id(&key, &e));
                    continue;
                }
            };

            match self.store.get_account(&uid).await {
                Ok(account) => {
                    self.yielded += 1;
                    return Some(account);
                }
                Err(e) => self.errors.push(e),
            }
        }
    }

    /// Release the key lister. Later calls to [`next`](Self::next) return `None`.
    pub fn stop(&mut self) {
        if let Some(mut lister) = self.keys.take() {
            lister.stop();
            debug!(yielded = self.yielded, "Enumeration stopped");
        }
    }

    /// Failures collected so far.
    #[must_use]
    pub fn errors(&self) -> &[AccountError] {
        &self.errors
    }

    /// `true` while the key lister is held.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.keys.is_some()
    }

    /// Drain the remaining accounts, returning them with every collected failure.
    pub async fn collect_all(mut self) -> (Vec<Account>, Vec<AccountError>) {
        let mut accounts = Vec::new();
        while let Some(account) = self.next().await {
            accounts.push(account);
        }
        (accounts, std::mem::take(&mut self.errors))
    }
}

impl Drop for Enumeration {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bytes::Bytes;

    use super::*;
    use crate::accounts::kv::{InMemoryKeyValue, KeyValue};
    use crate::accounts::store::Keyspace;
    use crate::identity::Profile;

    async fn seeded(names: &[&str]) -> (Arc<InMemoryKeyValue>, AccountStore) {
        let kv = Arc::new(InMemoryKeyValue::with_max_listers(1));
        let store = AccountStore::new(kv.clone(), Keyspace::default());
        for name in names {
            store.create_account(Profile::named(*name)).await.unwrap();
        }
        (kv, store)
    }

    #[tokio::test]
    async fn yields_every_matching_account() {
        // GIVEN: three accounts and a link
        let (_, store) = seeded(&["a", "b", "c"]).await;
        let uid = store.create_account(Profile::named("d")).await.unwrap();
        store.link("github", "1", &uid).await.unwrap();

        // WHEN: enumerating all account records
        let (accounts, errors) = store.enumerate("user_info.*.app").await.unwrap().collect_all().await;

        // THEN: four accounts, link keys skipped, no errors
        assert_eq!(accounts.len(), 4);
        assert!(errors.is_empty());
    }

    #[tokio::test]
    async fn provider_snapshots_are_not_accounts() {
        let (_, store) = seeded(&[]).await;
        let uid = store.create_account(Profile::named("a")).await.unwrap();
        store
            .update_profile("github", &uid, Profile::named("gh"))
            .await
            .unwrap();

        let (accounts, errors) = store.enumerate("user_info.>").await.unwrap().collect_all().await;

        assert_eq!(accounts.len(), 1);
        assert_eq!(accounts[0].name.as_deref(), Some("a"));
        assert!(errors.is_empty());
    }

    #[tokio::test]
    async fn corrupt_records_are_collected_not_fatal() {
        // GIVEN: two healthy accounts, one unparseable id and one broken record
        let (kv, store) = seeded(&["a", "b"]).await;
        kv.put("user_info.not-an-id.app", Bytes::from_static(b"{}"))
            .await
            .unwrap();
        let broken = UserId::generate();
        kv.put(&format!("user_info.{broken}.app"), Bytes::from_static(b"not json"))
            .await
            .unwrap();

        // WHEN: enumerating
        let (accounts, errors) = store.enumerate_all().await.unwrap().collect_all().await;

        // THEN: healthy accounts are returned and both failures are reported
        assert_eq!(accounts.len(), 2);
        assert_eq!(errors.len(), 2);
        assert!(
            errors
                .iter()
                .all(|e| matches!(e, AccountError::Corrupt { .. }))
        );
    }

    #[tokio::test]
    async fn early_stop_releases_lister() {
        // GIVEN: a backend with a single lister slot
        let (kv, store) = seeded(&["a", "b", "c"]).await;

        // WHEN: consuming one item and stopping
        let mut accounts = store.enumerate("user_info.>").await.unwrap();
        assert!(accounts.next().await.is_some());
        accounts.stop();

        // THEN: no error, slot released, a new listing succeeds
        assert!(accounts.errors().is_empty());
        assert!(accounts.next().await.is_none());
        assert_eq!(kv.open_listers(), 0);
        let again = store.enumerate_all().await.unwrap().collect_all().await;
        assert_eq!(again.0.len(), 3);
    }

    #[tokio::test]
    async fn dropping_enumeration_releases_lister() {
        let (kv, store) = seeded(&["a", "b"]).await;
        {
            let mut accounts = store.enumerate_all().await.unwrap();
            assert!(accounts.is_active());
            accounts.next().await.unwrap();
        }
        assert_eq!(kv.open_listers(), 0);
    }

    #[tokio::test]
    async fn invalid_pattern_is_rejected_upfront() {
        let (kv, store) = seeded(&["a"]).await;
        let err = store.enumerate("user_info.>.app").await.err().unwrap();
        assert!(matches!(err, AccountError::Pattern(_)));
        assert_eq!(kv.open_listers(), 0);
    }
}
