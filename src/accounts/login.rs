//! Resolve-or-create login.
//!
//! A provider identity seen for the first time gets a fresh account and a
//! link. Two simultaneous first logins for the same identity both create an
//! account, but only one link create succeeds; the loser sees
//! [`AccountError::AlreadyLinked`], resolves the winner's link and returns
//! that user id. Its own account stays behind unlinked.

use tracing::{info, warn};

use super::AccountError;
use super::store::AccountStore;
use crate::identity::Profile;
use crate::ids::UserId;

/// Result of a login.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoginOutcome {
    /// Account the identity resolves to.
    pub user_id: UserId,
    /// `true` when this call created the account and the link.
    pub created: bool,
}

/// Login flow over an [`AccountStore`].
#[derive(Clone)]
pub struct Login {
    store: AccountStore,
}

impl Login {
    /// Wrap `store`.
    pub fn new(store: AccountStore) -> Self {
        Self { store }
    }

    /// Resolve (`provider`, `subject`) to an account, creating and linking
    /// one on first sight, then record `profile` as the provider snapshot.
    pub async fn login(
        &self,
        provider: &str,
        subject: &str,
        profile: Profile,
    ) -> Result<LoginOutcome, AccountError> {
        let outcome = match self.store.resolve_link(provider, subject).await {
            Ok(user_id) => LoginOutcome {
                user_id,
                created: false,
            },
            Err(e) if e.is_not_linked() => self.register(provider, subject, &profile).await?,
            Err(e) => return Err(e),
        };

        self.store
            .update_profile(provider, &outcome.user_id, profile)
            .await?;

        info!(
            provider = %provider,
            uid = %outcome.user_id,
            created = outcome.created,
            "Login resolved"
        );
        Ok(outcome)
    }

    async fn register(
        &self,
        provider: &str,
        subject: &str,
        profile: &Profile,
    ) -> Result<LoginOutcome, AccountError> {
        let candidate = self.store.create_account(profile.clone()).await?;

        match self.store.link(provider, subject, &candidate).await {
            Ok(()) => Ok(LoginOutcome {
                user_id: candidate,
                created: true,
            }),
            Err(AccountError::AlreadyLinked { .. }) => {
                let user_id = self.store.resolve_link(provider, subject).await?;
                warn!(
                    provider = %provider,
                    orphan = %candidate,
                    uid = %user_id,
                    "Lost link race, using existing account"
                );
                Ok(LoginOutcome {
                    user_id,
                    created: false,
                })
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bytes::Bytes;
    use tokio::sync::Barrier;

    use super::*;
    use crate::accounts::kv::{InMemoryKeyValue, KeyLister, KeyValue, KvEntry, KvError};
    use crate::accounts::store::Keyspace;

    fn login() -> (AccountStore, Login) {
        let store = AccountStore::new(Arc::new(InMemoryKeyValue::new()), Keyspace::default());
        (store.clone(), Login::new(store))
    }

    #[tokio::test]
    async fn first_login_creates_and_links() {
        // GIVEN: an empty store
        let (store, login) = login();

        // WHEN: an identity logs in for the first time
        let outcome = login
            .login("github", "583231", Profile::named("Octocat"))
            .await
            .unwrap();

        // THEN: a new account is linked and the snapshot stored
        assert!(outcome.created);
        assert_eq!(store.resolve_link("github", "583231").await.unwrap(), outcome.user_id);
        let account = store.get_account(&outcome.user_id).await.unwrap();
        assert_eq!(account.name.as_deref(), Some("Octocat"));
        let snapshot = store.provider_profile("github", &outcome.user_id).await.unwrap();
        assert_eq!(snapshot.name.as_deref(), Some("Octocat"));
    }

    #[tokio::test]
    async fn repeated_login_reuses_account_and_refreshes_snapshot() {
        let (store, login) = login();
        let first = login
            .login("github", "583231", Profile::named("Octocat"))
            .await
            .unwrap();

        let second = login
            .login("github", "583231", Profile::named("Mona"))
            .await
            .unwrap();

        assert!(!second.created);
        assert_eq!(second.user_id, first.user_id);
        let snapshot = store.provider_profile("github", &first.user_id).await.unwrap();
        assert_eq!(snapshot.name.as_deref(), Some("Mona"));
    }

    /// Holds every link create until `parties` of them are waiting, so all
    /// callers pass the resolve step before any link exists.
    struct LinkGate {
        inner: InMemoryKeyValue,
        barrier: Barrier,
    }

    impl LinkGate {
        fn new(parties: usize) -> Self {
            Self {
                inner: InMemoryKeyValue::new(),
                barrier: Barrier::new(parties),
            }
        }
    }

    #[async_trait::async_trait]
    impl KeyValue for LinkGate {
        async fn create(&self, key: &str, value: Bytes) -> Result<u64, KvError> {
            if key.starts_with("auth_link.") {
                self.barrier.wait().await;
            }
            self.inner.create(key, value).await
        }

        async fn put(&self, key: &str, value: Bytes) -> Result<u64, KvError> {
            self.inner.put(key, value).await
        }

        async fn get(&self, key: &str) -> Result<Option<KvEntry>, KvError> {
            self.inner.get(key).await
        }

        async fn list_keys(&self) -> Result<Box<dyn KeyLister>, KvError> {
            self.inner.list_keys().await
        }
    }

    #[tokio::test]
    async fn link_race_loser_adopts_winner() {
        // GIVEN: two first logins that both get past the resolve step
        let store = AccountStore::new(Arc::new(LinkGate::new(2)), Keyspace::default());
        let login = Login::new(store.clone());

        // WHEN: both create an account and race for the link
        let (a, b) = tokio::join!(
            login.login("github", "583231", Profile::named("Octocat")),
            login.login("github", "583231", Profile::named("Octocat")),
        );
        let (a, b) = (a.unwrap(), b.unwrap());

        // THEN: both resolve to the winner; the loser's account is left unlinked
        let linked = store.resolve_link("github", "583231").await.unwrap();
        assert_eq!(a.user_id, linked);
        assert_eq!(b.user_id, linked);
        assert_eq!(u8::from(a.created) + u8::from(b.created), 1);

        let (accounts, errors) = store.enumerate_all().await.unwrap().collect_all().await;
        assert!(errors.is_empty(), "{errors:?}");
        assert_eq!(accounts.len(), 2);
        let orphans: Vec<_> = accounts.iter().filter(|acc| acc.uid != linked).collect();
        assert_eq!(orphans.len(), 1);
        assert!(store.provider_profile("github", &orphans[0].uid).await.is_err());
    }
}
