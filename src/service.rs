//! Runtime assembly
//!
//! Builds the account store, the login flow and the callout bridge from one
//! [`Config`], so every knob in the file ends up in a running component.

use std::sync::Arc;

use tracing::info;

use crate::accounts::{AccountStore, InMemoryKeyValue, Login};
use crate::callout::CalloutBridge;
use crate::config::Config;
use crate::identity::SigningSecret;
use crate::secrets::SecretResolver;
use crate::{Error, Result};

/// Account store, login flow and callout bridge sharing one backend.
pub struct AuthService {
    store: AccountStore,
    login: Login,
    bridge: Arc<CalloutBridge>,
}

impl AuthService {
    /// Assemble the service.
    ///
    /// `secret` verifies identity tokens presented to the bridge; seed
    /// references in `config.callout` are resolved through `resolver`.
    pub fn new(config: &Config, secret: &SigningSecret, resolver: &SecretResolver) -> Result<Self> {
        let kv = Arc::new(InMemoryKeyValue::with_max_listers(config.accounts.max_listers));
        let store = AccountStore::new(kv, config.accounts.keyspace()?);

        let seed = config.callout.issuer_seed.as_deref().ok_or_else(|| {
            Error::Config("callout.issuer_seed is required to run the callout bridge".to_string())
        })?;
        let issuer = resolver.account_key(seed)?;
        let xkey = config
            .callout
            .xkey_seed
            .as_deref()
            .map(|seed| resolver.curve_key(seed))
            .transpose()?;

        let settings = config.callout.bridge_settings();
        let require_encryption = settings.require_encryption;
        let bridge = CalloutBridge::new(
            issuer,
            xkey,
            Arc::new(config.identity.decoder(secret)?),
            Arc::new(store.clone()),
            settings,
        )?;

        info!(
            issuer = %bridge.issuer_public_key(),
            account = %config.callout.account,
            require_encryption,
            max_listers = config.accounts.max_listers,
            "Auth service ready"
        );

        Ok(Self {
            login: Login::new(store.clone()),
            store,
            bridge: Arc::new(bridge),
        })
    }

    /// Account store.
    #[must_use]
    pub fn store(&self) -> &AccountStore {
        &self.store
    }

    /// Login flow over [`Self::store`].
    #[must_use]
    pub fn login(&self) -> &Login {
        &self.login
    }

    /// Shared callout bridge.
    #[must_use]
    pub fn bridge(&self) -> &Arc<CalloutBridge> {
        &self.bridge
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::{AccountError, KvError};
    use crate::callout::claims::{ConnectOptions, ServerId};
    use crate::callout::{AuthorizationRequestClaims, CalloutRequest, UserClaims};
    use crate::identity::{IdentityClaims, Profile, TokenEncoder};
    use nkeys::{KeyPair, XKey};
    use std::time::Duration;

    fn config_with_issuer() -> (Config, KeyPair) {
        let issuer = KeyPair::new_account();
        let mut config = Config::default();
        config.callout.issuer_seed = Some(issuer.seed().unwrap());
        (config, issuer)
    }

    #[test]
    fn bridge_needs_issuer_seed() {
        let result = AuthService::new(
            &Config::default(),
            &SigningSecret::generate(),
            &SecretResolver::new(),
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn callout_settings_reach_the_bridge() {
        // GIVEN: issuer and curve seeds in the callout section
        let (mut config, issuer) = config_with_issuer();
        let xkey = XKey::new();
        config.callout.xkey_seed = Some(xkey.seed().unwrap());

        // WHEN: assembling the service
        let service =
            AuthService::new(&config, &SigningSecret::generate(), &SecretResolver::new()).unwrap();

        // THEN: the bridge signs with the configured account and opens with the configured xkey
        assert_eq!(service.bridge().issuer_public_key(), issuer.public_key());
        assert_eq!(service.bridge().xkey_public_key(), Some(xkey.public_key()));
    }

    #[tokio::test]
    async fn max_listers_limits_open_enumerations() {
        // GIVEN: a single lister slot
        let (mut config, _) = config_with_issuer();
        config.accounts.max_listers = 1;
        let service =
            AuthService::new(&config, &SigningSecret::generate(), &SecretResolver::new()).unwrap();
        service.store().create_account(Profile::default()).await.unwrap();

        // WHEN: opening a second enumeration while the first is alive
        let first = service.store().enumerate_all().await.unwrap();
        let second = service.store().enumerate_all().await;

        // THEN: the backend refuses it until the first one is dropped
        assert!(matches!(
            second,
            Err(AccountError::StorageUnavailable(KvError::ListerLimit(1)))
        ));
        drop(first);
        assert!(service.store().enumerate_all().await.is_ok());
    }

    #[tokio::test]
    async fn login_then_callout_issues_credential() {
        // GIVEN: a service with a short credential lifetime and a user who logged in
        let (mut config, _) = config_with_issuer();
        config.callout.credential_ttl = Duration::from_secs(60);
        let secret = SigningSecret::generate();
        let service = AuthService::new(&config, &secret, &SecretResolver::new()).unwrap();
        let outcome = service
            .login()
            .login("github", "583231", Profile::named("Octocat"))
            .await
            .unwrap();

        // WHEN: the broker asks about a connection presenting that user's identity token
        let token = TokenEncoder::new(&secret)
            .unwrap()
            .encode(&IdentityClaims::builder("github", "583231").build().unwrap())
            .unwrap();
        let user = KeyPair::new_user();
        let request = AuthorizationRequestClaims::request(
            ServerId {
                id: "NSERVICE".to_string(),
                ..ServerId::default()
            },
            user.public_key(),
            ConnectOptions {
                auth_token: token,
                ..ConnectOptions::default()
            },
        )
        .encode(&KeyPair::new_server())
        .unwrap();
        let exchange = service.bridge().authorize(CalloutRequest::new(request)).await;

        // THEN: the credential names the logged-in user and honours the configured lifetime
        let credential = UserClaims::decode(exchange.credential().unwrap()).unwrap();
        assert_eq!(credential.user_id().unwrap(), outcome.user_id);
        assert_eq!(credential.aud, config.callout.account);
        let exp = credential.exp.unwrap();
        assert!(exp - credential.iat <= 60, "{exp} vs {}", credential.iat);
    }
}
