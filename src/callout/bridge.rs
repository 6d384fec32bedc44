//! Authorization bridge: one request in, one signed response out.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use nkeys::{KeyPair, XKey};
use tracing::{debug, error, warn};

use super::audit::{self, AuditEvent};
use super::claims::{AuthorizationRequestClaims, AuthorizationResponseClaims, UserClaims};
use super::{CalloutError, CalloutErrorKind, XKEY_HEADER};
use crate::accounts::LinkResolver;
use crate::identity::{IdentityClaims, IdentityVerifier, TokenError};
use crate::ids::UserId;
use crate::{Error, Result};

/// Default broker account for issued credentials.
pub const DEFAULT_ACCOUNT: &str = "PLA";

/// Default credential lifetime.
pub const DEFAULT_CREDENTIAL_TTL: Duration = Duration::from_secs(60 * 60);

/// Raw callout request as delivered by the broker.
#[derive(Debug, Clone)]
pub struct CalloutRequest {
    data: Bytes,
    server_xkey: Option<String>,
}

impl CalloutRequest {
    /// Request without an encryption header.
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            server_xkey: None,
        }
    }

    /// Request with message headers; picks up the curve key header.
    pub fn from_headers<'a, I>(data: impl Into<Bytes>, headers: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let server_xkey = headers
            .into_iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(XKEY_HEADER))
            .map(|(_, value)| value.trim().to_string())
            .filter(|value| !value.is_empty());
        Self {
            data: data.into(),
            server_xkey,
        }
    }

    /// Set the sender's curve public key.
    #[must_use]
    pub fn with_server_xkey(mut self, key: impl Into<String>) -> Self {
        self.server_xkey = Some(key.into());
        self
    }
}

/// Failure to deliver a reply.
#[derive(Debug, thiserror::Error)]
#[error("reply delivery failed: {0}")]
pub struct ReplyError(pub String);

/// Reply channel of one request.
#[async_trait::async_trait]
pub trait Responder: Send {
    /// Send `reply` back to the broker.
    async fn respond(&mut self, reply: Bytes) -> std::result::Result<(), ReplyError>;
}

/// Bridge policy.
#[derive(Debug, Clone)]
pub struct BridgeSettings {
    /// Broker account that issued credentials belong to.
    pub account: String,
    /// Reject requests that are not sealed.
    pub require_encryption: bool,
    /// Credential lifetime; `None` issues credentials without expiry.
    pub credential_ttl: Option<Duration>,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            account: DEFAULT_ACCOUNT.to_string(),
            require_encryption: false,
            credential_ttl: Some(DEFAULT_CREDENTIAL_TTL),
        }
    }
}

/// How an exchange ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalloutOutcome {
    /// A credential for the user was sent.
    Authorized(UserId),
    /// An error reply was sent.
    Rejected(CalloutErrorKind),
    /// No reply could be sent.
    ReplyFailed,
}

/// Credential issued to a resolved user.
#[derive(Debug)]
struct Issued {
    user_id: UserId,
    jwt: String,
}

/// What the steps before Reply learned about a request.
#[derive(Debug)]
struct Progress {
    raw: Bytes,
    server_xkey: Option<String>,
    encrypted: bool,
    request: Option<AuthorizationRequestClaims>,
    identity: Option<(String, String)>,
    user_id: Option<UserId>,
}

impl Progress {
    fn received(request: CalloutRequest) -> Self {
        Self {
            raw: request.data,
            server_xkey: request.server_xkey,
            encrypted: false,
            request: None,
            identity: None,
            user_id: None,
        }
    }
}

/// State of one request/response cycle. Never persisted.
#[derive(Debug)]
pub struct AuthorizationExchange {
    progress: Progress,
    outcome: std::result::Result<Issued, CalloutError>,
}

impl AuthorizationExchange {
    /// Bytes as received.
    #[must_use]
    pub fn raw(&self) -> &Bytes {
        &self.progress.raw
    }

    /// `true` when the request was opened with the bridge's curve key.
    #[must_use]
    pub fn is_encrypted(&self) -> bool {
        self.progress.encrypted
    }

    /// Parsed request, once parsing succeeded.
    #[must_use]
    pub fn request(&self) -> Option<&AuthorizationRequestClaims> {
        self.progress.request.as_ref()
    }

    /// Verified (issuer, subject), once the identity token verified.
    #[must_use]
    pub fn identity(&self) -> Option<(&str, &str)> {
        self.progress
            .identity
            .as_ref()
            .map(|(iss, sub)| (iss.as_str(), sub.as_str()))
    }

    /// Resolved internal user.
    #[must_use]
    pub fn user_id(&self) -> Option<UserId> {
        self.progress.user_id
    }

    /// Signed credential, on success.
    #[must_use]
    pub fn credential(&self) -> Option<&str> {
        self.outcome.as_ref().ok().map(|issued| issued.jwt.as_str())
    }

    /// Failure, if the exchange was rejected.
    #[must_use]
    pub fn error(&self) -> Option<&CalloutError> {
        self.outcome.as_ref().err()
    }

    fn server_id(&self) -> &str {
        self.progress
            .request
            .as_ref()
            .map_or("", |r| r.nats.server_id.id.as_str())
    }

    fn user_nkey(&self) -> &str {
        self.progress
            .request
            .as_ref()
            .map_or("", |r| r.nats.user_nkey.as_str())
    }

    fn audit(&self, event: AuditEvent) -> AuditEvent {
        let event = event.with_connection(self.server_id(), self.user_nkey());
        match self.identity() {
            Some((iss, sub)) => event.with_identity(iss, sub),
            None => event,
        }
    }
}

/// Stateless auth-callout handler; safe to share across concurrent requests.
pub struct CalloutBridge {
    issuer: KeyPair,
    xkey: Option<XKey>,
    verifier: Arc<dyn IdentityVerifier>,
    links: Arc<dyn LinkResolver>,
    settings: BridgeSettings,
}

impl CalloutBridge {
    /// Create a bridge.
    ///
    /// `issuer` must be an account key pair with its seed; `xkey` is the
    /// bridge's curve key and is mandatory when encryption is required.
    pub fn new(
        issuer: KeyPair,
        xkey: Option<XKey>,
        verifier: Arc<dyn IdentityVerifier>,
        links: Arc<dyn LinkResolver>,
        settings: BridgeSettings,
    ) -> Result<Self> {
        let public = issuer.public_key();
        if !super::claims::is_public_key(&public, 'A') {
            return Err(Error::Config(format!(
                "callout issuer {public} is not an account key"
            )));
        }
        if issuer.seed().is_err() {
            return Err(Error::Config(
                "callout issuer key has no seed and cannot sign".to_string(),
            ));
        }
        if settings.require_encryption && xkey.is_none() {
            return Err(Error::Config(
                "callout encryption is required but no xkey is configured".to_string(),
            ));
        }
        if settings.account.trim().is_empty() {
            return Err(Error::Config("callout account must not be empty".to_string()));
        }

        Ok(Self {
            issuer,
            xkey,
            verifier,
            links,
            settings,
        })
    }

    /// Public account key the broker must trust as callout issuer.
    #[must_use]
    pub fn issuer_public_key(&self) -> String {
        self.issuer.public_key()
    }

    /// Public curve key the broker seals requests to.
    #[must_use]
    pub fn xkey_public_key(&self) -> Option<String> {
        self.xkey.as_ref().map(XKey::public_key)
    }

    /// Handle one request end to end and report how it ended.
    pub async fn handle(&self, request: CalloutRequest, responder: &mut dyn Responder) -> CalloutOutcome {
        let exchange = self.authorize(request).await;
        let encrypted = exchange.is_encrypted();

        let reply = match self.reply(&exchange) {
            Ok(reply) => reply,
            Err(reason) => {
                error!(error = %reason, "Cannot build callout reply");
                audit::emit(&exchange.audit(AuditEvent::reply_failed(reason, encrypted)));
                return CalloutOutcome::ReplyFailed;
            }
        };

        if let Err(e) = responder.respond(reply).await {
            warn!(error = %e, "Callout reply not delivered");
            audit::emit(&exchange.audit(AuditEvent::reply_failed(e.to_string(), encrypted)));
            return CalloutOutcome::ReplyFailed;
        }

        match &exchange.outcome {
            Ok(issued) => {
                audit::emit(&exchange.audit(AuditEvent::authorized(issued.user_id, encrypted)));
                CalloutOutcome::Authorized(issued.user_id)
            }
            Err(e) => {
                audit::emit(&exchange.audit(AuditEvent::rejected(e.kind(), e.to_string(), encrypted)));
                CalloutOutcome::Rejected(e.kind())
            }
        }
    }

    /// Run every step up to (not including) the reply.
    pub async fn authorize(&self, request: CalloutRequest) -> AuthorizationExchange {
        let mut progress = Progress::received(request);
        let outcome = self.run(&mut progress).await;
        if let Err(ref e) = outcome {
            debug!(kind = %e.kind(), error = %e, "Callout request rejected");
        }
        AuthorizationExchange { progress, outcome }
    }

    /// Signed (and, for sealed requests, sealed) response for `exchange`.
    pub fn reply(&self, exchange: &AuthorizationExchange) -> std::result::Result<Bytes, String> {
        let mut response = match &exchange.outcome {
            Ok(issued) => AuthorizationResponseClaims::granted(
                exchange.user_nkey(),
                exchange.server_id(),
                issued.jwt.clone(),
            ),
            Err(e) => AuthorizationResponseClaims::denied(
                exchange.user_nkey(),
                exchange.server_id(),
                e.reply_text(),
            ),
        };

        let token = response
            .encode(&self.issuer)
            .map_err(|e| format!("signing response: {e}"))?;

        match (exchange.progress.encrypted, &self.xkey, &exchange.progress.server_xkey) {
            (true, Some(xkey), Some(server)) => {
                let recipient =
                    XKey::from_public_key(server).map_err(|e| format!("server xkey: {e}"))?;
                xkey.seal(token.as_bytes(), &recipient)
                    .map(Bytes::from)
                    .map_err(|e| format!("sealing response: {e}"))
            }
            _ => Ok(Bytes::from(token)),
        }
    }

    async fn run(&self, progress: &mut Progress) -> std::result::Result<Issued, CalloutError> {
        let payload = self.open(progress)?;

        let request = parse_request(&payload)?;
        let token = request.nats.connect_opts.auth_token.clone();
        let user_nkey = request.nats.user_nkey.clone();
        debug!(
            server_id = %request.nats.server_id.id,
            user_nkey = %user_nkey,
            token_len = token.len(),
            "Callout request parsed"
        );
        progress.request = Some(request);

        if token.is_empty() {
            return Err(CalloutError::IdentityInvalid(TokenError::Malformed(
                "connect options carry no identity token".to_string(),
            )));
        }
        let identity = self
            .verifier
            .verify(&token)
            .map_err(CalloutError::IdentityInvalid)?;
        progress.identity = Some((identity.issuer().to_string(), identity.subject().to_string()));

        let uid = self
            .links
            .resolve_link(identity.issuer(), identity.subject())
            .await
            .map_err(CalloutError::UnknownIdentity)?;
        progress.user_id = Some(uid);

        let jwt = self.issue(&user_nkey, &uid, &identity)?;
        Ok(Issued { user_id: uid, jwt })
    }

    fn open(&self, progress: &mut Progress) -> std::result::Result<Bytes, CalloutError> {
        match (&self.xkey, &progress.server_xkey) {
            (Some(xkey), Some(server)) => {
                let sender = XKey::from_public_key(server)
                    .map_err(|e| CalloutError::DecryptionFailed(format!("server xkey: {e}")))?;
                let opened = xkey
                    .open(&progress.raw, &sender)
                    .map_err(|e| CalloutError::DecryptionFailed(e.to_string()))?;
                progress.encrypted = true;
                Ok(Bytes::from(opened))
            }
            (Some(_), None) if self.settings.require_encryption => Err(CalloutError::EncryptionRequired),
            _ => Ok(progress.raw.clone()),
        }
    }

    fn issue(
        &self,
        user_nkey: &str,
        uid: &UserId,
        identity: &IdentityClaims,
    ) -> std::result::Result<String, CalloutError> {
        let now = Utc::now();
        let expires_at = self
            .settings
            .credential_ttl
            .map(|ttl| credential_expiry(now, ttl, identity.expires_at()));

        let mut claims = UserClaims::for_user(user_nkey, &self.settings.account, uid, expires_at);
        claims.iat = now.timestamp();

        let problems = claims.validate();
        if !problems.is_empty() {
            error!(uid = %uid, problems = ?problems, "Issued credential failed validation");
            return Err(CalloutError::CredentialInvalid(problems.join("; ")));
        }

        claims.encode(&self.issuer).map_err(|e| {
            error!(error = %e, "Cannot sign credential");
            CalloutError::CredentialInvalid(format!("signing credential: {e}"))
        })
    }
}

/// Credential expiry: `now + ttl`, never later than the identity token and
/// never earlier than one second after `now`.
///
/// The decoder accepts a token up to its `exp` plus leeway, so the identity
/// expiry may already be at or behind `now` here.
fn credential_expiry(now: DateTime<Utc>, ttl: Duration, identity_expiry: DateTime<Utc>) -> DateTime<Utc> {
    let capped = chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| now.checked_add_signed(ttl))
        .map_or(identity_expiry, |wanted| wanted.min(identity_expiry));
    capped.max(now + chrono::Duration::seconds(1))
}

fn parse_request(payload: &[u8]) -> std::result::Result<AuthorizationRequestClaims, CalloutError> {
    let text = std::str::from_utf8(payload)
        .map_err(|e| CalloutError::MalformedRequest(format!("request is not utf-8: {e}")))?;
    let request = AuthorizationRequestClaims::decode(text)
        .map_err(|e| CalloutError::MalformedRequest(e.to_string()))?;
    request
        .check_request()
        .map_err(CalloutError::MalformedRequest)?;
    Ok(request)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::AccountError;
    use crate::callout::claims::{ConnectOptions, ServerId};
    use crate::identity::{Profile, SigningSecret, TokenDecoder, TokenEncoder};
    use parking_lot::Mutex;

    struct FixedLinks(Option<UserId>);

    #[async_trait::async_trait]
    impl LinkResolver for FixedLinks {
        async fn resolve_link(
            &self,
            provider: &str,
            subject: &str,
        ) -> std::result::Result<UserId, AccountError> {
            self.0.ok_or_else(|| AccountError::NotLinked {
                provider: provider.to_string(),
                subject: subject.to_string(),
            })
        }
    }

    #[derive(Default)]
    struct Captured(Arc<Mutex<Vec<Bytes>>>);

    #[async_trait::async_trait]
    impl Responder for Captured {
        async fn respond(&mut self, reply: Bytes) -> std::result::Result<(), ReplyError> {
            self.0.lock().push(reply);
            Ok(())
        }
    }

    struct Broken;

    #[async_trait::async_trait]
    impl Responder for Broken {
        async fn respond(&mut self, _reply: Bytes) -> std::result::Result<(), ReplyError> {
            Err(ReplyError("connection closed".to_string()))
        }
    }

    struct Fixture {
        secret: SigningSecret,
        server: KeyPair,
        user: KeyPair,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                secret: SigningSecret::from_seed(&[3u8; 32]).unwrap(),
                server: KeyPair::new_server(),
                user: KeyPair::new_user(),
            }
        }

        fn bridge(&self, uid: Option<UserId>, xkey: Option<XKey>, settings: BridgeSettings) -> CalloutBridge {
            self.bridge_with(TokenDecoder::from_secret(&self.secret).unwrap(), uid, xkey, settings)
        }

        fn bridge_with(
            &self,
            decoder: TokenDecoder,
            uid: Option<UserId>,
            xkey: Option<XKey>,
            settings: BridgeSettings,
        ) -> CalloutBridge {
            CalloutBridge::new(
                KeyPair::new_account(),
                xkey,
                Arc::new(decoder),
                Arc::new(FixedLinks(uid)),
                settings,
            )
            .unwrap()
        }

        fn identity_token(&self) -> String {
            let claims = IdentityClaims::builder("github", "583231")
                .profile(Profile::named("Octocat"))
                .build()
                .unwrap();
            self.sign(&claims)
        }

        fn sign(&self, claims: &IdentityClaims) -> String {
            TokenEncoder::new(&self.secret).unwrap().encode(claims).unwrap()
        }

        fn request(&self, auth_token: String) -> String {
            AuthorizationRequestClaims::request(
                ServerId {
                    id: "NSERVER1".to_string(),
                    ..ServerId::default()
                },
                self.user.public_key(),
                ConnectOptions {
                    auth_token,
                    ..ConnectOptions::default()
                },
            )
            .encode(&self.server)
            .unwrap()
        }
    }

    #[tokio::test]
    async fn linked_identity_is_authorized() {
        // GIVEN: a bridge that resolves the identity to a user
        let fx = Fixture::new();
        let uid = UserId::generate();
        let bridge = fx.bridge(Some(uid), None, BridgeSettings::default());

        // WHEN: a plain request with a valid identity token arrives
        let exchange = bridge
            .authorize(CalloutRequest::new(fx.request(fx.identity_token())))
            .await;

        // THEN: a credential for that user is issued
        assert!(exchange.error().is_none(), "{:?}", exchange.error());
        assert_eq!(exchange.user_id(), Some(uid));
        assert_eq!(exchange.identity(), Some(("github", "583231")));
        let credential = UserClaims::decode(exchange.credential().unwrap()).unwrap();
        assert_eq!(credential.user_id().unwrap(), uid);
        assert_eq!(credential.sub, fx.user.public_key());
        assert_eq!(credential.aud, "PLA");
        assert_eq!(credential.iss, bridge.issuer_public_key());
    }

    #[tokio::test]
    async fn credential_does_not_outlive_identity_token() {
        let fx = Fixture::new();
        let uid = UserId::generate();
        let bridge = fx.bridge(
            Some(uid),
            None,
            BridgeSettings {
                credential_ttl: Some(Duration::from_secs(7 * 24 * 3600)),
                ..BridgeSettings::default()
            },
        );
        let token = fx.identity_token();
        let identity = TokenDecoder::from_secret(&fx.secret).unwrap().decode(&token).unwrap();

        let exchange = bridge.authorize(CalloutRequest::new(fx.request(token))).await;

        let credential = UserClaims::decode(exchange.credential().unwrap()).unwrap();
        assert_eq!(credential.exp, Some(identity.expires_at().timestamp()));
    }

    #[tokio::test]
    async fn identity_inside_leeway_still_gets_credential() {
        // GIVEN: a decoder tolerating a minute of skew and a token that expired seconds ago
        let fx = Fixture::new();
        let uid = UserId::generate();
        let decoder = TokenDecoder::from_secret(&fx.secret)
            .unwrap()
            .with_leeway(Duration::from_secs(60));
        let bridge = fx.bridge_with(decoder, Some(uid), None, BridgeSettings::default());
        let now = Utc::now();
        let token = fx.sign(
            &IdentityClaims::builder("github", "583231")
                .issued_at(now - chrono::Duration::minutes(2))
                .expires_at(now - chrono::Duration::seconds(5))
                .build()
                .unwrap(),
        );

        // WHEN: the broker asks about it
        let exchange = bridge.authorize(CalloutRequest::new(fx.request(token))).await;

        // THEN: the user is authorized with a credential that expires after it is issued
        assert!(exchange.error().is_none(), "{:?}", exchange.error());
        let credential = UserClaims::decode(exchange.credential().unwrap()).unwrap();
        assert_eq!(credential.user_id().unwrap(), uid);
        assert!(credential.exp.unwrap() > credential.iat);
        assert!(credential.validate().is_empty());
    }

    #[tokio::test]
    async fn identity_in_its_last_second_still_gets_credential() {
        let fx = Fixture::new();
        let uid = UserId::generate();
        let decoder = TokenDecoder::from_secret(&fx.secret)
            .unwrap()
            .with_leeway(Duration::from_secs(2));
        let bridge = fx.bridge_with(decoder, Some(uid), None, BridgeSettings::default());
        let now = Utc::now();
        let token = fx.sign(
            &IdentityClaims::builder("github", "583231")
                .issued_at(now - chrono::Duration::minutes(1))
                .expires_at(now)
                .build()
                .unwrap(),
        );

        let exchange = bridge.authorize(CalloutRequest::new(fx.request(token))).await;

        assert_eq!(exchange.error().map(CalloutError::kind), None);
        let credential = UserClaims::decode(exchange.credential().unwrap()).unwrap();
        assert!(credential.exp.unwrap() > credential.iat);
    }

    #[test]
    fn credential_expiry_is_clamped_and_floored() {
        let now = Utc::now();
        let hour = Duration::from_secs(3600);
        let second = chrono::Duration::seconds(1);

        // Identity outlives the ttl: ttl wins
        let later = now + chrono::Duration::days(1);
        assert_eq!(credential_expiry(now, hour, later), now + chrono::Duration::hours(1));
        // Identity ends first: identity wins
        let soon = now + chrono::Duration::minutes(5);
        assert_eq!(credential_expiry(now, hour, soon), soon);
        // Identity ends now or already ended (leeway): one second of validity
        assert_eq!(credential_expiry(now, hour, now), now + second);
        assert_eq!(credential_expiry(now, hour, now - chrono::Duration::seconds(30)), now + second);
        // Ttl too large to represent: identity still caps it
        assert_eq!(credential_expiry(now, Duration::MAX, soon), soon);
    }

    #[tokio::test]
    async fn zero_ttl_setting_issues_without_expiry() {
        let fx = Fixture::new();
        let bridge = fx.bridge(
            Some(UserId::generate()),
            None,
            BridgeSettings {
                credential_ttl: None,
                ..BridgeSettings::default()
            },
        );
        let exchange = bridge
            .authorize(CalloutRequest::new(fx.request(fx.identity_token())))
            .await;
        let credential = UserClaims::decode(exchange.credential().unwrap()).unwrap();
        assert_eq!(credential.exp, None);
    }

    #[tokio::test]
    async fn unlinked_identity_is_unknown() {
        let fx = Fixture::new();
        let bridge = fx.bridge(None, None, BridgeSettings::default());

        let exchange = bridge
            .authorize(CalloutRequest::new(fx.request(fx.identity_token())))
            .await;

        assert_eq!(
            exchange.error().map(CalloutError::kind),
            Some(CalloutErrorKind::UnknownIdentity)
        );
        assert!(exchange.credential().is_none());
    }

    #[tokio::test]
    async fn missing_token_is_identity_invalid() {
        let fx = Fixture::new();
        let bridge = fx.bridge(Some(UserId::generate()), None, BridgeSettings::default());

        let exchange = bridge.authorize(CalloutRequest::new(fx.request(String::new()))).await;

        assert_eq!(
            exchange.error().map(CalloutError::kind),
            Some(CalloutErrorKind::IdentityInvalid)
        );
    }

    #[tokio::test]
    async fn garbage_payload_is_malformed() {
        let fx = Fixture::new();
        let bridge = fx.bridge(Some(UserId::generate()), None, BridgeSettings::default());

        let exchange = bridge.authorize(CalloutRequest::new("hello")).await;

        assert_eq!(
            exchange.error().map(CalloutError::kind),
            Some(CalloutErrorKind::MalformedRequest)
        );
        assert!(exchange.request().is_none());
    }

    #[tokio::test]
    async fn unsealed_request_is_refused_when_encryption_required() {
        let fx = Fixture::new();
        let bridge = fx.bridge(
            Some(UserId::generate()),
            Some(XKey::new()),
            BridgeSettings {
                require_encryption: true,
                ..BridgeSettings::default()
            },
        );

        let exchange = bridge
            .authorize(CalloutRequest::new(fx.request(fx.identity_token())))
            .await;

        assert_eq!(
            exchange.error().map(CalloutError::kind),
            Some(CalloutErrorKind::EncryptionRequired)
        );
    }

    #[tokio::test]
    async fn undecryptable_request_fails() {
        let fx = Fixture::new();
        let bridge = fx.bridge(Some(UserId::generate()), Some(XKey::new()), BridgeSettings::default());
        let server_xkey = XKey::new();

        let request = CalloutRequest::new("not sealed").with_server_xkey(server_xkey.public_key());
        let exchange = bridge.authorize(request).await;

        assert_eq!(
            exchange.error().map(CalloutError::kind),
            Some(CalloutErrorKind::DecryptionFailed)
        );
    }

    #[tokio::test]
    async fn handle_sends_signed_rejection() {
        // GIVEN: an unlinked identity and a capturing responder
        let fx = Fixture::new();
        let bridge = fx.bridge(None, None, BridgeSettings::default());
        let sent = Arc::new(Mutex::new(Vec::new()));
        let mut responder = Captured(Arc::clone(&sent));

        // WHEN: handling the request
        let outcome = bridge
            .handle(CalloutRequest::new(fx.request(fx.identity_token())), &mut responder)
            .await;

        // THEN: one signed response with an error and no credential
        assert_eq!(outcome, CalloutOutcome::Rejected(CalloutErrorKind::UnknownIdentity));
        let replies = sent.lock();
        assert_eq!(replies.len(), 1);
        let response =
            AuthorizationResponseClaims::decode(std::str::from_utf8(&replies[0]).unwrap()).unwrap();
        assert!(response.nats.jwt.is_empty());
        assert!(response.nats.error.starts_with("UnknownIdentity: "));
        assert_eq!(response.aud, "NSERVER1");
        assert_eq!(response.iss, bridge.issuer_public_key());
    }

    #[tokio::test]
    async fn handle_reports_authorized_user() {
        let fx = Fixture::new();
        let uid = UserId::generate();
        let bridge = fx.bridge(Some(uid), None, BridgeSettings::default());
        let sent = Arc::new(Mutex::new(Vec::new()));

        let outcome = bridge
            .handle(
                CalloutRequest::new(fx.request(fx.identity_token())),
                &mut Captured(Arc::clone(&sent)),
            )
            .await;

        assert_eq!(outcome, CalloutOutcome::Authorized(uid));
        let replies = sent.lock();
        let response =
            AuthorizationResponseClaims::decode(std::str::from_utf8(&replies[0]).unwrap()).unwrap();
        assert!(response.nats.error.is_empty());
        assert_eq!(UserClaims::decode(&response.nats.jwt).unwrap().user_id().unwrap(), uid);
    }

    #[tokio::test]
    async fn delivery_failure_is_reported() {
        let fx = Fixture::new();
        let bridge = fx.bridge(Some(UserId::generate()), None, BridgeSettings::default());

        let outcome = bridge
            .handle(CalloutRequest::new(fx.request(fx.identity_token())), &mut Broken)
            .await;

        assert_eq!(outcome, CalloutOutcome::ReplyFailed);
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let request = CalloutRequest::from_headers("x", [("nats-server-xkey", " XKEY ")]);
        assert_eq!(request.server_xkey.as_deref(), Some("XKEY"));
        let request = CalloutRequest::from_headers("x", [("Other", "v")]);
        assert!(request.server_xkey.is_none());
    }

    #[test]
    fn constructor_rejects_user_issuer() {
        let fx = Fixture::new();
        let result = CalloutBridge::new(
            KeyPair::new_user(),
            None,
            Arc::new(TokenDecoder::from_secret(&fx.secret).unwrap()),
            Arc::new(FixedLinks(None)),
            BridgeSettings::default(),
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn constructor_requires_xkey_for_mandatory_encryption() {
        let fx = Fixture::new();
        let result = CalloutBridge::new(
            KeyPair::new_account(),
            None,
            Arc::new(TokenDecoder::from_secret(&fx.secret).unwrap()),
            Arc::new(FixedLinks(None)),
            BridgeSettings {
                require_encryption: true,
                ..BridgeSettings::default()
            },
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
