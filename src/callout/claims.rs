//! Auth-callout message types.
//!
//! Three claim documents take part in one callout:
//!
//! | Document | Signed by | `sub` | `aud` |
//! |----------|-----------|-------|-------|
//! | authorization request | broker server | user nkey | - |
//! | user credential | issuer account | user nkey | broker account |
//! | authorization response | issuer account | user nkey | server id |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::jwt::NatsClaims;
use crate::accounts::SubjectPattern;
use crate::ids::UserId;

/// Version of the claim documents understood here.
pub const CLAIMS_VERSION: u8 = 2;

/// `nats.type` of an authorization request.
pub const AUTHORIZATION_REQUEST: &str = "authorization_request";
/// `nats.type` of an authorization response.
pub const AUTHORIZATION_RESPONSE: &str = "authorization_response";
/// `nats.type` of a user credential.
pub const USER: &str = "user";

/// Unlimited marker for user limits.
pub const NO_LIMIT: i64 = -1;

/// Identity of the broker server that raised the callout.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerId {
    /// Server name.
    #[serde(default)]
    pub name: String,
    /// Server host.
    #[serde(default)]
    pub host: String,
    /// Server id; the response audience.
    #[serde(default)]
    pub id: String,
    /// Server version.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
    /// Cluster name.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cluster: String,
}

/// Client connection metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    /// Client host.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub host: String,
    /// Connection id within the server.
    #[serde(default)]
    pub id: u64,
    /// Client user name, if any.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user: String,
    /// Client-declared name.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    /// Connection kind.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kind: String,
    /// Client library type.
    #[serde(default, skip_serializing_if = "String::is_empty", rename = "type")]
    pub client_type: String,
}

/// Options the client sent in its CONNECT.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectOptions {
    /// Client JWT (decentralized auth).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub jwt: String,
    /// Client nkey.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub nkey: String,
    /// Nonce signature.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub sig: String,
    /// Bearer credential; carries the identity token.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub auth_token: String,
    /// User name.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user: String,
    /// Password.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub pass: String,
    /// Client name.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    /// Client language.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub lang: String,
    /// Client version.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
    /// Protocol level.
    #[serde(default)]
    pub protocol: i32,
}

/// `nats` section of an authorization request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationRequest {
    /// Originating server.
    pub server_id: ServerId,
    /// Public nkey generated by the server for this connection.
    pub user_nkey: String,
    /// Client metadata.
    #[serde(default)]
    pub client_info: ClientInfo,
    /// CONNECT options.
    #[serde(default)]
    pub connect_opts: ConnectOptions,
    /// Document type.
    #[serde(rename = "type")]
    pub kind: String,
    /// Document version.
    #[serde(default)]
    pub version: u8,
}

/// Signed authorization request.
pub type AuthorizationRequestClaims = NatsClaims<AuthorizationRequest>;

impl AuthorizationRequestClaims {
    /// Unsigned request, as a broker server would raise it.
    pub fn request(
        server: ServerId,
        user_nkey: impl Into<String>,
        connect_opts: ConnectOptions,
    ) -> Self {
        let user_nkey = user_nkey.into();
        NatsClaims::new(
            user_nkey.clone(),
            AuthorizationRequest {
                server_id: server,
                user_nkey,
                client_info: ClientInfo::default(),
                connect_opts,
                kind: AUTHORIZATION_REQUEST.to_string(),
                version: CLAIMS_VERSION,
            },
        )
    }

    /// Structural checks on a decoded request.
    pub fn check_request(&self) -> Result<(), String> {
        if self.nats.kind != AUTHORIZATION_REQUEST {
            return Err(format!("unexpected claim type {:?}", self.nats.kind));
        }
        if self.nats.server_id.id.is_empty() {
            return Err("request has no server id".to_string());
        }
        if !is_public_key(&self.nats.user_nkey, 'U') {
            return Err(format!("invalid user nkey {:?}", self.nats.user_nkey));
        }
        Ok(())
    }
}

/// Publish or subscribe permission.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    /// Allowed subjects.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allow: Vec<String>,
    /// Denied subjects.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deny: Vec<String>,
}

/// `nats` section of a user credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Publish permissions.
    #[serde(default, rename = "pub")]
    pub publish: Permission,
    /// Subscribe permissions.
    #[serde(default, rename = "sub")]
    pub subscribe: Permission,
    /// Max subscriptions.
    pub subs: i64,
    /// Max data bytes.
    pub data: i64,
    /// Max payload bytes.
    pub payload: i64,
    /// Free-form tags.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Document type.
    #[serde(rename = "type")]
    pub kind: String,
    /// Document version.
    pub version: u8,
}

/// Signed user credential.
pub type UserClaims = NatsClaims<User>;

impl UserClaims {
    /// Credential binding `user_nkey` to `uid` inside broker `account`.
    ///
    /// The internal user id travels in `name` and as a `uid:` tag.
    pub fn for_user(
        user_nkey: impl Into<String>,
        account: impl Into<String>,
        uid: &UserId,
        expires_at: Option<DateTime<Utc>>,
    ) -> Self {
        let mut claims = NatsClaims::new(
            user_nkey,
            User {
                publish: Permission::default(),
                subscribe: Permission::default(),
                subs: NO_LIMIT,
                data: NO_LIMIT,
                payload: NO_LIMIT,
                tags: vec![format!("uid:{uid}")],
                kind: USER.to_string(),
                version: CLAIMS_VERSION,
            },
        );
        claims.name = uid.to_string();
        claims.aud = account.into();
        claims.exp = expires_at.map(|at| at.timestamp());
        claims
    }

    /// Internal user id carried by the credential.
    pub fn user_id(&self) -> Result<UserId, crate::ids::UserIdError> {
        UserId::parse(&self.name)
    }

    /// Structural validation; returns every problem found.
    #[must_use]
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();

        if !is_public_key(&self.sub, 'U') {
            problems.push(format!("subject {:?} is not a user nkey", self.sub));
        }
        if self.aud.is_empty() {
            problems.push("credential has no account audience".to_string());
        }
        if self.name.is_empty() {
            problems.push("credential has no name".to_string());
        }
        if self.nats.kind != USER {
            problems.push(format!("unexpected claim type {:?}", self.nats.kind));
        }
        if self.nats.version != CLAIMS_VERSION {
            problems.push(format!("unsupported version {}", self.nats.version));
        }
        if let Some(exp) = self.exp
            && self.iat != 0
            && exp <= self.iat
        {
            problems.push("credential expires before it is issued".to_string());
        }
        for (field, limit) in [
            ("subs", self.nats.subs),
            ("data", self.nats.data),
            ("payload", self.nats.payload),
        ] {
            if limit < NO_LIMIT {
                problems.push(format!("limit {field} is negative"));
            }
        }
        for subject in self
            .nats
            .publish
            .allow
            .iter()
            .chain(&self.nats.publish.deny)
            .chain(&self.nats.subscribe.allow)
            .chain(&self.nats.subscribe.deny)
        {
            if let Err(e) = SubjectPattern::parse(subject) {
                problems.push(format!("permission subject: {e}"));
            }
        }

        problems
    }
}

/// `nats` section of an authorization response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationResponse {
    /// Signed user credential on success.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub jwt: String,
    /// Error text on failure.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
    /// Issuer account, when signing with a key other than the account's own.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub issuer_account: String,
    /// Document type.
    #[serde(rename = "type")]
    pub kind: String,
    /// Document version.
    pub version: u8,
}

/// Signed authorization response.
pub type AuthorizationResponseClaims = NatsClaims<AuthorizationResponse>;

impl AuthorizationResponseClaims {
    /// Successful response carrying `credential`.
    pub fn granted(user_nkey: impl Into<String>, server_id: impl Into<String>, credential: String) -> Self {
        Self::response(user_nkey, server_id, credential, String::new())
    }

    /// Failed response carrying `error`.
    pub fn denied(user_nkey: impl Into<String>, server_id: impl Into<String>, error: String) -> Self {
        Self::response(user_nkey, server_id, String::new(), error)
    }

    fn response(
        user_nkey: impl Into<String>,
        server_id: impl Into<String>,
        jwt: String,
        error: String,
    ) -> Self {
        let mut claims = NatsClaims::new(
            user_nkey,
            AuthorizationResponse {
                jwt,
                error,
                issuer_account: String::new(),
                kind: AUTHORIZATION_RESPONSE.to_string(),
                version: CLAIMS_VERSION,
            },
        );
        claims.aud = server_id.into();
        claims
    }
}

/// `true` if `key` decodes as a public nkey with the given role prefix.
pub(crate) fn is_public_key(key: &str, prefix: char) -> bool {
    key.starts_with(prefix) && nkeys::KeyPair::from_public_key(key).is_ok()
}
