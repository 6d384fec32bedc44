//! Broker auth-callout bridge.
//!
//! The broker delegates connection authentication to this bridge: it
//! publishes a signed authorization request (optionally sealed to the
//! bridge's curve key) and waits for a signed authorization response. The
//! bridge verifies the identity token the client presented as its connect
//! credential, resolves the linked internal user and answers with a user
//! credential bound to the connection's nkey, or with an error string.
//!
//! # Per-request state machine
//!
//! ```text
//! Receive -> Decrypt? -> Parse -> Verify identity -> Resolve account -> Issue -> Reply
//!               |          |            |                  |              |
//!               +----------+------------+------------------+--------------+--> error reply
//! ```
//!
//! Every failure before Reply becomes a structured error reply. Only a
//! failure to sign, seal or send the reply itself is left to the broker's
//! timeout, and it is logged.

pub mod audit;
pub mod bridge;
pub mod claims;
pub mod jwt;

use std::fmt;

pub use audit::AuditEvent;
pub use bridge::{
    AuthorizationExchange, BridgeSettings, CalloutBridge, CalloutOutcome, CalloutRequest, ReplyError,
    Responder,
};
pub use claims::{AuthorizationRequestClaims, AuthorizationResponseClaims, UserClaims};
pub use jwt::{JwtError, NatsClaims};

use crate::accounts::AccountError;
use crate::identity::TokenError;

/// Header carrying the server's curve public key on encrypted requests.
pub const XKEY_HEADER: &str = "Nats-Server-Xkey";

/// Stable names for callout failures, used as the reply prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CalloutErrorKind {
    /// Encryption required but the request was not sealed.
    EncryptionRequired,
    /// Sealed request could not be opened.
    DecryptionFailed,
    /// Request payload is not a valid authorization request.
    MalformedRequest,
    /// The presented identity token did not verify.
    IdentityInvalid,
    /// No account is linked to the verified identity.
    UnknownIdentity,
    /// The issued credential failed its own validation.
    CredentialInvalid,
}

impl CalloutErrorKind {
    /// Taxonomy name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::EncryptionRequired => "EncryptionRequired",
            Self::DecryptionFailed => "DecryptionFailed",
            Self::MalformedRequest => "MalformedRequest",
            Self::IdentityInvalid => "IdentityInvalid",
            Self::UnknownIdentity => "UnknownIdentity",
            Self::CredentialInvalid => "CredentialInvalid",
        }
    }
}

impl fmt::Display for CalloutErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failures of a single callout exchange.
#[derive(Debug, thiserror::Error)]
pub enum CalloutError {
    /// Encryption is required and the request carried no curve key header.
    #[error("missing Nats-Server-Xkey header, unencrypted requests are not accepted")]
    EncryptionRequired,

    /// Opening the sealed payload failed.
    #[error("cannot open sealed request: {0}")]
    DecryptionFailed(String),

    /// The payload is not a valid, correctly signed authorization request.
    #[error("{0}")]
    MalformedRequest(String),

    /// The identity token did not verify.
    #[error("{0}")]
    IdentityInvalid(#[source] TokenError),

    /// The verified identity has no linked account.
    #[error("{0}")]
    UnknownIdentity(#[source] AccountError),

    /// The credential failed validation or could not be signed.
    #[error("{0}")]
    CredentialInvalid(String),
}

impl CalloutError {
    /// Stable kind of this error.
    #[must_use]
    pub fn kind(&self) -> CalloutErrorKind {
        match self {
            Self::EncryptionRequired => CalloutErrorKind::EncryptionRequired,
            Self::DecryptionFailed(_) => CalloutErrorKind::DecryptionFailed,
            Self::MalformedRequest(_) => CalloutErrorKind::MalformedRequest,
            Self::IdentityInvalid(_) => CalloutErrorKind::IdentityInvalid,
            Self::UnknownIdentity(_) => CalloutErrorKind::UnknownIdentity,
            Self::CredentialInvalid(_) => CalloutErrorKind::CredentialInvalid,
        }
    }

    /// Error string placed in the authorization response.
    #[must_use]
    pub fn reply_text(&self) -> String {
        format!("{}: {self}", self.kind())
    }
}
