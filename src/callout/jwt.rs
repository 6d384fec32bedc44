//! Broker JWT envelope.
//!
//! Broker credentials and callout messages are compact JWTs whose header is
//! `{"typ":"JWT","alg":"ed25519-nkey"}` and whose signature is made by the
//! nkey named in the payload's `iss`. Verification therefore needs no key
//! configuration: the issuer's public nkey is the verification key, and the
//! caller decides whether that issuer is trusted.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Utc;
use nkeys::KeyPair;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Header algorithm of broker JWTs.
pub const ALGORITHM: &str = "ed25519-nkey";

/// Older spelling still emitted by some tooling.
const LEGACY_ALGORITHM: &str = "ed25519";

/// Envelope failures.
#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    /// Wrong shape, bad base64 or bad JSON.
    #[error("malformed broker jwt: {0}")]
    Malformed(String),

    /// Header names another algorithm.
    #[error("unsupported broker jwt algorithm: {0}")]
    Algorithm(String),

    /// Signature does not verify against the issuer nkey.
    #[error("broker jwt signature does not verify for issuer {0}")]
    Signature(String),

    /// `exp` is in the past.
    #[error("broker jwt expired")]
    Expired,

    /// Key material could not be used.
    #[error("nkey error: {0}")]
    Key(String),
}

#[derive(Debug, Serialize, Deserialize)]
struct Header {
    typ: String,
    alg: String,
}

/// Registered claims shared by every broker JWT, with the type-specific
/// section under `nats`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NatsClaims<T> {
    /// Content hash, assigned when signing.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub jti: String,
    /// Issued-at (Unix seconds), assigned when signing if zero.
    #[serde(default)]
    pub iat: i64,
    /// Public nkey of the signer.
    #[serde(default)]
    pub iss: String,
    /// Friendly name.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    /// Subject public key.
    #[serde(default)]
    pub sub: String,
    /// Audience.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub aud: String,
    /// Expiry (Unix seconds).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    /// Not-before (Unix seconds).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<i64>,
    /// Type-specific section.
    pub nats: T,
}

impl<T> NatsClaims<T> {
    /// Unsigned claims for `subject` with the given section.
    pub fn new(subject: impl Into<String>, nats: T) -> Self {
        Self {
            jti: String::new(),
            iat: 0,
            iss: String::new(),
            name: String::new(),
            sub: subject.into(),
            aud: String::new(),
            exp: None,
            nbf: None,
            nats,
        }
    }
}

impl<T: Serialize> NatsClaims<T> {
    /// Sign with `issuer`, filling in `iss`, `iat` (if unset) and `jti`.
    pub fn encode(&mut self, issuer: &KeyPair) -> Result<String, JwtError> {
        self.iss = issuer.public_key();
        if self.iat == 0 {
            self.iat = Utc::now().timestamp();
        }

        self.jti.clear();
        let unhashed = serde_json::to_vec(self).map_err(|e| JwtError::Malformed(e.to_string()))?;
        self.jti = hex::encode(Sha256::digest(&unhashed));

        let header = serde_json::to_vec(&Header {
            typ: "JWT".to_string(),
            alg: ALGORITHM.to_string(),
        })
        .map_err(|e| JwtError::Malformed(e.to_string()))?;
        let payload = serde_json::to_vec(self).map_err(|e| JwtError::Malformed(e.to_string()))?;

        let signing_input = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(header),
            URL_SAFE_NO_PAD.encode(payload)
        );
        let signature = issuer
            .sign(signing_input.as_bytes())
            .map_err(|e| JwtError::Key(e.to_string()))?;

        Ok(format!("{signing_input}.{}", URL_SAFE_NO_PAD.encode(signature)))
    }
}

impl<T: DeserializeOwned> NatsClaims<T> {
    /// Parse `token` and verify its signature against the `iss` nkey.
    pub fn decode(token: &str) -> Result<Self, JwtError> {
        let segments: Vec<&str> = token.trim().split('.').collect();
        let [header_b64, payload_b64, signature_b64] = segments.as_slice() else {
            return Err(JwtError::Malformed(format!(
                "expected 3 segments, found {}",
                segments.len()
            )));
        };

        let header: Header = serde_json::from_slice(&b64(header_b64)?)
            .map_err(|e| JwtError::Malformed(format!("header: {e}")))?;
        if header.alg != ALGORITHM && header.alg != LEGACY_ALGORITHM {
            return Err(JwtError::Algorithm(header.alg));
        }

        let claims: Self = serde_json::from_slice(&b64(payload_b64)?)
            .map_err(|e| JwtError::Malformed(format!("payload: {e}")))?;

        let signer =
            KeyPair::from_public_key(&claims.iss).map_err(|e| JwtError::Key(e.to_string()))?;
        let signature = b64(signature_b64)?;
        let signing_input = format!("{header_b64}.{payload_b64}");
        signer
            .verify(signing_input.as_bytes(), &signature)
            .map_err(|_| JwtError::Signature(claims.iss.clone()))?;

        if claims.exp.is_some_and(|exp| exp < Utc::now().timestamp()) {
            return Err(JwtError::Expired);
        }
        Ok(claims)
    }
}

fn b64(segment: &str) -> Result<Vec<u8>, JwtError> {
    URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|e| JwtError::Malformed(format!("base64: {e}")))
}
