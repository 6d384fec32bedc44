//! Token codec: EdDSA signing and verification of identity tokens.
//!
//! # Verification order
//!
//! 1. Split into three segments; anything else is [`TokenError::Malformed`].
//! 2. If the header is readable and names an algorithm other than `EdDSA`,
//!    reject with [`TokenError::UnsupportedAlgorithm`] before touching the
//!    signature.
//! 3. Verify the Ed25519 signature over `header.payload` with the configured
//!    public key (strict verification, no malleable signatures).
//! 4. Hand the token to `jsonwebtoken` pinned to `EdDSA` for `nbf`/`exp`
//!    (and optional audience) validation and claims extraction.
//!
//! Because the signature is checked over the raw segments, altering any
//! byte of a valid token yields [`TokenError::InvalidSignature`] unless the
//! alteration breaks the three-segment shape or rewrites the header into a
//! different algorithm.

use std::fmt;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use ed25519_dalek::pkcs8::EncodePrivateKey;
use ed25519_dalek::{Signature, SigningKey, VerifyingKey};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::RngExt;
use serde::Deserialize;
use tracing::debug;
use zeroize::Zeroizing;

use super::TokenError;
use super::claims::IdentityClaims;

/// Length of an Ed25519 seed in bytes.
pub const SEED_LEN: usize = 32;

/// Ed25519 signing seed for identity tokens.
///
/// The seed is zeroized on drop and never printed.
#[derive(Clone)]
pub struct SigningSecret {
    seed: Zeroizing<[u8; SEED_LEN]>,
}

impl SigningSecret {
    /// Wrap a raw seed. Anything but exactly 32 bytes is rejected.
    pub fn from_seed(bytes: &[u8]) -> Result<Self, TokenError> {
        let seed: [u8; SEED_LEN] = bytes.try_into().map_err(|_| TokenError::SeedLength {
            expected: SEED_LEN,
            actual: bytes.len(),
        })?;
        Ok(Self {
            seed: Zeroizing::new(seed),
        })
    }

    /// Generate a fresh random seed.
    #[must_use]
    pub fn generate() -> Self {
        let seed: [u8; SEED_LEN] = rand::rng().random();
        Self {
            seed: Zeroizing::new(seed),
        }
    }

    /// Raw seed bytes, for persisting with `keygen`.
    #[must_use]
    pub fn seed_bytes(&self) -> &[u8; SEED_LEN] {
        &self.seed
    }

    /// The matching public key.
    #[must_use]
    pub fn verifying_key(&self) -> VerifyingKey {
        SigningKey::from_bytes(&self.seed).verifying_key()
    }
}

impl fmt::Debug for SigningSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningSecret")
            .field("public_key", &URL_SAFE_NO_PAD.encode(self.verifying_key().as_bytes()))
            .finish_non_exhaustive()
    }
}

/// Signs identity claims into compact tokens.
pub struct TokenEncoder {
    key: EncodingKey,
    header: Header,
}

impl TokenEncoder {
    /// Build an encoder from the signing seed.
    pub fn new(secret: &SigningSecret) -> Result<Self, TokenError> {
        let der = SigningKey::from_bytes(&secret.seed)
            .to_pkcs8_der()
            .map_err(|e| TokenError::Key(e.to_string()))?;

        let mut header = Header::new(Algorithm::EdDSA);
        header.typ = Some("JWT".to_string());

        Ok(Self {
            key: EncodingKey::from_ed_der(der.as_bytes()),
            header,
        })
    }

    /// Encode and sign `claims`.
    pub fn encode(&self, claims: &IdentityClaims) -> Result<String, TokenError> {
        jsonwebtoken::encode(&self.header, claims, &self.key)
            .map_err(|e| TokenError::Malformed(format!("cannot encode claims: {e}")))
    }
}

/// Verifies compact tokens against a single Ed25519 public key.
pub struct TokenDecoder {
    verifying_key: VerifyingKey,
    key: DecodingKey,
    validation: Validation,
}

/// Only the field needed for the algorithm pin.
#[derive(Deserialize)]
struct RawHeader {
    alg: String,
}

impl TokenDecoder {
    /// Build a decoder for tokens signed by `verifying_key`.
    ///
    /// Defaults: zero clock leeway, no audience check.
    pub fn new(verifying_key: VerifyingKey) -> Result<Self, TokenError> {
        let key = DecodingKey::from_ed_components(&URL_SAFE_NO_PAD.encode(verifying_key.as_bytes()))
            .map_err(|e| TokenError::Key(e.to_string()))?;

        let mut validation = Validation::new(Algorithm::EdDSA);
        validation.leeway = 0;
        validation.validate_nbf = true;
        validation.validate_aud = false;
        validation.set_required_spec_claims(&["exp", "nbf", "iss", "sub"]);

        Ok(Self {
            verifying_key,
            key,
            validation,
        })
    }

    /// Decoder for the public half of `secret`.
    pub fn from_secret(secret: &SigningSecret) -> Result<Self, TokenError> {
        Self::new(secret.verifying_key())
    }

    /// Tolerate clock skew of `leeway` on `nbf` and `exp`.
    #[must_use]
    pub fn with_leeway(mut self, leeway: Duration) -> Self {
        self.validation.leeway = leeway.as_secs();
        self
    }

    /// Require one of `audience` in the token's `aud`. Empty disables the check.
    #[must_use]
    pub fn with_audience(mut self, audience: &[String]) -> Self {
        if audience.is_empty() {
            self.validation.validate_aud = false;
        } else {
            self.validation.set_audience(audience);
        }
        self
    }

    /// Verify `token` and return its claims.
    pub fn decode(&self, token: &str) -> Result<IdentityClaims, TokenError> {
        let segments: Vec<&str> = token.split('.').collect();
        let [header_b64, payload_b64, signature_b64] = segments.as_slice() else {
            return Err(TokenError::Malformed(format!(
                "expected 3 segments, found {}",
                segments.len()
            )));
        };

        let header = read_header(header_b64);
        if let Some(alg) = header.as_ref().ok().map(|h| h.alg.as_str())
            && alg != "EdDSA"
        {
            debug!(alg = %alg, "Rejected identity token with foreign algorithm");
            return Err(TokenError::UnsupportedAlgorithm(alg.to_string()));
        }

        let signature = URL_SAFE_NO_PAD
            .decode(signature_b64)
            .ok()
            .and_then(|raw| Signature::from_slice(&raw).ok())
            .ok_or(TokenError::InvalidSignature)?;
        let signed = &token[..header_b64.len() + 1 + payload_b64.len()];
        self.verifying_key
            .verify_strict(signed.as_bytes(), &signature)
            .map_err(|_| TokenError::InvalidSignature)?;

        header?;

        let data = jsonwebtoken::decode::<IdentityClaims>(token, &self.key, &self.validation)
            .map_err(map_jwt_error)?;
        data.claims.check()?;
        Ok(data.claims)
    }
}

fn read_header(segment: &str) -> Result<RawHeader, TokenError> {
    let raw = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|e| TokenError::Malformed(format!("header is not base64url: {e}")))?;
    serde_json::from_slice(&raw).map_err(|e| TokenError::Malformed(format!("header: {e}")))
}

fn map_jwt_error(err: jsonwebtoken::errors::Error) -> TokenError {
    match err.kind() {
        ErrorKind::ExpiredSignature => TokenError::Expired,
        ErrorKind::ImmatureSignature => TokenError::NotYetValid,
        ErrorKind::InvalidSignature => TokenError::InvalidSignature,
        ErrorKind::InvalidAlgorithm => TokenError::UnsupportedAlgorithm("header mismatch".into()),
        ErrorKind::InvalidAudience => TokenError::ClaimMismatch("aud".into()),
        ErrorKind::InvalidIssuer => TokenError::ClaimMismatch("iss".into()),
        ErrorKind::MissingRequiredClaim(claim) => {
            TokenError::Malformed(format!("missing required claim '{claim}'"))
        }
        _ => TokenError::Malformed(err.to_string()),
    }
}
