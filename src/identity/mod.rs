//! Identity tokens issued by the application.
//!
//! An identity token is a compact, three-segment JWS whose payload carries
//! [`IdentityClaims`] and whose signature is an Ed25519 signature made with
//! the application's signing seed.
//!
//! # Flow
//!
//! ```text
//! external login (GitHub, ...)
//!   -> GithubUserInfo::claims()      typed claims, validated at construction
//!   -> TokenEncoder::encode()        EdDSA compact token
//!   ... handed to the broker client as its connect credential ...
//!   -> TokenDecoder::decode()        alg pin, signature, nbf/exp
//! ```
//!
//! Verification never consults the token's own header for key material; the
//! header is only read to reject algorithms other than `EdDSA`.

pub mod claims;
pub mod codec;
pub mod github;

pub use claims::{ClaimsBuilder, IdentityClaims, Profile};
pub use codec::{SigningSecret, TokenDecoder, TokenEncoder};
pub use github::GithubUserInfo;

/// Errors raised while building, encoding or verifying identity tokens.
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    /// Structurally invalid token or claims payload.
    #[error("malformed token: {0}")]
    Malformed(String),

    /// The signature does not verify against the configured public key.
    #[error("invalid token signature")]
    InvalidSignature,

    /// The header declares an algorithm other than `EdDSA`.
    #[error("unsupported token algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// The token's `exp` is in the past.
    #[error("token expired")]
    Expired,

    /// The token's `nbf` is in the future.
    #[error("token not yet valid")]
    NotYetValid,

    /// A registered claim (audience, issuer) does not match expectations.
    #[error("token claim mismatch: {0}")]
    ClaimMismatch(String),

    /// An optional claim was requested but is absent.
    #[error("token has no '{0}' claim")]
    MissingClaim(&'static str),

    /// Claims rejected at construction time.
    #[error("invalid claims: {0}")]
    InvalidClaims(String),

    /// Signing seed has the wrong size.
    #[error("signing seed must be {expected} bytes, got {actual}")]
    SeedLength {
        /// Required seed length.
        expected: usize,
        /// Length that was supplied.
        actual: usize,
    },

    /// Key material could not be converted for the signer.
    #[error("signing key error: {0}")]
    Key(String),
}

/// Verifies presented identity tokens.
///
/// This is the seam the authorization bridge depends on; [`TokenDecoder`]
/// is the production implementation.
pub trait IdentityVerifier: Send + Sync + 'static {
    /// Verify `token` and return its claims.
    fn verify(&self, token: &str) -> Result<IdentityClaims, TokenError>;
}

impl IdentityVerifier for TokenDecoder {
    fn verify(&self, token: &str) -> Result<IdentityClaims, TokenError> {
        self.decode(token)
    }
}
