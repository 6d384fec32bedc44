//! Secret loading.
//!
//! Seeds and client secrets live in files under the configured secrets
//! directory; nkey seeds may also be given inline or as `env:VAR`
//! references resolved from the process environment.

use std::fs;
use std::path::Path;

use dashmap::DashMap;
use nkeys::{KeyPair, XKey};
use serde::Deserialize;
use zeroize::Zeroizing;

use crate::identity::SigningSecret;
use crate::identity::codec::SEED_LEN;
use crate::{Error, Result};

/// Prefix marking an environment variable reference.
pub const ENV_REFERENCE: &str = "env:";

/// OAuth client credentials of one provider.
#[derive(Clone, Deserialize)]
pub struct ProviderSecrets {
    /// OAuth client id
    pub client_id: String,
    /// OAuth client secret
    pub client_secret: String,
}

impl std::fmt::Debug for ProviderSecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderSecrets")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

/// Read a raw 32-byte Ed25519 seed.
pub fn load_jwt_seed(path: &Path) -> Result<SigningSecret> {
    let bytes = Zeroizing::new(fs::read(path).map_err(|e| {
        Error::secret(format!("read jwt seed {}: {e}", path.display()))
    })?);
    if bytes.len() != SEED_LEN {
        return Err(Error::secret(format!(
            "jwt seed {} has {} bytes, expected {SEED_LEN}",
            path.display(),
            bytes.len()
        )));
    }
    Ok(SigningSecret::from_seed(&bytes)?)
}

/// Write `secret` as a raw seed file, refusing to overwrite.
pub fn write_jwt_seed(path: &Path, secret: &SigningSecret) -> Result<()> {
    if path.exists() {
        return Err(Error::secret(format!(
            "{} already exists, refusing to overwrite",
            path.display()
        )));
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, secret.seed_bytes())?;
    Ok(())
}

/// Read `{client_id, client_secret}` JSON; both fields must be non-empty.
pub fn load_provider_secrets(path: &Path) -> Result<ProviderSecrets> {
    let body = fs::read(path).map_err(|e| {
        Error::secret(format!("read provider secrets {}: {e}", path.display()))
    })?;
    let secrets: ProviderSecrets = serde_json::from_slice(&body)?;
    if secrets.client_id.is_empty() {
        return Err(Error::secret(format!("missing client id in {}", path.display())));
    }
    if secrets.client_secret.is_empty() {
        return Err(Error::secret(format!(
            "missing client secret in {}",
            path.display()
        )));
    }
    Ok(secrets)
}

/// Resolve `env:VAR` to the variable's value; anything else is returned as is.
pub fn resolve_value(value: &str) -> Result<Zeroizing<String>> {
    match value.strip_prefix(ENV_REFERENCE) {
        Some(var) => {
            let var = var.trim();
            let resolved = std::env::var(var)
                .map_err(|_| Error::secret(format!("environment variable {var} is not set")))?;
            if resolved.is_empty() {
                return Err(Error::secret(format!("environment variable {var} is empty")));
            }
            Ok(Zeroizing::new(resolved))
        }
        None => Ok(Zeroizing::new(value.to_string())),
    }
}

/// Resolves secret references once per process.
pub struct SecretResolver {
    cache: DashMap<String, Zeroizing<String>>,
}

impl SecretResolver {
    /// Create a new secret resolver
    #[must_use]
    pub fn new() -> Self {
        Self {
            cache: DashMap::new(),
        }
    }

    /// Resolve `value`, reusing earlier lookups of the same reference.
    pub fn resolve(&self, value: &str) -> Result<Zeroizing<String>> {
        if let Some(cached) = self.cache.get(value) {
            return Ok(cached.clone());
        }
        let resolved = resolve_value(value)?;
        if value.starts_with(ENV_REFERENCE) {
            self.cache.insert(value.to_string(), resolved.clone());
        }
        Ok(resolved)
    }

    /// Account key pair from an nkey seed reference.
    pub fn account_key(&self, value: &str) -> Result<KeyPair> {
        let seed = self.resolve(value)?;
        let key = KeyPair::from_seed(seed.trim())
            .map_err(|e| Error::secret(format!("invalid account seed: {e}")))?;
        if !key.public_key().starts_with('A') {
            return Err(Error::secret("seed is not an account nkey".to_string()));
        }
        Ok(key)
    }

    /// Curve key from a seed reference.
    pub fn curve_key(&self, value: &str) -> Result<XKey> {
        let seed = self.resolve(value)?;
        XKey::from_seed(seed.trim()).map_err(|e| Error::secret(format!("invalid curve seed: {e}")))
    }
}

impl Default for SecretResolver {
    fn default() -> Self {
        Self::new()
    }
}
