//! Configuration management

use std::{collections::BTreeMap, path::Path, path::PathBuf, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};

use crate::accounts::{DEFAULT_MAX_LISTERS, Keyspace};
use crate::callout::BridgeSettings;
use crate::identity::claims::DEFAULT_TOKEN_TTL;
use crate::identity::{SigningSecret, TokenDecoder};
use crate::secrets::{ProviderSecrets, load_provider_secrets};
use crate::{Error, Result};

/// Environment prefix for overrides (`AMBLE_CALLOUT__ACCOUNT=...`).
pub const ENV_PREFIX: &str = "AMBLE_";

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Secret file locations
    pub secrets: SecretsConfig,
    /// Identity token issuing and verification
    pub identity: IdentityConfig,
    /// Account store layout
    pub accounts: AccountsConfig,
    /// Auth-callout bridge
    pub callout: CalloutConfig,
}

/// Where secret material lives on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecretsConfig {
    /// Base directory for relative secret paths
    pub dir: PathBuf,
    /// Raw 32-byte Ed25519 seed for identity tokens
    pub jwt_seed_file: PathBuf,
    /// OAuth client secrets per provider
    pub provider_secrets: BTreeMap<String, PathBuf>,
    /// Environment files to load before resolving `env:` references.
    /// Paths support ~ expansion. Loaded in order, later files override earlier.
    pub env_files: Vec<String>,
}

impl Default for SecretsConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("secrets"),
            jwt_seed_file: PathBuf::from("jwt.ed25519.seed"),
            provider_secrets: BTreeMap::from([(
                "github".to_string(),
                PathBuf::from("github.secrets.json"),
            )]),
            env_files: Vec::new(),
        }
    }
}

impl SecretsConfig {
    /// Path of the identity token seed.
    #[must_use]
    pub fn jwt_seed_path(&self) -> PathBuf {
        self.dir.join(&self.jwt_seed_file)
    }

    /// Path of a provider's client secrets, if configured.
    #[must_use]
    pub fn provider_secrets_path(&self, provider: &str) -> Option<PathBuf> {
        self.provider_secrets.get(provider).map(|file| self.dir.join(file))
    }

    /// Load a configured provider's client secrets.
    pub fn load_provider(&self, provider: &str) -> Result<ProviderSecrets> {
        let path = self.provider_secrets_path(provider).ok_or_else(|| {
            Error::Config(format!("no client secrets configured for provider {provider:?}"))
        })?;
        load_provider_secrets(&path)
    }
}

/// Identity token settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Issuer used when minting tokens for internal accounts
    pub issuer: String,
    /// Audience of minted tokens
    pub audience: Vec<String>,
    /// Lifetime of minted tokens
    #[serde(with = "humantime_serde")]
    pub token_ttl: Duration,
    /// Clock skew tolerated on `nbf`/`exp`
    #[serde(with = "humantime_serde")]
    pub leeway: Duration,
    /// Audiences accepted when verifying; empty disables the check
    pub expected_audience: Vec<String>,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            issuer: "amble".to_string(),
            audience: vec!["amble-web".to_string()],
            token_ttl: DEFAULT_TOKEN_TTL,
            leeway: Duration::ZERO,
            expected_audience: Vec::new(),
        }
    }
}

impl IdentityConfig {
    /// Token decoder honouring leeway and audience settings.
    pub fn decoder(&self, secret: &SigningSecret) -> Result<TokenDecoder> {
        Ok(TokenDecoder::from_secret(secret)?
            .with_leeway(self.leeway)
            .with_audience(&self.expected_audience))
    }
}

/// Account store layout
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountsConfig {
    /// Namespace of account records
    pub profile_namespace: String,
    /// Namespace of identity links
    pub link_namespace: String,
    /// Scope segment of the application's own record
    pub app_segment: String,
    /// Concurrent key listers allowed by the in-memory backend
    pub max_listers: usize,
}

impl Default for AccountsConfig {
    fn default() -> Self {
        Self {
            profile_namespace: "user_info".to_string(),
            link_namespace: "auth_link".to_string(),
            app_segment: "app".to_string(),
            max_listers: DEFAULT_MAX_LISTERS,
        }
    }
}

impl AccountsConfig {
    /// Keyspace described by this section.
    pub fn keyspace(&self) -> Result<Keyspace> {
        Ok(Keyspace::new(
            self.profile_namespace.clone(),
            self.link_namespace.clone(),
            self.app_segment.clone(),
        )?)
    }
}

/// Auth-callout bridge settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CalloutConfig {
    /// Broker account issued credentials belong to
    pub account: String,
    /// Account nkey seed used to sign credentials (`env:VAR` or literal)
    pub issuer_seed: Option<String>,
    /// Curve seed for sealed requests (`env:VAR` or literal)
    pub xkey_seed: Option<String>,
    /// Refuse unsealed requests; defaults to on when an xkey is configured
    pub require_encryption: Option<bool>,
    /// Credential lifetime; `0s` issues credentials without expiry
    #[serde(with = "humantime_serde")]
    pub credential_ttl: Duration,
}

impl Default for CalloutConfig {
    fn default() -> Self {
        Self {
            account: crate::callout::bridge::DEFAULT_ACCOUNT.to_string(),
            issuer_seed: None,
            xkey_seed: None,
            require_encryption: None,
            credential_ttl: crate::callout::bridge::DEFAULT_CREDENTIAL_TTL,
        }
    }
}

impl CalloutConfig {
    /// Effective encryption requirement.
    #[must_use]
    pub fn requires_encryption(&self) -> bool {
        self.require_encryption.unwrap_or(self.xkey_seed.is_some())
    }

    /// Bridge settings derived from this section.
    #[must_use]
    pub fn bridge_settings(&self) -> BridgeSettings {
        BridgeSettings {
            account: self.account.clone(),
            require_encryption: self.requires_encryption(),
            credential_ttl: (!self.credential_ttl.is_zero()).then_some(self.credential_ttl),
        }
    }
}

impl Config {
    /// Load configuration from an optional YAML file plus `AMBLE_` environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        let config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        // Before anything resolves `env:` references
        config.load_env_files();
        config.validate()?;

        Ok(config)
    }

    /// Reject settings the components would refuse later, with a config-level message.
    pub fn validate(&self) -> Result<()> {
        let accounts = &self.accounts;
        for (field, value) in [
            ("accounts.profile_namespace", &accounts.profile_namespace),
            ("accounts.link_namespace", &accounts.link_namespace),
            ("accounts.app_segment", &accounts.app_segment),
        ] {
            if value.is_empty() {
                return Err(Error::Config(format!("{field} must not be empty")));
            }
            if value.contains(['.', '*', '>']) || value.chars().any(char::is_whitespace) {
                return Err(Error::Config(format!(
                    "{field} {value:?} must be a single key segment"
                )));
            }
        }
        if accounts.profile_namespace == accounts.link_namespace {
            return Err(Error::Config(
                "accounts.profile_namespace and accounts.link_namespace must differ".to_string(),
            ));
        }
        if accounts.max_listers == 0 {
            return Err(Error::Config("accounts.max_listers must be positive".to_string()));
        }

        if self.callout.account.trim().is_empty() {
            return Err(Error::Config("callout.account must not be empty".to_string()));
        }
        if self.callout.require_encryption == Some(true) && self.callout.xkey_seed.is_none() {
            return Err(Error::Config(
                "callout.require_encryption needs callout.xkey_seed".to_string(),
            ));
        }

        if self.identity.issuer.is_empty() {
            return Err(Error::Config("identity.issuer must not be empty".to_string()));
        }
        if self.identity.token_ttl.is_zero() {
            return Err(Error::Config("identity.token_ttl must be positive".to_string()));
        }

        Ok(())
    }

    /// Load environment files into the process environment.
    /// Supports ~ expansion. Files that don't exist are silently skipped.
    fn load_env_files(&self) {
        for path_str in &self.secrets.env_files {
            let expanded = if path_str.starts_with('~') {
                if let Some(home) = dirs::home_dir() {
                    path_str.replacen('~', &home.display().to_string(), 1)
                } else {
                    path_str.clone()
                }
            } else {
                path_str.clone()
            };

            let path = Path::new(&expanded);
            if path.exists() {
                match dotenvy::from_path(path) {
                    Ok(()) => tracing::info!(path = %expanded, "Loaded env file"),
                    Err(e) => tracing::warn!(path = %expanded, error = %e, "Failed to load env file"),
                }
            } else {
                tracing::debug!(path = %expanded, "Env file not found (skipped)");
            }
        }
    }
}

/// Human-readable `Duration` serde (`"250ms"`, `"30s"`, `"5m"`, `"24h"`).
pub mod humantime_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    /// Serialize using the largest unit that divides the duration exactly.
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the serializer fails.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format(*duration))
    }

    /// Deserialize a duration string; a bare number means seconds.
    ///
    /// # Errors
    ///
    /// Returns a deserialization error if the string cannot be parsed as a duration.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse(&s).map_err(serde::de::Error::custom)
    }

    /// Parse `"250ms"`, `"30s"`, `"5m"`, `"24h"` or a bare number of seconds.
    pub fn parse(input: &str) -> Result<Duration, String> {
        let s = input.trim();
        let scaled = |value: u64, unit: u64| {
            value
                .checked_mul(unit)
                .map(Duration::from_secs)
                .ok_or_else(|| format!("duration {input:?} is out of range"))
        };
        let number = |digits: &str| {
            digits
                .trim()
                .parse::<u64>()
                .map_err(|e| format!("invalid duration {input:?}: {e}"))
        };

        // "ms" before "s" and "m"
        if let Some(ms) = s.strip_suffix("ms") {
            number(ms).map(Duration::from_millis)
        } else if let Some(hours) = s.strip_suffix('h') {
            scaled(number(hours)?, 3600)
        } else if let Some(mins) = s.strip_suffix('m') {
            scaled(number(mins)?, 60)
        } else if let Some(secs) = s.strip_suffix('s') {
            number(secs).map(Duration::from_secs)
        } else {
            number(s).map(Duration::from_secs)
        }
    }

    /// Inverse of [`parse`].
    #[must_use]
    pub fn format(duration: Duration) -> String {
        if duration.subsec_millis() != 0 {
            return format!("{}ms", duration.as_millis());
        }
        let secs = duration.as_secs();
        match secs {
            0 => "0s".to_string(),
            s if s % 3600 == 0 => format!("{}h", s / 3600),
            s if s % 60 == 0 => format!("{}m", s / 60),
            s => format!("{s}s"),
        }
    }
}
