//! Amble authentication library
//!
//! Identity tokens, account linking and the NATS auth-callout bridge.
//!
//! # Features
//!
//! - **Identity tokens**: Ed25519-signed JWTs carrying a provider identity and profile
//! - **Account store**: internal accounts on a key/value backend, linked to provider identities
//! - **Auth callout**: verifies the identity token a client presents to the broker and
//!   answers with a broker credential bound to the linked account
//!
//! # Flow
//!
//! ```text
//! provider login -> Login::login -> AccountStore (link + profile)
//!                -> TokenEncoder::encode -> identity token
//! broker CONNECT(auth_token) -> CalloutBridge -> TokenDecoder + resolve_link
//!                -> signed user credential
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod accounts;
pub mod callout;
pub mod cli;
pub mod config;
pub mod error;
pub mod identity;
pub mod ids;
pub mod secrets;
pub mod service;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
            .map_err(|e| Error::Config(format!("tracing: {e}")))?,
        _ => subscriber
            .with(fmt::layer().with_writer(std::io::stderr))
            .try_init()
            .map_err(|e| Error::Config(format!("tracing: {e}")))?,
    }

    Ok(())
}
