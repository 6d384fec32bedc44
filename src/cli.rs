//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Amble authentication tooling - identity tokens, account links, broker auth callout
#[derive(Parser, Debug)]
#[command(name = "amble-auth")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "AMBLE_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "AMBLE_LOG_LEVEL", global = true)]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "AMBLE_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand (defaults to check-config)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Generate key material: an identity seed file plus broker account and curve seeds
    Keygen {
        /// Where to write the raw Ed25519 seed (defaults to the configured path)
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Issue an identity token signed with the configured seed
    Mint {
        /// Identity subject (provider user id)
        #[arg(required = true)]
        subject: String,

        /// Issuer (defaults to identity.issuer)
        #[arg(long)]
        issuer: Option<String>,

        /// Audience entries (defaults to identity.audience)
        #[arg(long = "aud")]
        audience: Vec<String>,

        /// Internal user id to embed
        #[arg(long)]
        uid: Option<String>,

        /// Display name
        #[arg(long)]
        name: Option<String>,

        /// Email address
        #[arg(long)]
        email: Option<String>,

        /// Avatar URL
        #[arg(long)]
        picture: Option<String>,

        /// Token lifetime, e.g. "30m" (defaults to identity.token_ttl)
        #[arg(long)]
        ttl: Option<String>,
    },

    /// Verify an identity token and print its claims as JSON
    Verify {
        /// Compact token
        #[arg(required = true)]
        token: String,
    },

    /// Evaluate a key pattern against subjects
    Match {
        /// Pattern, e.g. "user_info.*.app"
        #[arg(required = true)]
        pattern: String,

        /// Subjects to test
        #[arg(required = true)]
        subjects: Vec<String>,
    },

    /// Validate configuration and print the effective settings as YAML
    CheckConfig,
}
