//! amble-auth - key material, identity tokens and configuration checks

use std::process::ExitCode;

use anyhow::Context;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use clap::Parser;
use nkeys::{KeyPair, XKey};
use tracing::{debug, error, warn};

use amble_auth::{
    accounts::SubjectPattern,
    cli::{Cli, Command},
    config::{Config, humantime_serde},
    identity::{IdentityClaims, Profile, SigningSecret, TokenEncoder},
    ids::UserId,
    secrets::{self, SecretResolver},
    service::AuthService,
    setup_tracing,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Failed to load configuration");
            eprintln!("❌ {e}");
            return ExitCode::FAILURE;
        }
    };

    let result = match cli.command {
        Some(Command::Keygen { out }) => run_keygen(&config, out),
        Some(Command::Mint {
            subject,
            issuer,
            audience,
            uid,
            name,
            email,
            picture,
            ttl,
        }) => run_mint(
            &config,
            MintArgs {
                subject,
                issuer,
                audience,
                uid,
                profile: Profile {
                    uid: None,
                    name,
                    email,
                    picture,
                },
                ttl,
            },
        ),
        Some(Command::Verify { token }) => run_verify(&config, &token),
        Some(Command::Match { pattern, subjects }) => run_match(&pattern, &subjects),
        Some(Command::CheckConfig) | None => run_check_config(&config),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("❌ {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run_keygen(config: &Config, out: Option<std::path::PathBuf>) -> anyhow::Result<ExitCode> {
    let path = out.unwrap_or_else(|| config.secrets.jwt_seed_path());
    let secret = SigningSecret::generate();
    secrets::write_jwt_seed(&path, &secret)
        .with_context(|| format!("writing identity seed to {}", path.display()))?;

    let account = KeyPair::new_account();
    let account_seed = account.seed().context("encoding account seed")?;
    let xkey = XKey::new();
    let xkey_seed = xkey.seed().context("encoding curve seed")?;

    println!("✅ Identity seed written to {}", path.display());
    println!(
        "   Verifying key: {}",
        URL_SAFE_NO_PAD.encode(secret.verifying_key().as_bytes())
    );
    println!();
    println!("Broker callout issuer (trust this account in the broker config):");
    println!("   public:      {}", account.public_key());
    println!("   issuer_seed: {account_seed}");
    println!("Curve key for sealed callout requests:");
    println!("   public:      {}", xkey.public_key());
    println!("   xkey_seed:   {xkey_seed}");
    Ok(ExitCode::SUCCESS)
}

struct MintArgs {
    subject: String,
    issuer: Option<String>,
    audience: Vec<String>,
    uid: Option<String>,
    profile: Profile,
    ttl: Option<String>,
}

fn run_mint(config: &Config, args: MintArgs) -> anyhow::Result<ExitCode> {
    let secret = load_secret(config)?;

    let ttl = match args.ttl {
        Some(ref ttl) => humantime_serde::parse(ttl).map_err(anyhow::Error::msg)?,
        None => config.identity.token_ttl,
    };
    let audience = if args.audience.is_empty() {
        config.identity.audience.clone()
    } else {
        args.audience
    };
    let issuer = args
        .issuer
        .unwrap_or_else(|| config.identity.issuer.clone());

    let mut builder = IdentityClaims::builder(issuer, args.subject)
        .audience(audience)
        .ttl(ttl)
        .profile(args.profile);
    if let Some(ref uid) = args.uid {
        builder = builder.user_id(UserId::parse(uid).context("parsing --uid")?);
    }
    let claims = builder.build()?;
    let token = TokenEncoder::new(&secret)?.encode(&claims)?;
    debug!(token_len = token.len(), jti = %claims.token_id(), "Minted identity token");

    println!("{token}");
    Ok(ExitCode::SUCCESS)
}

fn run_verify(config: &Config, token: &str) -> anyhow::Result<ExitCode> {
    let secret = load_secret(config)?;
    let decoder = config.identity.decoder(&secret)?;

    match decoder.decode(token.trim()) {
        Ok(claims) => {
            println!("{}", serde_json::to_string_pretty(&claims)?);
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            eprintln!("❌ {e}");
            Ok(ExitCode::FAILURE)
        }
    }
}

fn run_match(pattern: &str, subjects: &[String]) -> anyhow::Result<ExitCode> {
    let pattern = SubjectPattern::parse(pattern)?;
    let mut matched = false;
    for subject in subjects {
        let hit = pattern.matches(subject);
        matched |= hit;
        println!("{} {subject}", if hit { "✅" } else { "  " });
    }
    Ok(if matched {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn run_check_config(config: &Config) -> anyhow::Result<ExitCode> {
    config.accounts.keyspace()?;

    if config.callout.issuer_seed.is_some() {
        let secret = load_secret(config)?;
        let service = AuthService::new(config, &secret, &SecretResolver::new())
            .context("assembling callout bridge")?;
        println!("# callout issuer: {}", service.bridge().issuer_public_key());
        if let Some(xkey) = service.bridge().xkey_public_key() {
            println!("# callout xkey:   {xkey}");
        }
    }

    for provider in config.secrets.provider_secrets.keys() {
        match config.secrets.load_provider(provider) {
            Ok(client) => println!("# {provider} client id: {}", client.client_id),
            Err(e) => {
                warn!(provider = %provider, error = %e, "Provider client secrets unavailable");
                println!("# {provider}: {e}");
            }
        }
    }

    print!("{}", serde_yaml::to_string(config)?);
    Ok(ExitCode::SUCCESS)
}

fn load_secret(config: &Config) -> anyhow::Result<SigningSecret> {
    let path = config.secrets.jwt_seed_path();
    secrets::load_jwt_seed(&path).with_context(|| format!("loading identity seed {}", path.display()))
}
