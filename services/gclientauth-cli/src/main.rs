//! gclientauth command-line front end
//!
//! Obtains (or reuses a cached) OAuth2 access token using the settings in a
//! TOML file, then prints the token metadata as JSON on stdout. Console
//! prompts and logs go to stderr.
//!
//! Flags:
//! - `--config <path>`: config file (else `CONFIG_PATH`, else `gclientauth.toml`)
//! - `--print-access-token`: also print the raw access token
//! - `--json-logs`: structured JSON log output

mod config;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;

const USAGE: &str = "usage: gclientauth [--config <path>] [--print-access-token] [--json-logs]";

/// Initialize tracing with LOG_LEVEL / RUST_LOG support, writing to stderr.
fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_env("LOG_LEVEL")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|a| a == "--help" || a == "-h") {
        println!("{USAGE}");
        return Ok(());
    }

    init_tracing(args.iter().any(|a| a == "--json-logs"));

    let config_path = Config::resolve_path(flag_value(&args, "--config"));
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        credential_file = %config.credential_file.display(),
        token_cache = %config.token_cache.display(),
        scopes = config.scopes.len(),
        "configuration loaded"
    );

    let authorized = gclientauth::get_token(config.auth_options())
        .await
        .context("unable to obtain an access token")?;

    if let Some(warning) = &authorized.cache_warning {
        eprintln!("(WARNING) {warning}");
    }

    let token = &authorized.token;
    let summary = serde_json::json!({
        "client_id": authorized.config.client_id,
        "token_type": token.kind(),
        "expiry": token.expiry,
        "has_refresh_token": token.refresh_token.is_some(),
        "from_cache": authorized.source == gclientauth::TokenSource::Cache,
    });
    println!("{summary}");

    if args.iter().any(|a| a == "--print-access-token") {
        println!("{}", token.access_token);
    }

    Ok(())
}
