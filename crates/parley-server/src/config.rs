use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, bail};

use parley_gateway::exchange::{DEFAULT_EXCHANGE, DEFAULT_PUBLISH_TIMEOUT};

/// Secrets shipped in sample `.env` files. Starting with one of these would
/// let anyone mint tokens.
const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me-to-a-random-string",
    "dev-secret-change-me",
];

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    /// Shared cache and broker. `None` runs everything in-process.
    pub redis_url: Option<String>,
    pub exchange: String,
    pub publish_timeout: Duration,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let jwt_secret = var("PARLEY_JWT_SECRET").unwrap_or_default();
        if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("PARLEY_JWT_SECRET is unset or still a placeholder; set it in your .env file");
        }

        let port = match var("PARLEY_PORT") {
            Some(v) => v.parse().with_context(|| format!("PARLEY_PORT is not a port: {v}"))?,
            None => 3000,
        };

        let publish_timeout = match var("PARLEY_PUBLISH_TIMEOUT_SECS") {
            Some(v) => {
                let secs: u64 = v
                    .parse()
                    .with_context(|| format!("PARLEY_PUBLISH_TIMEOUT_SECS is not a number: {v}"))?;
                if secs == 0 {
                    bail!("PARLEY_PUBLISH_TIMEOUT_SECS must be at least 1");
                }
                Duration::from_secs(secs)
            }
            None => DEFAULT_PUBLISH_TIMEOUT,
        };

        Ok(Self {
            host: var("PARLEY_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port,
            db_path: var("PARLEY_DB_PATH").unwrap_or_else(|| "parley.db".into()).into(),
            jwt_secret,
            redis_url: var("PARLEY_REDIS_URL"),
            exchange: var("PARLEY_EXCHANGE").unwrap_or_else(|| DEFAULT_EXCHANGE.into()),
            publish_timeout,
        })
    }
}
