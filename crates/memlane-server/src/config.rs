use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, bail};
use chrono::Duration;

/// Secrets shipped in sample `.env` files. Refusing them keeps a copied
/// config from signing real tokens.
const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me",
    "changeme",
    "secret",
    "your-secret-key",
    "dev-secret-change-me",
];

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub jwt_secret: String,
    pub db_path: PathBuf,
    pub uploads_dir: PathBuf,
    pub host: String,
    pub port: u16,
    pub session_ttl: Duration,
    pub share_ttl: Duration,
    pub hash_cost: u32,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the config from any key lookup; `from_env` passes the process
    /// environment.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let jwt_secret = lookup("MEMLANE_JWT_SECRET").unwrap_or_default();
        if jwt_secret.trim().is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("MEMLANE_JWT_SECRET is unset or still a placeholder; set it in .env and restart");
        }

        let session_hours: i64 = parse_or(&lookup, "MEMLANE_SESSION_TTL_HOURS", 720)?;
        let share_hours: i64 = parse_or(&lookup, "MEMLANE_SHARE_TTL_HOURS", 168)?;
        if session_hours <= 0 || share_hours <= 0 {
            bail!("Token lifetimes must be positive");
        }

        let hash_cost: u32 = parse_or(&lookup, "MEMLANE_HASH_COST", 3)?;
        if hash_cost == 0 {
            bail!("MEMLANE_HASH_COST must be at least 1");
        }

        Ok(Self {
            jwt_secret,
            db_path: lookup("MEMLANE_DB_PATH")
                .unwrap_or_else(|| "memories.db".into())
                .into(),
            uploads_dir: lookup("MEMLANE_UPLOADS_DIR")
                .unwrap_or_else(|| "./uploads".into())
                .into(),
            host: lookup("MEMLANE_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port: parse_or(&lookup, "MEMLANE_PORT", 4001)?,
            session_ttl: Duration::hours(session_hours),
            share_ttl: Duration::hours(share_hours),
            hash_cost,
        })
    }

    pub fn addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid listen address {}:{}", self.host, self.port))
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> anyhow::Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} has an invalid value: {}", key, raw)),
        None => Ok(default),
    }
}
