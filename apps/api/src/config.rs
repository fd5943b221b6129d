use std::time::Duration;

use anyhow::{Context, Result};

use crate::usage::models::QuotaPolicy;

/// Application configuration loaded from environment variables.
/// Fails at startup if required variables are missing or malformed.
#[derive(Debug, Clone)]
pub struct Config {
    /// Unset runs the service on in-memory stores (local development only).
    pub database_url: Option<String>,
    pub openai_api_key: String,
    pub openai_base_url: String,
    pub port: u16,
    pub rust_log: String,
    /// Upper bound on a single generation call, retries included.
    pub generation_timeout: Duration,
    pub free_plan: QuotaPolicy,
    pub premium_plan: QuotaPolicy,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        Ok(Config {
            database_url: std::env::var("DATABASE_URL")
                .ok()
                .filter(|url| !url.trim().is_empty()),
            openai_api_key: require_env("OPENAI_API_KEY")?,
            openai_base_url: std::env::var("OPENAI_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            port: parse_env("PORT", 8080)?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            generation_timeout: Duration::from_secs(parse_env("GENERATION_TIMEOUT_SECS", 8)?),
            free_plan: QuotaPolicy {
                max_daily_api_calls: parse_env("FREE_DAILY_API_CALLS", 20)?,
                daily_credits: parse_env("FREE_DAILY_CREDITS", 5)?,
            },
            premium_plan: QuotaPolicy {
                max_daily_api_calls: parse_env("PREMIUM_DAILY_API_CALLS", 200)?,
                daily_credits: parse_env("PREMIUM_DAILY_CREDITS", 100)?,
            },
        })
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("Environment variable '{key}' has an invalid value: {raw}")),
        Err(_) => Ok(default),
    }
}
