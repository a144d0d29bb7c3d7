use serde::Deserialize;

use crate::approval::coordinator::{MAX_TIMEOUT_MINUTES, MIN_TIMEOUT_MINUTES};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreMode {
    Postgres,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    pub store_mode: StoreMode,
    pub admin_key: Option<String>,
    pub telegram_bot_token: Option<String>,
    pub telegram_chat_id: Option<String>,
    /// Comma-separated list of webhook URLs to notify on terminal transitions.
    pub webhook_urls: Vec<String>,
    pub webhook_secret: Option<String>,
    /// Deadline offset for new approvals when the caller doesn't pass one.
    /// Set via OVERSEER_APPROVAL_TIMEOUT_MINUTES. Default: 30, range 1–1440.
    pub approval_timeout_minutes: i64,
    /// Sweep tick interval. Set via OVERSEER_SWEEP_INTERVAL_SECONDS.
    /// Default: 30, range 10–300.
    pub sweep_interval_seconds: u64,
    /// Per-tick cap on simultaneous expire operations.
    /// Set via OVERSEER_MAX_CONCURRENT_EXPIRES. Default: 10, range 1–100.
    pub max_concurrent_expires: usize,
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();

    let store_mode = match std::env::var("OVERSEER_STORE")
        .unwrap_or_else(|_| "postgres".into())
        .to_lowercase()
        .as_str()
    {
        "postgres" => StoreMode::Postgres,
        "memory" => StoreMode::Memory,
        other => anyhow::bail!("OVERSEER_STORE must be 'postgres' or 'memory', got '{}'", other),
    };

    Ok(Config {
        port: std::env::var("OVERSEER_PORT")
            .unwrap_or_else(|_| "8088".into())
            .parse()
            .unwrap_or(8088),
        database_url: std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "postgres://localhost/overseer".into()),
        store_mode,
        admin_key: std::env::var("OVERSEER_ADMIN_KEY").ok(),
        telegram_bot_token: std::env::var("OVERSEER_TELEGRAM_BOT_TOKEN").ok(),
        telegram_chat_id: std::env::var("OVERSEER_TELEGRAM_CHAT_ID").ok(),
        webhook_urls: std::env::var("OVERSEER_WEBHOOK_URLS")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect(),
        webhook_secret: std::env::var("OVERSEER_WEBHOOK_SECRET").ok(),
        approval_timeout_minutes: clamped(
            "OVERSEER_APPROVAL_TIMEOUT_MINUTES",
            env_i64("OVERSEER_APPROVAL_TIMEOUT_MINUTES", 30),
            MIN_TIMEOUT_MINUTES,
            MAX_TIMEOUT_MINUTES,
        ),
        sweep_interval_seconds: clamped(
            "OVERSEER_SWEEP_INTERVAL_SECONDS",
            env_i64("OVERSEER_SWEEP_INTERVAL_SECONDS", 30),
            10,
            300,
        ) as u64,
        max_concurrent_expires: clamped(
            "OVERSEER_MAX_CONCURRENT_EXPIRES",
            env_i64("OVERSEER_MAX_CONCURRENT_EXPIRES", 10),
            1,
            100,
        ) as usize,
    })
}

fn env_i64(name: &str, default: i64) -> i64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Force `value` into `[lo, hi]`, warning when an out-of-range setting is
/// pulled back into bounds.
fn clamped(name: &str, value: i64, lo: i64, hi: i64) -> i64 {
    if value < lo || value > hi {
        tracing::warn!(
            "{} = {} is outside [{}, {}], clamping",
            name,
            value,
            lo,
            hi
        );
    }
    value.clamp(lo, hi)
}
