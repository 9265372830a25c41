use std::env;
use std::time::Duration;

use anyhow::{Context, Result};

/// Per-service refresh cadences plus the shared HTTP timeout.
///
/// Every value has a default and an environment override, so cadences are
/// configuration rather than constants baked into each backend. YNAB's
/// default is deliberately slower than the rest (its API rate limits are
/// tighter).
#[derive(Debug, Clone)]
pub struct PluginConfig {
    pub gmail_refresh: Duration,
    pub fastmail_refresh: Duration,
    pub gitlab_refresh: Duration,
    pub todoist_refresh: Duration,
    pub ynab_refresh: Duration,
    pub marvin_refresh: Duration,
    pub http_timeout: Duration,
}

const DEFAULT_REFRESH_SECONDS: u64 = 60;
const DEFAULT_YNAB_REFRESH_SECONDS: u64 = 120;
const DEFAULT_HTTP_TIMEOUT_SECONDS: u64 = 30;

fn seconds_from_env(var: &str, default: u64) -> Result<Duration> {
    let seconds = match env::var(var) {
        Ok(value) => value
            .parse::<u64>()
            .with_context(|| format!("{var} must be a valid number of seconds"))?,
        Err(_) => default,
    };
    Ok(Duration::from_secs(seconds))
}

impl PluginConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            gmail_refresh: seconds_from_env("GMAIL_REFRESH_SECONDS", DEFAULT_REFRESH_SECONDS)?,
            fastmail_refresh: seconds_from_env(
                "FASTMAIL_REFRESH_SECONDS",
                DEFAULT_REFRESH_SECONDS,
            )?,
            gitlab_refresh: seconds_from_env("GITLAB_REFRESH_SECONDS", DEFAULT_REFRESH_SECONDS)?,
            todoist_refresh: seconds_from_env("TODOIST_REFRESH_SECONDS", DEFAULT_REFRESH_SECONDS)?,
            ynab_refresh: seconds_from_env("YNAB_REFRESH_SECONDS", DEFAULT_YNAB_REFRESH_SECONDS)?,
            marvin_refresh: seconds_from_env("MARVIN_REFRESH_SECONDS", DEFAULT_REFRESH_SECONDS)?,
            http_timeout: seconds_from_env(
                "HTTP_TIMEOUT_SECONDS",
                DEFAULT_HTTP_TIMEOUT_SECONDS,
            )?,
        })
    }
}
