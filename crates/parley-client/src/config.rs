//! Client configuration loaded from environment variables.
//!
//! Every setting has a default so the client starts against a local server
//! with zero configuration.

use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use parley_net::ReconnectPolicy;
use parley_shared::constants::{
    DEFAULT_API_URL, DEFAULT_RECONNECT_ATTEMPTS, DEFAULT_RECONNECT_BASE_MS, DEFAULT_TOAST_MS,
    DEFAULT_TYPING_IDLE_MS,
};

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base address of the chat API. The push address is derived from it.
    /// Env: `PARLEY_API_URL`
    /// Default: `http://localhost:8000`
    pub api_url: Url,

    /// Credential database. `None` uses the platform data directory.
    /// Env: `PARLEY_DB_PATH`
    pub db_path: Option<PathBuf>,

    /// Env: `PARLEY_RECONNECT_ATTEMPTS`, `PARLEY_RECONNECT_BASE_MS`
    /// Default: 5 attempts from 1000 ms
    pub reconnect: ReconnectPolicy,

    /// Env: `PARLEY_TYPING_IDLE_MS`
    /// Default: 1000 ms
    pub typing_idle: Duration,

    /// Env: `PARLEY_TOAST_MS`
    /// Default: 5000 ms
    pub toast_ttl: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            db_path: None,
            reconnect: ReconnectPolicy {
                max_attempts: DEFAULT_RECONNECT_ATTEMPTS,
                base_delay: Duration::from_millis(DEFAULT_RECONNECT_BASE_MS),
            },
            typing_idle: Duration::from_millis(DEFAULT_TYPING_IDLE_MS),
            toast_ttl: Duration::from_millis(DEFAULT_TOAST_MS),
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(raw) = lookup("PARLEY_API_URL") {
            match Url::parse(raw.trim()) {
                Ok(url) if matches!(url.scheme(), "http" | "https") => config.api_url = url,
                _ => {
                    tracing::warn!(value = %raw, "Invalid PARLEY_API_URL, using default");
                }
            }
        }

        if let Some(path) = lookup("PARLEY_DB_PATH") {
            if !path.trim().is_empty() {
                config.db_path = Some(PathBuf::from(path));
            }
        }

        if let Some(n) = parse_var(&lookup, "PARLEY_RECONNECT_ATTEMPTS") {
            config.reconnect.max_attempts = n;
        }

        if let Some(ms) = parse_var(&lookup, "PARLEY_RECONNECT_BASE_MS") {
            config.reconnect.base_delay = Duration::from_millis(ms);
        }

        if let Some(ms) = parse_var(&lookup, "PARLEY_TYPING_IDLE_MS") {
            config.typing_idle = Duration::from_millis(ms);
        }

        if let Some(ms) = parse_var(&lookup, "PARLEY_TOAST_MS") {
            config.toast_ttl = Duration::from_millis(ms);
        }

        config
    }
}

fn default_api_url() -> Url {
    Url::parse(DEFAULT_API_URL)
        .unwrap_or_else(|e| panic!("DEFAULT_API_URL is not a valid URL: {e}"))
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Invalid numeric setting, using default");
            None
        }
    }
}
