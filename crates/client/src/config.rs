//! Client configuration from environment variables.

use std::time::Duration;

use crate::realtime::ReconnectPolicy;

pub const DEFAULT_WS_URL: &str = "ws://localhost:8000/ws";
pub const DEFAULT_API_URL: &str = "http://localhost:8000";
pub const DEFAULT_SESSION_KEY: &str = "societas_session_token";
pub const DEFAULT_RESYNC_DELAY_MS: u64 = 500;

/// Settings for the realtime connection and its companion HTTP client.
#[derive(Debug, Clone, PartialEq)]
pub struct RealtimeConfig {
    /// Base WebSocket URL the manager connects to.
    pub ws_url: String,
    /// Base URL for initial-data fetches.
    pub api_url: String,
    /// Session storage key holding the bearer token.
    pub session_key: String,
    /// Backoff and attempt cap for abnormal closures.
    pub reconnect: ReconnectPolicy,
    /// Delay before reconnecting after the stored token changes.
    pub token_resync_delay: Duration,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            ws_url: DEFAULT_WS_URL.to_string(),
            api_url: DEFAULT_API_URL.to_string(),
            session_key: DEFAULT_SESSION_KEY.to_string(),
            reconnect: ReconnectPolicy::default(),
            token_resync_delay: Duration::from_millis(DEFAULT_RESYNC_DELAY_MS),
        }
    }
}

impl RealtimeConfig {
    pub fn new(ws_url: impl Into<String>) -> Self {
        Self {
            ws_url: ws_url.into(),
            ..Self::default()
        }
    }

    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self
    }

    pub fn with_session_key(mut self, key: impl Into<String>) -> Self {
        self.session_key = key.into();
        self
    }

    pub fn with_reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    pub fn with_token_resync_delay(mut self, delay: Duration) -> Self {
        self.token_resync_delay = delay;
        self
    }

    /// Parse configuration from environment variables.
    ///
    /// Environment variables:
    /// - `SOCIETAS_WS_URL`: WebSocket endpoint (default: "ws://localhost:8000/ws")
    /// - `SOCIETAS_API_URL`: HTTP API base (default: "http://localhost:8000")
    /// - `SOCIETAS_SESSION_KEY`: storage key of the bearer token (default: "societas_session_token")
    /// - `SOCIETAS_WS_MAX_ATTEMPTS`: connect attempts before giving up (default: 3)
    /// - `SOCIETAS_WS_INITIAL_DELAY_MS`: first reconnect delay (default: 1000)
    /// - `SOCIETAS_WS_MAX_DELAY_MS`: reconnect delay ceiling (default: 30000)
    /// - `SOCIETAS_WS_RESYNC_DELAY_MS`: reconnect delay after a token change (default: 500)
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`RealtimeConfig::from_env`] with an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let policy = ReconnectPolicy::default();

        let ws_url = match lookup("SOCIETAS_WS_URL") {
            Some(raw) if is_ws_url(&raw) => raw,
            Some(raw) => {
                crate::log_warn!(
                    "SOCIETAS_WS_URL '{}' is not a ws:// or wss:// URL, using {}",
                    raw,
                    defaults.ws_url
                );
                defaults.ws_url
            }
            None => defaults.ws_url,
        };

        Self {
            ws_url,
            api_url: lookup("SOCIETAS_API_URL").unwrap_or(defaults.api_url),
            session_key: lookup("SOCIETAS_SESSION_KEY")
                .filter(|key| !key.trim().is_empty())
                .unwrap_or(defaults.session_key),
            reconnect: ReconnectPolicy {
                max_attempts: parse_or(&lookup, "SOCIETAS_WS_MAX_ATTEMPTS", policy.max_attempts),
                initial_delay_ms: parse_or(
                    &lookup,
                    "SOCIETAS_WS_INITIAL_DELAY_MS",
                    policy.initial_delay_ms,
                ),
                max_delay_ms: parse_or(&lookup, "SOCIETAS_WS_MAX_DELAY_MS", policy.max_delay_ms),
                ..policy
            },
            token_resync_delay: Duration::from_millis(parse_or(
                &lookup,
                "SOCIETAS_WS_RESYNC_DELAY_MS",
                DEFAULT_RESYNC_DELAY_MS,
            )),
        }
    }
}

fn is_ws_url(raw: &str) -> bool {
    url::Url::parse(raw)
        .map(|u| matches!(u.scheme(), "ws" | "wss"))
        .unwrap_or(false)
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: std::str::FromStr + std::fmt::Display + Copy,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            crate::log_warn!("{} '{}' is not a valid number, using {}", key, raw, default);
            default
        }),
        None => default,
    }
}
