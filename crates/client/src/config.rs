//! Channel configuration from environment variables.

use std::str::FromStr;
use std::time::Duration;

use crate::ws::ReconnectPolicy;

pub const DEFAULT_URL: &str = "ws://localhost:3000/ws";
pub const DEFAULT_AUTH_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Settings for one [`RealtimeChannel`](crate::ws::RealtimeChannel).
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// WebSocket endpoint (`ws://` or `wss://`)
    pub url: String,
    /// Time allowed for the server's `authenticated` reply
    pub auth_timeout: Duration,
    /// Time allowed for the transport to open
    pub connect_timeout: Duration,
    pub reconnect: ReconnectPolicy,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self::new(DEFAULT_URL)
    }
}

impl ChannelConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            auth_timeout: DEFAULT_AUTH_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            reconnect: ReconnectPolicy::default(),
        }
    }

    pub fn with_auth_timeout(mut self, timeout: Duration) -> Self {
        self.auth_timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Read the configuration from environment variables.
    ///
    /// Environment variables:
    /// - `ARCHIVE_WS_URL`: WebSocket endpoint (default: "ws://localhost:3000/ws")
    /// - `ARCHIVE_WS_AUTH_TIMEOUT_SECS`: auth reply timeout (default: 10)
    /// - `ARCHIVE_WS_CONNECT_TIMEOUT_SECS`: transport open timeout (default: 10)
    /// - `ARCHIVE_WS_RECONNECT_DELAY_MS`: fixed delay between attempts (default: 3000)
    /// - `ARCHIVE_WS_MAX_RECONNECT_ATTEMPTS`: attempt budget (default: 10)
    ///
    /// Invalid values are logged and replaced by the default.
    pub fn from_env() -> Self {
        let url = std::env::var("ARCHIVE_WS_URL").ok();
        let defaults = ReconnectPolicy::default();

        Self {
            url: url
                .as_deref()
                .and_then(valid_ws_url)
                .unwrap_or_else(|| DEFAULT_URL.to_string()),
            auth_timeout: Duration::from_secs(env_or(
                "ARCHIVE_WS_AUTH_TIMEOUT_SECS",
                DEFAULT_AUTH_TIMEOUT.as_secs(),
            )),
            connect_timeout: Duration::from_secs(env_or(
                "ARCHIVE_WS_CONNECT_TIMEOUT_SECS",
                DEFAULT_CONNECT_TIMEOUT.as_secs(),
            )),
            reconnect: ReconnectPolicy {
                delay: Duration::from_millis(env_or(
                    "ARCHIVE_WS_RECONNECT_DELAY_MS",
                    defaults.delay.as_millis() as u64,
                )),
                max_attempts: env_or("ARCHIVE_WS_MAX_RECONNECT_ATTEMPTS", defaults.max_attempts),
            },
        }
    }
}

fn env_or<T: FromStr + Copy>(name: &str, default: T) -> T {
    parse_or(name, std::env::var(name).ok().as_deref(), default)
}

fn parse_or<T: FromStr + Copy>(name: &str, raw: Option<&str>, default: T) -> T {
    let Some(raw) = raw else {
        return default;
    };
    match raw.trim().parse() {
        Ok(value) => value,
        Err(_) => {
            tracing::warn!(variable = name, value = raw, "ignoring unparseable setting");
            default
        }
    }
}

fn valid_ws_url(raw: &str) -> Option<String> {
    match url::Url::parse(raw.trim()) {
        Ok(url) if matches!(url.scheme(), "ws" | "wss") => Some(url.to_string()),
        Ok(url) => {
            tracing::warn!(scheme = url.scheme(), "ARCHIVE_WS_URL must use ws:// or wss://");
            None
        }
        Err(e) => {
            tracing::warn!(error = %e, "ARCHIVE_WS_URL is not a valid URL");
            None
        }
    }
}
