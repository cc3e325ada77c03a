//! Application Configuration Settings
//!
//! Configuration for the `bybit-book-stream` binary, loaded from environment
//! variables. Unset or unparseable numeric values fall back to defaults.

use std::time::Duration;

use crate::infrastructure::bybit::{
    BYBIT_SPOT_URL, DEFAULT_TOPIC, HeartbeatConfig, ReconnectConfig, StreamClientError,
    StreamConfig,
};

/// Health server settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    /// Health check HTTP port.
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { health_port: 8083 }
    }
}

/// Complete application configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    /// Stream client configuration.
    pub stream: StreamConfig,
    /// Server settings.
    pub server: ServerSettings,
}

impl AppConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the topic list is empty or the resulting stream
    /// configuration is invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// Same as [`AppConfig::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let url = lookup("BYBIT_WS_URL").unwrap_or_else(|| BYBIT_SPOT_URL.to_string());
        if url.trim().is_empty() {
            return Err(ConfigError::EmptyValue("BYBIT_WS_URL".to_string()));
        }

        let topics: Vec<String> = match lookup("BYBIT_TOPICS") {
            Some(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|topic| !topic.is_empty())
                .map(str::to_string)
                .collect(),
            None => vec![DEFAULT_TOPIC.to_string()],
        };
        if topics.is_empty() {
            return Err(ConfigError::EmptyValue("BYBIT_TOPICS".to_string()));
        }

        let heartbeat_defaults = HeartbeatConfig::default();
        let heartbeat = HeartbeatConfig::new(
            parse_duration_secs(
                &lookup,
                "STREAM_PING_INTERVAL_SECS",
                heartbeat_defaults.ping_interval,
            ),
            parse_duration_secs(
                &lookup,
                "STREAM_PING_TIMEOUT_SECS",
                heartbeat_defaults.pong_timeout,
            ),
        );

        let reconnect_defaults = ReconnectConfig::default();
        let reconnect = ReconnectConfig::linear(
            parse_duration_secs(
                &lookup,
                "STREAM_RECONNECT_BASE_SECS",
                reconnect_defaults.base_interval,
            ),
            parse_or(
                &lookup,
                "STREAM_MAX_RECONNECT_ATTEMPTS",
                reconnect_defaults.max_attempts,
            ),
        );

        let mut stream = StreamConfig::new(url.trim(), topics)
            .with_heartbeat(heartbeat)
            .with_reconnect(reconnect)
            .with_connect_timeout(parse_duration_secs(
                &lookup,
                "STREAM_CONNECT_TIMEOUT_SECS",
                Duration::from_secs(10),
            ));

        let depth: usize = parse_or(&lookup, "STREAM_BOOK_DEPTH", 0);
        if depth > 0 {
            stream = stream.with_book_depth(depth);
        }

        stream.validate()?;

        let server = ServerSettings {
            health_port: parse_or(
                &lookup,
                "STREAM_HEALTH_PORT",
                ServerSettings::default().health_port,
            ),
        };

        Ok(Self { stream, server })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Resulting stream configuration is invalid.
    #[error(transparent)]
    Stream(#[from] StreamClientError),
}

fn parse_or<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> T {
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_duration_secs(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: Duration,
) -> Duration {
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_secs)
}
