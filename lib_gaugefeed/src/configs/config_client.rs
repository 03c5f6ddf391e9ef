//! # Client Configuration
//!
//! [`ClientConfig`] holds everything the connection engine needs that is not a
//! credential. Values are resolved in layers:
//!
//! 1. built-in defaults,
//! 2. an optional JSON file (camelCase keys, every key optional),
//! 3. explicit overrides, normally parsed from CLI arguments and environment.
//!
//! Each layer is a [`ConfigOverrides`]; later layers win for every field they set.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use url::Url;

use crate::error::{GaugeFeedError, Result};
use crate::protocol::StreamId;

/// Reconnection behaviour after an unexpected close.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReconnectPolicy {
    /// When false an unexpected close is treated like an explicit disconnect.
    pub enabled: bool,
    pub base_interval_ms: u64,
    /// Cap on the attempt counter, and therefore on the delay multiplier.
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            base_interval_ms: 2_000,
            max_attempts: 15,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before reconnect attempt number `attempt`: `base × min(attempt, max_attempts)`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = attempt.min(self.max_attempts) as u64;
        Duration::from_millis(self.base_interval_ms.saturating_mul(factor))
    }

    /// Longest delay this policy can produce.
    pub fn max_delay(&self) -> Duration {
        self.delay(self.max_attempts)
    }
}

/// Fully resolved client configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
    /// Request path of the WebSocket endpoint.
    pub path: String,
    /// Stream used when subscribing to a gauge by symbol.
    pub stream: StreamId,
    pub reconnect: ReconnectPolicy,
    /// Silence after which a heartbeat probe is sent.
    pub heartbeat_check_interval_ms: u64,
    /// Silence after which the connection is considered dead.
    pub max_wait_ms: u64,
    /// How long a connect attempt may stay pending before it is killed.
    pub connect_timeout_ms: u64,
    /// Period of the housekeeping tick.
    pub tick_interval_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 443,
            use_tls: true,
            path: "/stream".to_string(),
            stream: StreamId::Realtime,
            reconnect: ReconnectPolicy::default(),
            heartbeat_check_interval_ms: 10_000,
            max_wait_ms: 30_000,
            connect_timeout_ms: 15_000,
            tick_interval_ms: 1_000,
        }
    }
}

impl ClientConfig {
    /// Convenience constructor for a host with every other value defaulted.
    pub fn for_host(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Default::default()
        }
    }

    /// `ws://` or `wss://` endpoint URL.
    pub fn url(&self) -> Result<Url> {
        let scheme = if self.use_tls { "wss" } else { "ws" };
        let raw = format!("{}://{}:{}{}", scheme, self.host, self.port, self.path);
        Url::parse(&raw).map_err(|e| GaugeFeedError::Config(format!("invalid endpoint '{}': {}", raw, e)))
    }

    /// Rejects configurations the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: &str| Err(GaugeFeedError::Config(msg.to_string()));

        if self.host.trim().is_empty() {
            return fail("host must not be empty");
        }
        if self.port == 0 {
            return fail("port must not be zero");
        }
        if !self.path.starts_with('/') {
            return fail("path must start with '/'");
        }
        if self.tick_interval_ms == 0 || self.heartbeat_check_interval_ms == 0 || self.connect_timeout_ms == 0 {
            return fail("tick, heartbeat and connect timeout intervals must be positive");
        }
        if self.max_wait_ms <= self.heartbeat_check_interval_ms {
            return fail("maxWaitMs must be greater than heartbeatCheckIntervalMs");
        }
        if self.reconnect.enabled && (self.reconnect.base_interval_ms == 0 || self.reconnect.max_attempts == 0) {
            return fail("reconnect base interval and max attempts must be positive when reconnect is enabled");
        }
        self.url().map(|_| ())
    }

    pub fn heartbeat_check_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_check_interval_ms)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

/// One configuration layer. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub use_tls: Option<bool>,
    pub path: Option<String>,
    pub stream: Option<StreamId>,
    pub reconnect_enabled: Option<bool>,
    pub reconnect_base_interval_ms: Option<u64>,
    pub reconnect_max_attempts: Option<u32>,
    pub heartbeat_check_interval_ms: Option<u64>,
    pub max_wait_ms: Option<u64>,
    pub connect_timeout_ms: Option<u64>,
    pub tick_interval_ms: Option<u64>,
}

impl ConfigOverrides {
    /// Values set in `other` win over values set in `self`.
    pub fn merge(self, other: ConfigOverrides) -> ConfigOverrides {
        ConfigOverrides {
            host: other.host.or(self.host),
            port: other.port.or(self.port),
            use_tls: other.use_tls.or(self.use_tls),
            path: other.path.or(self.path),
            stream: other.stream.or(self.stream),
            reconnect_enabled: other.reconnect_enabled.or(self.reconnect_enabled),
            reconnect_base_interval_ms: other.reconnect_base_interval_ms.or(self.reconnect_base_interval_ms),
            reconnect_max_attempts: other.reconnect_max_attempts.or(self.reconnect_max_attempts),
            heartbeat_check_interval_ms: other.heartbeat_check_interval_ms.or(self.heartbeat_check_interval_ms),
            max_wait_ms: other.max_wait_ms.or(self.max_wait_ms),
            connect_timeout_ms: other.connect_timeout_ms.or(self.connect_timeout_ms),
            tick_interval_ms: other.tick_interval_ms.or(self.tick_interval_ms),
        }
    }

    /// Applies this layer on top of `base`.
    pub fn apply(self, base: ClientConfig) -> ClientConfig {
        ClientConfig {
            host: self.host.unwrap_or(base.host),
            port: self.port.unwrap_or(base.port),
            use_tls: self.use_tls.unwrap_or(base.use_tls),
            path: self.path.unwrap_or(base.path),
            stream: self.stream.unwrap_or(base.stream),
            reconnect: ReconnectPolicy {
                enabled: self.reconnect_enabled.unwrap_or(base.reconnect.enabled),
                base_interval_ms: self.reconnect_base_interval_ms.unwrap_or(base.reconnect.base_interval_ms),
                max_attempts: self.reconnect_max_attempts.unwrap_or(base.reconnect.max_attempts),
            },
            heartbeat_check_interval_ms: self.heartbeat_check_interval_ms.unwrap_or(base.heartbeat_check_interval_ms),
            max_wait_ms: self.max_wait_ms.unwrap_or(base.max_wait_ms),
            connect_timeout_ms: self.connect_timeout_ms.unwrap_or(base.connect_timeout_ms),
            tick_interval_ms: self.tick_interval_ms.unwrap_or(base.tick_interval_ms),
        }
    }
}

/// Resolves defaults, then `file` (when it exists), then `overrides`, and validates the result.
///
/// A file that exists but cannot be read or parsed is skipped with a warning.
pub fn load_config(file: Option<&Path>, overrides: ConfigOverrides) -> Result<ClientConfig> {
    let mut layers = ConfigOverrides::default();

    if let Some(path) = file {
        if path.exists() {
            match fs::read_to_string(path) {
                Ok(text) => match serde_json::from_str::<ConfigOverrides>(&text) {
                    Ok(file_layer) => layers = layers.merge(file_layer),
                    Err(e) => warn!("Failed to parse config file {}: {}. Falling back to other sources.", path.display(), e),
                },
                Err(e) => warn!("Failed to read config file {}: {}. Falling back to other sources.", path.display(), e),
            }
        } else {
            info!("Config file not found at {}. Using defaults and overrides.", path.display());
        }
    }

    let config = layers.merge(overrides).apply(ClientConfig::default());
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn defaults_are_valid() {
        let config = ClientConfig::default();
        config.validate().unwrap();
        assert_eq!(config.url().unwrap().as_str(), "wss://localhost/stream");
        assert_eq!(config.reconnect.max_delay(), Duration::from_secs(30));
    }

    #[test]
    fn overrides_win_over_file_and_file_wins_over_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, r#"{{ "host": "feed.example.com", "port": 8443, "stream": "delay", "maxWaitMs": 45000 }}"#).unwrap();

        let overrides = ConfigOverrides {
            port: Some(9000),
            use_tls: Some(false),
            ..Default::default()
        };
        let config = load_config(Some(file.path()), overrides).unwrap();

        assert_eq!(config.host, "feed.example.com");
        assert_eq!(config.port, 9000);
        assert_eq!(config.stream, StreamId::Delayed);
        assert_eq!(config.max_wait_ms, 45_000);
        assert_eq!(config.tick_interval_ms, 1_000);
        assert_eq!(config.url().unwrap().as_str(), "ws://feed.example.com:9000/stream");
    }

    #[test]
    fn unreadable_file_falls_back() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "not json").unwrap();
        let config = load_config(Some(file.path()), ConfigOverrides::default()).unwrap();
        assert_eq!(config, ClientConfig::default());

        let missing = load_config(Some(Path::new("/definitely/not/here.json")), ConfigOverrides::default()).unwrap();
        assert_eq!(missing.port, 443);
    }

    #[test]
    fn validation_rejects_inconsistent_timers() {
        let overrides = ConfigOverrides {
            heartbeat_check_interval_ms: Some(30_000),
            max_wait_ms: Some(30_000),
            ..Default::default()
        };
        assert!(matches!(load_config(None, overrides), Err(GaugeFeedError::Config(_))));

        let mut config = ClientConfig::default();
        config.host = " ".into();
        assert!(config.validate().is_err());

        let mut config = ClientConfig::default();
        config.reconnect.enabled = false;
        config.reconnect.max_attempts = 0;
        config.validate().unwrap();
    }

    #[test]
    fn backoff_delay_is_capped() {
        let policy = ReconnectPolicy {
            enabled: true,
            base_interval_ms: 100,
            max_attempts: 3,
        };
        let delays: Vec<u64> = (0..6).map(|a| policy.delay(a).as_millis() as u64).collect();
        assert_eq!(delays, vec![0, 100, 200, 300, 300, 300]);
    }
}
