//! Configuration management

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub connection: ConnectionConfig,
    pub reconnect: ReconnectConfig,
    pub timer: TimerConfig,
}

/// Where the session server lives
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// HTTP base address; the push channel address is derived from it
    pub base_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000".to_string(),
        }
    }
}

/// Push channel lifecycle settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Seconds between `ping` frames while connected
    pub heartbeat_interval_secs: u64,

    /// Seconds of inbound silence before the socket is considered dead
    pub liveness_timeout_secs: u64,

    /// Also pass the credential as a `token` query parameter
    pub token_in_query: bool,

    /// How long `open()` waits for a previous connection to shut down
    pub shutdown_timeout_ms: u64,

    /// How long a roomcast registration waits for the server's answer
    pub register_timeout_secs: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: 30,
            liveness_timeout_secs: 90,
            token_in_query: true,
            shutdown_timeout_ms: 1000,
            register_timeout_secs: 10,
        }
    }
}

/// Automatic reconnect budget
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 1000,
            max_delay_ms: 10_000,
        }
    }
}

/// Countdown smoothing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimerConfig {
    /// Local tick period
    pub tick_interval_ms: u64,

    /// Largest gap between the start-derived and sync-derived countdown that
    /// is still treated as agreement
    pub drift_tolerance_secs: i64,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1000,
            drift_tolerance_secs: 2,
        }
    }
}

impl ConnectionConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn liveness_timeout(&self) -> Duration {
        Duration::from_secs(self.liveness_timeout_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub fn register_timeout(&self) -> Duration {
        Duration::from_secs(self.register_timeout_secs)
    }
}

impl TimerConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

impl Config {
    /// Load config from the default location, or return defaults if not found
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Load config from a specific file, or return defaults if it does not exist
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config {}", path.display()))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Invalid config {}", path.display()))?;
            config
                .validate()
                .with_context(|| format!("Invalid config {}", path.display()))?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    /// Reject periods that would stall or spin the connection loop
    pub fn validate(&self) -> Result<()> {
        if self.connection.heartbeat_interval_secs == 0 {
            bail!("connection.heartbeat_interval_secs must be at least 1");
        }
        if self.connection.liveness_timeout_secs == 0 {
            bail!("connection.liveness_timeout_secs must be at least 1");
        }
        if self.timer.tick_interval_ms == 0 {
            bail!("timer.tick_interval_ms must be at least 1");
        }
        Ok(())
    }

    /// Get the config file path
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("promptcast")
            .join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
            [server]
            base_url = "https://class.example.org"

            [reconnect]
            max_attempts = 3
            "#,
        )
        .unwrap();

        assert_eq!(config.server.base_url, "https://class.example.org");
        assert_eq!(config.reconnect.max_attempts, 3);
        assert_eq!(config.reconnect.base_delay_ms, 1000);
        assert_eq!(config.connection.heartbeat_interval_secs, 30);
        assert_eq!(config.timer.drift_tolerance_secs, 2);
    }
}
