//! # Configuration Management
//!
//! Centralized configuration for the polling transport.
//!
//! This module provides structured configuration for servers and clients,
//! including bind addresses, the peer expiry windows, poll timing, and
//! logging options.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()`
//! - Direct instantiation with defaults
//! - Environment-specific overrides via `from_env()`
//!
//! ## Expiry Windows
//! A peer that connects but never polls is evicted after `connect_grace`;
//! a peer that has polled at least once is evicted once it stays silent for
//! `disconnect_delay`. Both windows are deliberately separate settings.

use crate::error::{ProtocolError, Result};
use crate::utils::timeout;
use crate::utils::unique::DEFAULT_TOKEN_LENGTH;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Main configuration structure that contains all configurable settings
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct TransportConfig {
    /// Server-specific configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Client-specific configuration
    #[serde(default)]
    pub client: ClientConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl TransportConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to open config file: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Start with defaults
        let mut config = Self::default();

        // Override with environment variables
        if let Ok(addr) = std::env::var("HTTP_TRANSPORT_SERVER_ADDRESS") {
            config.server.address = addr;
        }

        if let Ok(delay) = std::env::var("HTTP_TRANSPORT_DISCONNECT_DELAY_MS") {
            if let Ok(val) = delay.parse::<u64>() {
                config.server.disconnect_delay = Duration::from_millis(val);
            }
        }

        if let Ok(grace) = std::env::var("HTTP_TRANSPORT_CONNECT_GRACE_MS") {
            if let Ok(val) = grace.parse::<u64>() {
                config.server.connect_grace = Duration::from_millis(val);
            }
        }

        if let Ok(sweep) = std::env::var("HTTP_TRANSPORT_SWEEP_INTERVAL_MS") {
            if let Ok(val) = sweep.parse::<u64>() {
                config.server.sweep_interval = Duration::from_millis(val);
            }
        }

        if let Ok(delay) = std::env::var("HTTP_TRANSPORT_CLIENT_DISCONNECT_DELAY_MS") {
            if let Ok(val) = delay.parse::<u64>() {
                config.client.disconnect_delay = Duration::from_millis(val);
            }
        }

        Ok(config)
    }

    /// Apply overrides to the default configuration
    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// Generate example configuration file content
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate example config"))
    }

    /// Save configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to write config file: {e}")))?;

        Ok(())
    }

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        errors.extend(self.server.validate());
        errors.extend(self.client.validate());
        errors.extend(self.logging.validate());

        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ProtocolError::ConfigError(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

/// Server-specific configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Server bind address (e.g., "127.0.0.1:9000")
    pub address: String,

    /// Interval of the sweep that evicts idle peers
    #[serde(with = "duration_serde")]
    pub sweep_interval: Duration,

    /// Steady-state idle window after which an updated peer is evicted.
    /// Also sent to connecting clients as the recommended poll delay.
    #[serde(with = "duration_serde")]
    pub disconnect_delay: Duration,

    /// Grace window for a peer that has connected but never sent data
    #[serde(with = "duration_serde")]
    pub connect_grace: Duration,

    /// Length of generated session tokens
    pub token_length: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: String::from("127.0.0.1:9000"),
            sweep_interval: timeout::DEFAULT_SWEEP_INTERVAL,
            disconnect_delay: timeout::DEFAULT_DISCONNECT_DELAY,
            connect_grace: timeout::DEFAULT_CONNECT_GRACE,
            token_length: DEFAULT_TOKEN_LENGTH,
        }
    }
}

impl ServerConfig {
    /// Validate server configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        // Validate address format
        if self.address.is_empty() {
            errors.push("Server address cannot be empty".to_string());
        } else if self.address.parse::<std::net::SocketAddr>().is_err() {
            errors.push(format!(
                "Invalid server address format: '{}' (expected format: '0.0.0.0:8080')",
                self.address
            ));
        }

        // Validate sweep interval
        if self.sweep_interval.as_millis() < 10 {
            errors.push("Sweep interval too short (minimum: 10ms)".to_string());
        } else if self.sweep_interval.as_secs() > 60 {
            errors.push("Sweep interval too long (maximum: 60s)".to_string());
        }

        // Validate disconnect delay
        if self.disconnect_delay.as_millis() < 100 {
            errors.push("Disconnect delay too short (minimum: 100ms)".to_string());
        } else if self.disconnect_delay.as_secs() > 300 {
            errors.push("Disconnect delay too long (maximum: 300s)".to_string());
        }

        // Validate connect grace
        if self.connect_grace < self.disconnect_delay {
            errors.push("Connect grace must not be shorter than the disconnect delay".to_string());
        } else if self.connect_grace.as_secs() > 3600 {
            errors.push("Connect grace too long (maximum: 1 hour)".to_string());
        }

        // Validate token length
        if self.token_length < 8 {
            errors.push("Token length too short (minimum: 8 characters)".to_string());
        } else if self.token_length > 128 {
            errors.push("Token length too long (maximum: 128 characters)".to_string());
        }

        errors
    }
}

/// Client-specific configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClientConfig {
    /// Window of consecutive poll failures before the session is forced to
    /// disconnect
    #[serde(with = "duration_serde")]
    pub disconnect_delay: Duration,

    /// Timeout for individual HTTP requests
    #[serde(with = "duration_serde")]
    pub request_timeout: Duration,

    /// Floor for the poll interval derived from the server's recommendation
    #[serde(with = "duration_serde")]
    pub min_poll_interval: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            disconnect_delay: timeout::DEFAULT_CLIENT_DISCONNECT_DELAY,
            request_timeout: timeout::DEFAULT_REQUEST_TIMEOUT,
            min_poll_interval: timeout::MIN_POLL_INTERVAL,
        }
    }
}

impl ClientConfig {
    /// Validate client configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.disconnect_delay.as_millis() < 100 {
            errors.push("Client disconnect delay too short (minimum: 100ms)".to_string());
        } else if self.disconnect_delay.as_secs() > 300 {
            errors.push("Client disconnect delay too long (maximum: 300s)".to_string());
        }

        if self.request_timeout.as_millis() < 100 {
            errors.push("Request timeout too short (minimum: 100ms)".to_string());
        }

        if self.min_poll_interval.as_millis() < 10 {
            errors.push("Minimum poll interval too short (minimum: 10ms)".to_string());
        } else if self.min_poll_interval.as_secs() > 60 {
            errors.push("Minimum poll interval too long (maximum: 60s)".to_string());
        }

        errors
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Application name for logs
    pub app_name: String,

    /// Log level
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Whether to log to console
    pub log_to_console: bool,

    /// Whether to log to file
    pub log_to_file: bool,

    /// Path to log file (if log_to_file is true)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_file_path: Option<String>,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("http-transport"),
            log_level: Level::INFO,
            log_to_console: true,
            log_to_file: false,
            log_file_path: None,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    /// Validate logging configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        // Validate app name
        if self.app_name.is_empty() {
            errors.push("Application name cannot be empty".to_string());
        } else if self.app_name.len() > 64 {
            errors.push(format!(
                "Application name too long: {} characters (maximum: 64)",
                self.app_name.len()
            ));
        }

        // Validate file logging configuration
        if self.log_to_file {
            if let Some(ref path) = self.log_file_path {
                // Check if parent directory exists (if path is absolute)
                if let Some(parent) = std::path::Path::new(path).parent() {
                    if !parent.as_os_str().is_empty() && !parent.exists() {
                        errors.push(format!(
                            "Log file directory does not exist: {}",
                            parent.display()
                        ));
                    }
                }
            } else {
                errors.push("log_file_path must be specified when log_to_file is true".to_string());
            }
        }

        // Validate at least one output is enabled
        if !self.log_to_console && !self.log_to_file {
            errors
                .push("At least one logging output (console or file) must be enabled".to_string());
        }

        errors
    }
}

/// Helper module for Duration serialization/deserialization
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = duration.as_millis() as u64;
        millis.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Helper module for tracing::Level serialization/deserialization
mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;
    use tracing::Level;

    pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let level_str = match *level {
            Level::TRACE => "trace",
            Level::DEBUG => "debug",
            Level::INFO => "info",
            Level::WARN => "warn",
            Level::ERROR => "error",
        };
        level_str.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level_str = String::deserialize(deserializer)?;
        Level::from_str(&level_str)
            .map_err(|_| serde::de::Error::custom(format!("Invalid log level: {level_str}")))
    }
}
