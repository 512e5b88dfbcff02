//! # Configuration Management
//!
//! Centralized configuration for the relay.
//!
//! ## Sections
//! - `server`: listen/upstream addresses, idle timeout, connection cap
//! - `guard`: flood detection thresholds and rate window
//! - `protocol`: decoder resource limits
//! - `logging`: level and output format
//!
//! ## Configuration Sources
//! - TOML files via `from_file()` / `from_toml()`
//! - Environment variables via `from_env()`
//! - Defaults with a mutator via `default_with_overrides()`

use crate::error::{ProtocolError, Result};
use crate::protocol::fragment::FragmentLimits;
use crate::utils::compression::MAX_DECOMPRESSION_SIZE;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Default client-facing port
pub const DEFAULT_LISTEN_ADDRESS: &str = "0.0.0.0:19132";

/// Default address of the wrapped game server
pub const DEFAULT_UPSTREAM_ADDRESS: &str = "127.0.0.1:19134";

/// Idle window after which a silent connection is closed
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(10);

/// Datagrams per rate window above which a source is banned
pub const DEFAULT_BAN_THRESHOLD: u64 = 600;

/// Largest UDP payload accepted from either side
pub const MAX_DATAGRAM_SIZE: usize = 65_535;

/// Main relay configuration
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct RelayConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub guard: GuardConfig,

    #[serde(default)]
    pub protocol: ProtocolConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl RelayConfig {
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
    ///
    /// Unparseable numeric values are ignored and the default kept.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("RAKNET_RELAY_LISTEN_ADDRESS") {
            config.server.listen_address = addr;
        }

        if let Ok(addr) = std::env::var("RAKNET_RELAY_UPSTREAM_ADDRESS") {
            config.server.upstream_address = addr;
        }

        if let Ok(timeout) = std::env::var("RAKNET_RELAY_IDLE_TIMEOUT_MS") {
            if let Ok(val) = timeout.parse::<u64>() {
                config.server.idle_timeout = Duration::from_millis(val);
            }
        }

        if let Ok(threshold) = std::env::var("RAKNET_RELAY_BAN_THRESHOLD") {
            if let Ok(val) = threshold.parse::<u64>() {
                config.guard.ban_threshold = val;
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
        errors.extend(self.guard.validate());
        errors.extend(self.protocol.validate());
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

fn parse_socket_addr(label: &str, value: &str) -> Result<SocketAddr> {
    value.parse::<SocketAddr>().map_err(|_| {
        ProtocolError::ConfigError(format!(
            "Invalid {label} address format: '{value}' (expected format: '0.0.0.0:19132')"
        ))
    })
}

/// Listener and upstream settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Client-facing listen address
    pub listen_address: String,

    /// Address of the real game server
    pub upstream_address: String,

    /// Silence after which a connection is closed
    #[serde(with = "duration_serde")]
    pub idle_timeout: Duration,

    /// Maximum number of concurrent connections
    pub max_connections: usize,

    /// Receive buffer size for one datagram
    pub max_datagram_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: String::from(DEFAULT_LISTEN_ADDRESS),
            upstream_address: String::from(DEFAULT_UPSTREAM_ADDRESS),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            max_connections: 1000,
            max_datagram_size: MAX_DATAGRAM_SIZE,
        }
    }
}

impl ServerConfig {
    pub fn listen_addr(&self) -> Result<SocketAddr> {
        parse_socket_addr("listen", &self.listen_address)
    }

    pub fn upstream_addr(&self) -> Result<SocketAddr> {
        parse_socket_addr("upstream", &self.upstream_address)
    }

    /// Validate server configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        for (label, value) in [
            ("listen", &self.listen_address),
            ("upstream", &self.upstream_address),
        ] {
            if value.is_empty() {
                errors.push(format!("The {label} address cannot be empty"));
            } else if let Err(e) = parse_socket_addr(label, value) {
                errors.push(match e {
                    ProtocolError::ConfigError(msg) => msg,
                    other => other.to_string(),
                });
            }
        }

        if self.idle_timeout.as_millis() < 100 {
            errors.push("Idle timeout too short (minimum: 100ms)".to_string());
        } else if self.idle_timeout.as_secs() > 300 {
            errors.push("Idle timeout too long (maximum: 300s)".to_string());
        }

        if self.max_connections == 0 {
            errors.push("Max connections must be greater than 0".to_string());
        } else if self.max_connections > 100_000 {
            errors.push(format!(
                "Max connections very high: {} (ensure system resources can support this)",
                self.max_connections
            ));
        }

        if self.max_datagram_size < 576 {
            errors.push("Max datagram size too small (minimum: 576 bytes)".to_string());
        } else if self.max_datagram_size > MAX_DATAGRAM_SIZE {
            errors.push(format!(
                "Max datagram size too large: {} (maximum: {MAX_DATAGRAM_SIZE})",
                self.max_datagram_size
            ));
        }

        errors
    }
}

/// Flood guard thresholds
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GuardConfig {
    /// Peak datagrams per window above which the source is banned
    pub ban_threshold: u64,

    /// Length of one counting window
    #[serde(with = "duration_serde")]
    pub rate_window: Duration,

    /// Number of window samples kept per address
    pub history_len: usize,

    /// Peak below which a closed connection's traffic record is dropped
    pub noise_floor: u64,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            ban_threshold: DEFAULT_BAN_THRESHOLD,
            rate_window: Duration::from_millis(1000),
            history_len: 5,
            noise_floor: 10,
        }
    }
}

impl GuardConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.ban_threshold == 0 {
            errors.push("Ban threshold must be greater than 0".to_string());
        }

        if self.rate_window.as_millis() < 10 {
            errors.push("Rate window too short (minimum: 10ms)".to_string());
        } else if self.rate_window.as_secs() > 60 {
            errors.push("Rate window too long (maximum: 60s)".to_string());
        }

        if self.history_len == 0 {
            errors.push("History length must be greater than 0".to_string());
        }

        if self.noise_floor >= self.ban_threshold {
            errors.push(format!(
                "Noise floor ({}) must be below the ban threshold ({})",
                self.noise_floor, self.ban_threshold
            ));
        }

        errors
    }
}

/// Decoder resource limits
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Ceiling for one inflated application batch
    pub max_decompressed_size: usize,

    /// Incomplete split payloads kept per relay port
    pub max_open_compounds: usize,

    /// Largest accepted piece count for one split payload
    pub max_fragments_per_compound: u32,

    /// Bytes held across incomplete split payloads per relay port
    pub max_pending_fragment_bytes: usize,

    /// Age after which an incomplete split payload is dropped
    #[serde(with = "duration_serde")]
    pub compound_ttl: Duration,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        let limits = FragmentLimits::default();
        Self {
            max_decompressed_size: MAX_DECOMPRESSION_SIZE,
            max_open_compounds: limits.max_open_compounds,
            max_fragments_per_compound: limits.max_compound_size,
            max_pending_fragment_bytes: limits.max_pending_bytes,
            compound_ttl: limits.stale_after,
        }
    }
}

impl ProtocolConfig {
    pub fn fragment_limits(&self) -> FragmentLimits {
        FragmentLimits {
            max_compound_size: self.max_fragments_per_compound,
            max_open_compounds: self.max_open_compounds,
            max_pending_bytes: self.max_pending_fragment_bytes,
            stale_after: self.compound_ttl,
        }
    }

    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.max_decompressed_size < 1024 {
            errors.push("Max decompressed size too small (minimum: 1 KB)".to_string());
        } else if self.max_decompressed_size > 100 * 1024 * 1024 {
            errors.push(format!(
                "Max decompressed size too large: {} bytes (maximum recommended: 100 MB)",
                self.max_decompressed_size
            ));
        }

        if self.max_open_compounds == 0 {
            errors.push("Max open compounds must be greater than 0".to_string());
        }

        if self.max_fragments_per_compound == 0 {
            errors.push("Max fragments per compound must be greater than 0".to_string());
        }

        if self.max_pending_fragment_bytes < 64 * 1024 {
            errors.push("Max pending fragment bytes too small (minimum: 64 KB)".to_string());
        }

        if self.compound_ttl.as_millis() < 100 {
            errors.push("Compound TTL too short (minimum: 100ms)".to_string());
        }

        errors
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Application name for logs
    pub app_name: String,

    /// Log level
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("raknet-relay"),
            log_level: Level::INFO,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    /// Validate logging configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.app_name.is_empty() {
            errors.push("Application name cannot be empty".to_string());
        } else if self.app_name.len() > 64 {
            errors.push(format!(
                "Application name too long: {} characters (maximum: 64)",
                self.app_name.len()
            ));
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
