//! Device configuration loaded once at startup
//!
//! The configuration is validated when it is loaded and is read-only
//! afterwards.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv6Addr;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use super::reconnect::ReconnectConfig;
use crate::error::{BreezartError, Result};
use crate::speed::SpeedRange;

/// TCP port the controller listens on by default
pub const DEFAULT_PORT: u16 = 1560;

/// Default timeout for each network operation
pub const DEFAULT_TIMEOUT_MS: u64 = 3000;

/// Default baud rate for the serial transport
pub const DEFAULT_BAUD_RATE: u32 = 9600;

fn default_name() -> String {
    "Breezart Fan".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}

/// Connection lifecycle policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Lifecycle {
    /// Connect once, keep the session for all operations
    #[default]
    LongLived,
    /// Connect before each operation and disconnect right after
    PerOperation,
}

impl Lifecycle {
    pub fn as_str(&self) -> &'static str {
        match self {
            Lifecycle::LongLived => "long-lived",
            Lifecycle::PerOperation => "per-operation",
        }
    }
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Lifecycle {
    type Err = BreezartError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "long-lived" | "long_lived" | "persistent" => Ok(Lifecycle::LongLived),
            "per-operation" | "per_operation" | "per-call" => Ok(Lifecycle::PerOperation),
            _ => Err(BreezartError::InvalidInput(format!(
                "Unknown lifecycle: '{}'. Valid options: long-lived, per-operation",
                s
            ))),
        }
    }
}

/// Host and credentials of a controller
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    host: String,
    password: String,
}

impl ConnectionConfig {
    pub fn new(host: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            password: password.into(),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("host", &self.host)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Configuration of one fan controller
///
/// Located at `~/.config/breezart/config.toml` by default:
///
/// ```toml
/// name = "Bathroom"
/// host = "192.168.1.50"
/// password = "7531"
/// fan_min_speed = 1
/// fan_max_speed = 10
/// lifecycle = "long-lived"
/// ```
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Display name of the accessory
    #[serde(default = "default_name")]
    pub name: String,

    /// Controller address (hostname or IP, optionally with `:port`)
    pub host: String,

    /// Controller TCP port, used when `host` carries none
    #[serde(default = "default_port")]
    pub port: u16,

    /// Controller password
    pub password: String,

    /// Lowest device speed step
    pub fan_min_speed: u32,

    /// Highest device speed step
    pub fan_max_speed: u32,

    /// Session lifecycle policy
    #[serde(default)]
    pub lifecycle: Lifecycle,

    /// Timeout for each network operation in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Serial device path; selects the serial transport instead of TCP
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial_device: Option<String>,

    /// Serial baud rate
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    /// Log every line sent and received
    #[serde(default)]
    pub debug_wire: bool,

    /// Background reconnection for long-lived sessions
    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

impl fmt::Debug for DeviceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceConfig")
            .field("name", &self.name)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("password", &"<redacted>")
            .field("fan_min_speed", &self.fan_min_speed)
            .field("fan_max_speed", &self.fan_max_speed)
            .field("lifecycle", &self.lifecycle)
            .field("timeout_ms", &self.timeout_ms)
            .field("serial_device", &self.serial_device)
            .field("baud_rate", &self.baud_rate)
            .field("debug_wire", &self.debug_wire)
            .field("reconnect", &self.reconnect)
            .finish()
    }
}

impl DeviceConfig {
    /// Create a configuration with default transport settings
    pub fn new(
        host: impl Into<String>,
        password: impl Into<String>,
        fan_min_speed: u32,
        fan_max_speed: u32,
    ) -> Self {
        Self {
            name: default_name(),
            host: host.into(),
            port: DEFAULT_PORT,
            password: password.into(),
            fan_min_speed,
            fan_max_speed,
            lifecycle: Lifecycle::default(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            serial_device: None,
            baud_rate: DEFAULT_BAUD_RATE,
            debug_wire: false,
            reconnect: ReconnectConfig::default(),
        }
    }

    /// Set the lifecycle policy
    pub fn with_lifecycle(mut self, lifecycle: Lifecycle) -> Self {
        self.lifecycle = lifecycle;
        self
    }

    /// Set the per-operation timeout
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Parse and validate a configuration from TOML.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            BreezartError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&content)
    }

    /// Serialize to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| BreezartError::Serialization(e.to_string()))
    }

    /// Check the invariants every consumer relies on
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() && self.serial_device.is_none() {
            return Err(BreezartError::Config("host must not be empty".to_string()));
        }
        if self.password.is_empty() {
            return Err(BreezartError::Config(
                "password must not be empty".to_string(),
            ));
        }
        if self.password.chars().any(|c| c.is_control()) {
            return Err(BreezartError::Config(
                "password must not contain control characters".to_string(),
            ));
        }
        if self.timeout_ms == 0 {
            return Err(BreezartError::Config(
                "timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.reconnect.backoff_multiplier < 1.0 {
            return Err(BreezartError::Config(format!(
                "reconnect.backoff_multiplier must be at least 1.0, got {}",
                self.reconnect.backoff_multiplier
            )));
        }
        self.speed_range()?;
        Ok(())
    }

    /// Configured speed range
    pub fn speed_range(&self) -> Result<SpeedRange> {
        SpeedRange::new(self.fan_min_speed, self.fan_max_speed)
    }

    /// Host and credentials
    pub fn connection(&self) -> ConnectionConfig {
        ConnectionConfig::new(self.host.clone(), self.password.clone())
    }

    /// `host:port` socket address string
    ///
    /// A port already present in `host` wins over `port`.
    pub fn address(&self) -> String {
        let host = self.host.trim();
        if host.parse::<Ipv6Addr>().is_ok() {
            return format!("[{}]:{}", host, self.port);
        }
        if host.starts_with('[') || host.contains(':') {
            return host.to_string();
        }
        format!("{}:{}", host, self.port)
    }

    /// Timeout for each network operation
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}
