//! CLI configuration management
//!
//! Builds the device configuration from layered sources.

use anyhow::{anyhow, Context, Result};
use breezart_core::{default_config_path, DeviceConfig, Lifecycle, ReconnectConfig};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Environment variable naming the controller host
pub const ENV_HOST: &str = "BREEZART_HOST";
/// Environment variable holding the controller password
pub const ENV_PASSWORD: &str = "BREEZART_PASSWORD";
/// Environment variable naming the config file
pub const ENV_CONFIG: &str = "BREEZART_CONFIG";

/// Speed range assumed when no source sets one
const DEFAULT_MIN_SPEED: u32 = 1;
const DEFAULT_MAX_SPEED: u32 = 10;

/// Host and password used by `--mock` when nothing else sets them
const MOCK_HOST: &str = "simulator";
const MOCK_PASSWORD: &str = "mock";

/// Final CLI configuration
#[derive(Debug, Clone, PartialEq)]
pub struct CliConfig {
    /// Validated device configuration
    pub device: DeviceConfig,

    /// Output format ("table" or "json")
    pub output_format: String,

    /// Enable debug logging
    pub verbose: bool,

    /// Config file that was loaded, if any
    pub source: Option<PathBuf>,
}

impl CliConfig {
    /// Create a new builder for constructing configuration
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }
}

/// On-disk configuration
///
/// Same keys as [`DeviceConfig`], all optional so that the password can
/// live in the environment instead of the file.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    name: Option<String>,
    host: Option<String>,
    port: Option<u16>,
    password: Option<String>,
    fan_min_speed: Option<u32>,
    fan_max_speed: Option<u32>,
    lifecycle: Option<Lifecycle>,
    timeout_ms: Option<u64>,
    serial_device: Option<String>,
    baud_rate: Option<u32>,
    debug_wire: Option<bool>,
    reconnect: Option<ReconnectConfig>,
    output_format: Option<String>,
    verbose: Option<bool>,
}

/// Builder for CLI configuration with validation and priority chain support
///
/// Priority chain (lowest to highest):
/// 1. Defaults
/// 2. Config file
/// 3. Environment variables
/// 4. CLI arguments
///
/// Each layer overwrites what the previous ones set, so apply them in
/// that order.
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    name: Option<String>,
    host: Option<String>,
    port: Option<u16>,
    password: Option<String>,
    fan_min_speed: Option<u32>,
    fan_max_speed: Option<u32>,
    lifecycle: Option<Lifecycle>,
    timeout_ms: Option<u64>,
    serial_device: Option<String>,
    baud_rate: Option<u32>,
    debug_wire: Option<bool>,
    reconnect: Option<ReconnectConfig>,
    output_format: Option<String>,
    verbose: Option<bool>,
    source: Option<PathBuf>,
}

impl ConfigBuilder {
    /// Create a new configuration builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve which config file to read
    ///
    /// An explicit path wins over `BREEZART_CONFIG`, which wins over the
    /// default location. The flag says whether the file must exist.
    pub fn resolve_config_path(explicit: Option<&Path>) -> (PathBuf, bool) {
        if let Some(path) = explicit {
            return (path.to_path_buf(), true);
        }
        match std::env::var(ENV_CONFIG) {
            Ok(path) if !path.is_empty() => (PathBuf::from(path), true),
            _ => (default_config_path(), false),
        }
    }

    /// Load a config file
    ///
    /// A missing file is an error only when `required` is set.
    pub fn with_config_file(mut self, path: &Path, required: bool) -> Result<Self> {
        if !path.exists() {
            if required {
                return Err(anyhow!("Config file not found: {}", path.display()));
            }
            return Ok(self);
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let file: FileConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        if let Some(format) = &file.output_format {
            Self::validate_output_format(format)?;
        }

        overlay(&mut self.name, file.name);
        overlay(&mut self.host, file.host);
        overlay(&mut self.port, file.port);
        overlay(&mut self.password, file.password);
        overlay(&mut self.fan_min_speed, file.fan_min_speed);
        overlay(&mut self.fan_max_speed, file.fan_max_speed);
        overlay(&mut self.lifecycle, file.lifecycle);
        overlay(&mut self.timeout_ms, file.timeout_ms);
        overlay(&mut self.serial_device, file.serial_device);
        overlay(&mut self.baud_rate, file.baud_rate);
        overlay(&mut self.debug_wire, file.debug_wire);
        overlay(&mut self.reconnect, file.reconnect);
        overlay(&mut self.output_format, file.output_format);
        overlay(&mut self.verbose, file.verbose);
        self.source = Some(path.to_path_buf());
        Ok(self)
    }

    /// Apply environment variable overrides
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(host) = std::env::var(ENV_HOST) {
            if !host.trim().is_empty() {
                self.host = Some(host);
            }
        }

        if let Ok(password) = std::env::var(ENV_PASSWORD) {
            if !password.is_empty() {
                self.password = Some(password);
            }
        }

        self
    }

    /// Set controller host
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Set controller port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Set controller password
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Set session lifecycle
    pub fn with_lifecycle(mut self, lifecycle: Lifecycle) -> Self {
        self.lifecycle = Some(lifecycle);
        self
    }

    /// Set per-operation timeout (with validation)
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Result<Self> {
        if timeout_ms == 0 {
            return Err(anyhow!("Timeout must be greater than 0"));
        }
        self.timeout_ms = Some(timeout_ms);
        Ok(self)
    }

    /// Set serial device
    pub fn with_serial_device(mut self, path: impl Into<String>) -> Self {
        self.serial_device = Some(path.into());
        self
    }

    /// Enable wire logging
    pub fn with_debug_wire(mut self, debug_wire: bool) -> Self {
        self.debug_wire = Some(debug_wire);
        self
    }

    /// Set output format (with validation)
    pub fn with_output_format(mut self, format: impl Into<String>) -> Result<Self> {
        let format = format.into();
        Self::validate_output_format(&format)?;
        self.output_format = Some(format);
        Ok(self)
    }

    /// Set verbose flag
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = Some(verbose);
        self
    }

    /// Fill host and password for the in-process simulator
    pub fn with_mock_defaults(mut self) -> Self {
        self.host.get_or_insert_with(|| MOCK_HOST.to_string());
        self.password.get_or_insert_with(|| MOCK_PASSWORD.to_string());
        self
    }

    /// Build the final configuration with validation
    pub fn build(self) -> Result<CliConfig> {
        let serial_device = self.serial_device;
        let host = match self.host {
            Some(host) => host,
            None if serial_device.is_some() => String::new(),
            None => {
                return Err(anyhow!(
                    "No controller host configured (use --host, {} or the config file)",
                    ENV_HOST
                ))
            }
        };
        let password = self.password.ok_or_else(|| {
            anyhow!(
                "No controller password configured (use --password, {} or the config file)",
                ENV_PASSWORD
            )
        })?;

        let mut device = DeviceConfig::new(
            host,
            password,
            self.fan_min_speed.unwrap_or(DEFAULT_MIN_SPEED),
            self.fan_max_speed.unwrap_or(DEFAULT_MAX_SPEED),
        );
        overwrite(&mut device.name, self.name);
        overwrite(&mut device.port, self.port);
        overwrite(&mut device.lifecycle, self.lifecycle);
        overwrite(&mut device.timeout_ms, self.timeout_ms);
        overwrite(&mut device.baud_rate, self.baud_rate);
        overwrite(&mut device.debug_wire, self.debug_wire);
        overwrite(&mut device.reconnect, self.reconnect);
        device.serial_device = serial_device;

        device.validate().context("Invalid device configuration")?;

        let output_format = self.output_format.unwrap_or_else(|| "table".to_string());
        Self::validate_output_format(&output_format)?;

        Ok(CliConfig {
            device,
            output_format,
            verbose: self.verbose.unwrap_or(false),
            source: self.source,
        })
    }

    /// Validate output format
    fn validate_output_format(format: &str) -> Result<()> {
        match format {
            "table" | "json" => Ok(()),
            _ => Err(anyhow!(
                "Invalid output format '{}'. Must be 'table' or 'json'",
                format
            )),
        }
    }
}

fn overlay<T>(slot: &mut Option<T>, value: Option<T>) {
    if value.is_some() {
        *slot = value;
    }
}

fn overwrite<T>(slot: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *slot = value;
    }
}
