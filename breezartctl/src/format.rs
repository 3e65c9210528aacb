//! Output formatting utilities for the CLI
//!
//! Provides table and JSON formatting with colors.

use anyhow::Result;
use breezart_core::{Ack, DeviceConfig, DeviceProperties, FanStatus};
use colored::*;
use serde_json::json;

use tabled::{settings::Style, Table, Tabled};

/// Output format options
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Json,
}

#[derive(Tabled)]
struct FieldRow {
    #[tabled(rename = "Field")]
    field: String,
    #[tabled(rename = "Value")]
    value: String,
}

fn row(field: &str, value: impl Into<String>) -> FieldRow {
    FieldRow {
        field: field.to_string(),
        value: value.into(),
    }
}

fn table(title: &str, rows: Vec<FieldRow>) -> String {
    let table = Table::new(rows).with(Style::rounded()).to_string();
    format!("{}\n{}", title.bold(), table)
}

/// Format fan status
pub fn format_status(name: &str, status: &FanStatus, format: &OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(status)?),
        OutputFormat::Table => {
            if !status.session_ready {
                return Ok(format!(
                    "{} {}",
                    format!("{}:", name).bold(),
                    "session not ready".yellow()
                ));
            }

            let rows = vec![
                row(
                    "Power",
                    if status.power {
                        "On".green().to_string()
                    } else {
                        "Off".red().to_string()
                    },
                ),
                row(
                    "Rotation speed",
                    format!("{}%", status.speed_percent).cyan().to_string(),
                ),
                row("Speed step", status.speed_step.to_string()),
                row("Unit state", status.unit_state.to_string()),
            ];
            Ok(table(&format!("{}:", name), rows))
        }
    }
}

/// Format device properties
///
/// `configured` is the range from the configuration, shown next to the
/// device's own range.
pub fn format_properties(
    properties: &DeviceProperties,
    configured: (u32, u32),
    format: &OutputFormat,
) -> Result<String> {
    match format {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(properties)?),
        OutputFormat::Table => {
            let device_range = format!("{}..={}", properties.speed_min, properties.speed_max);
            let agrees = (properties.speed_min, properties.speed_max) == configured;

            let rows = vec![
                row(
                    "Device speed range",
                    if agrees {
                        device_range.green().to_string()
                    } else {
                        device_range.yellow().to_string()
                    },
                ),
                row(
                    "Configured speed range",
                    format!("{}..={}", configured.0, configured.1),
                ),
                row(
                    "Firmware",
                    properties
                        .firmware
                        .clone()
                        .unwrap_or_else(|| "unknown".to_string()),
                ),
            ];
            Ok(table("Controller Properties:", rows))
        }
    }
}

/// Format a command outcome
pub fn format_ack(action: &str, ack: Ack, format: &OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(&json!({
            "action": action,
            "result": ack,
        }))?),
        OutputFormat::Table => Ok(match ack {
            Ack::Applied => format_success(action),
            Ack::SkippedNotReady => format_warning(&format!(
                "{} skipped: session not ready",
                action
            )),
        }),
    }
}

/// Format the effective configuration (password redacted)
pub fn format_config(config: &DeviceConfig, format: &OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Json => {
            let mut value = serde_json::to_value(config)?;
            if let Some(object) = value.as_object_mut() {
                object.insert("password".to_string(), json!("<redacted>"));
            }
            Ok(serde_json::to_string_pretty(&value)?)
        }
        OutputFormat::Table => {
            let transport = match &config.serial_device {
                Some(path) => format!("serial {} @ {} baud", path, config.baud_rate),
                None => format!("tcp {}", config.address()),
            };
            let reconnect = if config.reconnect.enabled {
                format!(
                    "on ({}s..{}s, x{})",
                    config.reconnect.initial_delay_secs,
                    config.reconnect.max_delay_secs,
                    config.reconnect.backoff_multiplier
                )
            } else {
                "off".to_string()
            };

            let rows = vec![
                row("Name", config.name.cyan().to_string()),
                row("Transport", transport),
                row("Password", "<redacted>"),
                row(
                    "Speed range",
                    format!("{}..={}", config.fan_min_speed, config.fan_max_speed),
                ),
                row("Lifecycle", config.lifecycle.to_string()),
                row("Timeout", format!("{} ms", config.timeout_ms)),
                row("Reconnect", reconnect),
                row("Wire logging", config.debug_wire.to_string()),
            ];
            Ok(table("Configuration:", rows))
        }
    }
}

/// Format success message
pub fn format_success(message: &str) -> String {
    format!("{} {}", "✓".green().bold(), message)
}

/// Format warning message
pub fn format_warning(message: &str) -> String {
    format!("{} {}", "!".yellow().bold(), message)
}
