//! Breezart CLI Library
//!
//! Command definitions, configuration layering and output formatting for
//! the `breezartctl` tool. Device access goes through
//! [`breezart_client::DeviceClient`].
//!
//! ```no_run
//! use breezartctl::config::CliConfig;
//!
//! # fn example() -> anyhow::Result<()> {
//! let config = CliConfig::builder()
//!     .with_host("192.168.1.50")
//!     .with_password("7531")
//!     .build()?;
//! println!("Controller at {}", config.device.address());
//! # Ok(())
//! # }
//! ```

// Internal CLI implementation - not part of public API
#[doc(hidden)]
pub mod cli;

/// Configuration types for the CLI tool.
pub mod config;

// Internal formatting functions - not part of public API
#[doc(hidden)]
pub mod format;
