//! Breezart Core Library
//!
//! Shared types, speed mapping, and configuration for the Breezart fan
//! bridge. Used by the client library and the CLI.

pub mod config;
pub mod error;
pub mod speed;
pub mod types;

// Re-export commonly used types
pub use config::{
    default_config_path, ConnectionConfig, DeviceConfig, Lifecycle, ReconnectConfig,
};
pub use error::*;
pub use speed::SpeedRange;
pub use types::*;
