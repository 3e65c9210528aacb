//! Configuration types for Breezart controllers
//!
//! - [`DeviceConfig`] - controller address, credentials, speed range and
//!   session policy, loaded once at startup
//! - [`ReconnectConfig`] - backoff policy for long-lived sessions

mod device_config;
mod paths;
mod reconnect;

pub use device_config::{
    ConnectionConfig, DeviceConfig, Lifecycle, DEFAULT_BAUD_RATE, DEFAULT_PORT, DEFAULT_TIMEOUT_MS,
};
pub use paths::default_config_path;
pub use reconnect::ReconnectConfig;
