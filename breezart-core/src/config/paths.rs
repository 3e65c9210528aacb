//! Where the device configuration lives by default

use std::path::PathBuf;

/// `<config dir>/breezart/config.toml`, or under `/etc` when the platform
/// has no per-user config directory.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("/etc"))
        .join("breezart")
        .join("config.toml")
}
