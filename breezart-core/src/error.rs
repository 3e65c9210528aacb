//! Error types for the Breezart client

use thiserror::Error;

/// Core error type for Breezart operations
#[derive(Error, Debug)]
pub enum BreezartError {
    /// Invalid configuration (speed range, empty host, ...)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Transport could not be opened or was refused
    #[error("Connection error: {0}")]
    Connection(String),

    /// Controller rejected the credentials
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Malformed or unexpected response
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Network operation exceeded its deadline
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Peer closed the connection (EOF, reset)
    #[error("Device disconnected: {0}")]
    DeviceDisconnected(String),

    /// Session has not reached Ready yet
    #[error("Session not ready")]
    NotReady,

    /// Invalid input or arguments
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Reconnection failed after max retries
    #[error("Reconnection failed after {attempts} attempts: {reason}")]
    ReconnectionFailed { attempts: u32, reason: String },
}

/// Result type alias for Breezart operations
pub type Result<T> = std::result::Result<T, BreezartError>;

impl From<serde_json::Error> for BreezartError {
    fn from(err: serde_json::Error) -> Self {
        BreezartError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for BreezartError {
    fn from(err: toml::de::Error) -> Self {
        BreezartError::Serialization(err.to_string())
    }
}

/// Determine if an error invalidates the session it occurred on
///
/// Transport-level failures leave the connection in an unknown state (a late
/// response may still be in flight), so the session has to be torn down.
/// Protocol errors do not: the request/response pair was complete.
pub fn is_session_fatal(err: &BreezartError) -> bool {
    match err {
        BreezartError::Connection(_)
        | BreezartError::Timeout(_)
        | BreezartError::DeviceDisconnected(_)
        | BreezartError::Io(_) => true,
        BreezartError::Authentication(_) => true,
        _ => false,
    }
}
