//! Reconnection policy for long-lived sessions

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Reconnection configuration
///
/// Only consulted when the session is long-lived. A per-operation session
/// reconnects on every call anyway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Reconnect in the background after the session fails
    pub enabled: bool,
    /// Give up after this many attempts (0 = unlimited)
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub initial_delay_secs: u64,
    /// Upper bound for the backoff delay
    pub max_delay_secs: u64,
    /// Growth factor applied to the delay after each failed attempt
    pub backoff_multiplier: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 0,
            initial_delay_secs: 1,
            max_delay_secs: 30,
            backoff_multiplier: 2.0,
        }
    }
}

impl ReconnectConfig {
    /// Delay to wait after `delay`, capped at `max_delay_secs`
    pub fn next_delay(&self, delay: Duration) -> Duration {
        let max_delay = Duration::from_secs(self.max_delay_secs);
        Duration::from_secs_f64(
            (delay.as_secs_f64() * self.backoff_multiplier).min(max_delay.as_secs_f64()),
        )
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_secs(self.initial_delay_secs)
    }

    /// Whether `attempt` (1-based) is the last one allowed
    pub fn exhausted(&self, attempt: u32) -> bool {
        self.max_attempts > 0 && attempt >= self.max_attempts
    }
}
