//! Core types and data structures for Breezart units

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::speed::SpeedRange;

/// Operating-mode code reported by the controller
///
/// The full enumeration is controller-defined. The value is kept opaque and
/// only compared against the known power-on codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitState(pub u16);

impl UnitState {
    /// Codes the controller uses while the unit is running
    pub const POWERED_CODES: [u16; 2] = [1, 3];

    pub fn code(self) -> u16 {
        self.0
    }

    /// Whether the unit is running
    pub fn is_powered(self) -> bool {
        Self::POWERED_CODES.contains(&self.0)
    }
}

impl From<u16> for UnitState {
    fn from(code: u16) -> Self {
        UnitState(code)
    }
}

impl fmt::Display for UnitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Raw status as decoded from a status response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitStatus {
    pub unit_state: UnitState,
    /// Device-native speed step
    pub speed_step: u32,
}

/// Fan status as exposed to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FanStatus {
    /// Controller operating-mode code
    pub unit_state: UnitState,
    /// Device-native speed step
    pub speed_step: u32,
    /// Derived from `unit_state`
    pub power: bool,
    /// Speed in percent of the configured range
    pub speed_percent: u32,
    /// `false` when this is the placeholder returned before the session is up
    pub session_ready: bool,
}

impl FanStatus {
    /// Build a status from a decoded response and the configured range
    pub fn from_unit(status: UnitStatus, range: &SpeedRange) -> Self {
        Self {
            unit_state: status.unit_state,
            speed_step: status.speed_step,
            power: status.unit_state.is_powered(),
            speed_percent: range.percent_for(status.speed_step),
            session_ready: true,
        }
    }

    /// Placeholder reported while a long-lived session is not established
    pub fn not_ready() -> Self {
        Self {
            unit_state: UnitState::default(),
            speed_step: 0,
            power: false,
            speed_percent: 0,
            session_ready: false,
        }
    }
}

/// Capabilities reported by the controller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceProperties {
    /// Lowest speed step supported by the unit
    pub speed_min: u32,
    /// Highest speed step supported by the unit
    pub speed_max: u32,
    /// Firmware identifier, if the controller sends one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub firmware: Option<String>,
}

impl DeviceProperties {
    /// Whether the reported range matches the configured one
    pub fn agrees_with(&self, range: &SpeedRange) -> bool {
        self.speed_min == range.min() && self.speed_max == range.max()
    }
}

/// Outcome of a command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Ack {
    /// Controller acknowledged the command
    Applied,
    /// Long-lived session was not up; the command was dropped
    SkippedNotReady,
}
