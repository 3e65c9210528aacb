//! Conversion between device speed steps and percentages
//!
//! The controller works in discrete steps `[min, max]` while the smart-home
//! side works in percent. Both directions round up, so a speed-up command
//! lands on the next-higher step and a reported step maps to the
//! next-higher percent. The round trip can drift by one step; that is
//! expected.
//!
//! All arithmetic is done on integers. `ceil(a / b)` is `(a + b - 1) / b`.

use serde::{Deserialize, Serialize};

use crate::error::{BreezartError, Result};

/// Highest percentage accepted by [`SpeedRange::step_for`]
pub const MAX_PERCENT: u32 = 100;

/// Convert a speed step to a percentage
///
/// `ceil((step - min) / units_count * 100)`. Steps below `min` map to 0,
/// steps above `min + units_count` map to 100. `units_count` must be
/// positive; [`SpeedRange`] guarantees it.
///
/// ```
/// use breezart_core::speed::to_percent;
///
/// assert_eq!(to_percent(1, 1, 5), 0);
/// assert_eq!(to_percent(4, 1, 5), 60);
/// assert_eq!(to_percent(6, 1, 5), 100);
/// assert_eq!(to_percent(9, 1, 5), 100);
/// ```
#[inline]
pub fn to_percent(step: u32, min: u32, units_count: u32) -> u32 {
    debug_assert!(units_count > 0);
    let offset = u64::from(step.saturating_sub(min).min(units_count));
    let units = u64::from(units_count);
    ((offset * 100 + units - 1) / units) as u32
}

/// Convert a percentage to a speed step
///
/// `ceil(units_count * percent / 100) + min`.
///
/// ```
/// use breezart_core::speed::to_step;
///
/// assert_eq!(to_step(0, 1, 5), 1);
/// assert_eq!(to_step(50, 1, 5), 4);
/// assert_eq!(to_step(100, 1, 5), 6);
/// ```
#[inline]
pub fn to_step(percent: u32, min: u32, units_count: u32) -> u32 {
    let scaled = u64::from(units_count) * u64::from(percent);
    ((scaled + 99) / 100) as u32 + min
}

/// Configured speed range of a fan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeedRange {
    min: u32,
    max: u32,
}

impl SpeedRange {
    /// Create a range, rejecting `max <= min`
    pub fn new(min: u32, max: u32) -> Result<Self> {
        if max <= min {
            return Err(BreezartError::Config(format!(
                "fan_max_speed ({}) must be greater than fan_min_speed ({})",
                max, min
            )));
        }
        Ok(Self { min, max })
    }

    pub fn min(&self) -> u32 {
        self.min
    }

    pub fn max(&self) -> u32 {
        self.max
    }

    /// Number of steps above the minimum (always > 0)
    pub fn units_count(&self) -> u32 {
        self.max - self.min
    }

    /// Whether `step` lies inside the range
    pub fn contains(&self, step: u32) -> bool {
        (self.min..=self.max).contains(&step)
    }

    /// Percentage for a device-reported step
    ///
    /// Steps outside the range are clamped first so the result is always
    /// within `0..=100`.
    pub fn percent_for(&self, step: u32) -> u32 {
        let step = step.clamp(self.min, self.max);
        to_percent(step, self.min, self.units_count())
    }

    /// Step for a framework percentage
    ///
    /// Percentages above 100 are rejected rather than clamped.
    pub fn step_for(&self, percent: u32) -> Result<u32> {
        if percent > MAX_PERCENT {
            return Err(BreezartError::InvalidInput(format!(
                "Rotation speed must be 0-{}%, got {}",
                MAX_PERCENT, percent
            )));
        }
        Ok(to_step(percent, self.min, self.units_count()))
    }
}
