//! # Battery Telemetry
//!
//! Battery state reported by the peripheral and the voltage-to-percent curve.

use serde::Serialize;

/// Voltage of an empty 2S pack (millivolts)
pub const DEFAULT_EMPTY_MV: i32 = 6_600;

/// Voltage of a full 2S pack (millivolts)
pub const DEFAULT_FULL_MV: i32 = 8_400;

/// Latest battery telemetry. All fields are `None` until the first update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatteryState {
    /// Pack voltage in millivolts
    pub voltage_mv: Option<i32>,
    /// Charge estimate (0-100%)
    pub percent: Option<u8>,
    /// Wall-clock time of the update, milliseconds since the Unix epoch
    pub timestamp_ms: Option<i64>,
}

impl BatteryState {
    /// Convenience conversion of millivolts to volts
    #[must_use]
    pub fn voltage_v(&self) -> Option<f64> {
        self.voltage_mv.map(|mv| mv as f64 / 1000.0)
    }
}

/// Reference voltages for the linear charge estimate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatteryProfile {
    pub empty_mv: i32,
    pub full_mv: i32,
}

impl Default for BatteryProfile {
    fn default() -> Self {
        Self {
            empty_mv: DEFAULT_EMPTY_MV,
            full_mv: DEFAULT_FULL_MV,
        }
    }
}

/// Linear charge estimate between the profile's empty and full voltages.
///
/// Non-positive voltages and degenerate profiles (`full <= empty`) report 0%.
///
/// # Examples
///
/// ```
/// use hovercraft_link::telemetry::battery::{percent_from_voltage, BatteryProfile};
///
/// assert_eq!(percent_from_voltage(7_000, &BatteryProfile::default()), 22);
/// assert_eq!(percent_from_voltage(9_000, &BatteryProfile::default()), 100);
/// ```
#[must_use]
pub fn percent_from_voltage(voltage_mv: i32, profile: &BatteryProfile) -> u8 {
    if voltage_mv <= 0 || profile.full_mv <= profile.empty_mv {
        return 0;
    }
    let voltage = voltage_mv as f64 / 1000.0;
    let empty = profile.empty_mv as f64 / 1000.0;
    let full = profile.full_mv as f64 / 1000.0;

    let percent = if voltage <= empty {
        0.0
    } else if voltage >= full {
        100.0
    } else {
        (voltage - empty) * 100.0 / (full - empty)
    };
    percent.round().clamp(0.0, 100.0) as u8
}
