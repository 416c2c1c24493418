//! # Calibration Module
//!
//! Operator-tunable shaping applied to control inputs before encoding.
//!
//! ## Dead Zone
//!
//! Inputs whose magnitude is strictly below the dead zone are treated as
//! exactly neutral. Inputs at or above it pass through unchanged.
//!
//! ## Rudder Window
//!
//! The rudder servo is centred on `rudder_center` and may swing at most
//! `rudder_max_angle` either side. The max angle is kept within
//! `min(center, 180 - center)` whenever either value changes, so a reader
//! never sees an invalid pair.
//!
//! ## Usage
//!
//! ```
//! use hovercraft_link::control::calibration::Calibration;
//!
//! let mut cal = Calibration::default();
//! cal.set_rudder_center(150);
//! assert_eq!(cal.rudder_max_angle(), 30);
//!
//! assert_eq!(cal.apply_rudder(0.02), 0.0);
//! ```

use std::time::Duration;

use crate::frame::protocol::{
    max_delta_for, RudderWindow, DEFAULT_RUDDER_CENTER, DEFAULT_RUDDER_MAX_ANGLE,
    RUDDER_ANGLE_MAX,
};

/// Largest configurable dead zone
pub const DEAD_ZONE_MAX: f32 = 0.2;

/// Default dead zone
pub const DEFAULT_DEAD_ZONE: f32 = 0.05;

/// Default command rate (frames per second)
pub const DEFAULT_COMMAND_RATE_HZ: u32 = 60;

/// Hard minimum spacing between command frames
pub const MIN_COMMAND_PERIOD: Duration = Duration::from_millis(5);

/// Snapshot of the operator's calibration settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Calibration {
    /// Dead zone as a fraction (0.0 to 0.2).
    dead_zone: f32,
    /// Swap rudder direction.
    invert_rudder: bool,
    /// Servo centre angle (0 to 180).
    rudder_center: u8,
    /// Max deflection either side of centre.
    rudder_max_angle: u8,
    /// Command frames per second (at least 1).
    command_rate_hz: u32,
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            dead_zone: DEFAULT_DEAD_ZONE,
            invert_rudder: false,
            rudder_center: DEFAULT_RUDDER_CENTER,
            rudder_max_angle: DEFAULT_RUDDER_MAX_ANGLE,
            command_rate_hz: DEFAULT_COMMAND_RATE_HZ,
        }
    }
}

impl Calibration {
    /// Creates a calibration, clamping every value into its valid range.
    ///
    /// # Examples
    ///
    /// ```
    /// use hovercraft_link::control::calibration::Calibration;
    ///
    /// let cal = Calibration::new(0.5, true, 200, 90, 0);
    /// assert_eq!(cal.dead_zone(), 0.2);
    /// assert_eq!(cal.rudder_center(), 180);
    /// assert_eq!(cal.rudder_max_angle(), 0);
    /// assert_eq!(cal.command_rate_hz(), 1);
    /// ```
    #[must_use]
    pub fn new(
        dead_zone: f32,
        invert_rudder: bool,
        rudder_center: u8,
        rudder_max_angle: u8,
        command_rate_hz: u32,
    ) -> Self {
        let mut cal = Self {
            invert_rudder,
            ..Self::default()
        };
        cal.set_dead_zone(dead_zone);
        cal.set_rudder_center(rudder_center);
        cal.set_rudder_max_angle(rudder_max_angle);
        cal.set_command_rate_hz(command_rate_hz);
        cal
    }

    #[must_use]
    pub fn dead_zone(&self) -> f32 {
        self.dead_zone
    }

    #[must_use]
    pub fn invert_rudder(&self) -> bool {
        self.invert_rudder
    }

    #[must_use]
    pub fn rudder_center(&self) -> u8 {
        self.rudder_center
    }

    #[must_use]
    pub fn rudder_max_angle(&self) -> u8 {
        self.rudder_max_angle
    }

    #[must_use]
    pub fn command_rate_hz(&self) -> u32 {
        self.command_rate_hz
    }

    /// Sets the dead zone, clamped to 0.0-0.2 (NaN becomes 0.0).
    pub fn set_dead_zone(&mut self, value: f32) {
        self.dead_zone = if value.is_nan() {
            0.0
        } else {
            value.clamp(0.0, DEAD_ZONE_MAX)
        };
    }

    pub fn set_invert_rudder(&mut self, enabled: bool) {
        self.invert_rudder = enabled;
    }

    /// Sets the servo centre and pulls the max angle back inside the new limit.
    pub fn set_rudder_center(&mut self, value: u8) {
        self.rudder_center = value.min(RUDDER_ANGLE_MAX);
        self.rudder_max_angle = self.rudder_max_angle.min(max_delta_for(self.rudder_center));
    }

    /// Sets the max deflection, clamped to `min(center, 180 - center)`.
    pub fn set_rudder_max_angle(&mut self, value: u8) {
        self.rudder_max_angle = value.min(max_delta_for(self.rudder_center));
    }

    /// Sets the command rate; anything below 1 Hz becomes 1 Hz.
    pub fn set_command_rate_hz(&mut self, rate: u32) {
        self.command_rate_hz = rate.max(1);
    }

    /// Restores the default servo centre and deflection.
    pub fn reset_rudder_defaults(&mut self) {
        self.rudder_center = DEFAULT_RUDDER_CENTER;
        self.rudder_max_angle = DEFAULT_RUDDER_MAX_ANGLE;
    }

    /// Servo window derived from centre and max angle
    #[must_use]
    pub fn rudder_window(&self) -> RudderWindow {
        RudderWindow::new(self.rudder_center, self.rudder_max_angle)
    }

    /// Interval between command frames: `max(5 ms, 1000 ms / rate)`
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::Duration;
    /// use hovercraft_link::control::calibration::Calibration;
    ///
    /// let cal = Calibration::new(0.05, false, 90, 70, 50);
    /// assert_eq!(cal.command_period(), Duration::from_millis(20));
    /// ```
    #[must_use]
    pub fn command_period(&self) -> Duration {
        let rate = self.command_rate_hz.max(1) as u64;
        Duration::from_millis(1_000 / rate).max(MIN_COMMAND_PERIOD)
    }

    /// Applies the dead zone to a throttle value, clamped to 0.0-1.0.
    #[must_use]
    pub fn apply_throttle(&self, input: f32) -> f32 {
        if input.is_nan() {
            return 0.0;
        }
        let clamped = input.clamp(0.0, 1.0);
        if clamped < self.dead_zone {
            0.0
        } else {
            clamped
        }
    }

    /// Applies dead zone and inversion to a rudder value, clamped to -1.0-1.0.
    ///
    /// The dead zone is symmetric, so small inputs of either sign map to
    /// exactly `0.0`.
    #[must_use]
    pub fn apply_rudder(&self, input: f32) -> f32 {
        if input.is_nan() {
            return 0.0;
        }
        let clamped = input.clamp(-1.0, 1.0);
        if clamped.abs() < self.dead_zone {
            return 0.0;
        }
        if self.invert_rudder {
            -clamped
        } else {
            clamped
        }
    }
}
