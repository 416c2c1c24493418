//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.

use serde::de::Error;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::control::calibration::{Calibration, DEAD_ZONE_MAX};
use crate::error::{LinkError, Result};
use crate::frame::protocol::{max_delta_for, RUDDER_ANGLE_MAX};
use crate::link::SessionOptions;
use crate::telemetry::battery::BatteryProfile;

/// Main configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub link: LinkConfig,
    #[serde(default)]
    pub control: ControlConfig,
    #[serde(default)]
    pub battery: BatteryConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Peripheral link configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LinkConfig {
    #[serde(default = "default_address")]
    pub address: String,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    #[serde(default = "default_rssi_interval_ms")]
    pub rssi_interval_ms: u64,
}

/// Command shaping configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ControlConfig {
    #[serde(default = "default_command_rate_hz")]
    pub command_rate_hz: u32,

    #[serde(default = "default_dead_zone")]
    pub dead_zone: f32,

    #[serde(default)]
    pub invert_rudder: bool,

    #[serde(default = "default_rudder_center")]
    pub rudder_center: u8,

    #[serde(default = "default_rudder_max_angle")]
    pub rudder_max_angle: u8,
}

/// Battery reference voltages (volts)
#[derive(Debug, Deserialize, Clone)]
pub struct BatteryConfig {
    #[serde(default = "default_empty_v")]
    pub empty_v: f32,

    #[serde(default = "default_full_v")]
    pub full_v: f32,
}

/// Telemetry configuration
#[derive(Debug, Deserialize, Clone)]
pub struct TelemetryConfig {
    #[serde(default = "default_telemetry_enabled")]
    pub enabled: bool,

    #[serde(default = "default_log_dir")]
    pub log_dir: String,

    #[serde(default = "default_max_records_per_file")]
    pub max_records_per_file: usize,

    #[serde(default = "default_max_files_to_keep")]
    pub max_files_to_keep: usize,
}

/// Diagnostic log configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Daily-rotated log file directory; console only when unset
    #[serde(default)]
    pub directory: Option<String>,
}

// Default value functions
fn default_address() -> String { "SIM:HOVERCRAFT:01".to_string() }
fn default_connect_timeout_ms() -> u64 { 10000 }
fn default_rssi_interval_ms() -> u64 { 1000 }

fn default_command_rate_hz() -> u32 { 60 }
fn default_dead_zone() -> f32 { 0.05 }
fn default_rudder_center() -> u8 { 90 }
fn default_rudder_max_angle() -> u8 { 70 }

fn default_empty_v() -> f32 { 6.60 }
fn default_full_v() -> f32 { 8.40 }

fn default_telemetry_enabled() -> bool { false }
fn default_log_dir() -> String { "./logs/telemetry".to_string() }
fn default_max_records_per_file() -> usize { 10000 }
fn default_max_files_to_keep() -> usize { 10 }

fn default_log_level() -> String { "info".to_string() }

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            connect_timeout_ms: default_connect_timeout_ms(),
            rssi_interval_ms: default_rssi_interval_ms(),
        }
    }
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            command_rate_hz: default_command_rate_hz(),
            dead_zone: default_dead_zone(),
            invert_rudder: false,
            rudder_center: default_rudder_center(),
            rudder_max_angle: default_rudder_max_angle(),
        }
    }
}

impl Default for BatteryConfig {
    fn default() -> Self {
        Self {
            empty_v: default_empty_v(),
            full_v: default_full_v(),
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: default_telemetry_enabled(),
            log_dir: default_log_dir(),
            max_records_per_file: default_max_records_per_file(),
            max_files_to_keep: default_max_files_to_keep(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            directory: None,
        }
    }
}

impl ControlConfig {
    /// Initial calibration for the session
    #[must_use]
    pub fn calibration(&self) -> Calibration {
        Calibration::new(
            self.dead_zone,
            self.invert_rudder,
            self.rudder_center,
            self.rudder_max_angle,
            self.command_rate_hz,
        )
    }
}

impl BatteryConfig {
    #[must_use]
    pub fn profile(&self) -> BatteryProfile {
        BatteryProfile {
            empty_mv: (self.empty_v * 1000.0).round() as i32,
            full_mv: (self.full_v * 1000.0).round() as i32,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    ///
    /// * `Result<Config>` - Loaded and validated configuration
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use hovercraft_link::config::Config;
    ///
    /// let config = Config::load("config/hovercraft.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Session timing and battery options
    #[must_use]
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            connect_timeout: Duration::from_millis(self.link.connect_timeout_ms),
            rssi_interval: Duration::from_millis(self.link.rssi_interval_ms),
            battery_profile: self.battery.profile(),
        }
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    pub fn validate(&self) -> Result<()> {
        // Validate link configuration
        if self.link.address.is_empty() {
            return Err(invalid("link address cannot be empty"));
        }

        if self.link.connect_timeout_ms == 0 || self.link.connect_timeout_ms > 60000 {
            return Err(invalid("connect_timeout_ms must be between 1 and 60000"));
        }

        if self.link.rssi_interval_ms < 100 || self.link.rssi_interval_ms > 60000 {
            return Err(invalid("rssi_interval_ms must be between 100 and 60000"));
        }

        // Validate command shaping
        if self.control.command_rate_hz == 0 || self.control.command_rate_hz > 200 {
            return Err(invalid("command_rate_hz must be between 1 and 200"));
        }

        if !(0.0..=DEAD_ZONE_MAX).contains(&self.control.dead_zone) {
            return Err(invalid(format!(
                "dead_zone must be between 0.0 and {}",
                DEAD_ZONE_MAX
            )));
        }

        if self.control.rudder_center > RUDDER_ANGLE_MAX {
            return Err(invalid(format!(
                "rudder_center must be between 0 and {}",
                RUDDER_ANGLE_MAX
            )));
        }

        let max_delta = max_delta_for(self.control.rudder_center);
        if self.control.rudder_max_angle > max_delta {
            return Err(invalid(format!(
                "rudder_max_angle must be at most {} for rudder_center {}",
                max_delta, self.control.rudder_center
            )));
        }

        // Validate battery voltages
        if !self.battery.empty_v.is_finite() || self.battery.empty_v <= 0.0 {
            return Err(invalid("battery empty_v must be greater than 0"));
        }

        if !self.battery.full_v.is_finite() || self.battery.full_v <= self.battery.empty_v {
            return Err(invalid("battery full_v must be greater than empty_v"));
        }

        // Validate telemetry configuration
        if self.telemetry.enabled && self.telemetry.log_dir.is_empty() {
            return Err(invalid("telemetry log_dir cannot be empty when enabled"));
        }

        if self.telemetry.max_records_per_file == 0 {
            return Err(invalid("max_records_per_file must be greater than 0"));
        }

        if self.telemetry.max_files_to_keep == 0 {
            return Err(invalid("max_files_to_keep must be greater than 0"));
        }

        // Validate logging
        if !LOG_LEVELS.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(invalid(format!(
                "logging level must be one of: {}",
                LOG_LEVELS.join(", ")
            )));
        }

        if matches!(&self.logging.directory, Some(dir) if dir.is_empty()) {
            return Err(invalid("logging directory cannot be empty when set"));
        }

        Ok(())
    }
}

fn invalid<T: std::fmt::Display>(msg: T) -> LinkError {
    LinkError::Config(toml::de::Error::custom(msg))
}
