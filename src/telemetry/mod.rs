//! # Telemetry Module
//!
//! Battery telemetry from the peripheral and its optional JSONL log.
//!
//! This module handles:
//! - Battery state and the voltage-to-percent estimate
//! - Writing updates to rotating JSONL files
//! - Retaining only the last N files

pub mod battery;
pub mod logger;

pub use battery::{BatteryProfile, BatteryState};
pub use logger::TelemetryLogger;
