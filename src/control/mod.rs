//! # Control Module
//!
//! Operator inputs and the calibration applied to them.
//!
//! This module handles:
//! - Throttle/rudder snapshots written by the operator
//! - Dead zone, rudder inversion and servo windowing
//! - Publishing calibration changes to the session

pub mod input;
pub mod calibration;
pub mod settings;
