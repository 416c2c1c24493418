//! # Hovercraft Link Library
//!
//! Remote-pilot link for a small hovercraft over a low-energy wireless
//! connection.
//!
//! This library streams fixed-rate command frames (throttle, rudder, arm and
//! stop flags) to the craft, decodes the battery telemetry it sends back and
//! manages the connection lifecycle so that motor output is only ever
//! commanded while the operator is connected and armed.

pub mod config;
pub mod control;
pub mod error;
pub mod frame;
pub mod link;
pub mod telemetry;
pub mod transport;
