//! # Frame Codec Module
//!
//! Pure byte-level encoding and decoding for the hovercraft link.
//!
//! This module handles:
//! - Command frame encoding (throttle, rudder angle, arm/stop flags)
//! - Command frame validation on the receiving side
//! - Battery voltage telemetry decoding
//! - CRC-8 checksum calculation

pub mod protocol;
pub mod encoder;
pub mod decoder;
pub mod crc;
