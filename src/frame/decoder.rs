//! # Frame Decoder
//!
//! Decodes battery telemetry payloads and validates command frames.

use super::crc::crc8;
use super::protocol::*;
use crate::error::{LinkError, Result};
use crate::telemetry::battery::{percent_from_voltage, BatteryProfile, BatteryState};

/// Outcome of decoding a characteristic value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Telemetry {
    /// Voltage update; `timestamp_ms` is left for the caller to stamp
    Battery(BatteryState),
    /// Value from a characteristic this decoder does not know
    Unknown,
}

/// Decode a characteristic value using the default battery profile
///
/// # Examples
///
/// ```
/// use hovercraft_link::frame::decoder::{decode_telemetry, Telemetry};
/// use hovercraft_link::frame::protocol::VOLTAGE_CHAR;
///
/// let decoded = decode_telemetry(VOLTAGE_CHAR, &[0x58, 0x1B]).unwrap();
/// match decoded {
///     Telemetry::Battery(state) => {
///         assert_eq!(state.voltage_mv, Some(7000));
///         assert_eq!(state.percent, Some(22));
///     }
///     Telemetry::Unknown => unreachable!(),
/// }
/// ```
pub fn decode_telemetry(characteristic: CharacteristicId, payload: &[u8]) -> Result<Telemetry> {
    decode_telemetry_with(characteristic, payload, &BatteryProfile::default())
}

/// Decode a characteristic value
///
/// # Arguments
///
/// * `characteristic` - Characteristic the value arrived on
/// * `payload` - Raw value bytes
/// * `profile` - Reference voltages for the charge estimate
///
/// # Errors
///
/// Returns `MalformedFrame` if the voltage payload is shorter than 2 bytes or
/// carries a non-finite float. Callers keep their previous state.
pub fn decode_telemetry_with(
    characteristic: CharacteristicId,
    payload: &[u8],
    profile: &BatteryProfile,
) -> Result<Telemetry> {
    if characteristic != VOLTAGE_CHAR {
        return Ok(Telemetry::Unknown);
    }

    let voltage_mv = decode_voltage_mv(payload)?;
    Ok(Telemetry::Battery(BatteryState {
        voltage_mv: Some(voltage_mv),
        percent: Some(percent_from_voltage(voltage_mv, profile)),
        timestamp_ms: None,
    }))
}

/// Decode a voltage payload to millivolts
///
/// - 4+ bytes: little-endian `f32` volts
/// - 2-3 bytes: little-endian `u16` millivolts
fn decode_voltage_mv(payload: &[u8]) -> Result<i32> {
    if payload.len() >= 4 {
        let volts = f32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
        if !volts.is_finite() {
            return Err(LinkError::MalformedFrame(format!(
                "Non-finite voltage value: {}",
                volts
            )));
        }
        Ok((volts * 1000.0).round() as i32)
    } else if payload.len() >= 2 {
        Ok(u16::from_le_bytes([payload[0], payload[1]]) as i32)
    } else {
        Err(LinkError::MalformedFrame(format!(
            "Voltage payload too short: {} bytes",
            payload.len()
        )))
    }
}

/// Validate and parse a command frame
///
/// This is the receiving side of [`super::encoder::encode_command`].
///
/// # Errors
///
/// Returns `MalformedFrame` if:
/// - Length is not 8 bytes
/// - Start or end marker is wrong
/// - CRC check fails
/// - A field is out of its wire range
pub fn parse_command(bytes: &[u8]) -> Result<CommandFrame> {
    let bytes: [u8; COMMAND_FRAME_LEN] = bytes.try_into().map_err(|_| {
        LinkError::MalformedFrame(format!(
            "Command frame length {} (expected {})",
            bytes.len(),
            COMMAND_FRAME_LEN
        ))
    })?;

    if bytes[OFFSET_START] != FRAME_START {
        return Err(LinkError::MalformedFrame(format!(
            "Invalid start byte: 0x{:02X}",
            bytes[OFFSET_START]
        )));
    }

    if bytes[OFFSET_END] != FRAME_END {
        return Err(LinkError::MalformedFrame(format!(
            "Invalid end byte: 0x{:02X}",
            bytes[OFFSET_END]
        )));
    }

    let calculated_crc = crc8(&bytes[..OFFSET_CRC]);
    if calculated_crc != bytes[OFFSET_CRC] {
        return Err(LinkError::MalformedFrame(format!(
            "CRC mismatch: expected 0x{:02X}, got 0x{:02X}",
            calculated_crc, bytes[OFFSET_CRC]
        )));
    }

    if bytes[OFFSET_THROTTLE] > THROTTLE_MAX || bytes[OFFSET_RUDDER] > RUDDER_ANGLE_MAX {
        return Err(LinkError::MalformedFrame(format!(
            "Field out of range: throttle {}, rudder {}",
            bytes[OFFSET_THROTTLE], bytes[OFFSET_RUDDER]
        )));
    }

    Ok(CommandFrame::from_bytes(bytes))
}
