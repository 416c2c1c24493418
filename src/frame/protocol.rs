//! # Wire Protocol Constants and Types
//!
//! Byte-exact definitions of the hovercraft command frame and the
//! characteristic identities used to tag telemetry.
//!
//! ```text
//! ┌───────┬──────────┬──────────┬────────┬───────┬──────────┬───────┬──────┐
//! │ 0xA5  │ sequence │ throttle │ rudder │ flags │ reserved │ CRC-8 │ 0x5A │
//! │ start │ 0..255   │ 0..100   │ 0..180 │       │   0x00   │ 0..=5 │ end  │
//! └───────┴──────────┴──────────┴────────┴───────┴──────────┴───────┴──────┘
//! ```

use std::fmt;

/// Command frame start marker
pub const FRAME_START: u8 = 0xA5;

/// Command frame end marker
pub const FRAME_END: u8 = 0x5A;

/// Total command frame length in bytes
pub const COMMAND_FRAME_LEN: usize = 8;

/// Byte offsets within a command frame
pub const OFFSET_START: usize = 0;
pub const OFFSET_SEQUENCE: usize = 1;
pub const OFFSET_THROTTLE: usize = 2;
pub const OFFSET_RUDDER: usize = 3;
pub const OFFSET_FLAGS: usize = 4;
pub const OFFSET_RESERVED: usize = 5;
pub const OFFSET_CRC: usize = 6;
pub const OFFSET_END: usize = 7;

/// Flags byte: motor output permitted
pub const FLAG_ARMED: u8 = 0x01;

/// Flags byte: explicit emergency stop
pub const FLAG_STOP: u8 = 0x02;

/// Throttle byte range (percent)
pub const THROTTLE_MAX: u8 = 100;

/// Servo angle range accepted by the peripheral (degrees)
pub const RUDDER_ANGLE_MIN: u8 = 0;
pub const RUDDER_ANGLE_MAX: u8 = 180;

/// Default rudder servo centre (degrees)
pub const DEFAULT_RUDDER_CENTER: u8 = 90;

/// Default rudder deflection either side of centre (degrees)
pub const DEFAULT_RUDDER_MAX_ANGLE: u8 = 70;

/// Identity of a GATT characteristic, as its 16-bit short UUID.
///
/// Displayed in the full 128-bit form on the Bluetooth base UUID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CharacteristicId(pub u16);

impl fmt::Display for CharacteristicId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0000{:04X}-0000-1000-8000-00805F9B34FB", self.0)
    }
}

/// Primary hovercraft service
pub const HOVERCRAFT_SERVICE: CharacteristicId = CharacteristicId(0xFEED);

/// Characteristic receiving command frames (write without response)
pub const COMMAND_CHAR: CharacteristicId = CharacteristicId(0xBEEF);

/// General telemetry characteristic
pub const TELEMETRY_CHAR: CharacteristicId = CharacteristicId(0xDEAD);

/// Battery voltage characteristic (notify)
pub const VOLTAGE_CHAR: CharacteristicId = CharacteristicId(0xBABA);

/// Standard Battery Level characteristic
pub const BATTERY_LEVEL_CHAR: CharacteristicId = CharacteristicId(0x2A19);

/// Client Characteristic Configuration Descriptor
pub const CCCD: CharacteristicId = CharacteristicId(0x2902);

/// Absolute-angle window the rudder byte is mapped into.
///
/// `max_delta` never exceeds `min(center, 180 - center)`, so every angle in
/// `[center - max_delta, center + max_delta]` is a valid servo position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RudderWindow {
    center: u8,
    max_delta: u8,
}

impl Default for RudderWindow {
    fn default() -> Self {
        Self {
            center: DEFAULT_RUDDER_CENTER,
            max_delta: DEFAULT_RUDDER_MAX_ANGLE,
        }
    }
}

impl RudderWindow {
    /// Creates a window, clamping the centre to 0-180 and the delta to the
    /// largest value that keeps both edges on the servo.
    #[must_use]
    pub fn new(center: u8, max_delta: u8) -> Self {
        let center = center.min(RUDDER_ANGLE_MAX);
        Self {
            center,
            max_delta: max_delta.min(max_delta_for(center)),
        }
    }

    #[must_use]
    pub fn center(&self) -> u8 {
        self.center
    }

    #[must_use]
    pub fn max_delta(&self) -> u8 {
        self.max_delta
    }

    /// Lowest angle this window can produce
    #[must_use]
    pub fn min_angle(&self) -> u8 {
        self.center - self.max_delta
    }

    /// Highest angle this window can produce
    #[must_use]
    pub fn max_angle(&self) -> u8 {
        self.center + self.max_delta
    }
}

/// Largest deflection allowed around `center` (`min(center, 180 - center)`).
#[must_use]
pub fn max_delta_for(center: u8) -> u8 {
    let center = center.min(RUDDER_ANGLE_MAX);
    center.min(RUDDER_ANGLE_MAX - center)
}

/// A complete, validated command frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandFrame([u8; COMMAND_FRAME_LEN]);

impl CommandFrame {
    /// Wraps raw bytes. Callers are the encoder and the parser, which have
    /// already range-checked every field.
    pub(crate) fn from_bytes(bytes: [u8; COMMAND_FRAME_LEN]) -> Self {
        Self(bytes)
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; COMMAND_FRAME_LEN] {
        &self.0
    }

    #[must_use]
    pub fn sequence(&self) -> u8 {
        self.0[OFFSET_SEQUENCE]
    }

    /// Throttle in percent (0-100)
    #[must_use]
    pub fn throttle(&self) -> u8 {
        self.0[OFFSET_THROTTLE]
    }

    /// Rudder servo angle in degrees
    #[must_use]
    pub fn rudder_angle(&self) -> u8 {
        self.0[OFFSET_RUDDER]
    }

    #[must_use]
    pub fn flags(&self) -> u8 {
        self.0[OFFSET_FLAGS]
    }

    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.flags() & FLAG_ARMED != 0
    }

    #[must_use]
    pub fn is_stop(&self) -> bool {
        self.flags() & FLAG_STOP != 0
    }

    #[must_use]
    pub fn crc(&self) -> u8 {
        self.0[OFFSET_CRC]
    }
}

impl AsRef<[u8]> for CommandFrame {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}
