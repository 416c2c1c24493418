//! # Command Frame Encoder
//!
//! Encodes operator commands into fixed-size command frames. Encoding never
//! fails: every numeric input is clamped into its wire range first.

use super::crc::crc8;
use super::protocol::*;

/// Encode a command into a complete frame
///
/// # Arguments
///
/// * `sequence` - Frame sequence number (wraps at 255)
/// * `throttle` - Normalized throttle (0.0 to 1.0)
/// * `rudder` - Normalized rudder (-1.0 full left to 1.0 full right)
/// * `armed` - Whether motor output is permitted
/// * `stop` - Explicit stop request
/// * `window` - Servo angle window the rudder is mapped into
///
/// # Returns
///
/// * `CommandFrame` - 8 bytes: start + sequence + throttle + rudder + flags + reserved + crc + end
///
/// # Examples
///
/// ```
/// use hovercraft_link::frame::encoder::encode_command;
/// use hovercraft_link::frame::protocol::RudderWindow;
///
/// let frame = encode_command(0, 0.5, 0.0, true, false, RudderWindow::default());
/// assert_eq!(frame.throttle(), 50);
/// assert_eq!(frame.rudder_angle(), 90);
/// assert!(frame.is_armed());
/// ```
pub fn encode_command(
    sequence: u8,
    throttle: f32,
    rudder: f32,
    armed: bool,
    stop: bool,
    window: RudderWindow,
) -> CommandFrame {
    let mut bytes = [0u8; COMMAND_FRAME_LEN];
    bytes[OFFSET_START] = FRAME_START;
    bytes[OFFSET_SEQUENCE] = sequence;
    bytes[OFFSET_THROTTLE] = scale_throttle(throttle);
    bytes[OFFSET_RUDDER] = scale_rudder_angle(rudder, window);
    bytes[OFFSET_FLAGS] = build_flags(armed, stop);
    bytes[OFFSET_RESERVED] = 0;
    bytes[OFFSET_CRC] = crc8(&bytes[..OFFSET_CRC]);
    bytes[OFFSET_END] = FRAME_END;

    CommandFrame::from_bytes(bytes)
}

/// Encode a neutral, disarmed frame (throttle 0, rudder centred)
pub fn encode_neutral(sequence: u8, window: RudderWindow) -> CommandFrame {
    encode_command(sequence, 0.0, 0.0, false, false, window)
}

/// Encode a neutral, disarmed frame with the stop flag raised
pub fn encode_stop(sequence: u8, window: RudderWindow) -> CommandFrame {
    encode_command(sequence, 0.0, 0.0, false, true, window)
}

/// Build the flags byte; reserved bits stay zero
fn build_flags(armed: bool, stop: bool) -> u8 {
    let mut flags = 0;
    if armed {
        flags |= FLAG_ARMED;
    }
    if stop {
        flags |= FLAG_STOP;
    }
    flags
}

/// Scale a normalized throttle to percent (0-100)
///
/// NaN is treated as zero throttle.
pub fn scale_throttle(value: f32) -> u8 {
    if value.is_nan() {
        return 0;
    }
    let clamped = value.clamp(0.0, 1.0);
    (clamped * THROTTLE_MAX as f32).round().clamp(0.0, THROTTLE_MAX as f32) as u8
}

/// Map a normalized rudder value onto the servo angle window
///
/// `-1.0` lands on `center - max_delta`, `1.0` on `center + max_delta`.
/// NaN is treated as centred.
pub fn scale_rudder_angle(value: f32, window: RudderWindow) -> u8 {
    let clamped = if value.is_nan() {
        0.0
    } else {
        value.clamp(-1.0, 1.0)
    };
    let angle = (window.center() as f32 + clamped * window.max_delta() as f32).round();
    angle.clamp(window.min_angle() as f32, window.max_angle() as f32) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_frame(throttle: f32, rudder: f32) -> CommandFrame {
        encode_command(0, throttle, rudder, true, false, RudderWindow::default())
    }

    #[test]
    fn test_encode_frame_structure() {
        let frame = encode_command(0x12, 0.5, 0.0, true, false, RudderWindow::default());
        let bytes = frame.as_bytes();

        assert_eq!(bytes.len(), COMMAND_FRAME_LEN);
        assert_eq!(bytes[OFFSET_START], FRAME_START);
        assert_eq!(bytes[OFFSET_SEQUENCE], 0x12);
        assert_eq!(bytes[OFFSET_THROTTLE], 50);
        assert_eq!(bytes[OFFSET_RUDDER], 90);
        assert_eq!(bytes[OFFSET_FLAGS], FLAG_ARMED);
        assert_eq!(bytes[OFFSET_RESERVED], 0);
        assert_eq!(bytes[OFFSET_CRC], crc8(&bytes[..OFFSET_CRC]));
        assert_eq!(bytes[OFFSET_END], FRAME_END);
    }

    #[test]
    fn test_encode_known_bytes() {
        // Rudder centre 90 encodes as 0x5A, same value as the end marker
        let frame = encode_command(0, 0.0, 0.0, false, false, RudderWindow::default());
        let mut expected = [0xA5, 0x00, 0x00, 0x5A, 0x00, 0x00, 0x00, 0x5A];
        expected[OFFSET_CRC] = crc8(&expected[..OFFSET_CRC]);
        assert_eq!(frame.as_bytes(), &expected);
    }

    #[test]
    fn test_throttle_clamped_before_scaling() {
        assert_eq!(default_frame(-0.5, 0.0).throttle(), default_frame(0.0, 0.0).throttle());
        assert_eq!(default_frame(3.0, 0.0).throttle(), 100);
        assert_eq!(default_frame(f32::NEG_INFINITY, 0.0).throttle(), 0);
        assert_eq!(default_frame(f32::NAN, 0.0).throttle(), 0);
    }

    #[test]
    fn test_throttle_rounding() {
        assert_eq!(scale_throttle(0.004), 0);
        assert_eq!(scale_throttle(0.006), 1);
        assert_eq!(scale_throttle(0.333), 33);
        assert_eq!(scale_throttle(1.0), 100);
    }

    #[test]
    fn test_rudder_default_window_endpoints() {
        assert_eq!(default_frame(0.0, -1.0).rudder_angle(), 20);
        assert_eq!(default_frame(0.0, 0.0).rudder_angle(), 90);
        assert_eq!(default_frame(0.0, 1.0).rudder_angle(), 160);
        assert_eq!(default_frame(0.0, 0.5).rudder_angle(), 125);
    }

    #[test]
    fn test_rudder_clamped_before_scaling() {
        assert_eq!(default_frame(0.0, -7.0).rudder_angle(), 20);
        assert_eq!(default_frame(0.0, 7.0).rudder_angle(), 160);
        assert_eq!(default_frame(0.0, f32::NAN).rudder_angle(), 90);
    }

    #[test]
    fn test_rudder_always_inside_window() {
        for center in 0..=RUDDER_ANGLE_MAX {
            let window = RudderWindow::new(center, max_delta_for(center));
            for step in -30..=30 {
                let input = step as f32 / 10.0;
                let angle = scale_rudder_angle(input, window);
                assert!(
                    angle >= center - window.max_delta() && angle <= center + window.max_delta(),
                    "center {} input {} produced {}",
                    center,
                    input,
                    angle
                );
            }
        }
    }

    #[test]
    fn test_flags() {
        assert_eq!(build_flags(false, false), 0x00);
        assert_eq!(build_flags(true, false), 0x01);
        assert_eq!(build_flags(false, true), 0x02);
        assert_eq!(build_flags(true, true), 0x03);
    }

    #[test]
    fn test_neutral_and_stop_frames() {
        let window = RudderWindow::new(100, 40);

        let neutral = encode_neutral(9, window);
        assert_eq!(neutral.sequence(), 9);
        assert_eq!(neutral.throttle(), 0);
        assert_eq!(neutral.rudder_angle(), 100);
        assert!(!neutral.is_armed());
        assert!(!neutral.is_stop());

        let stop = encode_stop(10, window);
        assert_eq!(stop.throttle(), 0);
        assert_eq!(stop.rudder_angle(), 100);
        assert!(!stop.is_armed());
        assert!(stop.is_stop());
    }

    #[test]
    fn test_different_data_different_crc() {
        let a = default_frame(0.2, 0.0);
        let b = default_frame(0.3, 0.0);
        assert_ne!(a.crc(), b.crc());
    }
}
