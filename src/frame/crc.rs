//! # CRC-8 Implementation
//!
//! CRC-8 checksum appended to every command frame.
//!
//! **Polynomial**: 0x07 (x^8 + x^2 + x + 1)
//! **Initial Value**: 0x00, no reflection, no final XOR

/// CRC-8 polynomial
const CRC8_POLY: u8 = 0x07;

/// Precomputed CRC8 lookup table for fast calculation
const CRC8_TABLE: [u8; 256] = generate_crc8_table();

/// Generate CRC8 lookup table at compile time
const fn generate_crc8_table() -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut i = 0;

    while i < 256 {
        let mut crc = i as u8;
        let mut j = 0;

        while j < 8 {
            if (crc & 0x80) != 0 {
                crc = (crc << 1) ^ CRC8_POLY;
            } else {
                crc <<= 1;
            }
            j += 1;
        }

        table[i] = crc;
        i += 1;
    }

    table
}

/// Calculate the frame CRC-8 using the lookup table
///
/// # Arguments
///
/// * `data` - Frame bytes preceding the CRC slot (start marker through reserved byte)
///
/// # Examples
///
/// ```
/// use hovercraft_link::frame::crc::crc8;
///
/// assert_eq!(crc8(b"123456789"), 0xF4);
/// ```
pub fn crc8(data: &[u8]) -> u8 {
    let mut crc: u8 = 0;

    for &byte in data {
        crc = CRC8_TABLE[(crc ^ byte) as usize];
    }

    crc
}

/// Bit-by-bit CRC-8, used to check the lookup table
#[allow(dead_code)]
fn crc8_slow(data: &[u8]) -> u8 {
    let mut crc: u8 = 0;

    for &byte in data {
        crc ^= byte;

        for _ in 0..8 {
            if (crc & 0x80) != 0 {
                crc = (crc << 1) ^ CRC8_POLY;
            } else {
                crc <<= 1;
            }
        }
    }

    crc
}
