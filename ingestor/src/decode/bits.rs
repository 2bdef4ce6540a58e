//! Single-byte helpers shared by the per-kind decoders.

use super::DecodeError;
use chrono::Duration;

/// Minutes between historical samples, indexed by the 3-bit interval field.
const INTERVAL_MINUTES: [i64; 8] = [15, 30, 60, 120, 180, 240, 300, 360];

/// Interprets two hex characters as a two's-complement byte.
pub fn to_signed_byte(hex2: &str) -> Result<i8, DecodeError> {
    if hex2.len() != 2 || !hex2.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(DecodeError::malformed_hex(
            hex2,
            format!("expected exactly two hex digits, got {:?}", hex2),
        ));
    }

    let raw = u8::from_str_radix(hex2, 16)
        .map_err(|e| DecodeError::malformed_hex(hex2, e.to_string()))?;
    Ok(signed(raw))
}

/// Reinterprets a raw byte as signed (values above 127 wrap negative).
pub fn signed(raw: u8) -> i8 {
    raw as i8
}

/// Maps the 3-bit interval index onto the spacing between samples.
///
/// Only the low three bits are considered, so every input is valid.
pub fn interval_to_duration(bits3: u8) -> Duration {
    Duration::minutes(INTERVAL_MINUTES[(bits3 & 0x07) as usize])
}

/// Extracts the interval index stored in bits 5-7 of a tx flags byte.
pub fn interval_index(flags: u8) -> u8 {
    (flags >> 5) & 0x07
}

/// Battery voltage for the common `raw * 0.02 V` encoding.
pub fn battery_volts(raw: u8) -> f64 {
    round2(f64::from(raw) * 0.02)
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

pub fn bit(byte: u8, n: u8) -> bool {
    byte & (1 << n) != 0
}
