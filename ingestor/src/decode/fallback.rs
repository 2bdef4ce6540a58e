//! Fallback for devices with no registered decoder.
//!
//! The payload is kept as hex and also rendered as ASCII, so an operator can
//! spot text uplinks from unknown firmware.

use serde::{Deserialize, Serialize};

pub const UNASSIGNED_NOTE: &str = "No decoder assigned to this device ID";

/// Best-effort rendering for payloads from devices with no registered decoder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallbackText {
    pub ascii: String,
    pub hex: String,
    pub note: String,
}

impl FallbackText {
    pub fn from_hex(payload: &str) -> Self {
        Self {
            ascii: render_ascii(payload),
            hex: payload.to_string(),
            note: UNASSIGNED_NOTE.to_string(),
        }
    }
}

/// Renders hex pairs as ASCII. Non-ASCII bytes, unparsable pairs and a
/// dangling odd digit each become U+FFFD.
pub fn render_ascii(payload: &str) -> String {
    payload
        .trim()
        .as_bytes()
        .chunks(2)
        .map(|pair| {
            std::str::from_utf8(pair)
                .ok()
                .filter(|s| s.len() == 2 && s.chars().all(|c| c.is_ascii_hexdigit()))
                .and_then(|s| u8::from_str_radix(s, 16).ok())
                .filter(u8::is_ascii)
                .map(char::from)
                .unwrap_or(char::REPLACEMENT_CHARACTER)
        })
        .collect()
}
