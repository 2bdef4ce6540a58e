//! Magnetic door/window contact. Byte 1 carries the contact state.

use super::{parse_payload, DecodeError};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum DoorState {
    Open,
    Closed,
    Unknown(u8),
}

impl From<u8> for DoorState {
    fn from(raw: u8) -> Self {
        match raw {
            0x00 => DoorState::Open,
            0x01 => DoorState::Closed,
            other => DoorState::Unknown(other),
        }
    }
}

impl fmt::Display for DoorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DoorState::Open => write!(f, "open"),
            DoorState::Closed => write!(f, "closed"),
            DoorState::Unknown(raw) => write!(f, "unknown({})", raw),
        }
    }
}

impl From<DoorState> for String {
    fn from(state: DoorState) -> Self {
        state.to_string()
    }
}

impl TryFrom<String> for DoorState {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "open" => Ok(DoorState::Open),
            "closed" => Ok(DoorState::Closed),
            other => other
                .strip_prefix("unknown(")
                .and_then(|rest| rest.strip_suffix(')'))
                .and_then(|raw| raw.parse().ok())
                .map(DoorState::Unknown)
                .ok_or_else(|| format!("invalid door state: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MagneticReading {
    pub status: DoorState,
    pub raw_payload: String,
}

pub fn decode(payload: &str) -> Result<MagneticReading, DecodeError> {
    let data = parse_payload(payload)?;
    if data.len() < 2 {
        return Err(DecodeError::unexpected_length(payload, data.len(), "at least 2"));
    }

    Ok(MagneticReading {
        status: DoorState::from(data[1]),
        raw_payload: payload.to_string(),
    })
}
