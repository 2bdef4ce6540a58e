//! WaterDetector (flood sensor).
//!
//! Two incompatible 8-byte layouts exist across firmware revisions and
//! nothing in the payload tells them apart, so the layout is chosen per
//! device through [`WaterProfile`].

use super::bits::{battery_volts, bit, round2};
use super::{parse_payload, DecodeError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_WATER_THRESHOLD: u8 = 100;

const PAYLOAD_LEN: usize = 8;
const LOW_BATTERY_VOLTS: f64 = 2.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaterProfile {
    /// Little-endian calibrated battery, config byte, little-endian counter.
    CalibratedLe,
    /// Tx flag, detection byte, level, battery, big-endian counter.
    #[default]
    StateFlag,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransmitMode {
    WaterDetect,
    NoWater,
    Both,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sensitivity {
    Low,
    Medium,
    High,
    VeryHigh,
}

const TRANSMIT_MODES: [TransmitMode; 4] = [
    TransmitMode::WaterDetect,
    TransmitMode::NoWater,
    TransmitMode::Both,
    TransmitMode::Unknown,
];

const SENSITIVITIES: [Sensitivity; 4] = [
    Sensitivity::Low,
    Sensitivity::Medium,
    Sensitivity::High,
    Sensitivity::VeryHigh,
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaterDetectorReading {
    pub profile: WaterProfile,
    pub battery_volts: f64,
    pub water_detected: bool,
    pub water_level_raw: u8,
    pub counter: u32,
    pub alerts: Vec<String>,
    pub raw_payload: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub transmit_mode: Option<TransmitMode>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub heartbeat_hours: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub sensitivity: Option<Sensitivity>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub state_change: Option<bool>,
}

pub fn decode(
    payload: &str,
    timestamp: DateTime<Utc>,
    profile: WaterProfile,
    threshold: u8,
) -> Result<WaterDetectorReading, DecodeError> {
    let data = parse_payload(payload)?;
    if data.len() != PAYLOAD_LEN {
        return Err(DecodeError::unexpected_length(payload, data.len(), "8"));
    }

    match profile {
        WaterProfile::CalibratedLe => decode_calibrated_le(payload, &data, timestamp, threshold),
        WaterProfile::StateFlag => Ok(decode_state_flag(payload, &data, timestamp, threshold)),
    }
}

fn decode_calibrated_le(
    payload: &str,
    data: &[u8],
    timestamp: DateTime<Utc>,
    threshold: u8,
) -> Result<WaterDetectorReading, DecodeError> {
    let battery_raw = u16::from_le_bytes([data[0], data[1]]);
    let water_raw = data[2];
    let config = data[3];

    let transmit_mode = *TRANSMIT_MODES
        .get(usize::from(config & 0x03))
        .ok_or_else(|| DecodeError::out_of_range(payload, "transmit mode index"))?;
    let sensitivity = *SENSITIVITIES
        .get(usize::from((config >> 6) & 0x03))
        .ok_or_else(|| DecodeError::out_of_range(payload, "sensitivity index"))?;

    Ok(WaterDetectorReading {
        profile: WaterProfile::CalibratedLe,
        battery_volts: round2(f64::from(battery_raw) * 0.01 + 2.3),
        water_detected: water_raw < threshold,
        water_level_raw: water_raw,
        counter: u32::from_le_bytes([data[4], data[5], data[6], data[7]]),
        alerts: Vec::new(),
        raw_payload: payload.to_string(),
        timestamp,
        transmit_mode: Some(transmit_mode),
        heartbeat_hours: Some((config >> 2) & 0x0F),
        sensitivity: Some(sensitivity),
        state_change: None,
    })
}

fn decode_state_flag(
    payload: &str,
    data: &[u8],
    timestamp: DateTime<Utc>,
    threshold: u8,
) -> WaterDetectorReading {
    let water_detected = data[1] == 1;
    let water_level_raw = data[2];
    let battery = battery_volts(data[3]);

    let mut alerts = Vec::new();
    if water_detected && water_level_raw <= threshold {
        alerts.push("Water Detected".to_string());
    }
    if battery < LOW_BATTERY_VOLTS {
        alerts.push("Low Battery".to_string());
    }

    WaterDetectorReading {
        profile: WaterProfile::StateFlag,
        battery_volts: battery,
        water_detected,
        water_level_raw,
        counter: u32::from_be_bytes([data[4], data[5], data[6], data[7]]),
        alerts,
        raw_payload: payload.to_string(),
        timestamp,
        transmit_mode: None,
        heartbeat_hours: None,
        sensitivity: None,
        state_change: Some(bit(data[0], 1)),
    }
}
