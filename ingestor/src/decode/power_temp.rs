//! PowerTemp (mains power + temperature) sensor.
//!
//! Fixed-point layout, alert uplink (5 bytes):
//!
//! | byte | meaning                                             |
//! |------|-----------------------------------------------------|
//! | 0    | tx flags, bits 5-7 hold the interval index          |
//! | 1    | battery, `raw * 0.02 V`                             |
//! | 2    | status mask (opaque)                                |
//! | 3    | current temperature, signed °C                      |
//! | 4    | tx info mask                                        |
//!
//! Periodic uplinks (flag bit 4) replace the tx info byte with four
//! `(min, max)` signed pairs in bytes 4..12.

use super::bits::{battery_volts, bit, interval_index, round1, round2, signed};
use super::history::{reconstruct, HistoricalSample};
use super::{parse_payload, DecodeError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const ALERT_LEN: usize = 5;
const PERIODIC_LEN: usize = 12;
const HISTORY_PAIRS: usize = 4;

/// Temperature encodings seen across device generations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerTempProfile {
    /// Signed whole-degree temperature byte.
    #[default]
    FixedPoint,
    /// Older firmware: 16-bit raw temperature scaled by a searched divisor.
    DivisorSearch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TempRange {
    pub min: i8,
    pub max: i8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PowerTempReading {
    pub profile: PowerTempProfile,
    pub is_periodic: bool,
    pub battery_volts: f64,
    pub temp_celsius: f64,
    pub status_mask: Option<u8>,
    pub interval_index: u8,
    pub status_flags: Vec<String>,
    pub alerts: Vec<String>,
    pub history: Vec<HistoricalSample<TempRange>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub divisor: Option<f64>,
}

pub fn decode(
    payload: &str,
    anchor: DateTime<Utc>,
    profile: PowerTempProfile,
) -> Result<PowerTempReading, DecodeError> {
    let data = parse_payload(payload)?;

    match profile {
        PowerTempProfile::FixedPoint => decode_fixed_point(payload, &data, anchor),
        PowerTempProfile::DivisorSearch => decode_divisor_search(payload, &data),
    }
}

fn flag_labels(flags: u8) -> Vec<String> {
    let table = [
        (0, "Power Up"),
        (1, "Forced Transmit"),
        (2, "Power Alert"),
        (3, "Temperature Alert"),
        (4, "Periodic Update"),
    ];

    table
        .iter()
        .filter(|(n, _)| bit(flags, *n))
        .map(|(_, label)| label.to_string())
        .collect()
}

fn decode_fixed_point(
    payload: &str,
    data: &[u8],
    anchor: DateTime<Utc>,
) -> Result<PowerTempReading, DecodeError> {
    let Some(&flags) = data.first() else {
        return Err(DecodeError::unexpected_length(payload, 0, "5 or 12"));
    };

    let is_periodic = bit(flags, 4);
    let expected = if is_periodic { PERIODIC_LEN } else { ALERT_LEN };
    if data.len() != expected {
        return Err(DecodeError::unexpected_length(
            payload,
            data.len(),
            if is_periodic { "12 for periodic" } else { "5 for alert" },
        ));
    }

    let index = interval_index(flags);
    let mut reading = PowerTempReading {
        profile: PowerTempProfile::FixedPoint,
        is_periodic,
        battery_volts: battery_volts(data[1]),
        temp_celsius: f64::from(signed(data[3])),
        status_mask: Some(data[2]),
        interval_index: index,
        status_flags: flag_labels(flags),
        alerts: Vec::new(),
        history: Vec::new(),
        divisor: None,
    };

    if is_periodic {
        let pairs = data[4..4 + HISTORY_PAIRS * 2].chunks_exact(2).map(|pair| TempRange {
            min: signed(pair[0]),
            max: signed(pair[1]),
        });
        reading.history = reconstruct(anchor, index, pairs);
    } else {
        let tx_info = data[4];
        if bit(flags, 3) {
            reading.alerts.push("Temperature Alert".to_string());
        }
        if bit(flags, 2) {
            reading.alerts.push("Power Alert".to_string());
        }
        if bit(tx_info, 6) {
            reading.alerts.push("Temperature Low Alert".to_string());
        }
    }

    Ok(reading)
}

fn decode_divisor_search(payload: &str, data: &[u8]) -> Result<PowerTempReading, DecodeError> {
    if data.len() != ALERT_LEN {
        return Err(DecodeError::unexpected_length(payload, data.len(), "5"));
    }

    let battery_raw = u16::from_be_bytes([data[0], data[1]]);
    let temp_raw = u16::from_be_bytes([data[2], data[3]]);
    let flags = data[4];

    let (temp_celsius, divisor) = best_divisor(temp_raw).ok_or_else(|| {
        DecodeError::out_of_range(
            payload,
            format!("no divisor maps raw temperature {} into 5-50 °C", temp_raw),
        )
    })?;

    let mut status_flags = flag_labels(flags);
    if bit(flags, 5) {
        status_flags.push("TX Update Timer".to_string());
    }
    let index = interval_index(flags);
    if index == 7 {
        status_flags.push("24 Hour Tx 6 Hour Record Offset".to_string());
    }

    let mut alerts = Vec::new();
    if bit(flags, 3) {
        alerts.push("Temperature Alert".to_string());
    }
    if bit(flags, 2) {
        alerts.push("Power Alert".to_string());
    }

    Ok(PowerTempReading {
        profile: PowerTempProfile::DivisorSearch,
        is_periodic: bit(flags, 4),
        battery_volts: round2(f64::from(battery_raw) / 20958.0),
        temp_celsius,
        status_mask: None,
        interval_index: index,
        status_flags,
        alerts,
        history: Vec::new(),
        divisor: Some(divisor),
    })
}

/// Searches divisors 20.0..=100.0 (step 0.1) for the quotient closest to a
/// whole degree inside the plausible 5-50 °C window.
fn best_divisor(raw: u16) -> Option<(f64, f64)> {
    let mut best = None;
    let mut min_error = f64::INFINITY;

    for step in 200..=1000u32 {
        let divisor = f64::from(step) / 10.0;
        let temp = f64::from(raw) / divisor;
        if !(5.0..=50.0).contains(&temp) {
            continue;
        }

        let error = (temp - temp.round()).abs();
        if error < min_error {
            min_error = error;
            best = Some((round1(temp), divisor));
            if error == 0.0 {
                break;
            }
        }
    }

    best
}
