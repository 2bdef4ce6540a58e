//! TankLevel (fill percentage) sensor.
//!
//! Byte 0 is the fill level in percent, byte 1 the battery (`raw * 0.02 V`)
//! and byte 2 an opaque status mask.

use super::bits::battery_volts;
use super::{parse_payload, DecodeError};
use serde::{Deserialize, Serialize};

const LOW_LEVEL_PERCENT: u8 = 20;
const LOW_BATTERY_VOLTS: f64 = 2.5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TankLevelReading {
    pub level_percentage: u8,
    pub battery_volts: f64,
    pub status_flags: u8,
    pub alerts: Vec<String>,
}

pub fn decode(payload: &str) -> Result<TankLevelReading, DecodeError> {
    let data = parse_payload(payload)?;
    if data.len() < 3 {
        return Err(DecodeError::unexpected_length(payload, data.len(), "at least 3"));
    }

    let level_percentage = data[0];
    if level_percentage > 100 {
        return Err(DecodeError::out_of_range(
            payload,
            format!("tank level {}% exceeds 100%", level_percentage),
        ));
    }

    let battery = battery_volts(data[1]);
    let mut alerts = Vec::new();
    if level_percentage < LOW_LEVEL_PERCENT {
        alerts.push("Low tank level".to_string());
    }
    if battery < LOW_BATTERY_VOLTS {
        alerts.push("Low battery".to_string());
    }

    Ok(TankLevelReading {
        level_percentage,
        battery_volts: battery,
        status_flags: data[2],
        alerts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::DecodeErrorKind;

    #[test]
    fn test_normal_level() {
        let reading = decode("50A003").unwrap();
        assert_eq!(reading.level_percentage, 80);
        assert_eq!(reading.battery_volts, 3.2);
        assert_eq!(reading.status_flags, 3);
        assert!(reading.alerts.is_empty());
    }

    #[test]
    fn test_low_level_and_battery() {
        let reading = decode("0A6400").unwrap();
        assert_eq!(reading.level_percentage, 10);
        assert_eq!(reading.battery_volts, 2.0);
        assert_eq!(reading.alerts, vec!["Low tank level", "Low battery"]);
    }

    #[test]
    fn test_level_boundaries() {
        assert!(decode("14A000").unwrap().alerts.is_empty());
        assert!(decode("64A000").is_ok());
        let err = decode("65A000").unwrap_err();
        assert_eq!(err.kind, DecodeErrorKind::FieldOutOfRange);
    }

    #[test]
    fn test_too_short() {
        let err = decode("50A0").unwrap_err();
        assert_eq!(err.kind, DecodeErrorKind::UnexpectedLength);
        assert_eq!(err.payload, "50A0");
    }
}
