//! PulseMeter (water/energy pulse counter with leak and tamper detection).
//!
//! The uplink layout is selected by length:
//! - 8 bytes: flags, battery, big-endian u32 counter, 2 unused bytes
//! - 9 bytes: flags, battery, counter, 3 undocumented trailing bytes
//! - 12 bytes: flags, battery, counter, three big-endian u16 offsets that
//!   reconstruct the counter at the previous three intervals

use super::bits::{battery_volts, bit, interval_index};
use super::history::{reconstruct, HistoricalSample};
use super::{parse_payload, DecodeError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const ACCEPTED_LENGTHS: &str = "8, 9 or 12";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PulseMeterReading {
    pub battery_volts: f64,
    pub pulse_count: u32,
    pub leak_detected: bool,
    pub tamper_detected: bool,
    pub interval_index: u8,
    pub status_flags: Vec<String>,
    pub history: Vec<HistoricalSample<u32>>,
    /// Trailing bytes of the 9-byte variant, hex encoded.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub extra: Option<String>,
}

fn flag_labels(flags: u8) -> Vec<String> {
    let table = [
        (0, "Periodic Update"),
        (1, "Forced Transmit / Power Up"),
        (2, "Leak/Tamper Alert"),
        (3, "Leak Detected"),
        (4, "Tamper Detected"),
    ];

    table
        .iter()
        .filter(|(n, _)| bit(flags, *n))
        .map(|(_, label)| label.to_string())
        .collect()
}

pub fn decode(payload: &str, anchor: DateTime<Utc>) -> Result<PulseMeterReading, DecodeError> {
    let data = parse_payload(payload)?;

    if !matches!(data.len(), 8 | 9 | 12) {
        return Err(DecodeError::unexpected_length(
            payload,
            data.len(),
            ACCEPTED_LENGTHS,
        ));
    }

    let flags = data[0];
    let pulse_count = u32::from_be_bytes([data[2], data[3], data[4], data[5]]);
    let index = interval_index(flags);

    let mut reading = PulseMeterReading {
        battery_volts: battery_volts(data[1]),
        pulse_count,
        leak_detected: bit(flags, 3),
        tamper_detected: bit(flags, 4),
        interval_index: index,
        status_flags: flag_labels(flags),
        history: Vec::new(),
        extra: None,
    };

    match data.len() {
        9 => reading.extra = Some(hex::encode(&data[6..9])),
        12 => {
            let mut counters = vec![pulse_count];
            for offset in data[6..12].chunks_exact(2) {
                let offset = u16::from_be_bytes([offset[0], offset[1]]);
                let earlier = pulse_count.checked_sub(u32::from(offset)).ok_or_else(|| {
                    DecodeError::out_of_range(
                        payload,
                        format!("offset {} exceeds current counter {}", offset, pulse_count),
                    )
                })?;
                counters.push(earlier);
            }
            reading.history = reconstruct(anchor, index, counters);
        }
        _ => {}
    }

    Ok(reading)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::DecodeErrorKind;
    use chrono::{Duration, TimeZone};

    fn anchor() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 2, 10, 18, 30, 0).unwrap()
    }

    #[test]
    fn test_alert_payload() {
        let reading = decode("010A00000064FFFF", anchor()).unwrap();

        assert_eq!(reading.battery_volts, 0.2);
        assert_eq!(reading.pulse_count, 100);
        assert!(!reading.leak_detected);
        assert_eq!(reading.status_flags, vec!["Periodic Update"]);
        assert!(reading.history.is_empty());
        assert_eq!(reading.extra, None);
    }

    #[test]
    fn test_leak_and_tamper_flags() {
        let reading = decode("1C96000001F40000", anchor()).unwrap();

        assert!(reading.leak_detected);
        assert!(reading.tamper_detected);
        assert_eq!(reading.pulse_count, 500);
        assert_eq!(
            reading.status_flags,
            vec!["Leak/Tamper Alert", "Leak Detected", "Tamper Detected"]
        );
    }

    #[test]
    fn test_periodic_payload_reconstructs_counters() {
        let reading = decode("4196000003E8000A0014001E", anchor()).unwrap();

        assert_eq!(reading.pulse_count, 1000);
        assert_eq!(reading.interval_index, 2);
        let counters: Vec<u32> = reading.history.iter().map(|s| s.value).collect();
        assert_eq!(counters, vec![1000, 990, 980, 970]);
        for (i, sample) in reading.history.iter().enumerate() {
            assert_eq!(sample.timestamp, anchor() - Duration::hours(i as i64));
        }
    }

    #[test]
    fn test_offset_larger_than_counter() {
        let err = decode("01960000000500100000FFFF", anchor()).unwrap_err();
        assert_eq!(err.kind, DecodeErrorKind::FieldOutOfRange);
    }

    #[test]
    fn test_nine_byte_variant_keeps_trailing_bytes() {
        let reading = decode("0C1400000007ABCDEF", anchor()).unwrap();

        assert_eq!(reading.battery_volts, 0.4);
        assert_eq!(reading.pulse_count, 7);
        assert!(reading.leak_detected);
        assert_eq!(reading.extra.as_deref(), Some("abcdef"));
        assert!(reading.history.is_empty());
    }

    #[test]
    fn test_rejects_unexpected_lengths() {
        for payload in ["01020304050607", "0102030405060708090A"] {
            let err = decode(payload, anchor()).unwrap_err();
            let bytes = payload.len() / 2;

            assert_eq!(err.kind, DecodeErrorKind::UnexpectedLength);
            assert_eq!(err.payload, payload);
            assert!(
                err.cause.contains(&format!("{} bytes", bytes)),
                "cause should name the length: {}",
                err.cause
            );
        }
    }
}
