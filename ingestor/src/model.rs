use crate::decode::{DecodeOutcome, DecodedReading};
use crate::errors::Error;
use chrono::{DateTime, Utc};
use serde::{de, Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

/// Decoder family a device is routed to.
///
/// Declaration order is the registry evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorGroup {
    PowerTemp,
    PulseMeter,
    WaterDetector,
    Magnetic,
    TankLevel,
    Unassigned,
}

impl SensorGroup {
    /// Groups that have a decoder, in evaluation order.
    pub const DECODABLE: [SensorGroup; 5] = [
        SensorGroup::PowerTemp,
        SensorGroup::PulseMeter,
        SensorGroup::WaterDetector,
        SensorGroup::Magnetic,
        SensorGroup::TankLevel,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SensorGroup::PowerTemp => "power_temp",
            SensorGroup::PulseMeter => "pulse_meter",
            SensorGroup::WaterDetector => "water_detector",
            SensorGroup::Magnetic => "magnetic",
            SensorGroup::TankLevel => "tank_level",
            SensorGroup::Unassigned => "unassigned",
        }
    }
}

impl fmt::Display for SensorGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Callback body posted by the radio backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SigfoxCallback {
    pub device: String,
    #[serde(default)]
    pub data: String,
    #[serde(
        default,
        deserialize_with = "epoch_seconds",
        serialize_with = "chrono::serde::ts_seconds_option::serialize"
    )]
    pub time: Option<DateTime<Utc>>,
    #[serde(rename = "seqNumber", default)]
    pub seq_number: Option<i64>,
    #[serde(rename = "deviceTypeId", default)]
    pub device_type_id: Option<String>,
}

/// Callback templates send `time` either as a JSON number or as a string.
#[derive(Deserialize)]
#[serde(untagged)]
enum EpochSeconds {
    Number(i64),
    Text(String),
}

fn epoch_seconds<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let seconds = match Option::<EpochSeconds>::deserialize(deserializer)? {
        None => return Ok(None),
        Some(EpochSeconds::Number(seconds)) => seconds,
        Some(EpochSeconds::Text(text)) => text.trim().parse::<i64>().map_err(|_| {
            de::Error::custom(format!("time {:?} is not epoch seconds", text))
        })?,
    };

    DateTime::from_timestamp(seconds, 0)
        .map(Some)
        .ok_or_else(|| de::Error::custom(format!("time {} is out of range", seconds)))
}

impl SigfoxCallback {
    /// Builds the envelope. `now` is only used when the backend sent no time.
    pub fn into_envelope(self, now: DateTime<Utc>) -> TelemetryEnvelope {
        TelemetryEnvelope {
            device_id: self.device,
            payload: self.data,
            reported_at: self.time,
            sequence: self.seq_number,
            device_type: self.device_type_id,
            received_at: self.time.unwrap_or(now),
        }
    }
}

/// One inbound telemetry delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryEnvelope {
    pub device_id: String,
    pub payload: String,
    pub reported_at: Option<DateTime<Utc>>,
    pub sequence: Option<i64>,
    pub device_type: Option<String>,
    pub received_at: DateTime<Utc>,
}

impl TelemetryEnvelope {
    /// Reference time for history reconstruction.
    pub fn anchor(&self) -> DateTime<Utc> {
        self.reported_at.unwrap_or(self.received_at)
    }

    pub fn normalized_device_id(&self) -> String {
        self.device_id.trim().to_lowercase()
    }
}

/// Normalized result of dispatching one envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub timestamp: DateTime<Utc>,
    pub device_id: String,
    pub device_type: String,
    pub sequence: Option<i64>,
    pub raw_payload: String,
    pub decoded: DecodeOutcome,
    pub sensor_group: SensorGroup,
    pub received_at: DateTime<Utc>,
}

/// Row shape written to the curated per-kind store.
#[derive(Debug, Clone, PartialEq)]
pub enum KindRecord {
    PowerTemp {
        device_id: String,
        sequence: Option<i64>,
        temp_celsius: f64,
        received_at: DateTime<Utc>,
    },
    PulseMeter {
        device_id: String,
        sequence: Option<i64>,
        pulse_count: i64,
        leak_detected: bool,
        received_at: DateTime<Utc>,
    },
    WaterDetector {
        device_id: String,
        sequence: Option<i64>,
        water_detected: bool,
        received_at: DateTime<Utc>,
    },
    Magnetic {
        device_id: String,
        sequence: Option<i64>,
        status: String,
        received_at: DateTime<Utc>,
    },
    TankLevel {
        device_id: String,
        level_percentage: i16,
        battery_volts: f64,
        received_at: DateTime<Utc>,
    },
}

impl KindRecord {
    /// Projects a successfully decoded entry; `None` for failures and
    /// unassigned devices.
    pub fn from_entry(entry: &Entry) -> Option<Self> {
        let device_id = entry.device_id.clone();
        let sequence = entry.sequence;
        let received_at = entry.received_at;

        let record = match entry.decoded.reading()? {
            DecodedReading::PowerTemp(r) => KindRecord::PowerTemp {
                device_id,
                sequence,
                temp_celsius: r.temp_celsius,
                received_at,
            },
            DecodedReading::PulseMeter(r) => KindRecord::PulseMeter {
                device_id,
                sequence,
                pulse_count: i64::from(r.pulse_count),
                leak_detected: r.leak_detected,
                received_at,
            },
            DecodedReading::WaterDetector(r) => KindRecord::WaterDetector {
                device_id,
                sequence,
                water_detected: r.water_detected,
                received_at,
            },
            DecodedReading::Magnetic(r) => KindRecord::Magnetic {
                device_id,
                sequence,
                status: r.status.to_string(),
                received_at,
            },
            DecodedReading::TankLevel(r) => KindRecord::TankLevel {
                device_id,
                level_percentage: i16::from(r.level_percentage),
                battery_volts: r.battery_volts,
                received_at,
            },
        };

        Some(record)
    }

    pub fn group(&self) -> SensorGroup {
        match self {
            KindRecord::PowerTemp { .. } => SensorGroup::PowerTemp,
            KindRecord::PulseMeter { .. } => SensorGroup::PulseMeter,
            KindRecord::WaterDetector { .. } => SensorGroup::WaterDetector,
            KindRecord::Magnetic { .. } => SensorGroup::Magnetic,
            KindRecord::TankLevel { .. } => SensorGroup::TankLevel,
        }
    }

    pub fn received_at(&self) -> DateTime<Utc> {
        match self {
            KindRecord::PowerTemp { received_at, .. }
            | KindRecord::PulseMeter { received_at, .. }
            | KindRecord::WaterDetector { received_at, .. }
            | KindRecord::Magnetic { received_at, .. }
            | KindRecord::TankLevel { received_at, .. } => *received_at,
        }
    }

    pub fn device_id(&self) -> &str {
        match self {
            KindRecord::PowerTemp { device_id, .. }
            | KindRecord::PulseMeter { device_id, .. }
            | KindRecord::WaterDetector { device_id, .. }
            | KindRecord::Magnetic { device_id, .. }
            | KindRecord::TankLevel { device_id, .. } => device_id,
        }
    }
}

/// How the curated store treats repeated readings from one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PersistMode {
    /// Keep history; duplicates of the dedup key are ignored.
    #[default]
    Append,
    /// Keep only the most recent reading per device.
    Latest,
}

impl FromStr for PersistMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "append" => Ok(PersistMode::Append),
            "latest" | "overwrite" => Ok(PersistMode::Latest),
            other => Err(Error::Config(format!("unknown persist mode: {}", other))),
        }
    }
}

/// REST response for the readings endpoint
#[derive(Debug, Serialize)]
pub struct ReadingsResponse {
    pub device_id: String,
    pub sensor_group: SensorGroup,
    pub data: Vec<serde_json::Value>,
    pub total: usize,
    pub limit: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::{DecodeError, FallbackText};
    use chrono::TimeZone;

    #[test]
    fn test_callback_parsing() {
        let body = r#"{"device":"1FC5622","data":"0032001E40","time":1735732800,"seqNumber":42,"deviceTypeId":"5f1a"}"#;
        let callback: SigfoxCallback = serde_json::from_str(body).unwrap();

        let envelope = callback.into_envelope(Utc::now());
        let reported = Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap();
        assert_eq!(envelope.reported_at, Some(reported));
        assert_eq!(envelope.received_at, reported);
        assert_eq!(envelope.sequence, Some(42));
        assert_eq!(envelope.normalized_device_id(), "1fc5622");
    }

    #[test]
    fn test_callback_optional_fields() {
        let callback: SigfoxCallback =
            serde_json::from_str(r#"{"device":"abc","data":"00"}"#).unwrap();
        let now = Utc.with_ymd_and_hms(2025, 5, 5, 5, 5, 5).unwrap();

        let envelope = callback.into_envelope(now);
        assert_eq!(envelope.reported_at, None);
        assert_eq!(envelope.received_at, now);
        assert_eq!(envelope.anchor(), now);
        assert_eq!(envelope.device_type, None);
    }

    #[test]
    fn test_callback_time_as_string() {
        let callback: SigfoxCallback = serde_json::from_str(
            r#"{"device":"1fc5622","data":"00","time":" 1735732800 "}"#,
        )
        .unwrap();
        assert_eq!(
            callback.time,
            Some(Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap())
        );

        let null_time: SigfoxCallback =
            serde_json::from_str(r#"{"device":"a","data":"00","time":null}"#).unwrap();
        assert_eq!(null_time.time, None);
    }

    #[test]
    fn test_callback_time_rejects_garbage() {
        let result =
            serde_json::from_str::<SigfoxCallback>(r#"{"device":"a","data":"00","time":"noon"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_callback_missing_data_defaults_to_empty() {
        let callback: SigfoxCallback = serde_json::from_str(r#"{"device":"1fc5622"}"#).unwrap();
        assert_eq!(callback.data, "");
    }

    #[test]
    fn test_callback_time_serializes_as_seconds() {
        let callback: SigfoxCallback =
            serde_json::from_str(r#"{"device":"a","data":"00","time":1735732800}"#).unwrap();
        let json = serde_json::to_value(&callback).unwrap();
        assert_eq!(json["time"], 1735732800);
    }

    #[test]
    fn test_persist_mode_parse() {
        assert_eq!("append".parse::<PersistMode>().unwrap(), PersistMode::Append);
        assert_eq!("LATEST".parse::<PersistMode>().unwrap(), PersistMode::Latest);
        assert!("sometimes".parse::<PersistMode>().is_err());
    }

    #[test]
    fn test_no_record_for_failed_or_unassigned() {
        let base = Entry {
            timestamp: Utc::now(),
            device_id: "x".to_string(),
            device_type: "unknown".to_string(),
            sequence: None,
            raw_payload: "zz".to_string(),
            decoded: DecodeOutcome::Failed(DecodeError::malformed_hex("zz", "bad")),
            sensor_group: SensorGroup::Magnetic,
            received_at: Utc::now(),
        };
        assert!(KindRecord::from_entry(&base).is_none());

        let unassigned = Entry {
            decoded: DecodeOutcome::Unassigned(FallbackText::from_hex("zz")),
            sensor_group: SensorGroup::Unassigned,
            ..base
        };
        assert!(KindRecord::from_entry(&unassigned).is_none());
    }

    #[test]
    fn test_group_display() {
        assert_eq!(SensorGroup::WaterDetector.to_string(), "water_detector");
        assert_eq!(
            serde_json::to_string(&SensorGroup::Unassigned).unwrap(),
            "\"unassigned\""
        );
    }
}
