use chrono::Utc;
use rand::Rng;
use serde::Serialize;

/// Callback body as posted by the Sigfox backend.
#[derive(Debug, Clone, Serialize)]
pub struct SigfoxCallback {
    pub device: String,
    pub data: String,
    pub time: i64,
    #[serde(rename = "seqNumber")]
    pub seq_number: i64,
    #[serde(rename = "deviceTypeId", skip_serializing_if = "Option::is_none")]
    pub device_type_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    PowerTemp,
    /// PowerTemp on the legacy 16-bit divisor-search firmware.
    PowerTempLegacy,
    PulseMeter,
    WaterDetector,
    Magnetic,
    TankLevel,
    Unknown,
}

impl Kind {
    pub fn payload(&self, rng: &mut impl Rng, seq: u32) -> String {
        match self {
            Kind::PowerTemp => power_temp(rng),
            Kind::PowerTempLegacy => power_temp_legacy(rng),
            Kind::PulseMeter => pulse_meter(rng, seq),
            Kind::WaterDetector => water_detector(rng, seq),
            Kind::Magnetic => format!("00{:02X}", u8::from(rng.gen_bool(0.5))),
            Kind::TankLevel => format!(
                "{:02X}{:02X}00",
                rng.gen_range(0..=100u8),
                battery_raw(rng)
            ),
            Kind::Unknown => hex::encode("hello sigfox"),
        }
    }
}

pub fn callback(device: &str, kind: Kind, rng: &mut impl Rng, seq: u32) -> SigfoxCallback {
    SigfoxCallback {
        device: device.to_string(),
        data: kind.payload(rng, seq),
        time: Utc::now().timestamp(),
        seq_number: i64::from(seq),
        device_type_id: None,
    }
}

// 2% of devices report a weak battery.
fn battery_raw(rng: &mut impl Rng) -> u8 {
    if rng.gen_bool(0.02) {
        rng.gen_range(100..125)
    } else {
        rng.gen_range(125..170)
    }
}

fn power_temp(rng: &mut impl Rng) -> String {
    let temp: i8 = if rng.gen_bool(0.05) {
        rng.gen_range(-40..90)
    } else {
        rng.gen_range(15..35)
    };
    let interval = rng.gen_range(0..8u8) << 5;

    if rng.gen_bool(0.2) {
        let flags = interval | if temp > 60 { 0x08 } else { 0x02 };
        let tx_info = if temp < 0 { 0x40 } else { 0x00 };
        format!("{:02X}{:02X}00{:02X}{:02X}", flags, battery_raw(rng), temp as u8, tx_info)
    } else {
        let mut out = format!(
            "{:02X}{:02X}00{:02X}",
            0x10 | interval,
            battery_raw(rng),
            temp as u8
        );
        for _ in 0..4 {
            let min = temp.saturating_sub(rng.gen_range(0..5));
            let max = temp.saturating_add(rng.gen_range(0..5));
            out.push_str(&format!("{:02X}{:02X}", min as u8, max as u8));
        }
        out
    }
}

fn power_temp_legacy(rng: &mut impl Rng) -> String {
    let battery = (rng.gen_range(2.6..3.4f64) * 20958.0).round() as u16;
    let temp: u16 = rng.gen_range(10..40);
    let divisor_tenths: u16 = rng.gen_range(200..=1000);
    let flags = (rng.gen_range(0..8u8) << 5) | 0x02;

    format!(
        "{:04X}{:04X}{:02X}",
        battery,
        temp * divisor_tenths / 10,
        flags
    )
}

fn pulse_meter(rng: &mut impl Rng, seq: u32) -> String {
    let count = 1_000 + seq * 10;
    let interval = rng.gen_range(0..8u8) << 5;
    let mut flags = interval | 0x01;
    if rng.gen_bool(0.01) {
        flags |= 0x08;
    }

    if rng.gen_bool(0.5) {
        format!("{:02X}{:02X}{:08X}FFFF", flags, battery_raw(rng), count)
    } else {
        format!(
            "{:02X}{:02X}{:08X}{:04X}{:04X}{:04X}",
            flags,
            battery_raw(rng),
            count,
            10u16,
            20u16,
            30u16
        )
    }
}

fn water_detector(rng: &mut impl Rng, seq: u32) -> String {
    let wet = rng.gen_bool(0.1);
    let level = if wet { rng.gen_range(10..90u8) } else { rng.gen_range(150..=255u8) };

    format!(
        "{:02X}{:02X}{:02X}{:02X}{:08X}",
        if wet { 0x02 } else { 0x00 },
        u8::from(wet),
        level,
        battery_raw(rng),
        seq
    )
}
