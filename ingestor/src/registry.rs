//! Device → decoder routing table.
//!
//! Built once at startup and shared read-only. Lookups are pure functions of
//! the table, so tests can construct any registry they need.

use crate::decode::{DecodeProfile, PowerTempProfile, WaterProfile};
use crate::errors::{Error, Result};
use crate::model::SensorGroup;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::{info, warn};

/// Decoder and profile chosen for one device.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Route {
    pub group: SensorGroup,
    pub profile: DecodeProfile,
}

/// A device listed under more than one group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryConflict {
    pub device_id: String,
    pub kept: SensorGroup,
    pub ignored: SensorGroup,
}

#[derive(Debug, Clone, Default)]
pub struct DeviceRegistry {
    routes: HashMap<String, SensorGroup>,
    profiles: HashMap<String, DecodeProfile>,
    default_profile: DecodeProfile,
    conflicts: Vec<RegistryConflict>,
}

impl DeviceRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// The deployed fleet.
    pub fn builtin() -> Self {
        Self::builder()
            .group(SensorGroup::PowerTemp, ["1fc5622", "1fc57ca"])
            .group(SensorGroup::PulseMeter, ["1fc74ab", "1fa5f9c"])
            .group(SensorGroup::WaterDetector, ["c6e542", "c53d89", "c6d3a6"])
            .group(SensorGroup::Magnetic, ["1f7f022", "c52fce"])
            .build()
    }

    /// Loads a registry from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let registry = Self::from_toml(&text)?;
        info!(
            "Loaded device registry from {} ({} devices)",
            path.display(),
            registry.len()
        );
        Ok(registry)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let file: RegistryFile = toml::from_str(text)?;
        Ok(file.into_registry())
    }

    /// Resolves a device id; unknown devices route to `Unassigned`.
    pub fn resolve(&self, device_id: &str) -> Route {
        let key = normalize(device_id);
        let group = self
            .routes
            .get(&key)
            .copied()
            .unwrap_or(SensorGroup::Unassigned);
        let profile = self
            .profiles
            .get(&key)
            .copied()
            .unwrap_or(self.default_profile);

        Route { group, profile }
    }

    pub fn conflicts(&self) -> &[RegistryConflict] {
        &self.conflicts
    }

    /// Fails when any device was listed under more than one group.
    pub fn ensure_consistent(&self) -> Result<()> {
        if self.conflicts.is_empty() {
            return Ok(());
        }

        let listed: Vec<String> = self
            .conflicts
            .iter()
            .map(|c| format!("{} ({} and {})", c.device_id, c.kept, c.ignored))
            .collect();
        Err(Error::Config(format!(
            "devices registered under multiple groups: {}",
            listed.join(", ")
        )))
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

fn normalize(device_id: &str) -> String {
    device_id.trim().to_lowercase()
}

#[derive(Debug, Default)]
pub struct RegistryBuilder {
    groups: BTreeMap<SensorGroup, Vec<String>>,
    default_profile: DecodeProfile,
    profiles: HashMap<String, DecodeProfile>,
}

impl RegistryBuilder {
    /// Adds devices to a group. `Unassigned` is not a routable group and is ignored.
    pub fn group<I, S>(mut self, group: SensorGroup, devices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        if group == SensorGroup::Unassigned {
            warn!("Ignoring devices registered to the unassigned group");
            return self;
        }

        self.groups
            .entry(group)
            .or_default()
            .extend(devices.into_iter().map(|d| normalize(d.as_ref())));
        self
    }

    pub fn default_profile(mut self, profile: DecodeProfile) -> Self {
        self.default_profile = profile;
        self
    }

    pub fn profile(mut self, device_id: &str, profile: DecodeProfile) -> Self {
        self.profiles.insert(normalize(device_id), profile);
        self
    }

    /// Groups are evaluated in `SensorGroup` declaration order; the first
    /// group to claim a device wins and later claims are recorded as conflicts.
    pub fn build(self) -> DeviceRegistry {
        let mut routes: HashMap<String, SensorGroup> = HashMap::new();
        let mut conflicts = Vec::new();

        for (group, devices) in self.groups {
            for device_id in devices {
                match routes.get(&device_id) {
                    Some(&kept) if kept == group => {}
                    Some(&kept) => {
                        warn!(
                            device_id = %device_id,
                            kept = %kept,
                            ignored = %group,
                            "Device registered under multiple groups"
                        );
                        conflicts.push(RegistryConflict {
                            device_id,
                            kept,
                            ignored: group,
                        });
                    }
                    None => {
                        routes.insert(device_id, group);
                    }
                }
            }
        }

        DeviceRegistry {
            routes,
            profiles: self.profiles,
            default_profile: self.default_profile,
            conflicts,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RegistryFile {
    defaults: DecodeProfile,
    groups: GroupLists,
    devices: HashMap<String, ProfileOverride>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct GroupLists {
    power_temp: Vec<String>,
    pulse_meter: Vec<String>,
    water_detector: Vec<String>,
    magnetic: Vec<String>,
    tank_level: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ProfileOverride {
    power_temp: Option<PowerTempProfile>,
    water: Option<WaterProfile>,
    water_threshold: Option<u8>,
}

impl ProfileOverride {
    fn apply(&self, base: DecodeProfile) -> DecodeProfile {
        DecodeProfile {
            power_temp: self.power_temp.unwrap_or(base.power_temp),
            water: self.water.unwrap_or(base.water),
            water_threshold: self.water_threshold.unwrap_or(base.water_threshold),
        }
    }
}

impl RegistryFile {
    fn into_registry(self) -> DeviceRegistry {
        let defaults = self.defaults;
        let mut builder = DeviceRegistry::builder()
            .default_profile(defaults)
            .group(SensorGroup::PowerTemp, self.groups.power_temp)
            .group(SensorGroup::PulseMeter, self.groups.pulse_meter)
            .group(SensorGroup::WaterDetector, self.groups.water_detector)
            .group(SensorGroup::Magnetic, self.groups.magnetic)
            .group(SensorGroup::TankLevel, self.groups.tank_level);

        for (device_id, overrides) in &self.devices {
            builder = builder.profile(device_id, overrides.apply(defaults));
        }

        builder.build()
    }
}
