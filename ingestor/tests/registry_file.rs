use sigfox_ingestor::decode::{PowerTempProfile, WaterProfile};
use sigfox_ingestor::{DeviceRegistry, SensorGroup};
use std::path::Path;

fn sample() -> DeviceRegistry {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("registry.toml");
    DeviceRegistry::load(path).unwrap()
}

#[test]
fn sample_registry_routes_builtin_fleet() {
    let registry = sample();
    let builtin = DeviceRegistry::builtin();

    assert!(registry.ensure_consistent().is_ok());
    assert_eq!(registry.len(), builtin.len());

    for device in ["1fc5622", "1fc74ab", "c53d89", "1f7f022", "nope"] {
        assert_eq!(registry.resolve(device).group, builtin.resolve(device).group);
    }
}

#[test]
fn sample_registry_per_device_profiles() {
    let registry = sample();

    assert_eq!(
        registry.resolve("1FC57CA").profile.power_temp,
        PowerTempProfile::DivisorSearch
    );
    assert_eq!(
        registry.resolve("1fc5622").profile.power_temp,
        PowerTempProfile::FixedPoint
    );
    assert_eq!(registry.resolve("c6e542").profile.water, WaterProfile::CalibratedLe);
    assert_eq!(registry.resolve("c53d89").profile.water, WaterProfile::StateFlag);
    assert_eq!(registry.resolve("c53d89").group, SensorGroup::WaterDetector);
}
