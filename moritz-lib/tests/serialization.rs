//! Serialization of the collaborator-facing state types.

use chrono::Local;
use moritz_lib::{DeviceSnapshot, ThermostatMode};

fn sample_snapshot() -> DeviceSnapshot {
    DeviceSnapshot {
        mode: Some(ThermostatMode::Manual),
        dst_setting: Some(false),
        lan_gateway: Some(true),
        is_locked: Some(false),
        rf_error: Some(false),
        battery_low: Some(false),
        desired_temperature: Some(16.0),
        valve_position: Some(0),
        measured_temperature: Some(20.2),
        last_updated: Local::now(),
        signal_strength: 0x3C,
    }
}

#[test]
fn test_snapshot_serializes_with_wire_vocabulary() {
    let json = serde_json::to_value(sample_snapshot()).unwrap();
    assert_eq!(json["mode"], "manual");
    assert_eq!(json["desired_temperature"], 16.0);
    assert_eq!(json["measured_temperature"], 20.2);
    assert_eq!(json["valve_position"], 0);
    assert_eq!(json["signal_strength"], 0x3C);
    assert_eq!(json["lan_gateway"], true);
}

#[test]
fn test_snapshot_omits_a_missing_measurement() {
    let mut snapshot = sample_snapshot();
    snapshot.measured_temperature = None;
    let json = serde_json::to_value(&snapshot).unwrap();
    assert!(json.get("measured_temperature").is_none());
}

#[test]
fn test_contact_only_snapshot_carries_just_the_link_fields() {
    let snapshot = DeviceSnapshot {
        mode: None,
        dst_setting: None,
        lan_gateway: None,
        is_locked: None,
        rf_error: None,
        battery_low: None,
        desired_temperature: None,
        valve_position: None,
        measured_temperature: None,
        last_updated: Local::now(),
        signal_strength: 0x28,
    };
    let json = serde_json::to_value(&snapshot).unwrap();
    assert!(json.get("mode").is_none());
    assert!(json.get("desired_temperature").is_none());
    assert_eq!(json["signal_strength"], 0x28);
    assert!(json.get("last_updated").is_some());
}

#[test]
fn test_snapshot_round_trips_through_json() {
    let snapshot = sample_snapshot();
    let json = serde_json::to_string(&snapshot).unwrap();
    let back: DeviceSnapshot = serde_json::from_str(&json).unwrap();
    assert_eq!(back, snapshot);
}
