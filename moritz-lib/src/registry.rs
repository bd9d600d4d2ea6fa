//! Latest-state snapshots per device, shared between the engine and
//! external readers.

use crate::message::{ThermostatMode, ThermostatStatus};
use chrono::{DateTime, Local};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;

/// Most recent decoded state of one device.
///
/// A device is registered as soon as any valid message arrives from it;
/// the status fields stay unset until the first report or status-bearing
/// acknowledgement. Snapshots are overwritten in place; collaborators
/// that want history subscribe to the event bus and persist it
/// themselves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<ThermostatMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dst_setting: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lan_gateway: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_locked: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rf_error: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub battery_low: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub desired_temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valve_position: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub measured_temperature: Option<f64>,
    pub last_updated: DateTime<Local>,
    pub signal_strength: u8,
}

impl DeviceSnapshot {
    /// Entry for a device that has been heard from but has not reported
    /// status fields yet.
    fn heard(signal_strength: u8, now: DateTime<Local>) -> Self {
        DeviceSnapshot {
            mode: None,
            dst_setting: None,
            lan_gateway: None,
            is_locked: None,
            rf_error: None,
            battery_low: None,
            desired_temperature: None,
            valve_position: None,
            measured_temperature: None,
            last_updated: now,
            signal_strength,
        }
    }

    fn merge(&mut self, status: &ThermostatStatus, signal_strength: u8, now: DateTime<Local>) {
        self.mode = Some(status.mode);
        self.dst_setting = Some(status.dst_setting);
        self.lan_gateway = Some(status.lan_gateway);
        self.is_locked = Some(status.is_locked);
        self.rf_error = Some(status.rf_error);
        self.battery_low = Some(status.battery_low);
        self.desired_temperature = Some(status.desired_temperature);
        self.valve_position = Some(status.valve_position);
        // a report without a measurement keeps the last known one
        if status.measured_temperature.is_some() {
            self.measured_temperature = status.measured_temperature;
        }
        self.last_updated = now;
        self.signal_strength = signal_strength;
    }
}

/// Map of device id to latest snapshot behind a single mutex.
///
/// Clones share the underlying map; every access takes the lock and the
/// critical sections are short field merges.
#[derive(Debug, Clone, Default)]
pub struct DeviceRegistry {
    inner: Arc<Mutex<HashMap<u32, DeviceSnapshot>>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn apply_status(
        &self,
        sender_id: u32,
        status: &ThermostatStatus,
        signal_strength: u8,
    ) {
        let now = Local::now();
        let mut devices = self.inner.lock();
        devices
            .entry(sender_id)
            .or_insert_with(|| DeviceSnapshot::heard(signal_strength, now))
            .merge(status, signal_strength, now);
    }

    /// Records contact from a device without status fields, e.g. an
    /// acknowledgement carrying no thermostat status. Registers the
    /// device on first contact.
    pub(crate) fn record_contact(&self, sender_id: u32, signal_strength: u8) {
        let now = Local::now();
        let mut devices = self.inner.lock();
        match devices.entry(sender_id) {
            Entry::Occupied(mut entry) => {
                let snapshot = entry.get_mut();
                snapshot.last_updated = now;
                snapshot.signal_strength = signal_strength;
            }
            Entry::Vacant(entry) => {
                entry.insert(DeviceSnapshot::heard(signal_strength, now));
            }
        }
    }

    /// Returns a consistent copy of the whole map.
    pub fn snapshot(&self) -> HashMap<u32, DeviceSnapshot> {
        self.inner.lock().clone()
    }

    pub fn get(&self, sender_id: u32) -> Option<DeviceSnapshot> {
        self.inner.lock().get(&sender_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}
