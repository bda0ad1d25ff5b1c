//! Device inventory kept between scans

use chrono::{DateTime, Utc};
use netsweep_core::{is_placeholder_name, placeholder_name, DeviceStatus, MergedDevice};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tracing::debug;

/// Scan results reconciled against the previous inventory
#[derive(Debug, Clone, Default)]
pub struct Inventory {
    devices: Vec<MergedDevice>,
}

impl Inventory {
    pub fn new(devices: Vec<MergedDevice>) -> Self {
        Self { devices }
    }

    /// Fold a fresh scan into the previous inventory.
    ///
    /// Fresh devices keep a name they already had in the previous inventory
    /// when the scan produced none or only a placeholder. Devices still
    /// without a name get a placeholder. Previously known devices missing
    /// from the scan are carried over as inactive.
    pub fn reconcile(previous: &[MergedDevice], fresh: Vec<MergedDevice>) -> Self {
        let known: HashMap<&str, &MergedDevice> = previous
            .iter()
            .map(|d| (d.mac_address.as_str(), d))
            .collect();
        let seen: HashSet<String> = fresh.iter().map(|d| d.mac_address.clone()).collect();

        let mut devices: Vec<MergedDevice> = fresh
            .into_iter()
            .map(|mut device| {
                let needs_name = device.name.as_deref().map_or(true, is_placeholder_name);
                if needs_name {
                    let prior = known
                        .get(device.mac_address.as_str())
                        .and_then(|d| d.name.as_deref())
                        .filter(|name| !is_placeholder_name(name));
                    if let Some(name) = prior {
                        debug!(mac = %device.mac_address, name = %name, "Keeping known device name");
                        device.name = Some(name.to_string());
                    }
                }
                if device.name.is_none() {
                    device.name = Some(placeholder_name(&device.mac_address));
                }
                device.status = DeviceStatus::Active;
                device
            })
            .collect();

        for old in previous.iter().filter(|d| !seen.contains(&d.mac_address)) {
            debug!(mac = %old.mac_address, "Device not seen in this scan");
            devices.push(MergedDevice {
                status: DeviceStatus::Inactive,
                ..old.clone()
            });
        }

        Self { devices }
    }

    /// Drop inactive devices last seen more than `retention` before `now`.
    /// Returns how many were dropped.
    ///
    /// Devices known only by a stand-in hardware address get a new identity
    /// whenever their IP changes, so without this the inventory grows on
    /// every address change.
    pub fn prune_inactive(&mut self, retention: Duration, now: DateTime<Utc>) -> usize {
        let before = self.devices.len();
        self.devices.retain(|device| {
            if device.status == DeviceStatus::Active {
                return true;
            }
            // A last_seen in the future fails to convert and is kept
            match (now - device.last_seen).to_std() {
                Ok(age) if age > retention => {
                    debug!(mac = %device.mac_address, "Forgetting long-inactive device");
                    false
                }
                _ => true,
            }
        });
        before - self.devices.len()
    }

    pub fn devices(&self) -> &[MergedDevice] {
        &self.devices
    }

    pub fn active_count(&self) -> usize {
        self.devices
            .iter()
            .filter(|d| d.status == DeviceStatus::Active)
            .count()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}
