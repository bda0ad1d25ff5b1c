//! Merge engine: folds observations from every discovery method into one
//! record per hardware address

use std::collections::HashMap;
use tracing::{debug, info};

use crate::device::{is_placeholder_name, DeviceObservation, MergedDevice};

/// Merge observations into one record per unique MAC address.
///
/// Observations are applied in input order. Observations without a MAC are
/// dropped. The output follows first-encounter order of the MACs, but callers
/// that need a stable order should sort explicitly.
pub fn merge_device_info(observations: Vec<DeviceObservation>) -> Vec<MergedDevice> {
    let total = observations.len();
    let mut order: Vec<String> = Vec::new();
    let mut merged: HashMap<String, MergedDevice> = HashMap::new();

    for observation in observations {
        let Some(mac) = observation.mac_address.clone().filter(|m| !m.is_empty()) else {
            debug!(ip = %observation.ip_address, source = %observation.source, "Skipping observation without MAC");
            continue;
        };

        match merged.get_mut(&mac) {
            Some(existing) => fold_into(existing, observation),
            None => {
                if let Some(seed) = MergedDevice::from_observation(observation) {
                    order.push(mac.clone());
                    merged.insert(mac, seed);
                }
            }
        }
    }

    let result: Vec<MergedDevice> = order
        .into_iter()
        .filter_map(|mac| merged.remove(&mac))
        .collect();

    info!(
        observations = total,
        devices = result.len(),
        "Merged device observations"
    );
    result
}

/// Apply a later observation to an existing record
fn fold_into(existing: &mut MergedDevice, observation: DeviceObservation) {
    let name_replaceable = existing
        .name
        .as_deref()
        .map_or(true, is_placeholder_name);
    if name_replaceable && observation.name.is_some() {
        existing.name = observation.name;
    }

    if !observation.device_type.is_unknown() {
        existing.device_type = observation.device_type;
    }

    if existing.manufacturer.is_none() {
        existing.manufacturer = observation.manufacturer;
    }
    if existing.model.is_none() {
        existing.model = observation.model;
    }
    if existing.upnp.is_none() {
        existing.upnp = observation.upnp;
    }

    if !existing.sources.contains(&observation.source) {
        existing.sources.push(observation.source);
    }

    existing.last_seen = observation.last_seen;
}
