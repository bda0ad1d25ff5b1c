//! Netsweep Core - Device observation types, merge engine, and scan cache
//!
//! This crate provides the foundational types for netsweep:
//! - Device observations produced by each discovery method
//! - Merged device records keyed by hardware address
//! - The merge engine that folds observations into one record per device
//! - The JSON scan cache the calling layer keeps between scans

pub mod cache;
pub mod device;
pub mod merge;

pub use cache::{CacheError, ScanCache};
pub use device::{
    is_placeholder_name, normalize_mac, placeholder_name, DeviceObservation, DeviceStatus,
    DeviceType, DiscoverySource, MergedDevice, UpnpInfo, PLACEHOLDER_NAME_PREFIX,
};
pub use merge::merge_device_info;
