//! Device types for discovery observations and merged inventory records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;

/// Prefix of generated display names. Names with this prefix never win over
/// a name reported by the device itself.
pub const PLACEHOLDER_NAME_PREFIX: &str = "Urządzenie-";

/// Category of a discovered device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Router,
    Media,
    Iot,
    Printer,
    Computer,
    Phone,
    Tablet,
    Tv,
    Unknown,
}

impl Default for DeviceType {
    fn default() -> Self {
        Self::Unknown
    }
}

impl DeviceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Router => "router",
            Self::Media => "media",
            Self::Iot => "iot",
            Self::Printer => "printer",
            Self::Computer => "computer",
            Self::Phone => "phone",
            Self::Tablet => "tablet",
            Self::Tv => "tv",
            Self::Unknown => "unknown",
        }
    }

    pub fn is_unknown(&self) -> bool {
        *self == Self::Unknown
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a device was discovered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscoverySource {
    /// Found in the OS neighbor (ARP) table
    Arp,
    /// Answered an ICMP echo during a ping sweep
    Ping,
    /// Answered an SSDP M-SEARCH
    Upnp,
    /// Announced a multicast-DNS service
    Mdns,
}

impl DiscoverySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Arp => "arp",
            Self::Ping => "ping",
            Self::Upnp => "upnp",
            Self::Mdns => "mdns",
        }
    }
}

impl fmt::Display for DiscoverySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Presence of a device in the inventory
///
/// Discoverers only ever report `Active`. `Inactive` is assigned by the
/// caller to known devices missing from a fresh scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Active,
    Inactive,
}

impl Default for DeviceStatus {
    fn default() -> Self {
        Self::Active
    }
}

impl DeviceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
        }
    }
}

/// Extra details carried by UPnP observations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpnpInfo {
    /// Raw `deviceType` URN from the description document
    pub upnp_type: String,
    /// URL of the description document
    pub location: String,
}

/// One discoverer's report about one device at one point in time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceObservation {
    pub ip_address: Ipv4Addr,
    /// Canonical uppercase, colon-separated hardware address
    pub mac_address: Option<String>,
    pub name: Option<String>,
    #[serde(default)]
    pub device_type: DeviceType,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upnp: Option<UpnpInfo>,
    pub source: DiscoverySource,
    pub last_seen: DateTime<Utc>,
    #[serde(default)]
    pub status: DeviceStatus,
}

impl DeviceObservation {
    /// Create an active observation seen now
    pub fn new(ip_address: Ipv4Addr, mac_address: Option<String>, source: DiscoverySource) -> Self {
        Self {
            ip_address,
            mac_address,
            name: None,
            device_type: DeviceType::Unknown,
            manufacturer: None,
            model: None,
            upnp: None,
            source,
            last_seen: Utc::now(),
            status: DeviceStatus::Active,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_device_type(mut self, device_type: DeviceType) -> Self {
        self.device_type = device_type;
        self
    }
}

/// A device after all observations for its hardware address were merged
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedDevice {
    pub ip_address: Ipv4Addr,
    pub mac_address: String,
    pub name: Option<String>,
    #[serde(default)]
    pub device_type: DeviceType,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upnp: Option<UpnpInfo>,
    /// Provenance of the seed observation
    pub source: DiscoverySource,
    /// Every method that saw this device, in first-seen order
    pub sources: Vec<DiscoverySource>,
    pub last_seen: DateTime<Utc>,
    #[serde(default)]
    pub status: DeviceStatus,
}

impl MergedDevice {
    /// Seed a merged record from an observation. Returns `None` when the
    /// observation carries no hardware address.
    pub fn from_observation(observation: DeviceObservation) -> Option<Self> {
        let mac_address = observation.mac_address.filter(|m| !m.is_empty())?;
        Some(Self {
            ip_address: observation.ip_address,
            mac_address,
            name: observation.name,
            device_type: observation.device_type,
            manufacturer: observation.manufacturer,
            model: observation.model,
            upnp: observation.upnp,
            source: observation.source,
            sources: vec![observation.source],
            last_seen: observation.last_seen,
            status: observation.status,
        })
    }

    /// Name to show to users, falling back to a placeholder
    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| placeholder_name(&self.mac_address))
    }

    pub fn seen_by(&self, source: DiscoverySource) -> bool {
        self.sources.contains(&source)
    }
}

/// Generated display name for a device without one: the prefix followed by
/// the last five characters of the hardware address.
pub fn placeholder_name(mac: &str) -> String {
    let tail: String = {
        let chars: Vec<char> = mac.chars().collect();
        chars[chars.len().saturating_sub(5)..].iter().collect()
    };
    format!("{}{}", PLACEHOLDER_NAME_PREFIX, tail)
}

/// Check whether a name is a generated placeholder
pub fn is_placeholder_name(name: &str) -> bool {
    name.starts_with(PLACEHOLDER_NAME_PREFIX)
}

/// Normalize a hardware address to uppercase, colon-separated form.
/// Returns `None` unless the input has exactly six hex pairs.
pub fn normalize_mac(raw: &str) -> Option<String> {
    let groups: Vec<&str> = raw.trim().split(|c| c == ':' || c == '-').collect();
    if groups.len() != 6 {
        return None;
    }
    if groups
        .iter()
        .any(|g| g.len() != 2 || !g.chars().all(|c| c.is_ascii_hexdigit()))
    {
        return None;
    }
    Some(groups.join(":").to_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_mac() {
        assert_eq!(
            normalize_mac("aa-bb-cc-dd-ee-ff").as_deref(),
            Some("AA:BB:CC:DD:EE:FF")
        );
        assert_eq!(
            normalize_mac("00:1a:2B:3c:4D:5e").as_deref(),
            Some("00:1A:2B:3C:4D:5E")
        );
        assert_eq!(normalize_mac("aa:bb:cc:dd:ee"), None);
        assert_eq!(normalize_mac("zz:bb:cc:dd:ee:ff"), None);
        assert_eq!(normalize_mac("a:bb:cc:dd:ee:ff"), None);
    }

    #[test]
    fn test_placeholder_name() {
        assert_eq!(placeholder_name("AA:BB:CC:DD:EE:FF"), "Urządzenie-EE:FF");
        assert!(is_placeholder_name(&placeholder_name("AA:BB:CC:DD:EE:FF")));
        assert!(is_placeholder_name("Urządzenie-1"));
        assert!(!is_placeholder_name("Living Room TV"));
        assert!(!is_placeholder_name("UPnP Device"));
    }

    #[test]
    fn test_observation_serializes_flat() {
        let obs = DeviceObservation::new(
            Ipv4Addr::new(192, 168, 1, 10),
            Some("AA:BB:CC:DD:EE:FF".to_string()),
            DiscoverySource::Arp,
        );
        let json = serde_json::to_value(&obs).unwrap();
        assert_eq!(json["ip_address"], "192.168.1.10");
        assert_eq!(json["source"], "arp");
        assert_eq!(json["status"], "active");
        assert_eq!(json["device_type"], "unknown");
        assert!(json["last_seen"].is_string());
        assert!(json.get("upnp").is_none());
    }

    #[test]
    fn test_merged_device_requires_mac() {
        let obs = DeviceObservation::new(Ipv4Addr::new(10, 0, 0, 1), None, DiscoverySource::Ping);
        assert!(MergedDevice::from_observation(obs).is_none());

        let obs = DeviceObservation::new(
            Ipv4Addr::new(10, 0, 0, 1),
            Some(String::new()),
            DiscoverySource::Ping,
        );
        assert!(MergedDevice::from_observation(obs).is_none());
    }

    #[test]
    fn test_merged_device_sources_serialize_as_strings() {
        let obs = DeviceObservation::new(
            Ipv4Addr::new(10, 0, 0, 1),
            Some("AA:BB:CC:DD:EE:FF".to_string()),
            DiscoverySource::Upnp,
        );
        let device = MergedDevice::from_observation(obs).unwrap();
        let json = serde_json::to_value(&device).unwrap();
        assert_eq!(json["sources"], serde_json::json!(["upnp"]));
        assert_eq!(device.display_name(), "Urządzenie-EE:FF");
    }
}
