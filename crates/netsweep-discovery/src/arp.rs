//! Neighbor (ARP) table inspection for device discovery

use async_trait::async_trait;
use netsweep_core::{normalize_mac, DeviceObservation, DiscoverySource};
use once_cell::sync::Lazy;
use regex::Regex;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

use crate::command::{CommandRunner, Platform};
use crate::error::Result;

/// Timeout for dumping the whole table
pub const TABLE_TIMEOUT: Duration = Duration::from_secs(5);

/// Timeout for a single-host lookup
pub const LOOKUP_TIMEOUT: Duration = Duration::from_secs(2);

static IPV4_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3})").unwrap());

static MAC_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"([0-9a-fA-F]{2}[:-][0-9a-fA-F]{2}[:-][0-9a-fA-F]{2}[:-][0-9a-fA-F]{2}[:-][0-9a-fA-F]{2}[:-][0-9a-fA-F]{2})",
    )
    .unwrap()
});

/// Neighbor table entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NeighborEntry {
    pub ip: Ipv4Addr,
    /// Canonical uppercase, colon-separated
    pub mac: String,
}

/// Access to the OS neighbor table
#[async_trait]
pub trait NeighborTable: Send + Sync {
    /// Raw text of the whole table
    async fn dump(&self) -> Result<String>;

    /// Raw text of a lookup scoped to one address
    async fn lookup(&self, ip: Ipv4Addr) -> Result<String>;
}

/// `arp -a`, falling back to `ip neighbor` (Linux, macOS, BSD)
pub struct UnixNeighborTable {
    runner: Arc<dyn CommandRunner>,
}

impl UnixNeighborTable {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl NeighborTable for UnixNeighborTable {
    async fn dump(&self) -> Result<String> {
        let arp = self
            .runner
            .run("arp", &["-a"], TABLE_TIMEOUT)
            .await
            .and_then(|out| out.into_stdout("arp"));

        match arp {
            Ok(stdout) => {
                debug!(bytes = stdout.len(), "Read neighbor table via arp -a");
                Ok(stdout)
            }
            Err(e) => {
                warn!(error = %e, "arp -a failed, trying ip neighbor");
                let stdout = self
                    .runner
                    .run("ip", &["neighbor"], TABLE_TIMEOUT)
                    .await?
                    .into_stdout("ip")?;
                debug!(bytes = stdout.len(), "Read neighbor table via ip neighbor");
                Ok(stdout)
            }
        }
    }

    async fn lookup(&self, ip: Ipv4Addr) -> Result<String> {
        let ip = ip.to_string();
        self.runner
            .run("arp", &["-n", &ip], LOOKUP_TIMEOUT)
            .await?
            .into_stdout("arp")
    }
}

/// `arp -a` (Windows)
pub struct WindowsNeighborTable {
    runner: Arc<dyn CommandRunner>,
}

impl WindowsNeighborTable {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl NeighborTable for WindowsNeighborTable {
    async fn dump(&self) -> Result<String> {
        self.runner
            .run("arp", &["-a"], TABLE_TIMEOUT)
            .await?
            .into_stdout("arp")
    }

    async fn lookup(&self, ip: Ipv4Addr) -> Result<String> {
        let ip = ip.to_string();
        self.runner
            .run("arp", &["-a", &ip], LOOKUP_TIMEOUT)
            .await?
            .into_stdout("arp")
    }
}

/// Pick the neighbor table implementation for a platform
pub fn neighbor_table_for(platform: Platform, runner: Arc<dyn CommandRunner>) -> Arc<dyn NeighborTable> {
    match platform {
        Platform::Windows => Arc::new(WindowsNeighborTable::new(runner)),
        Platform::Unix => Arc::new(UnixNeighborTable::new(runner)),
    }
}

/// Extract the first hardware address in `text`
pub fn extract_mac(text: &str) -> Option<String> {
    MAC_RE
        .captures(text)
        .and_then(|caps| normalize_mac(&caps[1]))
}

/// Parse one line of `arp -a`, `arp -n` or `ip neighbor` output.
///
/// The address and hardware address are matched independently, so this
/// handles the BSD (`? (10.0.0.1) at aa:bb:..`), Windows
/// (`10.0.0.1   aa-bb-..   dynamic`) and iproute2 layouts alike.
pub fn parse_neighbor_line(line: &str) -> Option<NeighborEntry> {
    let ip = IPV4_RE.captures(line)?[1].parse::<Ipv4Addr>().ok()?;
    let mac = extract_mac(line)?;
    Some(NeighborEntry { ip, mac })
}

/// Parse a full table dump
pub fn parse_neighbor_table(output: &str) -> Vec<NeighborEntry> {
    output
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| {
            trace!(line = %line, "Parsing neighbor table line");
            parse_neighbor_line(line)
        })
        .collect()
}

/// Discover devices from the neighbor table. Never fails: any error yields
/// an empty list.
pub async fn discover_devices_arp(table: &dyn NeighborTable) -> Vec<DeviceObservation> {
    info!("Starting neighbor table discovery");

    let output = match table.dump().await {
        Ok(output) => output,
        Err(e) => {
            warn!(error = %e, "Failed to read neighbor table");
            return Vec::new();
        }
    };

    let devices: Vec<DeviceObservation> = parse_neighbor_table(&output)
        .into_iter()
        .map(|entry| {
            debug!(ip = %entry.ip, mac = %entry.mac, "Found device in neighbor table");
            DeviceObservation::new(entry.ip, Some(entry.mac), DiscoverySource::Arp)
        })
        .collect();

    info!("Neighbor table discovery found {} devices", devices.len());
    devices
}

/// Hardware address for a single host, `None` if it can't be resolved
pub async fn get_mac_from_ip(table: &dyn NeighborTable, ip: Ipv4Addr) -> Option<String> {
    match table.lookup(ip).await {
        Ok(output) => extract_mac(&output),
        Err(e) => {
            debug!(ip = %ip, error = %e, "Neighbor lookup failed");
            None
        }
    }
}
