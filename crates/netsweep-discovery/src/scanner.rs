//! Discovery scanner that combines all discovery methods

use netsweep_core::{merge_device_info, DiscoverySource, MergedDevice};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::arp::discover_devices_arp;
use crate::context::DiscoveryContext;
use crate::error::Result;
use crate::host::parse_prefix;
use crate::mdns::discover_devices_mdns;
use crate::ping::discover_devices_ping_sweep;
use crate::ssdp::discover_devices_upnp;

/// Scanner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// CIDR prefix to sweep (e.g., "192.168.1.0/24"); inferred when unset
    pub prefix: Option<String>,
    /// Interface whose address anchors the inferred prefix
    pub interface: Option<String>,
    /// Run SSDP discovery
    pub use_upnp: bool,
    /// Run mDNS discovery (needs avahi-browse or dns-sd)
    pub use_mdns: bool,
    /// Run the ping sweep
    pub use_ping: bool,
    /// Pings allowed in flight at once
    pub max_concurrent_probes: usize,
    /// MX value advertised in M-SEARCH
    pub ssdp_mx: u8,
    /// How long to collect SSDP responses
    pub ssdp_listen_ms: u64,
    /// Timeout for fetching one UPnP description
    pub http_timeout_ms: u64,
    /// Timeout for the mDNS browsing tool
    pub mdns_timeout_ms: u64,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            prefix: None,
            interface: None,
            use_upnp: true,
            use_mdns: false,
            use_ping: true,
            max_concurrent_probes: 10,
            ssdp_mx: 3,
            ssdp_listen_ms: 5000,
            http_timeout_ms: 3000,
            mdns_timeout_ms: 10_000,
        }
    }
}

impl ScannerConfig {
    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms)
    }

    pub fn mdns_timeout(&self) -> Duration {
        Duration::from_millis(self.mdns_timeout_ms)
    }

    pub fn ssdp_listen(&self) -> Duration {
        Duration::from_millis(self.ssdp_listen_ms)
    }
}

/// Which optional discovery methods a scan runs. ARP always runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanOptions {
    pub include_upnp: bool,
    pub include_mdns: bool,
    pub include_ping: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            include_upnp: true,
            include_mdns: false,
            include_ping: true,
        }
    }
}

impl From<&ScannerConfig> for ScanOptions {
    fn from(config: &ScannerConfig) -> Self {
        Self {
            include_upnp: config.use_upnp,
            include_mdns: config.use_mdns,
            include_ping: config.use_ping,
        }
    }
}

/// Discovery event for progress reporting
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryEvent {
    /// Scan started
    ScanStarted,
    /// One discovery method finished
    MethodCompleted { source: DiscoverySource, found: usize },
    /// Scan completed with this many merged devices
    ScanCompleted { found: usize },
}

/// Discovery scanner service
pub struct DiscoveryScanner {
    ctx: Arc<DiscoveryContext>,
    event_tx: broadcast::Sender<DiscoveryEvent>,
}

impl DiscoveryScanner {
    pub fn new(ctx: Arc<DiscoveryContext>) -> Self {
        let (event_tx, _) = broadcast::channel(100);
        Self { ctx, event_tx }
    }

    pub fn config(&self) -> &ScannerConfig {
        &self.ctx.config
    }

    /// Subscribe to discovery events
    pub fn subscribe(&self) -> broadcast::Receiver<DiscoveryEvent> {
        self.event_tx.subscribe()
    }

    /// Run a scan with the methods enabled in the configuration
    pub async fn scan_once(&self) -> Result<Vec<MergedDevice>> {
        self.scan_network(ScanOptions::from(&self.ctx.config)).await
    }

    /// Run ARP followed by the enabled optional methods and merge the
    /// observations into one record per MAC.
    ///
    /// Only an invalid prefix override fails the scan; discovery methods
    /// themselves report nothing rather than an error.
    pub async fn scan_network(&self, options: ScanOptions) -> Result<Vec<MergedDevice>> {
        let prefix = self.ctx.config.prefix.as_deref().map(parse_prefix).transpose()?;

        let _ = self.event_tx.send(DiscoveryEvent::ScanStarted);
        info!(
            upnp = options.include_upnp,
            mdns = options.include_mdns,
            ping = options.include_ping,
            "Starting network scan"
        );

        let mut observations = discover_devices_arp(self.ctx.neighbors.as_ref()).await;
        self.completed(DiscoverySource::Arp, observations.len());

        if options.include_upnp {
            let found = discover_devices_upnp(&self.ctx).await;
            self.completed(DiscoverySource::Upnp, found.len());
            observations.extend(found);
        }

        if options.include_mdns {
            let found = discover_devices_mdns(&self.ctx).await;
            self.completed(DiscoverySource::Mdns, found.len());
            observations.extend(found);
        }

        if options.include_ping {
            let found = discover_devices_ping_sweep(&self.ctx, prefix).await;
            self.completed(DiscoverySource::Ping, found.len());
            observations.extend(found);
        }

        debug!("Merging {} observations", observations.len());
        let devices = merge_device_info(observations);

        let _ = self.event_tx.send(DiscoveryEvent::ScanCompleted {
            found: devices.len(),
        });
        info!("Scan complete: {} unique devices", devices.len());

        Ok(devices)
    }

    fn completed(&self, source: DiscoverySource, found: usize) {
        debug!(source = %source, found, "Discovery method completed");
        let _ = self
            .event_tx
            .send(DiscoveryEvent::MethodCompleted { source, found });
    }
}
