//! Discovery context: configuration plus the platform capabilities every
//! discovery method runs against

use ipnetwork::Ipv4Network;
use std::net::Ipv4Addr;
use std::sync::Arc;
use tracing::{error, warn};

use crate::arp::{neighbor_table_for, NeighborTable};
use crate::command::{CommandRunner, Platform, SystemRunner};
use crate::error::Result;
use crate::host::{get_local_ip, local_ip_for_interface, parse_prefix, prefix_for_ip, UNDETERMINED_IP};
use crate::mdns::{default_browsers, MdnsBrowser};
use crate::ping::{CommandPinger, Pinger};
use crate::scanner::ScannerConfig;

/// Everything a discovery method needs, constructed once and passed in
pub struct DiscoveryContext {
    pub config: ScannerConfig,
    pub neighbors: Arc<dyn NeighborTable>,
    pub pinger: Arc<dyn Pinger>,
    /// mDNS browsers in order of preference
    pub mdns: Vec<Arc<dyn MdnsBrowser>>,
    /// Client for UPnP description documents
    pub http: reqwest::Client,
}

impl DiscoveryContext {
    /// Context backed by real subprocesses for the current platform
    pub fn new(config: ScannerConfig) -> Result<Self> {
        Self::with_runner(config, Platform::current(), Arc::new(SystemRunner))
    }

    /// Context whose OS tools all go through `runner`
    pub fn with_runner(
        config: ScannerConfig,
        platform: Platform,
        runner: Arc<dyn CommandRunner>,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.http_timeout())
            .build()?;

        Ok(Self {
            neighbors: neighbor_table_for(platform, runner.clone()),
            pinger: Arc::new(CommandPinger::new(runner.clone(), platform)),
            mdns: default_browsers(runner, config.mdns_timeout()),
            http,
            config,
        })
    }

    pub fn with_neighbor_table(mut self, neighbors: Arc<dyn NeighborTable>) -> Self {
        self.neighbors = neighbors;
        self
    }

    pub fn with_pinger(mut self, pinger: Arc<dyn Pinger>) -> Self {
        self.pinger = pinger;
        self
    }

    pub fn with_mdns_browsers(mut self, browsers: Vec<Arc<dyn MdnsBrowser>>) -> Self {
        self.mdns = browsers;
        self
    }

    /// Subnet to sweep: the configured prefix if valid, else the /24 around
    /// the local address, preferring the configured interface.
    ///
    /// Blocking: may fall back to a hostname lookup. Async callers use
    /// [`resolve_prefix`](Self::resolve_prefix).
    pub fn inferred_prefix(&self) -> Ipv4Network {
        infer_prefix(self.config.prefix.as_deref(), self.config.interface.as_deref())
    }

    /// [`inferred_prefix`](Self::inferred_prefix) on the blocking pool
    pub async fn resolve_prefix(&self) -> Ipv4Network {
        let prefix = self.config.prefix.clone();
        let interface = self.config.interface.clone();
        let resolved =
            tokio::task::spawn_blocking(move || infer_prefix(prefix.as_deref(), interface.as_deref())).await;

        match resolved {
            Ok(network) => network,
            Err(e) => {
                error!(error = %e, "Prefix resolution task failed, using default subnet");
                prefix_for_ip(UNDETERMINED_IP)
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn for_tests(config: ScannerConfig) -> Self {
        use crate::arp::fake::FakeNeighborTable;
        use crate::command::fake::FakeRunner;

        Self::with_runner(config, Platform::Unix, Arc::new(FakeRunner::new()))
            .expect("HTTP client builds")
            .with_neighbor_table(Arc::new(FakeNeighborTable::default()))
    }
}

fn local_ip_with(interface: Option<&str>) -> Ipv4Addr {
    if let Some(interface) = interface {
        match local_ip_for_interface(interface) {
            Some(ip) => return ip,
            None => warn!(interface = %interface, "Interface has no IPv4 address, using routing table"),
        }
    }
    get_local_ip()
}

fn infer_prefix(prefix: Option<&str>, interface: Option<&str>) -> Ipv4Network {
    if let Some(prefix) = prefix {
        match parse_prefix(prefix) {
            Ok(network) => return network,
            Err(e) => warn!(error = %e, "Ignoring invalid prefix override"),
        }
    }
    prefix_for_ip(local_ip_with(interface))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_override() {
        let config = ScannerConfig {
            prefix: Some("10.1.2.0/26".to_string()),
            ..ScannerConfig::default()
        };
        let ctx = DiscoveryContext::for_tests(config);
        assert_eq!(ctx.inferred_prefix().to_string(), "10.1.2.0/26");
    }

    #[test]
    fn test_invalid_override_falls_back_to_slash24() {
        let config = ScannerConfig {
            prefix: Some("garbage".to_string()),
            ..ScannerConfig::default()
        };
        let ctx = DiscoveryContext::for_tests(config);
        assert_eq!(ctx.inferred_prefix().prefix(), 24);
    }

    #[tokio::test]
    async fn test_resolve_prefix_off_runtime_thread() {
        let config = ScannerConfig {
            prefix: Some("10.1.2.0/26".to_string()),
            ..ScannerConfig::default()
        };
        let ctx = DiscoveryContext::for_tests(config);
        assert_eq!(ctx.resolve_prefix().await.to_string(), "10.1.2.0/26");
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_resolve_prefix_on_single_threaded_runtime() {
        let ctx = DiscoveryContext::for_tests(ScannerConfig::default());
        assert_eq!(ctx.resolve_prefix().await.prefix(), 24);
    }
}
