//! Application state management

use anyhow::Result;
use chrono::Utc;
use netsweep_core::ScanCache;
use netsweep_discovery::{DiscoveryContext, DiscoveryEvent, DiscoveryScanner};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::inventory::Inventory;

/// Shared application state
pub struct AppState {
    /// Discovery scanner
    pub scanner: Arc<DiscoveryScanner>,
    /// Last scan result on disk
    pub cache: ScanCache,
    /// Configuration
    pub config: Config,
}

impl AppState {
    /// Create new application state
    pub fn new(config: Config) -> Result<Arc<Self>> {
        let ctx = DiscoveryContext::new(config.to_scanner_config())?;
        let scanner = Arc::new(DiscoveryScanner::new(Arc::new(ctx)));
        Ok(Self::with_scanner(config, scanner))
    }

    pub fn with_scanner(config: Config, scanner: Arc<DiscoveryScanner>) -> Arc<Self> {
        let cache = ScanCache::new(config.cache.path.clone());

        // Log scanner progress
        let mut rx = scanner.subscribe();
        tokio::spawn(async move {
            while let Ok(event) = rx.recv().await {
                match event {
                    DiscoveryEvent::ScanStarted => debug!("Scan started"),
                    DiscoveryEvent::MethodCompleted { source, found } => {
                        info!(method = %source, found, "Discovery method finished")
                    }
                    DiscoveryEvent::ScanCompleted { found } => {
                        debug!(found, "Scan finished")
                    }
                }
            }
        });

        Arc::new(Self {
            scanner,
            cache,
            config,
        })
    }

    /// Current inventory: the cached one while it is fresh, otherwise a new
    /// scan
    pub async fn inventory(&self, force: bool) -> Result<Inventory> {
        let max_age = self.config.cache.max_age();
        if !force && self.cache.is_fresh(max_age) {
            match self.cache.load() {
                Ok(devices) => {
                    info!(
                        path = %self.cache.path().display(),
                        devices = devices.len(),
                        "Using cached scan"
                    );
                    return Ok(Inventory::new(devices));
                }
                Err(e) => warn!(error = %e, "Cached scan unreadable, rescanning"),
            }
        }
        self.refresh().await
    }

    /// Scan now, reconcile against the cached inventory and store the result
    pub async fn refresh(&self) -> Result<Inventory> {
        let previous = self.cache.load_or_empty();
        let fresh = self.scanner.scan_once().await?;
        let mut inventory = Inventory::reconcile(&previous, fresh);

        if let Some(retention) = self.config.cache.inactive_retention() {
            let dropped = inventory.prune_inactive(retention, Utc::now());
            if dropped > 0 {
                info!(dropped, "Forgot devices inactive past retention");
            }
        }

        if let Err(e) = self.cache.save(inventory.devices()) {
            warn!(
                path = %self.cache.path().display(),
                error = %e,
                "Failed to save scan cache"
            );
        }

        info!(
            active = inventory.active_count(),
            total = inventory.len(),
            "Inventory updated"
        );
        Ok(inventory)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netsweep_core::{DeviceObservation, DeviceStatus, DiscoverySource, MergedDevice};
    use netsweep_discovery::ScannerConfig;
    use std::net::Ipv4Addr;
    use tempfile::tempdir;

    fn offline_config(dir: &std::path::Path) -> Config {
        let mut config = Config::default();
        config.cache.path = dir.join("scan.json");
        config.discovery.use_upnp = false;
        config.discovery.use_ping = false;
        config
    }

    /// Scanner that only reads an empty neighbor table
    fn empty_scanner(config: &Config) -> Arc<DiscoveryScanner> {
        let ctx = DiscoveryContext::new(ScannerConfig {
            use_upnp: false,
            use_ping: false,
            use_mdns: false,
            ..config.to_scanner_config()
        })
        .unwrap()
        .with_neighbor_table(Arc::new(EmptyTable));
        Arc::new(DiscoveryScanner::new(Arc::new(ctx)))
    }

    struct EmptyTable;

    #[async_trait::async_trait]
    impl netsweep_discovery::arp::NeighborTable for EmptyTable {
        async fn dump(&self) -> netsweep_discovery::Result<String> {
            Ok(String::new())
        }

        async fn lookup(&self, _ip: Ipv4Addr) -> netsweep_discovery::Result<String> {
            Ok(String::new())
        }
    }

    fn cached_device() -> MergedDevice {
        let observation = DeviceObservation::new(
            Ipv4Addr::new(192, 168, 1, 5),
            Some("AA:BB:CC:DD:EE:05".to_string()),
            DiscoverySource::Arp,
        )
        .with_name("NAS");
        MergedDevice::from_observation(observation).unwrap()
    }

    #[tokio::test]
    async fn test_fresh_cache_is_reused() {
        let dir = tempdir().unwrap();
        let config = offline_config(dir.path());
        let state = AppState::with_scanner(config.clone(), empty_scanner(&config));
        state.cache.save(&[cached_device()]).unwrap();

        let inventory = state.inventory(false).await.unwrap();
        assert_eq!(inventory.len(), 1);
        assert_eq!(inventory.devices()[0].status, DeviceStatus::Active);
    }

    #[tokio::test]
    async fn test_force_rescans_and_marks_missing_inactive() {
        let dir = tempdir().unwrap();
        let config = offline_config(dir.path());
        let state = AppState::with_scanner(config.clone(), empty_scanner(&config));
        state.cache.save(&[cached_device()]).unwrap();

        let inventory = state.inventory(true).await.unwrap();
        assert_eq!(inventory.len(), 1);
        assert_eq!(inventory.active_count(), 0);

        let stored = state.cache.load().unwrap();
        assert_eq!(stored[0].status, DeviceStatus::Inactive);
        assert_eq!(stored[0].name.as_deref(), Some("NAS"));
    }

    #[tokio::test]
    async fn test_refresh_forgets_long_inactive_devices() {
        let dir = tempdir().unwrap();
        let mut config = offline_config(dir.path());
        config.cache.inactive_retention_secs = 3600;
        let state = AppState::with_scanner(config.clone(), empty_scanner(&config));

        let mut stale = cached_device();
        stale.last_seen = chrono::Utc::now() - chrono::Duration::hours(2);
        let mut recent = cached_device();
        recent.mac_address = "AA:BB:CC:DD:EE:06".to_string();
        state.cache.save(&[stale, recent]).unwrap();

        let inventory = state.refresh().await.unwrap();
        assert_eq!(inventory.len(), 1);
        assert_eq!(inventory.devices()[0].mac_address, "AA:BB:CC:DD:EE:06");
        assert_eq!(state.cache.load().unwrap().len(), 1);
    }
}
