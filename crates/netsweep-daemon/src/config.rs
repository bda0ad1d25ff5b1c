//! Configuration loading and validation

use anyhow::Result;
use netsweep_discovery::ScannerConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Rescan interval in seconds when watching (0 scans once)
    #[serde(default)]
    pub watch_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// CIDR prefix to sweep; inferred from the local address when unset
    #[serde(default)]
    pub prefix: Option<String>,
    /// Interface whose address anchors the inferred prefix
    #[serde(default)]
    pub interface: Option<String>,
    #[serde(default = "default_true")]
    pub use_upnp: bool,
    /// Needs avahi-browse or dns-sd installed
    #[serde(default)]
    pub use_mdns: bool,
    #[serde(default = "default_true")]
    pub use_ping: bool,
    /// Pings in flight at once
    #[serde(default = "default_max_concurrent_probes")]
    pub max_concurrent_probes: usize,
    #[serde(default = "default_ssdp_listen_ms")]
    pub ssdp_listen_ms: u64,
    #[serde(default = "default_http_timeout_ms")]
    pub http_timeout_ms: u64,
    #[serde(default = "default_mdns_timeout_ms")]
    pub mdns_timeout_ms: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            prefix: None,
            interface: None,
            use_upnp: true,
            use_mdns: false,
            use_ping: true,
            max_concurrent_probes: default_max_concurrent_probes(),
            ssdp_listen_ms: default_ssdp_listen_ms(),
            http_timeout_ms: default_http_timeout_ms(),
            mdns_timeout_ms: default_mdns_timeout_ms(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_max_concurrent_probes() -> usize {
    10
}

fn default_ssdp_listen_ms() -> u64 {
    5000
}

fn default_http_timeout_ms() -> u64 {
    3000
}

fn default_mdns_timeout_ms() -> u64 {
    10_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Path to the last scan result
    #[serde(default = "default_cache_path")]
    pub path: PathBuf,
    /// A cached scan younger than this is reused instead of rescanning
    #[serde(default = "default_max_age_secs")]
    pub max_age_secs: u64,
    /// Inactive devices unseen for longer than this are dropped (0 keeps them)
    #[serde(default = "default_inactive_retention_secs")]
    pub inactive_retention_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: default_cache_path(),
            max_age_secs: default_max_age_secs(),
            inactive_retention_secs: default_inactive_retention_secs(),
        }
    }
}

impl CacheConfig {
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }

    pub fn inactive_retention(&self) -> Option<Duration> {
        (self.inactive_retention_secs > 0).then(|| Duration::from_secs(self.inactive_retention_secs))
    }
}

fn default_cache_path() -> PathBuf {
    PathBuf::from("data/last_network_scan.json")
}

fn default_max_age_secs() -> u64 {
    300
}

fn default_inactive_retention_secs() -> u64 {
    7 * 24 * 60 * 60
}

impl Config {
    /// Convert to ScannerConfig
    pub fn to_scanner_config(&self) -> ScannerConfig {
        ScannerConfig {
            prefix: self.discovery.prefix.clone(),
            interface: self.discovery.interface.clone(),
            use_upnp: self.discovery.use_upnp,
            use_mdns: self.discovery.use_mdns,
            use_ping: self.discovery.use_ping,
            max_concurrent_probes: self.discovery.max_concurrent_probes,
            ssdp_listen_ms: self.discovery.ssdp_listen_ms,
            http_timeout_ms: self.discovery.http_timeout_ms,
            mdns_timeout_ms: self.discovery.mdns_timeout_ms,
            ..ScannerConfig::default()
        }
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<Config> {
    if path.exists() {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    } else {
        info!(
            path = %path.display(),
            "Configuration file not found, using defaults"
        );
        Ok(Config::default())
    }
}

/// Save default configuration to file
pub fn save_default_config(path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(&Config::default())?;
    std::fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let config = load_config(&dir.path().join("absent.toml")).unwrap();
        assert!(config.discovery.use_upnp);
        assert!(!config.discovery.use_mdns);
        assert_eq!(config.cache.path, PathBuf::from("data/last_network_scan.json"));
        assert_eq!(config.daemon.watch_interval_secs, 0);
    }

    #[test]
    fn test_partial_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("netsweep.toml");
        std::fs::write(
            &path,
            r#"
[discovery]
prefix = "10.0.0.0/24"
use_mdns = true

[cache]
max_age_secs = 60
"#,
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.discovery.prefix.as_deref(), Some("10.0.0.0/24"));
        assert!(config.discovery.use_mdns);
        assert!(config.discovery.use_ping);
        assert_eq!(config.discovery.max_concurrent_probes, 10);
        assert_eq!(config.cache.max_age(), Duration::from_secs(60));
        assert_eq!(config.cache.inactive_retention(), Some(Duration::from_secs(604_800)));
    }

    #[test]
    fn test_zero_retention_keeps_inactive_devices() {
        let config: Config = toml::from_str("[cache]\ninactive_retention_secs = 0\n").unwrap();
        assert_eq!(config.cache.inactive_retention(), None);
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("netsweep.toml");
        std::fs::write(&path, "[discovery\nuse_upnp = ").unwrap();
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn test_to_scanner_config() {
        let mut config = Config::default();
        config.discovery.use_upnp = false;
        config.discovery.max_concurrent_probes = 4;
        config.discovery.interface = Some("eth0".to_string());

        let scanner = config.to_scanner_config();
        assert!(!scanner.use_upnp);
        assert!(scanner.use_ping);
        assert_eq!(scanner.max_concurrent_probes, 4);
        assert_eq!(scanner.interface.as_deref(), Some("eth0"));
        assert_eq!(scanner.ssdp_mx, 3);
    }

    #[test]
    fn test_default_config_round_trips_through_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("netsweep.toml");
        save_default_config(&path).unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.cache.max_age_secs, 300);
        assert_eq!(config.discovery.ssdp_listen_ms, 5000);
    }
}
