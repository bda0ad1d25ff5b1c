//! Scan result cache
//!
//! The calling layer keeps the most recent inventory in a JSON side file.
//! The file's modification time doubles as "time since last scan", so a
//! fresh cache can be served while a new scan is pending.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tracing::{debug, warn};

use crate::device::MergedDevice;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// JSON file holding the last merged device list
#[derive(Debug, Clone)]
pub struct ScanCache {
    path: PathBuf,
}

impl ScanCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the device list, creating parent directories as needed
    pub fn save(&self, devices: &[MergedDevice]) -> Result<(), CacheError> {
        let content = serde_json::to_string_pretty(devices)?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(&self.path, content)?;
        debug!(path = %self.path.display(), devices = devices.len(), "Saved scan cache");
        Ok(())
    }

    /// Read the cached device list. A missing file is an empty inventory.
    pub fn load(&self) -> Result<Vec<MergedDevice>, CacheError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(&self.path)?;
        let devices: Vec<MergedDevice> = serde_json::from_str(&content)?;
        Ok(devices)
    }

    /// Like [`load`](Self::load), but a corrupt file is logged and treated
    /// as empty
    pub fn load_or_empty(&self) -> Vec<MergedDevice> {
        match self.load() {
            Ok(devices) => devices,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Ignoring unreadable scan cache");
                Vec::new()
            }
        }
    }

    /// Time since the cache file was last written, `None` if it doesn't exist
    pub fn age(&self) -> Option<Duration> {
        let modified = std::fs::metadata(&self.path).ok()?.modified().ok()?;
        Some(
            SystemTime::now()
                .duration_since(modified)
                .unwrap_or(Duration::ZERO),
        )
    }

    /// Whether the cache exists and is younger than `max_age`
    pub fn is_fresh(&self, max_age: Duration) -> bool {
        self.age().map_or(false, |age| age <= max_age)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceObservation, DiscoverySource};
    use std::net::Ipv4Addr;
    use tempfile::TempDir;

    fn sample() -> Vec<MergedDevice> {
        let obs = DeviceObservation::new(
            Ipv4Addr::new(192, 168, 1, 10),
            Some("AA:BB:CC:DD:EE:FF".to_string()),
            DiscoverySource::Arp,
        )
        .with_name("Printer");
        vec![MergedDevice::from_observation(obs).unwrap()]
    }

    #[test]
    fn test_missing_cache_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let cache = ScanCache::new(temp_dir.path().join("last_scan.json"));
        assert!(cache.load().unwrap().is_empty());
        assert!(cache.age().is_none());
        assert!(!cache.is_fresh(Duration::from_secs(3600)));
    }

    #[test]
    fn test_save_then_load() {
        let temp_dir = TempDir::new().unwrap();
        let cache = ScanCache::new(temp_dir.path().join("data").join("last_scan.json"));
        let devices = sample();
        cache.save(&devices).unwrap();

        let loaded = cache.load().unwrap();
        assert_eq!(loaded, devices);
        assert!(cache.is_fresh(Duration::from_secs(60)));
    }

    #[test]
    fn test_corrupt_cache() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("last_scan.json");
        std::fs::write(&path, "not json").unwrap();
        let cache = ScanCache::new(path);
        assert!(matches!(cache.load(), Err(CacheError::JsonError(_))));
        assert!(cache.load_or_empty().is_empty());
    }
}
