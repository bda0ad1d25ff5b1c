//! Netsweep Discovery - Local network device discovery
//!
//! This crate provides multiple discovery methods:
//! - Neighbor (ARP) table scraping for hosts the OS already knows
//! - ICMP ping sweep of the local subnet
//! - UPnP/SSDP search with device description fetching
//! - mDNS service browsing through avahi-browse or dns-sd
//!
//! Every method returns observations and never fails; the scanner merges
//! them into one record per hardware address.

pub mod arp;
pub mod command;
pub mod context;
pub mod error;
pub mod host;
pub mod mdns;
pub mod ping;
pub mod scanner;
pub mod ssdp;

pub use context::DiscoveryContext;
pub use error::{DiscoveryError, Result};
pub use host::{get_local_ip, get_network_prefix};
pub use scanner::{DiscoveryEvent, DiscoveryScanner, ScanOptions, ScannerConfig};
