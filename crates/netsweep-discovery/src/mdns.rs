//! Best-effort multicast-DNS discovery through an OS browsing tool

use async_trait::async_trait;
use netsweep_core::{DeviceObservation, DeviceType, DiscoverySource};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::arp::get_mac_from_ip;
use crate::command::CommandRunner;
use crate::context::DiscoveryContext;
use crate::error::Result;

static IPV4_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3})").unwrap());

static NAME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"name\[([^\]]+)\]").unwrap());

/// `dns-sd -B` result row: domain, service type, instance name
static DNS_SD_BROWSE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\S+\s+Add\s+\d+\s+\d+\s+(\S+)\s+(\S+)\s+(.+?)\s*$").unwrap()
});

/// `dns-sd -L` answer: target host of a service instance
static DNS_SD_HOST_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"can be reached at (\S+):\d+").unwrap());

/// Longest a single `dns-sd` step may run; the tool never exits by itself
const DNS_SD_STEP_WINDOW: Duration = Duration::from_millis(1500);

/// An OS tool that can browse mDNS services
#[async_trait]
pub trait MdnsBrowser: Send + Sync {
    /// Tool name, for logging
    fn name(&self) -> &'static str;

    /// Whether the tool is installed
    fn is_available(&self) -> bool;

    /// Run one browse and return its raw output
    async fn browse(&self) -> Result<String>;
}

/// `avahi-browse -alrpt` (Linux)
pub struct AvahiBrowser {
    runner: Arc<dyn CommandRunner>,
    timeout: Duration,
}

impl AvahiBrowser {
    pub fn new(runner: Arc<dyn CommandRunner>, timeout: Duration) -> Self {
        Self { runner, timeout }
    }
}

#[async_trait]
impl MdnsBrowser for AvahiBrowser {
    fn name(&self) -> &'static str {
        "avahi-browse"
    }

    fn is_available(&self) -> bool {
        self.runner.is_available("avahi-browse")
    }

    async fn browse(&self) -> Result<String> {
        // -t exits once the cache is dumped. Exit status is ignored: output
        // printed before a failure or the deadline is still usable.
        Ok(self
            .runner
            .capture("avahi-browse", &["-alrpt"], self.timeout)
            .await?
            .stdout)
    }
}

/// `dns-sd` browse and resolve (macOS, Bonjour for Windows)
pub struct DnsSdBrowser {
    runner: Arc<dyn CommandRunner>,
    timeout: Duration,
}

impl DnsSdBrowser {
    pub fn new(runner: Arc<dyn CommandRunner>, timeout: Duration) -> Self {
        Self { runner, timeout }
    }
}

#[async_trait]
impl MdnsBrowser for DnsSdBrowser {
    fn name(&self) -> &'static str {
        "dns-sd"
    }

    fn is_available(&self) -> bool {
        self.runner.is_available("dns-sd")
    }

    /// Walks service types, then instances, then target hosts, then their
    /// IPv4 addresses. Each resolved instance becomes one
    /// `name[<instance>] <type> <ip>` line.
    async fn browse(&self) -> Result<String> {
        let deadline = Instant::now() + self.timeout;

        let meta = self
            .step(&["-B", "_services._dns-sd._udp", "local."], deadline)
            .await?;
        let service_types = parse_dns_sd_service_types(&meta);
        debug!(types = service_types.len(), "dns-sd service types");

        let mut lines = Vec::new();
        for service_type in service_types {
            if Instant::now() >= deadline {
                warn!("dns-sd browse ran out of time, returning partial results");
                break;
            }

            let browse = self.step(&["-B", &service_type, "local."], deadline).await?;
            for instance in parse_dns_sd_instances(&browse) {
                let lookup = self
                    .step(&["-L", &instance, &service_type, "local."], deadline)
                    .await?;
                let Some(host) = parse_dns_sd_host(&lookup) else {
                    trace!(instance = %instance, "No target host for instance");
                    continue;
                };

                let addresses = self.step(&["-G", "v4", &host], deadline).await?;
                if let Some(ip) = addresses
                    .lines()
                    .filter(|line| line.contains(" Add "))
                    .find_map(|line| IPV4_RE.captures(line))
                {
                    lines.push(format!("name[{}] {} {}", instance, service_type, &ip[1]));
                }
            }
        }

        Ok(lines.join("\n"))
    }
}

impl DnsSdBrowser {
    async fn step(&self, args: &[&str], deadline: Instant) -> Result<String> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Ok(String::new());
        }
        let window = remaining.min(DNS_SD_STEP_WINDOW);
        Ok(self.runner.capture("dns-sd", args, window).await?.stdout)
    }
}

/// Service types (`_airplay._tcp`) from a `dns-sd -B _services._dns-sd._udp`
/// listing, where the protocol sits in the type column and the service in
/// the instance column
fn parse_dns_sd_service_types(output: &str) -> Vec<String> {
    let mut types: Vec<String> = Vec::new();
    for caps in output.lines().filter_map(|line| DNS_SD_BROWSE_RE.captures(line)) {
        let Some(protocol) = caps[2].split('.').next().filter(|p| p.starts_with('_')) else {
            continue;
        };
        let service_type = format!("{}.{}", caps[3].trim(), protocol);
        if !types.contains(&service_type) {
            types.push(service_type);
        }
    }
    types
}

/// Instance names from a `dns-sd -B <type>` listing
fn parse_dns_sd_instances(output: &str) -> Vec<String> {
    let mut instances: Vec<String> = Vec::new();
    for caps in output.lines().filter_map(|line| DNS_SD_BROWSE_RE.captures(line)) {
        let instance = caps[3].to_string();
        if !instances.contains(&instance) {
            instances.push(instance);
        }
    }
    instances
}

/// Target host from a `dns-sd -L` answer
fn parse_dns_sd_host(output: &str) -> Option<String> {
    DNS_SD_HOST_RE
        .captures(output)
        .map(|caps| caps[1].to_string())
}

/// Browsers in order of preference
pub fn default_browsers(runner: Arc<dyn CommandRunner>, timeout: Duration) -> Vec<Arc<dyn MdnsBrowser>> {
    vec![
        Arc::new(AvahiBrowser::new(runner.clone(), timeout)),
        Arc::new(DnsSdBrowser::new(runner, timeout)),
    ]
}

/// Classify a service record line
pub fn classify_service(line: &str) -> DeviceType {
    let line = line.to_lowercase();
    if line.contains("_airplay") || line.contains("_raop") {
        DeviceType::Media
    } else if line.contains("_printer") {
        DeviceType::Printer
    } else if line.contains("_ssh") || line.contains("_workstation") {
        DeviceType::Computer
    } else if line.contains("_googlecast") {
        DeviceType::Media
    } else {
        DeviceType::Unknown
    }
}

/// Undo avahi's label escaping: `\DDD` is one decimal byte of the UTF-8
/// name, any other `\X` is a literal `X`
fn decode_avahi_escapes(name: &str) -> String {
    let raw = name.as_bytes();
    let mut bytes = Vec::with_capacity(raw.len());
    let mut i = 0;

    while i < raw.len() {
        if raw[i] != b'\\' || i + 1 == raw.len() {
            bytes.push(raw[i]);
            i += 1;
            continue;
        }

        let digits = raw.get(i + 1..i + 4).filter(|d| d.iter().all(u8::is_ascii_digit));
        let byte = digits
            .and_then(|d| std::str::from_utf8(d).ok())
            .and_then(|d| d.parse::<u8>().ok());
        match byte {
            Some(byte) => {
                bytes.push(byte);
                i += 4;
            }
            None => {
                bytes.push(raw[i + 1]);
                i += 2;
            }
        }
    }

    String::from_utf8_lossy(&bytes).into_owned()
}

/// Service name from a browse line: `name[...]` when present, otherwise the
/// service-name field of an avahi resolved (`=;`) record
fn service_name(line: &str) -> Option<String> {
    if let Some(caps) = NAME_RE.captures(line) {
        return Some(caps[1].to_string());
    }
    if line.starts_with("=;") {
        let name = line.split(';').nth(3)?;
        if !name.is_empty() {
            return Some(decode_avahi_escapes(name));
        }
    }
    None
}

/// A service announcement found in browse output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MdnsRecord {
    pub ip: Ipv4Addr,
    pub name: String,
    pub device_type: DeviceType,
}

/// Parse one line of browse output. Lines without an IPv4 address yield
/// nothing.
pub fn parse_browse_line(line: &str) -> Option<MdnsRecord> {
    let ip = IPV4_RE.captures(line)?[1].parse::<Ipv4Addr>().ok()?;
    let name = service_name(line).unwrap_or_else(|| format!("mDNS Device ({})", ip));
    Some(MdnsRecord {
        ip,
        name,
        device_type: classify_service(line),
    })
}

/// Discover devices announcing mDNS services. Never fails: a missing tool
/// or a failed browse yields an empty list.
pub async fn discover_devices_mdns(ctx: &DiscoveryContext) -> Vec<DeviceObservation> {
    info!("Starting mDNS discovery");

    let Some(browser) = ctx.mdns.iter().find(|b| b.is_available()) else {
        warn!("No mDNS browsing tool available (avahi-browse or dns-sd)");
        return Vec::new();
    };
    debug!(tool = browser.name(), "Browsing mDNS services");

    let output = match browser.browse().await {
        Ok(output) => output,
        Err(e) => {
            warn!(tool = browser.name(), error = %e, "mDNS browse failed");
            return Vec::new();
        }
    };

    let mut macs: HashMap<Ipv4Addr, Option<String>> = HashMap::new();
    let mut devices = Vec::new();

    for record in output.lines().filter_map(parse_browse_line) {
        let mac = match macs.get(&record.ip) {
            Some(mac) => mac.clone(),
            None => {
                let mac = get_mac_from_ip(ctx.neighbors.as_ref(), record.ip).await;
                macs.insert(record.ip, mac.clone());
                mac
            }
        };

        let Some(mac) = mac else {
            debug!(ip = %record.ip, "Skipping mDNS record without MAC");
            continue;
        };

        info!(name = %record.name, ip = %record.ip, "Found device via mDNS");
        devices.push(
            DeviceObservation::new(record.ip, Some(mac), DiscoverySource::Mdns)
                .with_name(record.name)
                .with_device_type(record.device_type),
        );
    }

    info!("mDNS discovery found {} devices", devices.len());
    devices
}
