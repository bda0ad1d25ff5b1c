//! Ping sweep across a subnet with bounded concurrency

use async_trait::async_trait;
use ipnetwork::Ipv4Network;
use netsweep_core::{DeviceObservation, DiscoverySource};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, trace};

use crate::arp::get_mac_from_ip;
use crate::command::{CommandRunner, Platform};
use crate::context::DiscoveryContext;

/// Upper bound on addresses pinged in one sweep, whatever the prefix size
pub const MAX_SWEEP_HOSTS: usize = 254;

/// Hard limit on a single ping subprocess
pub const PING_PROCESS_TIMEOUT: Duration = Duration::from_secs(2);

/// Single ICMP echo capability
#[async_trait]
pub trait Pinger: Send + Sync {
    /// Whether `ip` answered one echo request
    async fn ping(&self, ip: Ipv4Addr) -> bool;
}

/// Pings through the platform `ping` utility
pub struct CommandPinger {
    runner: Arc<dyn CommandRunner>,
    platform: Platform,
}

impl CommandPinger {
    pub fn new(runner: Arc<dyn CommandRunner>, platform: Platform) -> Self {
        Self { runner, platform }
    }

    fn args(&self, ip: &str) -> Vec<String> {
        let args: &[&str] = match self.platform {
            Platform::Windows => &["-n", "1", "-w", "500"],
            Platform::Unix => &["-c", "1", "-W", "1"],
        };
        args.iter()
            .map(|s| s.to_string())
            .chain(std::iter::once(ip.to_string()))
            .collect()
    }
}

#[async_trait]
impl Pinger for CommandPinger {
    async fn ping(&self, ip: Ipv4Addr) -> bool {
        let args = self.args(&ip.to_string());
        let args: Vec<&str> = args.iter().map(String::as_str).collect();

        match self.runner.run("ping", &args, PING_PROCESS_TIMEOUT).await {
            Ok(output) => output.success,
            Err(e) => {
                debug!(ip = %ip, error = %e, "Ping failed");
                false
            }
        }
    }
}

/// Host addresses of `prefix`, at most `max_hosts` of them.
///
/// Network and broadcast addresses are skipped for prefixes up to /30; a /31
/// yields both addresses and a /32 its single address.
pub fn sweep_targets(prefix: Ipv4Network, max_hosts: usize) -> Vec<Ipv4Addr> {
    let network = prefix.network();
    let broadcast = prefix.broadcast();
    let skip_edges = prefix.prefix() < 31;

    prefix
        .iter()
        .filter(|ip| !skip_edges || (*ip != network && *ip != broadcast))
        .take(max_hosts)
        .collect()
}

/// Ping every host in `prefix` (the inferred local subnet when `None`) and
/// record the ones that answer and have a resolvable hardware address.
///
/// At most `max_concurrent_probes` pings are in flight at once. A failure on
/// one host never aborts the sweep.
pub async fn discover_devices_ping_sweep(
    ctx: &DiscoveryContext,
    prefix: Option<Ipv4Network>,
) -> Vec<DeviceObservation> {
    let prefix = match prefix {
        Some(prefix) => prefix,
        None => ctx.resolve_prefix().await,
    };
    let targets = sweep_targets(prefix, MAX_SWEEP_HOSTS);
    let limit = ctx.config.max_concurrent_probes.max(1);

    info!(
        prefix = %prefix,
        hosts = targets.len(),
        concurrency = limit,
        "Starting ping sweep"
    );

    let results: Arc<Mutex<Vec<DeviceObservation>>> = Arc::new(Mutex::new(Vec::new()));
    let semaphore = Arc::new(Semaphore::new(limit));
    let mut tasks = JoinSet::new();

    for ip in targets {
        let permit = match semaphore.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(e) => {
                error!(error = %e, "Ping pool unavailable, returning partial results");
                break;
            }
        };

        let pinger = ctx.pinger.clone();
        let neighbors = ctx.neighbors.clone();
        let results = results.clone();

        tasks.spawn(async move {
            let _permit = permit;

            if !pinger.ping(ip).await {
                trace!(ip = %ip, "No echo reply");
                return;
            }

            match get_mac_from_ip(neighbors.as_ref(), ip).await {
                Some(mac) => {
                    info!(ip = %ip, mac = %mac, "Found device via ping");
                    let observation = DeviceObservation::new(ip, Some(mac), DiscoverySource::Ping);
                    results.lock().await.push(observation);
                }
                None => debug!(ip = %ip, "Host replied but has no resolvable MAC"),
            }
        });
    }

    while let Some(result) = tasks.join_next().await {
        if let Err(e) = result {
            error!(error = %e, "Ping worker failed");
        }
    }

    let devices = std::mem::take(&mut *results.lock().await);
    info!("Ping sweep found {} devices", devices.len());
    devices
}
