//! Netsweep - Main entry point
//!
//! Scans the local network, reconciles the result with the previous scan and
//! prints the device inventory. With `--watch` it keeps rescanning.

mod config;
mod inventory;
mod state;

use anyhow::Result;
use clap::Parser;
use chrono::Local;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use crate::inventory::Inventory;

#[derive(Parser, Debug)]
#[command(name = "netsweep")]
#[command(about = "Local network device discovery")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "netsweep.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// CIDR prefix to sweep instead of the inferred /24
    #[arg(short, long)]
    prefix: Option<String>,

    /// Interface whose address anchors the inferred prefix
    #[arg(short, long)]
    interface: Option<String>,

    /// Skip UPnP/SSDP discovery
    #[arg(long)]
    no_upnp: bool,

    /// Enable mDNS discovery (needs avahi-browse or dns-sd)
    #[arg(long)]
    mdns: bool,

    /// Skip the ping sweep
    #[arg(long)]
    no_ping: bool,

    /// Scan even if the cached result is fresh
    #[arg(short, long)]
    force: bool,

    /// Rescan every N seconds until interrupted
    #[arg(short, long, value_name = "SECS")]
    watch: Option<u64>,

    /// Print the inventory as JSON
    #[arg(long)]
    json: bool,

    /// Write a default configuration file and exit
    #[arg(long)]
    init_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Netsweep v{}", env!("CARGO_PKG_VERSION"));

    if args.init_config {
        config::save_default_config(&args.config)?;
        info!(path = %args.config.display(), "Wrote default configuration");
        return Ok(());
    }

    // Load configuration
    let mut config = config::load_config(&args.config)?;

    if let Some(prefix) = args.prefix {
        config.discovery.prefix = Some(prefix);
    }
    if let Some(interface) = args.interface {
        config.discovery.interface = Some(interface);
    }
    if args.no_upnp {
        config.discovery.use_upnp = false;
    }
    if args.mdns {
        config.discovery.use_mdns = true;
    }
    if args.no_ping {
        config.discovery.use_ping = false;
    }
    if let Some(secs) = args.watch {
        config.daemon.watch_interval_secs = secs;
    }

    info!(
        prefix = config.discovery.prefix.as_deref().unwrap_or("auto"),
        upnp = config.discovery.use_upnp,
        mdns = config.discovery.use_mdns,
        ping = config.discovery.use_ping,
        "Configuration loaded"
    );

    let watch_interval = config.daemon.watch_interval_secs;
    let state = state::AppState::new(config)?;

    let inventory = state.inventory(args.force).await?;
    print_inventory(&inventory, args.json)?;

    if watch_interval == 0 {
        return Ok(());
    }

    info!(interval_secs = watch_interval, "Watching for changes");
    let mut ticker = tokio::time::interval(Duration::from_secs(watch_interval));
    // The first tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match state.refresh().await {
                    Ok(inventory) => print_inventory(&inventory, args.json)?,
                    Err(e) => warn!(error = %e, "Scan failed"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, stopping");
                break;
            }
        }
    }

    Ok(())
}

fn print_inventory(inventory: &Inventory, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(inventory.devices())?);
        return Ok(());
    }

    println!(
        "[{}] {} devices ({} active):",
        Local::now().format("%Y-%m-%d %H:%M:%S"),
        inventory.len(),
        inventory.active_count()
    );
    if inventory.is_empty() {
        println!("  (no devices found)");
    }
    for device in inventory.devices() {
        println!(
            "  - {} ({}) at {} [{}] {}",
            device.display_name(),
            device.mac_address,
            device.ip_address,
            device.device_type,
            device.status.as_str()
        );
        if let Some(manufacturer) = &device.manufacturer {
            println!("    Manufacturer: {}", manufacturer);
        }
        if let Some(model) = &device.model {
            println!("    Model: {}", model);
        }
        let sources: Vec<&str> = device.sources.iter().map(|s| s.as_str()).collect();
        println!("    Seen by: {}", sources.join(", "));
    }
    Ok(())
}
