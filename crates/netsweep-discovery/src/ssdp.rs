//! UPnP device discovery over SSDP
//!
//! A single M-SEARCH goes to the SSDP multicast group. Responses are
//! collected for a fixed window, deduplicated by their `LOCATION` header, and
//! each description document is then fetched and classified.

use netsweep_core::{DeviceObservation, DeviceType, DiscoverySource, UpnpInfo};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::collections::HashSet;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};

use crate::arp::get_mac_from_ip;
use crate::context::DiscoveryContext;
use crate::error::{DiscoveryError, Result};

/// SSDP multicast group and port
pub const SSDP_ADDR: SocketAddrV4 = SocketAddrV4::new(Ipv4Addr::new(239, 255, 255, 250), 1900);

/// Name used when a description has no `friendlyName`
pub const DEFAULT_UPNP_NAME: &str = "UPnP Device";

const MULTICAST_TTL: u32 = 2;
const RECV_BUFFER: usize = 2048;

static LOCATION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)LOCATION: (http://.*?)\r\n").unwrap());

/// Build the M-SEARCH request for all service types
pub fn build_msearch(mx: u8) -> String {
    format!(
        "M-SEARCH * HTTP/1.1\r\n\
         HOST: {}\r\n\
         MAN: \"ssdp:discover\"\r\n\
         MX: {}\r\n\
         ST: ssdp:all\r\n\
         \r\n",
        SSDP_ADDR, mx
    )
}

/// Description document URL from an SSDP response
pub fn parse_location(response: &str) -> Option<String> {
    LOCATION_RE
        .captures(response)
        .map(|caps| caps[1].to_string())
}

/// Map a UPnP `deviceType` URN onto the device vocabulary
pub fn classify_upnp_type(urn: &str) -> DeviceType {
    if urn.contains("MediaRenderer") || urn.contains("MediaServer") {
        DeviceType::Media
    } else if urn.contains("InternetGatewayDevice") {
        DeviceType::Router
    } else if urn.contains("Basic") && (urn.contains("Device") || urn.contains("device")) {
        DeviceType::Iot
    } else {
        DeviceType::Unknown
    }
}

/// Stand-in hardware address built from the IP octets, used when the real
/// one can't be resolved. Not a genuine hardware identifier: it changes with
/// the IP, so a readdressed device shows up as a new entry and the old one
/// goes inactive until the inventory's retention window drops it.
pub fn pseudo_mac(ip: Ipv4Addr) -> String {
    let [a, b, c, d] = ip.octets();
    format!("00:00:{:02X}:{:02X}:{:02X}:{:02X}", a, b, c, d)
}

#[derive(Debug, Deserialize)]
struct DescriptionRoot {
    #[serde(default)]
    device: Option<DeviceDescription>,
}

#[derive(Debug, Deserialize)]
struct DeviceDescription {
    #[serde(rename = "friendlyName", default)]
    friendly_name: Option<String>,
    #[serde(rename = "modelName", default)]
    model_name: Option<String>,
    #[serde(default)]
    manufacturer: Option<String>,
    #[serde(rename = "deviceType", default)]
    device_type: Option<String>,
}

/// Fields of interest from a device description document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpnpDescription {
    pub friendly_name: Option<String>,
    pub model_name: Option<String>,
    pub manufacturer: Option<String>,
    pub device_type: Option<String>,
}

/// Parse the root device out of a description document
pub fn parse_description(xml: &str) -> Result<UpnpDescription> {
    let root: DescriptionRoot = quick_xml::de::from_str(xml)?;
    let device = root
        .device
        .ok_or_else(|| DiscoveryError::InvalidDescription("no <device> element".to_string()))?;

    let clean = |s: Option<String>| s.map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
    Ok(UpnpDescription {
        friendly_name: clean(device.friendly_name),
        model_name: clean(device.model_name),
        manufacturer: clean(device.manufacturer),
        device_type: clean(device.device_type),
    })
}

/// Turn a parsed description into an observation
pub fn observation_from_description(
    description: UpnpDescription,
    ip: Ipv4Addr,
    mac: Option<String>,
    location: &str,
) -> DeviceObservation {
    let upnp_type = description
        .device_type
        .unwrap_or_else(|| "upnp:unknown".to_string());
    let mac = mac.unwrap_or_else(|| pseudo_mac(ip));

    let mut observation = DeviceObservation::new(ip, Some(mac), DiscoverySource::Upnp)
        .with_name(
            description
                .friendly_name
                .unwrap_or_else(|| DEFAULT_UPNP_NAME.to_string()),
        )
        .with_device_type(classify_upnp_type(&upnp_type));
    observation.manufacturer = description.manufacturer;
    observation.model = description.model_name;
    observation.upnp = Some(UpnpInfo {
        upnp_type,
        location: location.to_string(),
    });
    observation
}

/// Fetch and classify one announced device
pub async fn describe_device(
    ctx: &DiscoveryContext,
    location: &str,
    ip: Ipv4Addr,
) -> Result<DeviceObservation> {
    debug!(location = %location, "Fetching UPnP description");

    let xml = ctx
        .http
        .get(location)
        .send()
        .await?
        .error_for_status()?
        .text()
        .await?;
    let description = parse_description(&xml)?;
    let mac = get_mac_from_ip(ctx.neighbors.as_ref(), ip).await;
    if mac.is_none() {
        debug!(ip = %ip, "No MAC for UPnP device, using pseudo address");
    }

    Ok(observation_from_description(description, ip, mac, location))
}

/// Receive SSDP responses until `window` elapses, returning each new
/// location with the address that announced it
pub async fn collect_responses(socket: &UdpSocket, window: Duration) -> Vec<(String, Ipv4Addr)> {
    let deadline = Instant::now() + window;
    let mut buf = vec![0u8; RECV_BUFFER];
    let mut seen = HashSet::new();
    let mut found = Vec::new();

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }

        let (len, addr) = match timeout(remaining, socket.recv_from(&mut buf)).await {
            Err(_) => break,
            Ok(Err(e)) => {
                debug!(error = %e, "Error receiving SSDP response");
                continue;
            }
            Ok(Ok(received)) => received,
        };

        let ip = match addr {
            SocketAddr::V4(v4) => *v4.ip(),
            SocketAddr::V6(_) => continue,
        };

        let response = String::from_utf8_lossy(&buf[..len]);
        debug!(from = %addr, "Received SSDP response");

        if let Some(location) = parse_location(&response) {
            if seen.insert(location.clone()) {
                debug!(location = %location, "New UPnP location");
                found.push((location, ip));
            }
        }
    }

    found
}

async fn search(ctx: &DiscoveryContext) -> Result<Vec<(String, Ipv4Addr)>> {
    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    socket.set_multicast_ttl_v4(MULTICAST_TTL)?;

    let request = build_msearch(ctx.config.ssdp_mx);
    socket.send_to(request.as_bytes(), SocketAddr::V4(SSDP_ADDR)).await?;
    debug!("Sent SSDP M-SEARCH");

    Ok(collect_responses(&socket, ctx.config.ssdp_listen()).await)
}

/// Discover UPnP devices. Never fails: errors yield fewer or no devices.
pub async fn discover_devices_upnp(ctx: &DiscoveryContext) -> Vec<DeviceObservation> {
    info!("Starting UPnP discovery");

    let locations = match search(ctx).await {
        Ok(locations) => locations,
        Err(e) => {
            warn!(error = %e, "SSDP search failed");
            return Vec::new();
        }
    };

    let mut devices = Vec::new();
    for (location, ip) in locations {
        match describe_device(ctx, &location, ip).await {
            Ok(device) => {
                info!(
                    name = device.name.as_deref().unwrap_or(DEFAULT_UPNP_NAME),
                    ip = %ip,
                    "Found device via UPnP"
                );
                devices.push(device);
            }
            Err(e) => debug!(location = %location, error = %e, "Skipping UPnP device"),
        }
    }

    info!("UPnP discovery found {} devices", devices.len());
    devices
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arp::fake::FakeNeighborTable;
    use crate::scanner::ScannerConfig;
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    const GATEWAY_XML: &str = r#"<?xml version="1.0"?>
<root xmlns="urn:schemas-upnp-org:device-1-0">
  <specVersion><major>1</major><minor>0</minor></specVersion>
  <device>
    <deviceType>urn:schemas-upnp-org:device:InternetGatewayDevice:1</deviceType>
    <friendlyName>Home Router</friendlyName>
    <manufacturer>Acme Networks</manufacturer>
    <modelName>AR-9000</modelName>
    <deviceList>
      <device>
        <deviceType>urn:schemas-upnp-org:device:WANDevice:1</deviceType>
        <friendlyName>WAN</friendlyName>
      </device>
    </deviceList>
  </device>
</root>"#;

    /// Serve `body` once over HTTP, returning the URL
    async fn serve_once(body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = stream.read(&mut buf).await;
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: text/xml\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            stream.write_all(response.as_bytes()).await.unwrap();
        });
        format!("http://{}/description.xml", addr)
    }

    #[test]
    fn test_build_msearch() {
        let request = build_msearch(3);
        assert!(request.starts_with("M-SEARCH * HTTP/1.1\r\n"));
        assert!(request.contains("HOST: 239.255.255.250:1900\r\n"));
        assert!(request.contains("MAN: \"ssdp:discover\"\r\n"));
        assert!(request.contains("MX: 3\r\n"));
        assert!(request.contains("ST: ssdp:all\r\n"));
        assert!(request.ends_with("\r\n\r\n"));
    }

    #[test]
    fn test_parse_location() {
        let response = "HTTP/1.1 200 OK\r\nCACHE-CONTROL: max-age=1800\r\nLocation: http://192.168.1.1:49152/rootDesc.xml\r\nST: upnp:rootdevice\r\n\r\n";
        assert_eq!(
            parse_location(response).as_deref(),
            Some("http://192.168.1.1:49152/rootDesc.xml")
        );
        assert_eq!(parse_location("HTTP/1.1 200 OK\r\nST: ssdp:all\r\n\r\n"), None);
    }

    #[test]
    fn test_classify_upnp_type() {
        assert_eq!(
            classify_upnp_type("urn:schemas-upnp-org:device:MediaRenderer:1"),
            DeviceType::Media
        );
        assert_eq!(
            classify_upnp_type("urn:schemas-upnp-org:device:MediaServer:1"),
            DeviceType::Media
        );
        assert_eq!(
            classify_upnp_type("urn:schemas-upnp-org:device:InternetGatewayDevice:2"),
            DeviceType::Router
        );
        assert_eq!(
            classify_upnp_type("urn:schemas-upnp-org:device:Basic:1"),
            DeviceType::Iot
        );
        assert_eq!(
            classify_upnp_type("urn:schemas-upnp-org:device:Printer:1"),
            DeviceType::Unknown
        );
        assert_eq!(classify_upnp_type("upnp:unknown"), DeviceType::Unknown);
    }

    #[test]
    fn test_pseudo_mac() {
        assert_eq!(pseudo_mac(Ipv4Addr::new(192, 168, 1, 10)), "00:00:C0:A8:01:0A");
    }

    #[test]
    fn test_parse_description_takes_root_device() {
        let description = parse_description(GATEWAY_XML).unwrap();
        assert_eq!(description.friendly_name.as_deref(), Some("Home Router"));
        assert_eq!(description.manufacturer.as_deref(), Some("Acme Networks"));
        assert_eq!(description.model_name.as_deref(), Some("AR-9000"));
        assert_eq!(
            description.device_type.as_deref(),
            Some("urn:schemas-upnp-org:device:InternetGatewayDevice:1")
        );
    }

    #[test]
    fn test_parse_description_without_device() {
        let xml = r#"<root><specVersion><major>1</major></specVersion></root>"#;
        assert!(matches!(
            parse_description(xml),
            Err(DiscoveryError::InvalidDescription(_))
        ));
        assert!(parse_description("<root><device>").is_err());
    }

    #[test]
    fn test_observation_defaults() {
        let description = UpnpDescription {
            friendly_name: None,
            model_name: None,
            manufacturer: None,
            device_type: None,
        };
        let obs = observation_from_description(
            description,
            Ipv4Addr::new(10, 0, 0, 5),
            None,
            "http://10.0.0.5/desc.xml",
        );
        assert_eq!(obs.name.as_deref(), Some(DEFAULT_UPNP_NAME));
        assert_eq!(obs.mac_address.as_deref(), Some("00:00:0A:00:00:05"));
        assert_eq!(obs.device_type, DeviceType::Unknown);
        assert_eq!(obs.upnp.unwrap().upnp_type, "upnp:unknown");
    }

    #[tokio::test]
    async fn test_describe_gateway_as_router() {
        let url = serve_once(GATEWAY_XML).await;
        let ip = Ipv4Addr::new(127, 0, 0, 1);
        let neighbors = FakeNeighborTable::default().with_mac(ip, "AA:BB:CC:00:11:22");
        let ctx = DiscoveryContext::for_tests(ScannerConfig::default())
            .with_neighbor_table(Arc::new(neighbors));

        let obs = describe_device(&ctx, &url, ip).await.unwrap();
        assert_eq!(obs.device_type, DeviceType::Router);
        assert_eq!(obs.name.as_deref(), Some("Home Router"));
        assert_eq!(obs.mac_address.as_deref(), Some("AA:BB:CC:00:11:22"));
        assert_eq!(obs.source, DiscoverySource::Upnp);
        assert_eq!(obs.upnp.unwrap().location, url);
    }

    #[tokio::test]
    async fn test_describe_unreachable_location() {
        let ctx = DiscoveryContext::for_tests(ScannerConfig::default());
        let result = describe_device(&ctx, "http://127.0.0.1:1/desc.xml", Ipv4Addr::LOCALHOST).await;
        assert!(matches!(result, Err(DiscoveryError::HttpError(_))));
    }

    #[tokio::test]
    async fn test_collect_responses_dedupes_locations() {
        let listener = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let target = listener.local_addr().unwrap();
        let device = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        let a = "HTTP/1.1 200 OK\r\nLOCATION: http://127.0.0.1:5000/a.xml\r\nST: upnp:rootdevice\r\n\r\n";
        let b = "HTTP/1.1 200 OK\r\nLOCATION: http://127.0.0.1:5000/b.xml\r\nST: ssdp:all\r\n\r\n";
        for message in [a, a, b, "garbage"] {
            device.send_to(message.as_bytes(), target).await.unwrap();
        }

        let found = collect_responses(&listener, Duration::from_millis(300)).await;
        assert_eq!(
            found,
            vec![
                ("http://127.0.0.1:5000/a.xml".to_string(), Ipv4Addr::LOCALHOST),
                ("http://127.0.0.1:5000/b.xml".to_string(), Ipv4Addr::LOCALHOST),
            ]
        );
    }
}
