//! Local address and subnet inference
//!
//! The subnet is always assumed to be a /24 around the local address. This
//! is a heuristic, not a netmask lookup: hosts on wider or narrower networks
//! get scanned as if they lived in a /24.

use ipnetwork::Ipv4Network;
use network_interface::{Addr, NetworkInterface, NetworkInterfaceConfig};
use std::net::{IpAddr, Ipv4Addr, ToSocketAddrs, UdpSocket};
use tracing::{debug, error};

use crate::error::{DiscoveryError, Result};

/// Returned by [`get_local_ip`] when no address could be determined.
/// Never a scan target.
pub const UNDETERMINED_IP: Ipv4Addr = Ipv4Addr::LOCALHOST;

/// Network address of the subnet used when the local address is undetermined
pub const FALLBACK_NETWORK: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 0);

/// Prefix length assumed for every inferred subnet
pub const ASSUMED_PREFIX_LEN: u8 = 24;

/// Public address used only to make the routing table pick an interface
const ROUTE_TARGET: &str = "8.8.8.8:80";

/// Determine this machine's outbound IPv4 address
pub fn get_local_ip() -> Ipv4Addr {
    match routed_source_ip() {
        Ok(ip) => return ip,
        Err(e) => error!(error = %e, "Failed to determine local IP from routing table"),
    }

    match hostname_ip() {
        Ok(ip) => ip,
        Err(e) => {
            error!(error = %e, "Hostname lookup for local IP failed as well");
            UNDETERMINED_IP
        }
    }
}

/// Connect (without sending) a UDP socket so the OS selects the outbound
/// interface, then read back its local address
fn routed_source_ip() -> Result<Ipv4Addr> {
    let socket = UdpSocket::bind("0.0.0.0:0")?;
    socket.connect(ROUTE_TARGET)?;
    match socket.local_addr()?.ip() {
        IpAddr::V4(ip) if !ip.is_unspecified() => Ok(ip),
        other => Err(DiscoveryError::IoError(std::io::Error::new(
            std::io::ErrorKind::AddrNotAvailable,
            format!("no usable IPv4 route, got {}", other),
        ))),
    }
}

fn hostname_ip() -> Result<Ipv4Addr> {
    let name = hostname::get()?.to_string_lossy().into_owned();
    (name.as_str(), 0)
        .to_socket_addrs()?
        .find_map(|addr| match addr.ip() {
            IpAddr::V4(ip) => Some(ip),
            IpAddr::V6(_) => None,
        })
        .ok_or_else(|| {
            DiscoveryError::IoError(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("hostname {} has no IPv4 address", name),
            ))
        })
}

/// First IPv4 address of a named interface
pub fn local_ip_for_interface(interface: &str) -> Option<Ipv4Addr> {
    let interfaces = match NetworkInterface::show() {
        Ok(interfaces) => interfaces,
        Err(e) => {
            error!(error = %e, "Failed to list network interfaces");
            return None;
        }
    };

    let ip = interfaces
        .into_iter()
        .filter(|iface| iface.name == interface)
        .flat_map(|iface| iface.addr.into_iter())
        .find_map(|addr| match addr {
            Addr::V4(v4) => Some(v4.ip),
            Addr::V6(_) => None,
        });

    debug!(interface = %interface, ip = ?ip, "Resolved interface address");
    ip
}

/// The /24 containing `ip`, or `192.168.1.0/24` for the undetermined
/// sentinel
pub fn prefix_for_ip(ip: Ipv4Addr) -> Ipv4Network {
    let network = if ip == UNDETERMINED_IP {
        FALLBACK_NETWORK
    } else {
        let [a, b, c, _] = ip.octets();
        Ipv4Addr::new(a, b, c, 0)
    };
    Ipv4Network::new(network, ASSUMED_PREFIX_LEN).expect("/24 is a valid prefix length")
}

/// Inferred local subnet
pub fn get_network_prefix() -> Ipv4Network {
    prefix_for_ip(get_local_ip())
}

/// Parse a CIDR override such as `10.0.0.0/24`
pub fn parse_prefix(prefix: &str) -> Result<Ipv4Network> {
    prefix
        .trim()
        .parse::<Ipv4Network>()
        .map_err(|e| DiscoveryError::InvalidPrefix {
            prefix: prefix.to_string(),
            reason: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_fallback_for_undetermined_ip() {
        assert_eq!(prefix_for_ip(UNDETERMINED_IP).to_string(), "192.168.1.0/24");
    }

    #[test]
    fn test_prefix_truncates_last_octet() {
        let prefix = prefix_for_ip(Ipv4Addr::new(10, 20, 30, 77));
        assert_eq!(prefix.to_string(), "10.20.30.0/24");
        assert_eq!(prefix.prefix(), 24);
    }

    #[test]
    fn test_parse_prefix() {
        assert_eq!(parse_prefix("10.0.0.0/28").unwrap().prefix(), 28);
        assert_eq!(parse_prefix(" 172.16.5.0/24 ").unwrap().network(), Ipv4Addr::new(172, 16, 5, 0));
        assert!(matches!(
            parse_prefix("not-a-cidr"),
            Err(DiscoveryError::InvalidPrefix { .. })
        ));
    }

    #[test]
    fn test_unknown_interface_has_no_ip() {
        assert!(local_ip_for_interface("netsweep-does-not-exist0").is_none());
    }

    #[test]
    fn test_local_ip_never_unspecified() {
        assert!(!get_local_ip().is_unspecified());
    }
}
