use std::net::Ipv4Addr;
use pnet::datalink::NetworkInterface;
use pnet::ipnetwork::Ipv4Network;
use pnet::util::MacAddr;
use thiserror::Error;

/// The validated slice of network a single interface's tasks operate on.
///
/// Built once per interface before any task starts; immutable afterwards.
#[derive(Debug, Clone)]
pub struct NetworkScope {
    pub interface: NetworkInterface,
    pub network: Ipv4Network,
    mac: MacAddr,
}

#[derive(Debug, Error)]
pub enum ScopeError {
    #[error("interface has no IPv4 network")]
    NoIpv4Network,
    #[error("interface has no hardware address")]
    NoHardwareAddr,
    #[error("network {0} is in the loopback range")]
    Loopback(Ipv4Network),
    #[error("network {0} is too large to sweep (prefix length {1} < 16)")]
    TooLarge(Ipv4Network, u8),
}

impl NetworkScope {
    pub fn new(interface: NetworkInterface, network: Ipv4Network) -> Result<Self, ScopeError> {
        validate(&network)?;
        let mac = interface.mac.ok_or(ScopeError::NoHardwareAddr)?;
        Ok(Self { interface, network, mac })
    }

    pub fn iface_name(&self) -> &str {
        &self.interface.name
    }

    /// The interface's own address, used as the probe source.
    pub fn source_addr(&self) -> Ipv4Addr {
        self.network.ip()
    }

    pub fn mac(&self) -> MacAddr {
        self.mac
    }

    /// Every probe target in the scope, ascending.
    pub fn hosts(&self) -> impl Iterator<Item = Ipv4Addr> + '_ {
        enumerate_hosts(&self.network)
    }
}

fn validate(network: &Ipv4Network) -> Result<(), ScopeError> {
    if network.ip().is_loopback() {
        return Err(ScopeError::Loopback(*network));
    }
    if network.prefix() < 16 {
        return Err(ScopeError::TooLarge(*network, network.prefix()));
    }
    Ok(())
}

/// Enumerates every address strictly between the network and broadcast
/// addresses, in ascending order. Neither boundary address is ever probed.
pub fn enumerate_hosts(network: &Ipv4Network) -> impl Iterator<Item = Ipv4Addr> {
    let network_addr = u32::from(network.network());
    let broadcast = u32::from(network.broadcast());
    (network_addr.saturating_add(1)..broadcast).map(Ipv4Addr::from)
}



// ╔════════════════════════════════════════════╗
// ║ ████████╗███████╗███████╗████████╗███████╗ ║
// ║ ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝ ║
// ║    ██║   █████╗  ███████╗   ██║   ███████╗ ║
// ║    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║ ║
// ║    ██║   ███████╗███████║   ██║   ███████║ ║
// ║    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝ ║
// ╚════════════════════════════════════════════╝

#[cfg(test)]
mod tests {
    use super::*;

    fn network(addr: Ipv4Addr, prefix: u8) -> Ipv4Network {
        Ipv4Network::new(addr, prefix).unwrap()
    }

    #[test]
    fn enumerate_24_yields_254_hosts_in_order() {
        let net = network(Ipv4Addr::new(192, 168, 1, 42), 24);
        let hosts: Vec<Ipv4Addr> = enumerate_hosts(&net).collect();
        assert_eq!(hosts.len(), 254);
        assert_eq!(hosts[0], Ipv4Addr::new(192, 168, 1, 1));
        assert_eq!(hosts[253], Ipv4Addr::new(192, 168, 1, 254));
        assert!(hosts.windows(2).all(|w| u32::from(w[0]) < u32::from(w[1])));
    }

    #[test]
    fn enumerate_excludes_network_and_broadcast() {
        let net = network(Ipv4Addr::new(10, 0, 0, 0), 30);
        let hosts: Vec<Ipv4Addr> = enumerate_hosts(&net).collect();
        assert_eq!(hosts, vec![Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2)]);
    }

    #[test]
    fn enumerate_16_yields_two_to_the_sixteen_minus_two() {
        let net = network(Ipv4Addr::new(10, 1, 0, 0), 16);
        assert_eq!(enumerate_hosts(&net).count(), 65_534);
    }

    #[test]
    fn enumerate_31_and_32_yield_nothing() {
        assert_eq!(enumerate_hosts(&network(Ipv4Addr::new(10, 0, 0, 0), 31)).count(), 0);
        assert_eq!(enumerate_hosts(&network(Ipv4Addr::new(10, 0, 0, 1), 32)).count(), 0);
    }

    #[test]
    fn validate_rejects_loopback() {
        let result = validate(&network(Ipv4Addr::new(127, 0, 0, 1), 24));
        assert!(matches!(result, Err(ScopeError::Loopback(_))));
    }

    #[test]
    fn validate_rejects_networks_wider_than_16() {
        let result = validate(&network(Ipv4Addr::new(10, 0, 0, 1), 8));
        assert!(matches!(result, Err(ScopeError::TooLarge(_, 8))));
    }

    #[test]
    fn validate_accepts_private_24() {
        assert!(validate(&network(Ipv4Addr::new(192, 168, 1, 10), 24)).is_ok());
    }
}
