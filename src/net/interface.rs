use anyhow::{Context, bail, ensure};
use pnet::datalink::{self, NetworkInterface};
use pnet::ipnetwork::{IpNetwork, Ipv4Network};
use tracing::info;

use crate::net::scope::{NetworkScope, ScopeError};

/// Resolves the requested interface names into validated scopes.
///
/// Every requested name must exist, carry a hardware address and have a
/// usable IPv4 network; anything else is an unrecoverable configuration
/// problem and aborts startup.
pub fn find(names: &[String]) -> anyhow::Result<Vec<NetworkScope>> {
    ensure!(!names.is_empty(), "at least one interface is required");

    let mut wanted: Vec<&str> = names.iter().map(String::as_str).collect();
    let mut selected: Vec<NetworkInterface> = Vec::new();

    info!("discovering interfaces, * = selected");
    for interface in datalink::interfaces() {
        if let Some(pos) = wanted.iter().position(|name| *name == interface.name) {
            wanted.remove(pos);
            info!("* {}", interface.name);
            selected.push(interface);
        } else {
            info!("  {}", interface.name);
        }
    }

    if !wanted.is_empty() {
        bail!("interfaces not found: {}", wanted.join(", "));
    }

    selected.into_iter().map(into_scope).collect()
}

fn into_scope(interface: NetworkInterface) -> anyhow::Result<NetworkScope> {
    let name = interface.name.clone();
    let network = first_ipv4_network(&interface)
        .ok_or(ScopeError::NoIpv4Network)
        .with_context(|| format!("interface {name}"))?;
    let scope = NetworkScope::new(interface, network)
        .with_context(|| format!("interface {name}"))?;
    info!("using network range {} for interface {}", scope.network, name);
    Ok(scope)
}

// An interface can have several IPv4 networks; only the first one is used.
fn first_ipv4_network(interface: &NetworkInterface) -> Option<Ipv4Network> {
    interface.ips.iter().find_map(|ip| match ip {
        IpNetwork::V4(net) => Some(*net),
        _ => None,
    })
}



// ╔════════════════════════════════════════════╗
// ║ ████████╗███████╗███████╗████████╗███████╗ ║
// ║ ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝ ║
// ║    ██║   █████╗  ███████╗   ██║   ███████╗ ║
// ║    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║ ║
// ║    ██║   ███████╗███████║   ██║   ███████║ ║
// ║    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝ ║
// ╚════════════════════════════════════════════╝
