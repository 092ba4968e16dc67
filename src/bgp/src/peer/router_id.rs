use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddrV4, SocketAddrV6};

/// Picks the BGP identifier for a session.
///
/// The configured value wins. Otherwise the local IPv4 address of the
/// connection is used, or for IPv6 connections an IPv4 address on the same
/// interface. As a last resort the identifier is derived from the node name
/// so that it stays stable across restarts.
pub(crate) fn resolve(configured: Option<Ipv4Addr>, local: IpAddr, node_name: &str) -> Ipv4Addr {
    if let Some(id) = configured {
        return id;
    }
    match local {
        IpAddr::V4(addr) => addr,
        IpAddr::V6(addr) => {
            ipv4_on_same_interface(&addr).unwrap_or_else(|| hash_router_id(node_name))
        }
    }
}

pub(crate) fn hash_router_id(node_name: &str) -> Ipv4Addr {
    let sum = crc32fast::hash(node_name.as_bytes());
    Ipv4Addr::from(sum.to_le_bytes())
}

fn ipv4_on_same_interface(addr: &Ipv6Addr) -> Option<Ipv4Addr> {
    let ifaddrs: Vec<_> = match nix::ifaddrs::getifaddrs() {
        Ok(ifaddrs) => ifaddrs.collect(),
        Err(e) => {
            tracing::warn!(error=%e, "failed to list interface addresses");
            return None;
        }
    };
    let interface = ifaddrs.iter().find_map(|ifaddr| {
        let sin6 = ifaddr.address.as_ref()?.as_sockaddr_in6()?;
        (SocketAddrV6::from(*sin6).ip() == addr).then(|| ifaddr.interface_name.clone())
    })?;
    ifaddrs
        .iter()
        .filter(|ifaddr| ifaddr.interface_name == interface)
        .find_map(|ifaddr| {
            let sin = ifaddr.address.as_ref()?.as_sockaddr_in()?;
            Some(*SocketAddrV4::from(*sin).ip())
        })
}
