use std::collections::{BTreeMap, BTreeSet};
use std::net::SocketAddrV6;
use std::path::Path;

use nix::net::if_::InterfaceFlags;

use crate::error::Error;
use crate::packet::HardwareAddr;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Interface {
    pub name: String,
    pub index: u32,
    pub mac: HardwareAddr,
    pub up: bool,
    pub loopback: bool,
    pub broadcast: bool,
    pub no_arp: bool,
    pub slave: bool,
    pub link_local_v6: bool,
}

impl Interface {
    fn usable(&self, allow: &[String]) -> bool {
        if !allow.is_empty() && !allow.iter().any(|name| *name == self.name) {
            return false;
        }
        self.up && !self.loopback && !self.no_arp && !self.slave && !self.mac.is_zero()
    }

    pub fn wants_arp(&self, allow: &[String]) -> bool {
        self.usable(allow) && self.broadcast
    }

    pub fn wants_ndp(&self, allow: &[String]) -> bool {
        self.usable(allow) && self.link_local_v6
    }
}

/// Interface indices that should carry an ARP and an NDP responder.
pub fn plan(interfaces: &[Interface], allow: &[String]) -> (BTreeSet<u32>, BTreeSet<u32>) {
    let arp = interfaces
        .iter()
        .filter(|i| i.wants_arp(allow))
        .map(|i| i.index)
        .collect();
    let ndp = interfaces
        .iter()
        .filter(|i| i.wants_ndp(allow))
        .map(|i| i.index)
        .collect();
    (arp, ndp)
}

/// Lists the interfaces of this host.
pub fn scan() -> Result<Vec<Interface>, Error> {
    let mut interfaces: BTreeMap<String, Interface> = BTreeMap::new();
    for ifaddr in nix::ifaddrs::getifaddrs()? {
        let entry = interfaces
            .entry(ifaddr.interface_name.clone())
            .or_insert_with(|| Interface {
                name: ifaddr.interface_name.clone(),
                ..Default::default()
            });
        entry.up = ifaddr.flags.contains(InterfaceFlags::IFF_UP);
        entry.loopback = ifaddr.flags.contains(InterfaceFlags::IFF_LOOPBACK);
        entry.broadcast = ifaddr.flags.contains(InterfaceFlags::IFF_BROADCAST);
        entry.no_arp = ifaddr.flags.contains(InterfaceFlags::IFF_NOARP);
        // bridge and bond ports both have a master
        entry.slave = ifaddr.flags.contains(InterfaceFlags::IFF_SLAVE)
            || Path::new("/sys/class/net")
                .join(&ifaddr.interface_name)
                .join("master")
                .exists();

        let addr = match ifaddr.address.as_ref() {
            Some(addr) => addr,
            None => continue,
        };
        if let Some(link) = addr.as_link_addr() {
            entry.index = link.ifindex() as u32;
            if let Some(mac) = link.addr() {
                entry.mac = HardwareAddr(mac);
            }
        } else if let Some(sin6) = addr.as_sockaddr_in6() {
            let ip = *SocketAddrV6::from(*sin6).ip();
            if ip.segments()[0] & 0xffc0 == 0xfe80 {
                entry.link_local_v6 = true;
            }
        }
    }
    Ok(interfaces
        .into_values()
        .filter(|i| i.index != 0)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn eth(name: &str, index: u32) -> Interface {
        Interface {
            name: name.to_string(),
            index,
            mac: HardwareAddr([0x02, 0, 0, 0, 0, index as u8]),
            up: true,
            broadcast: true,
            link_local_v6: true,
            ..Default::default()
        }
    }

    #[rstest(
        interface,
        allow,
        arp,
        ndp,
        case(eth("eth0", 2), vec![], true, true),
        case(eth("eth0", 2), vec!["eth1".to_string()], false, false),
        case(eth("eth0", 2), vec!["eth0".to_string()], true, true),
        case(Interface { up: false, ..eth("eth0", 2) }, vec![], false, false),
        case(Interface { loopback: true, ..eth("lo", 1) }, vec![], false, false),
        case(Interface { no_arp: true, ..eth("wg0", 3) }, vec![], false, false),
        case(Interface { slave: true, ..eth("eth1", 4) }, vec![], false, false),
        case(Interface { mac: HardwareAddr::default(), ..eth("tun0", 5) }, vec![], false, false),
        case(Interface { link_local_v6: false, ..eth("eth0", 2) }, vec![], true, false),
        case(Interface { broadcast: false, ..eth("eth0", 2) }, vec![], false, true),
    )]
    fn works_interface_wants(interface: Interface, allow: Vec<String>, arp: bool, ndp: bool) {
        assert_eq!(arp, interface.wants_arp(&allow));
        assert_eq!(ndp, interface.wants_ndp(&allow));
    }

    #[test]
    fn works_plan() {
        let interfaces = vec![
            eth("eth0", 2),
            Interface {
                link_local_v6: false,
                ..eth("eth1", 3)
            },
            Interface {
                loopback: true,
                ..eth("lo", 1)
            },
        ];
        let (arp, ndp) = plan(&interfaces, &[]);
        assert_eq!(BTreeSet::from([2, 3]), arp);
        assert_eq!(BTreeSet::from([2]), ndp);
    }

    #[test]
    fn works_scan() {
        // every host has a loopback device, but it never gets a responder
        let interfaces = scan().unwrap();
        assert!(interfaces.iter().any(|i| i.loopback));
        assert!(interfaces.iter().filter(|i| i.loopback).all(|i| !i.wants_arp(&[])));
    }
}
