use std::net::{IpAddr, Ipv6Addr};

use bytes::{Buf, BufMut, BytesMut};

use crate::error::PacketError;
use crate::packet::{check_len, EthernetFrame, HardwareAddr};
use crate::responder::{AnnounceFn, DropReason, FrameHandler, Reply};

const NEXT_HEADER_ICMPV6: u8 = 58;
const IPV6_HEADER_LENGTH: usize = 40;
const NDP_HOP_LIMIT: u8 = 255;

const TYPE_NEIGHBOR_SOLICITATION: u8 = 135;
const TYPE_NEIGHBOR_ADVERTISEMENT: u8 = 136;
// type, code, checksum, reserved, target
const NEIGHBOR_MESSAGE_LENGTH: usize = 24;

const OPTION_SOURCE_LL: u8 = 1;
const OPTION_TARGET_LL: u8 = 2;

const FLAG_SOLICITED: u32 = 1 << 30;
const FLAG_OVERRIDE: u32 = 1 << 29;

const ALL_NODES: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 1);

/// A Neighbor Solicitation as far as answering it is concerned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NeighborSolicitation {
    pub source: Ipv6Addr,
    pub destination: Ipv6Addr,
    pub target: Ipv6Addr,
    pub source_ll: Option<HardwareAddr>,
}

enum Parsed {
    Solicitation(NeighborSolicitation),
    Other,
}

fn parse(data: &[u8]) -> Result<Parsed, PacketError> {
    let frame = EthernetFrame::decode(data)?;
    if frame.ether_type != EthernetFrame::ETHER_TYPE_IPV6 {
        return Ok(Parsed::Other);
    }
    let mut buf = &frame.payload[..];
    check_len(buf, IPV6_HEADER_LENGTH)?;
    if buf.get_u32() >> 28 != 6 {
        return Err(PacketError::Ipv6Header);
    }
    let payload_length = buf.get_u16() as usize;
    let next_header = buf.get_u8();
    let hop_limit = buf.get_u8();
    let source = Ipv6Addr::from(buf.get_u128());
    let destination = Ipv6Addr::from(buf.get_u128());
    if next_header != NEXT_HEADER_ICMPV6 {
        return Ok(Parsed::Other);
    }
    check_len(buf, payload_length)?;
    let mut icmp = &buf[..payload_length];
    check_len(icmp, 1)?;
    if icmp[0] != TYPE_NEIGHBOR_SOLICITATION {
        return Ok(Parsed::Other);
    }
    check_len(icmp, NEIGHBOR_MESSAGE_LENGTH)?;
    // https://www.rfc-editor.org/rfc/rfc4861#section-7.1.1
    if hop_limit != NDP_HOP_LIMIT || icmp[1] != 0 {
        return Err(PacketError::Ipv6Header);
    }
    icmp.advance(8);
    let target = Ipv6Addr::from(icmp.get_u128());

    let mut source_ll = None;
    while icmp.has_remaining() {
        check_len(icmp, 2)?;
        let kind = icmp[0];
        let length = icmp[1] as usize * 8;
        if length == 0 {
            return Err(PacketError::Option);
        }
        check_len(icmp, length)?;
        if kind == OPTION_SOURCE_LL && length == 8 {
            let mut addr = [0u8; 6];
            addr.copy_from_slice(&icmp[2..8]);
            source_ll = Some(HardwareAddr(addr));
        }
        icmp.advance(length);
    }
    Ok(Parsed::Solicitation(NeighborSolicitation {
        source,
        destination,
        target,
        source_ll,
    }))
}

/// Internet checksum over the ICMPv6 message and its pseudo-header (RFC 8200 8.1).
pub fn icmpv6_checksum(source: &Ipv6Addr, destination: &Ipv6Addr, message: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut add = |data: &[u8]| {
        for chunk in data.chunks(2) {
            let word = match chunk {
                [hi, lo] => u16::from_be_bytes([*hi, *lo]),
                [hi] => u16::from_be_bytes([*hi, 0]),
                _ => 0,
            };
            sum += word as u32;
        }
    };
    add(&source.octets());
    add(&destination.octets());
    add(&(message.len() as u32).to_be_bytes());
    add(&[0, 0, 0, NEXT_HEADER_ICMPV6]);
    add(message);
    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}

/// Answers Neighbor Solicitations for addresses the callback claims.
pub struct NdpResponder {
    hardware_addr: HardwareAddr,
    announce: AnnounceFn,
}

impl std::fmt::Debug for NdpResponder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NdpResponder")
            .field("hardware_addr", &self.hardware_addr)
            .finish()
    }
}

impl NdpResponder {
    pub fn new(hardware_addr: HardwareAddr, announce: AnnounceFn) -> Self {
        Self {
            hardware_addr,
            announce,
        }
    }

    fn advertisement(
        &self,
        target: Ipv6Addr,
        destination: Ipv6Addr,
        link_destination: HardwareAddr,
        solicited: bool,
    ) -> Vec<u8> {
        let mut icmp = BytesMut::with_capacity(NEIGHBOR_MESSAGE_LENGTH + 8);
        icmp.put_u8(TYPE_NEIGHBOR_ADVERTISEMENT);
        icmp.put_u8(0);
        icmp.put_u16(0);
        let mut flags = FLAG_OVERRIDE;
        if solicited {
            flags |= FLAG_SOLICITED;
        }
        icmp.put_u32(flags);
        icmp.put_slice(&target.octets());
        icmp.put_u8(OPTION_TARGET_LL);
        icmp.put_u8(1);
        icmp.put_slice(&self.hardware_addr.0);
        let checksum = icmpv6_checksum(&target, &destination, &icmp);
        icmp[2..4].copy_from_slice(&checksum.to_be_bytes());

        let mut packet = BytesMut::with_capacity(IPV6_HEADER_LENGTH + icmp.len());
        packet.put_u32(6 << 28);
        packet.put_u16(icmp.len() as u16);
        packet.put_u8(NEXT_HEADER_ICMPV6);
        packet.put_u8(NDP_HOP_LIMIT);
        packet.put_slice(&target.octets());
        packet.put_slice(&destination.octets());
        packet.put_slice(&icmp);
        EthernetFrame::new(
            link_destination,
            self.hardware_addr,
            EthernetFrame::ETHER_TYPE_IPV6,
            packet.freeze(),
        )
        .encode()
    }
}

impl FrameHandler for NdpResponder {
    const PROTOCOL: &'static str = "ndp";
    const ETHER_TYPE: u16 = EthernetFrame::ETHER_TYPE_IPV6;

    fn process(&self, data: &[u8]) -> (DropReason, Option<Reply>) {
        let ns = match parse(data) {
            Ok(Parsed::Solicitation(ns)) => ns,
            Ok(Parsed::Other) => return (DropReason::MessageType, None),
            Err(e) => {
                tracing::trace!(error=%e, "malformed NDP frame");
                return (DropReason::Error, None);
            }
        };
        let (destination, link_destination, solicited) = match ns.source_ll {
            Some(ll) if !ns.source.is_unspecified() => (ns.source, ll, true),
            // duplicate address detection probe
            _ if ns.source.is_unspecified() => (ALL_NODES, HardwareAddr::ALL_NODES, false),
            _ => return (DropReason::NoSourceLL, None),
        };
        if ns.target.is_multicast() || !(self.announce)(IpAddr::V6(ns.target)) {
            return (DropReason::Error, None);
        }
        (
            DropReason::None,
            Some(Reply {
                ip: IpAddr::V6(ns.target),
                frame: self.advertisement(ns.target, destination, link_destination, solicited),
            }),
        )
    }

    fn gratuitous(&self, ip: IpAddr) -> Option<Vec<u8>> {
        match ip {
            IpAddr::V6(ip) => Some(self.advertisement(ip, ALL_NODES, HardwareAddr::ALL_NODES, false)),
            IpAddr::V4(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::sync::Arc;

    const LOCAL: HardwareAddr = HardwareAddr([0x02, 0, 0, 0, 0, 0x01]);
    const REMOTE: HardwareAddr = HardwareAddr([0x02, 0, 0, 0, 0, 0x02]);

    fn solicitation(
        source: &str,
        target: &str,
        icmp_type: u8,
        source_ll: Option<HardwareAddr>,
    ) -> Vec<u8> {
        let source: Ipv6Addr = source.parse().unwrap();
        let target: Ipv6Addr = target.parse().unwrap();
        let destination = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 1, 0xff00, 0x0005);
        let mut icmp = BytesMut::new();
        icmp.put_u8(icmp_type);
        icmp.put_u8(0);
        icmp.put_u16(0);
        icmp.put_u32(0);
        icmp.put_slice(&target.octets());
        if let Some(ll) = source_ll {
            icmp.put_u8(OPTION_SOURCE_LL);
            icmp.put_u8(1);
            icmp.put_slice(&ll.0);
        }
        let checksum = icmpv6_checksum(&source, &destination, &icmp);
        icmp[2..4].copy_from_slice(&checksum.to_be_bytes());

        let mut packet = BytesMut::new();
        packet.put_u32(6 << 28);
        packet.put_u16(icmp.len() as u16);
        packet.put_u8(NEXT_HEADER_ICMPV6);
        packet.put_u8(255);
        packet.put_slice(&source.octets());
        packet.put_slice(&destination.octets());
        packet.put_slice(&icmp);
        EthernetFrame::new(
            HardwareAddr::solicited_node(&target),
            REMOTE,
            EthernetFrame::ETHER_TYPE_IPV6,
            packet.freeze(),
        )
        .encode()
    }

    fn responder() -> NdpResponder {
        let target: IpAddr = "2001:db8::5".parse().unwrap();
        NdpResponder::new(LOCAL, Arc::new(move |ip| ip == target))
    }

    #[rstest(
        frame,
        expected,
        case(solicitation("fe80::2", "2001:db8::5", TYPE_NEIGHBOR_SOLICITATION, Some(REMOTE)), DropReason::None),
        case(solicitation("::", "2001:db8::5", TYPE_NEIGHBOR_SOLICITATION, None), DropReason::None),
        case(solicitation("fe80::2", "2001:db8::5", TYPE_NEIGHBOR_SOLICITATION, None), DropReason::NoSourceLL),
        case(solicitation("fe80::2", "2001:db8::6", TYPE_NEIGHBOR_SOLICITATION, Some(REMOTE)), DropReason::Error),
        case(solicitation("fe80::2", "2001:db8::5", TYPE_NEIGHBOR_ADVERTISEMENT, Some(REMOTE)), DropReason::MessageType),
        case(solicitation("fe80::2", "2001:db8::5", 128, None), DropReason::MessageType),
        case(vec![0u8; 30], DropReason::MessageType),
    )]
    fn works_ndp_process(frame: Vec<u8>, expected: DropReason) {
        let (reason, reply) = responder().process(&frame);
        assert_eq!(expected, reason);
        assert_eq!(expected == DropReason::None, reply.is_some());
    }

    #[test]
    fn works_ndp_advertisement_contents() {
        let (_, reply) = responder().process(&solicitation(
            "fe80::2",
            "2001:db8::5",
            TYPE_NEIGHBOR_SOLICITATION,
            Some(REMOTE),
        ));
        let reply = reply.unwrap();
        let frame = EthernetFrame::decode(&reply.frame).unwrap();
        assert_eq!(REMOTE, frame.destination);
        assert_eq!(LOCAL, frame.source);

        let packet = &frame.payload[..];
        assert_eq!(255, packet[7]);
        let source = Ipv6Addr::from(<[u8; 16]>::try_from(&packet[8..24]).unwrap());
        let destination = Ipv6Addr::from(<[u8; 16]>::try_from(&packet[24..40]).unwrap());
        assert_eq!("2001:db8::5".parse::<Ipv6Addr>().unwrap(), source);
        assert_eq!("fe80::2".parse::<Ipv6Addr>().unwrap(), destination);

        let icmp = &packet[40..];
        assert_eq!(TYPE_NEIGHBOR_ADVERTISEMENT, icmp[0]);
        assert_eq!(0x60, icmp[4]);
        assert_eq!(&LOCAL.0, &icmp[26..32]);
        // a valid checksum sums to zero
        assert_eq!(0, icmpv6_checksum(&source, &destination, icmp));
    }

    #[test]
    fn works_ndp_gratuitous() {
        let raw = responder()
            .gratuitous("2001:db8::5".parse().unwrap())
            .unwrap();
        let frame = EthernetFrame::decode(&raw).unwrap();
        assert_eq!(HardwareAddr::ALL_NODES, frame.destination);
        let icmp = &frame.payload[40..];
        // override only
        assert_eq!(0x20, icmp[4]);
        assert!(responder().gratuitous("10.0.0.1".parse().unwrap()).is_none());
    }

    #[test]
    fn works_icmpv6_checksum_odd_length() {
        let src = Ipv6Addr::LOCALHOST;
        let even = icmpv6_checksum(&src, &src, &[0x12, 0x00]);
        let odd = icmpv6_checksum(&src, &src, &[0x12]);
        // the odd byte is padded with zero but the length differs
        assert_ne!(even, odd);
    }
}
