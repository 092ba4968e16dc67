use std::net::{IpAddr, Ipv4Addr};

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::PacketError;
use crate::packet::{check_len, read_hw, EthernetFrame, HardwareAddr};
use crate::responder::{AnnounceFn, DropReason, FrameHandler, Reply};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Operation {
    Request = 1,
    Reply = 2,
}

impl TryFrom<u16> for Operation {
    type Error = PacketError;
    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Operation::Request),
            2 => Ok(Operation::Reply),
            _ => Err(PacketError::Operation(value)),
        }
    }
}

// https://www.rfc-editor.org/rfc/rfc826
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArpPacket {
    pub operation: Operation,
    pub sender_hw: HardwareAddr,
    pub sender_ip: Ipv4Addr,
    pub target_hw: HardwareAddr,
    pub target_ip: Ipv4Addr,
}

impl ArpPacket {
    const HARDWARE_ETHERNET: u16 = 1;
    const PROTOCOL_IPV4: u16 = 0x0800;
    const LENGTH: usize = 28;

    pub fn decode(data: &[u8]) -> Result<Self, PacketError> {
        check_len(data, Self::LENGTH)?;
        let mut buf = data;
        let hardware_type = buf.get_u16();
        if hardware_type != Self::HARDWARE_ETHERNET {
            return Err(PacketError::HardwareType(hardware_type));
        }
        let protocol_type = buf.get_u16();
        if protocol_type != Self::PROTOCOL_IPV4 {
            return Err(PacketError::ProtocolType(protocol_type));
        }
        if buf.get_u8() != 6 || buf.get_u8() != 4 {
            return Err(PacketError::AddressLength);
        }
        let operation = Operation::try_from(buf.get_u16())?;
        let sender_hw = read_hw(&mut buf);
        let sender_ip = Ipv4Addr::from(buf.get_u32());
        let target_hw = read_hw(&mut buf);
        let target_ip = Ipv4Addr::from(buf.get_u32());
        Ok(Self {
            operation,
            sender_hw,
            sender_ip,
            target_hw,
            target_ip,
        })
    }

    pub fn encode(&self) -> Bytes {
        let mut dst = BytesMut::with_capacity(Self::LENGTH);
        dst.put_u16(Self::HARDWARE_ETHERNET);
        dst.put_u16(Self::PROTOCOL_IPV4);
        dst.put_u8(6);
        dst.put_u8(4);
        dst.put_u16(self.operation as u16);
        dst.put_slice(&self.sender_hw.0);
        dst.put_slice(&self.sender_ip.octets());
        dst.put_slice(&self.target_hw.0);
        dst.put_slice(&self.target_ip.octets());
        dst.freeze()
    }
}

/// Answers ARP requests for addresses the callback claims.
pub struct ArpResponder {
    hardware_addr: HardwareAddr,
    announce: AnnounceFn,
}

impl ArpResponder {
    pub fn new(hardware_addr: HardwareAddr, announce: AnnounceFn) -> Self {
        Self {
            hardware_addr,
            announce,
        }
    }
}

impl std::fmt::Debug for ArpResponder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArpResponder")
            .field("hardware_addr", &self.hardware_addr)
            .finish()
    }
}

impl FrameHandler for ArpResponder {
    const PROTOCOL: &'static str = "arp";
    const ETHER_TYPE: u16 = EthernetFrame::ETHER_TYPE_ARP;

    fn process(&self, data: &[u8]) -> (DropReason, Option<Reply>) {
        let (frame, packet) = match EthernetFrame::decode(data)
            .and_then(|frame| ArpPacket::decode(&frame.payload).map(|packet| (frame, packet)))
        {
            Ok(res) => res,
            Err(e) => {
                tracing::trace!(error=%e, "malformed ARP frame");
                return (DropReason::Error, None);
            }
        };
        if packet.operation != Operation::Request {
            return (DropReason::ArpReply, None);
        }
        if !frame.destination.is_broadcast() && frame.destination != self.hardware_addr {
            return (DropReason::EthernetDestination, None);
        }
        if !(self.announce)(IpAddr::V4(packet.target_ip)) {
            return (DropReason::Error, None);
        }

        let reply = ArpPacket {
            operation: Operation::Reply,
            sender_hw: self.hardware_addr,
            sender_ip: packet.target_ip,
            target_hw: packet.sender_hw,
            target_ip: packet.sender_ip,
        };
        let frame = EthernetFrame::new(
            packet.sender_hw,
            self.hardware_addr,
            EthernetFrame::ETHER_TYPE_ARP,
            reply.encode(),
        );
        (
            DropReason::None,
            Some(Reply {
                ip: IpAddr::V4(packet.target_ip),
                frame: frame.encode(),
            }),
        )
    }

    fn gratuitous(&self, ip: IpAddr) -> Option<Vec<u8>> {
        let ip = match ip {
            IpAddr::V4(ip) => ip,
            IpAddr::V6(_) => return None,
        };
        let packet = ArpPacket {
            operation: Operation::Reply,
            sender_hw: self.hardware_addr,
            sender_ip: ip,
            target_hw: HardwareAddr::BROADCAST,
            target_ip: ip,
        };
        Some(
            EthernetFrame::new(
                HardwareAddr::BROADCAST,
                self.hardware_addr,
                EthernetFrame::ETHER_TYPE_ARP,
                packet.encode(),
            )
            .encode(),
        )
    }
}
