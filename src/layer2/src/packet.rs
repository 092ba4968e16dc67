use std::fmt;
use std::net::Ipv6Addr;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::PacketError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct HardwareAddr(pub [u8; 6]);

impl HardwareAddr {
    pub const BROADCAST: HardwareAddr = HardwareAddr([0xff; 6]);
    // 33:33:00:00:00:01, all-nodes multicast
    pub const ALL_NODES: HardwareAddr = HardwareAddr([0x33, 0x33, 0, 0, 0, 1]);

    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0; 6]
    }

    /// Ethernet group for the solicited-node multicast address of `addr` (RFC 2464).
    pub fn solicited_node(addr: &Ipv6Addr) -> HardwareAddr {
        let o = addr.octets();
        HardwareAddr([0x33, 0x33, 0xff, o[13], o[14], o[15]])
    }
}

impl fmt::Display for HardwareAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let o = self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            o[0], o[1], o[2], o[3], o[4], o[5]
        )
    }
}

impl From<[u8; 6]> for HardwareAddr {
    fn from(value: [u8; 6]) -> Self {
        HardwareAddr(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EthernetFrame {
    pub destination: HardwareAddr,
    pub source: HardwareAddr,
    pub ether_type: u16,
    pub payload: Bytes,
}

impl EthernetFrame {
    pub const ETHER_TYPE_ARP: u16 = 0x0806;
    pub const ETHER_TYPE_IPV6: u16 = 0x86dd;
    pub const HEADER_LENGTH: usize = 14;
    const MIN_LENGTH: usize = 60;

    pub fn new(
        destination: HardwareAddr,
        source: HardwareAddr,
        ether_type: u16,
        payload: Bytes,
    ) -> Self {
        Self {
            destination,
            source,
            ether_type,
            payload,
        }
    }

    pub fn decode(data: &[u8]) -> Result<Self, PacketError> {
        check_len(data, Self::HEADER_LENGTH)?;
        let mut buf = data;
        let destination = read_hw(&mut buf);
        let source = read_hw(&mut buf);
        let ether_type = buf.get_u16();
        Ok(Self {
            destination,
            source,
            ether_type,
            payload: Bytes::copy_from_slice(buf),
        })
    }

    /// Serializes the frame, padded to the Ethernet minimum.
    pub fn encode(&self) -> Vec<u8> {
        let mut dst = BytesMut::with_capacity(Self::MIN_LENGTH.max(Self::HEADER_LENGTH + self.payload.len()));
        dst.put_slice(&self.destination.0);
        dst.put_slice(&self.source.0);
        dst.put_u16(self.ether_type);
        dst.put_slice(&self.payload);
        if dst.len() < Self::MIN_LENGTH {
            dst.resize(Self::MIN_LENGTH, 0);
        }
        dst.to_vec()
    }
}

pub(crate) fn check_len(data: &[u8], expected: usize) -> Result<(), PacketError> {
    if data.len() < expected {
        return Err(PacketError::TooShort {
            expected,
            got: data.len(),
        });
    }
    Ok(())
}

pub(crate) fn read_hw(buf: &mut &[u8]) -> HardwareAddr {
    let mut addr = [0u8; 6];
    buf.copy_to_slice(&mut addr);
    HardwareAddr(addr)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn works_ethernet_frame_decode_and_encode() {
        let raw = [
            0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x02, 0x00, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06,
            0xde, 0xad,
        ];
        let frame = EthernetFrame::decode(&raw).unwrap();
        assert!(frame.destination.is_broadcast());
        assert_eq!("02:00:00:00:00:01", frame.source.to_string());
        assert_eq!(EthernetFrame::ETHER_TYPE_ARP, frame.ether_type);
        assert_eq!(&[0xde, 0xad][..], &frame.payload[..]);

        let encoded = frame.encode();
        assert_eq!(60, encoded.len());
        assert_eq!(&raw[..], &encoded[..raw.len()]);
    }

    #[test]
    fn failed_ethernet_frame_decode() {
        assert_eq!(
            PacketError::TooShort {
                expected: 14,
                got: 3
            },
            EthernetFrame::decode(&[0, 1, 2]).unwrap_err()
        );
    }

    #[test]
    fn works_solicited_node() {
        let addr: Ipv6Addr = "2001:db8::12:3456".parse().unwrap();
        assert_eq!(
            HardwareAddr([0x33, 0x33, 0xff, 0x12, 0x34, 0x56]),
            HardwareAddr::solicited_node(&addr)
        );
    }
}
