use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use bytes::{Buf, BufMut, BytesMut};

use super::prefix::Prefix;
use crate::error::*;
use crate::family::{AddressFamily, Afi};

// https://www.rfc-editor.org/rfc/rfc4271#section-4.3
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Attribute {
    Origin(Base, u8),
    ASPath(Base, Vec<ASSegment>),
    NextHop(Base, Ipv4Addr),
    MultiExitDisc(Base, u32),
    LocalPref(Base, u32),
    AtomicAggregate(Base),
    Communities(Base, Vec<u32>),
    MPReachNLRI(Base, AddressFamily, IpAddr, Vec<Prefix>),
    MPUnReachNLRI(Base, AddressFamily, Vec<Prefix>),
    Unsupported(Base, Vec<u8>),
}

impl Attribute {
    pub const ORIGIN: u8 = 1;
    pub const AS_PATH: u8 = 2;
    pub const NEXT_HOP: u8 = 3;
    pub const MULTI_EXIT_DISC: u8 = 4;
    pub const LOCAL_PREF: u8 = 5;
    pub const ATOMIC_AGGREGATE: u8 = 6;
    pub const COMMUNITIES: u8 = 8;
    pub const MP_REACH_NLRI: u8 = 14;
    pub const MP_UNREACH_NLRI: u8 = 15;

    pub const FLAG_OPTIONAL: u8 = 1 << 7;
    pub const FLAG_TRANSITIVE: u8 = 1 << 6;
    pub const FLAG_PARTIAL: u8 = 1 << 5;
    pub const FLAG_EXTENDED: u8 = 1 << 4;

    pub const ORIGIN_IGP: u8 = 0;
    pub const ORIGIN_EGP: u8 = 1;
    pub const ORIGIN_INCOMPLETE: u8 = 2;

    pub const AS_SET: u8 = 1;
    pub const AS_SEQUENCE: u8 = 2;

    pub fn new_origin(val: u8) -> Result<Attribute, Error> {
        match val {
            Attribute::ORIGIN_IGP | Attribute::ORIGIN_EGP | Attribute::ORIGIN_INCOMPLETE => {
                Ok(Attribute::Origin(
                    Base::new(Attribute::FLAG_TRANSITIVE, Attribute::ORIGIN),
                    val,
                ))
            }
            _ => Err(UpdateMessageError::InvalidOriginAttribute(val).into()),
        }
    }

    /// AS_PATH with a single AS_SEQUENCE, or no segment at all for an empty sequence.
    pub fn new_as_path(as_sequence: Vec<u32>) -> Attribute {
        let segments = if as_sequence.is_empty() {
            Vec::new()
        } else {
            vec![ASSegment::new(Attribute::AS_SEQUENCE, as_sequence)]
        };
        Attribute::ASPath(
            Base::new(Attribute::FLAG_TRANSITIVE, Attribute::AS_PATH),
            segments,
        )
    }

    pub fn new_nexthop(addr: Ipv4Addr) -> Attribute {
        Attribute::NextHop(
            Base::new(Attribute::FLAG_TRANSITIVE, Attribute::NEXT_HOP),
            addr,
        )
    }

    pub fn new_med(val: u32) -> Attribute {
        Attribute::MultiExitDisc(
            Base::new(Attribute::FLAG_OPTIONAL, Attribute::MULTI_EXIT_DISC),
            val,
        )
    }

    pub fn new_local_pref(val: u32) -> Attribute {
        Attribute::LocalPref(
            Base::new(Attribute::FLAG_TRANSITIVE, Attribute::LOCAL_PREF),
            val,
        )
    }

    pub fn new_communities(values: Vec<u32>) -> Attribute {
        Attribute::Communities(
            Base::new(
                Attribute::FLAG_OPTIONAL + Attribute::FLAG_TRANSITIVE,
                Attribute::COMMUNITIES,
            ),
            values,
        )
    }

    pub fn new_mp_reach_nlri(
        family: AddressFamily,
        next_hop: IpAddr,
        prefixes: Vec<Prefix>,
    ) -> Attribute {
        Attribute::MPReachNLRI(
            Base::new(Attribute::FLAG_OPTIONAL, Attribute::MP_REACH_NLRI),
            family,
            next_hop,
            prefixes,
        )
    }

    pub fn new_mp_unreach_nlri(family: AddressFamily, prefixes: Vec<Prefix>) -> Attribute {
        Attribute::MPUnReachNLRI(
            Base::new(Attribute::FLAG_OPTIONAL, Attribute::MP_UNREACH_NLRI),
            family,
            prefixes,
        )
    }

    pub fn code(&self) -> u8 {
        self.get_base().code
    }

    pub fn is_optional(&self) -> bool {
        self.get_base().is_optional()
    }

    pub fn is_transitive(&self) -> bool {
        self.get_base().is_transitive()
    }

    fn get_base(&self) -> &Base {
        match self {
            Self::Origin(b, _) => b,
            Self::ASPath(b, _) => b,
            Self::NextHop(b, _) => b,
            Self::MultiExitDisc(b, _) => b,
            Self::LocalPref(b, _) => b,
            Self::AtomicAggregate(b) => b,
            Self::Communities(b, _) => b,
            Self::MPReachNLRI(b, _, _, _) => b,
            Self::MPUnReachNLRI(b, _, _) => b,
            Self::Unsupported(b, _) => b,
        }
    }

    pub fn decode(data: &mut BytesMut, as4_enabled: bool) -> Result<Self, Error> {
        if data.remaining() < 3 {
            return Err(UpdateMessageError::MalformedAttributeList.into());
        }
        let mut b = Base {
            flag: data.get_u8(),
            code: data.get_u8(),
        };
        let length = if b.is_extended() {
            if data.remaining() < 2 {
                return Err(UpdateMessageError::MalformedAttributeList.into());
            }
            data.get_u16() as usize
        } else {
            data.get_u8() as usize
        };
        if data.remaining() < length {
            return Err(UpdateMessageError::AttributeLengthError {
                code: b.code,
                length,
            }
            .into());
        }
        b.validate_flag()?;
        // the extended length bit only describes the encoding
        b.flag &= !Self::FLAG_EXTENDED;
        let mut value = data.split_to(length);
        let length_error = || -> Error {
            UpdateMessageError::AttributeLengthError {
                code: b.code,
                length,
            }
            .into()
        };
        let attr = match b.code {
            Self::ORIGIN => {
                if length != 1 {
                    return Err(length_error());
                }
                let val = value.get_u8();
                if val > Self::ORIGIN_INCOMPLETE {
                    return Err(UpdateMessageError::InvalidOriginAttribute(val).into());
                }
                Self::Origin(b, val)
            }
            Self::AS_PATH => {
                let width = if as4_enabled { 4 } else { 2 };
                let mut segments = Vec::new();
                while value.has_remaining() {
                    if value.remaining() < 2 {
                        return Err(UpdateMessageError::MalformedASPath.into());
                    }
                    let segment_type = value.get_u8();
                    let count = value.get_u8() as usize;
                    if segment_type != Self::AS_SET && segment_type != Self::AS_SEQUENCE {
                        return Err(UpdateMessageError::MalformedASPath.into());
                    }
                    if value.remaining() < count * width {
                        return Err(UpdateMessageError::MalformedASPath.into());
                    }
                    let segs = (0..count)
                        .map(|_| {
                            if as4_enabled {
                                value.get_u32()
                            } else {
                                value.get_u16() as u32
                            }
                        })
                        .collect();
                    segments.push(ASSegment::new(segment_type, segs));
                }
                Self::ASPath(b, segments)
            }
            Self::NEXT_HOP => {
                if length != 4 {
                    return Err(length_error());
                }
                Self::NextHop(b, Ipv4Addr::from(value.get_u32()))
            }
            Self::MULTI_EXIT_DISC => {
                if length != 4 {
                    return Err(length_error());
                }
                Self::MultiExitDisc(b, value.get_u32())
            }
            Self::LOCAL_PREF => {
                if length != 4 {
                    return Err(length_error());
                }
                Self::LocalPref(b, value.get_u32())
            }
            Self::ATOMIC_AGGREGATE => {
                if length != 0 {
                    return Err(length_error());
                }
                Self::AtomicAggregate(b)
            }
            Self::COMMUNITIES => {
                if length % 4 != 0 {
                    return Err(length_error());
                }
                let values = (0..length / 4).map(|_| value.get_u32()).collect();
                Self::Communities(b, values)
            }
            // https://www.rfc-editor.org/rfc/rfc4760#section-3
            Self::MP_REACH_NLRI => {
                if value.remaining() < 5 {
                    return Err(length_error());
                }
                let family = AddressFamily::new(value.get_u16(), value.get_u8())
                    .map_err(|_| UpdateMessageError::OptionalAttributeError)?;
                let next_hop_length = value.get_u8() as usize;
                if value.remaining() < next_hop_length + 1 {
                    return Err(length_error());
                }
                let mut next_hop_buf = value.split_to(next_hop_length);
                let next_hop = match (family.afi, next_hop_length) {
                    (Afi::IPv4, 4) => IpAddr::V4(Ipv4Addr::from(next_hop_buf.get_u32())),
                    // a link-local address may follow the global one
                    (Afi::IPv6, 16) | (Afi::IPv6, 32) => {
                        IpAddr::V6(Ipv6Addr::from(next_hop_buf.get_u128()))
                    }
                    _ => return Err(UpdateMessageError::OptionalAttributeError.into()),
                };
                let _reserved = value.get_u8();
                let mut nlri = Vec::new();
                while value.has_remaining() {
                    nlri.push(Prefix::decode(family.afi, &mut value)?);
                }
                Self::MPReachNLRI(b, family, next_hop, nlri)
            }
            Self::MP_UNREACH_NLRI => {
                if value.remaining() < 3 {
                    return Err(length_error());
                }
                let family = AddressFamily::new(value.get_u16(), value.get_u8())
                    .map_err(|_| UpdateMessageError::OptionalAttributeError)?;
                let mut withdrawn = Vec::new();
                while value.has_remaining() {
                    withdrawn.push(Prefix::decode(family.afi, &mut value)?);
                }
                Self::MPUnReachNLRI(b, family, withdrawn)
            }
            _ => {
                if !b.is_optional() {
                    return Err(UpdateMessageError::UnrecognizedWellknownAttribute(b.code).into());
                }
                Self::Unsupported(b, value.to_vec())
            }
        };
        Ok(attr)
    }

    pub fn encode(&self, dst: &mut BytesMut, as4_enabled: bool) {
        let mut value = BytesMut::new();
        match self {
            Self::Origin(_, val) => value.put_u8(*val),
            Self::ASPath(_, segments) => {
                for seg in segments.iter() {
                    value.put_u8(seg.segment_type);
                    value.put_u8(seg.segments.len() as u8);
                    for asn in seg.segments.iter() {
                        if as4_enabled {
                            value.put_u32(*asn)
                        } else {
                            value.put_u16(*asn as u16)
                        }
                    }
                }
            }
            Self::NextHop(_, next) => value.put_slice(&next.octets()),
            Self::MultiExitDisc(_, val) => value.put_u32(*val),
            Self::LocalPref(_, pref) => value.put_u32(*pref),
            Self::AtomicAggregate(_) => {}
            Self::Communities(_, values) => {
                for v in values.iter() {
                    value.put_u32(*v);
                }
            }
            Self::MPReachNLRI(_, family, next_hop, prefixes) => {
                value.put_u16(family.afi.into());
                value.put_u8(family.safi.into());
                match next_hop {
                    IpAddr::V4(a) => {
                        value.put_u8(4);
                        value.put_slice(&a.octets());
                    }
                    IpAddr::V6(a) => {
                        value.put_u8(16);
                        value.put_slice(&a.octets());
                    }
                }
                value.put_u8(0);
                for prefix in prefixes.iter() {
                    prefix.encode(&mut value);
                }
            }
            Self::MPUnReachNLRI(_, family, prefixes) => {
                value.put_u16(family.afi.into());
                value.put_u8(family.safi.into());
                for prefix in prefixes.iter() {
                    prefix.encode(&mut value);
                }
            }
            Self::Unsupported(_, data) => value.put_slice(data),
        }
        let base = self.get_base();
        if value.len() > u8::MAX as usize {
            dst.put_u8(base.flag | Self::FLAG_EXTENDED);
            dst.put_u8(base.code);
            dst.put_u16(value.len() as u16);
        } else {
            dst.put_u8(base.flag & !Self::FLAG_EXTENDED);
            dst.put_u8(base.code);
            dst.put_u8(value.len() as u8);
        }
        dst.put_slice(&value);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Base {
    pub flag: u8,
    pub code: u8,
}

impl Base {
    pub fn new(flag: u8, code: u8) -> Self {
        Self { flag, code }
    }

    fn is_optional(&self) -> bool {
        self.flag & Attribute::FLAG_OPTIONAL != 0
    }

    fn is_transitive(&self) -> bool {
        self.flag & Attribute::FLAG_TRANSITIVE != 0
    }

    fn is_extended(&self) -> bool {
        self.flag & Attribute::FLAG_EXTENDED != 0
    }

    // https://www.rfc-editor.org/rfc/rfc4271#section-6.3
    fn validate_flag(&self) -> Result<(), Error> {
        let expected = match self.code {
            Attribute::ORIGIN
            | Attribute::AS_PATH
            | Attribute::NEXT_HOP
            | Attribute::LOCAL_PREF
            | Attribute::ATOMIC_AGGREGATE => Some(Attribute::FLAG_TRANSITIVE),
            Attribute::MULTI_EXIT_DISC
            | Attribute::MP_REACH_NLRI
            | Attribute::MP_UNREACH_NLRI => Some(Attribute::FLAG_OPTIONAL),
            Attribute::COMMUNITIES => Some(Attribute::FLAG_OPTIONAL + Attribute::FLAG_TRANSITIVE),
            _ => None,
        };
        match expected {
            Some(expected)
                if self.flag & (Attribute::FLAG_OPTIONAL + Attribute::FLAG_TRANSITIVE)
                    != expected =>
            {
                Err(UpdateMessageError::AttributeFlagsError {
                    code: self.code,
                    flag: self.flag,
                }
                .into())
            }
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ASSegment {
    pub segment_type: u8,
    pub segments: Vec<u32>,
}

impl ASSegment {
    pub fn new(segment_type: u8, segments: Vec<u32>) -> Self {
        Self {
            segment_type,
            segments,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ipnet::IpNet;
    use rstest::rstest;

    #[rstest(
        input,
        as4_enabled,
        expected,
        case(vec![0x40, 0x01, 0x01, 0x00], false, Attribute::new_origin(Attribute::ORIGIN_IGP).unwrap()),
        case(vec![0x40, 0x02, 0x00], true, Attribute::new_as_path(vec![])),
        case(vec![0x40, 0x02, 0x04, 0x02, 0x01, 0xfd, 0xe8], false, Attribute::new_as_path(vec![65000])),
        case(vec![0x40, 0x02, 0x06, 0x02, 0x01, 0x00, 0x01, 0x11, 0x70], true, Attribute::new_as_path(vec![70000])),
        case(vec![0x40, 0x03, 0x04, 0x0a, 0x00, 0x00, 0x01], false, Attribute::new_nexthop(Ipv4Addr::new(10, 0, 0, 1))),
        case(vec![0x80, 0x04, 0x04, 0x00, 0x00, 0x00, 0x64], false, Attribute::new_med(100)),
        case(vec![0x40, 0x05, 0x04, 0x00, 0x00, 0x00, 0x64], false, Attribute::new_local_pref(100)),
        case(vec![0xc0, 0x08, 0x08, 0xfd, 0xe8, 0x00, 0x01, 0xfd, 0xe8, 0x00, 0x02], false, Attribute::new_communities(vec![0xfde8_0001, 0xfde8_0002])),
        case(
            vec![0x80, 0x0e, 0x1e, 0x00, 0x02, 0x01, 0x10, 0x20, 0x01, 0x0d, 0xb8, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x40, 0x20, 0x01, 0x0d, 0xb8, 0x00, 0x01, 0x00, 0x00],
            false,
            Attribute::new_mp_reach_nlri(AddressFamily::IPV6_UNICAST, "2001:db8::1".parse().unwrap(), vec![Prefix::from("2001:db8:1::/64".parse::<IpNet>().unwrap())]),
        ),
        case(
            vec![0x80, 0x0f, 0x0c, 0x00, 0x02, 0x01, 0x40, 0x20, 0x01, 0x0d, 0xb8, 0x00, 0x01, 0x00, 0x00],
            false,
            Attribute::new_mp_unreach_nlri(AddressFamily::IPV6_UNICAST, vec![Prefix::from("2001:db8:1::/64".parse::<IpNet>().unwrap())]),
        ),
        case(vec![0xc0, 0x63, 0x02, 0xaa, 0xbb], false, Attribute::Unsupported(Base::new(0xc0, 0x63), vec![0xaa, 0xbb])),
    )]
    fn works_attribute_decode_and_encode(input: Vec<u8>, as4_enabled: bool, expected: Attribute) {
        let mut buf = BytesMut::from(&input[..]);
        let attr = Attribute::decode(&mut buf, as4_enabled).unwrap();
        assert_eq!(expected, attr);
        assert!(buf.is_empty());

        let mut dst = BytesMut::new();
        attr.encode(&mut dst, as4_enabled);
        assert_eq!(input, dst.to_vec());
    }

    #[rstest(
        input,
        expected,
        case(vec![0x40, 0x01, 0x01, 0x03], UpdateMessageError::InvalidOriginAttribute(3)),
        case(vec![0x80, 0x01, 0x01, 0x00], UpdateMessageError::AttributeFlagsError { code: 1, flag: 0x80 }),
        case(vec![0x40, 0x03, 0x03, 0x0a, 0x00, 0x00], UpdateMessageError::AttributeLengthError { code: 3, length: 3 }),
        case(vec![0x40, 0x05, 0x08, 0x00, 0x00], UpdateMessageError::AttributeLengthError { code: 5, length: 8 }),
        case(vec![0x40, 0x02, 0x04, 0x03, 0x01, 0xfd, 0xe8], UpdateMessageError::MalformedASPath),
        case(vec![0x40, 0x02, 0x04, 0x02, 0x02, 0xfd, 0xe8], UpdateMessageError::MalformedASPath),
        case(vec![0x40, 0x63, 0x00], UpdateMessageError::UnrecognizedWellknownAttribute(0x63)),
    )]
    fn failed_attribute_decode(input: Vec<u8>, expected: UpdateMessageError) {
        let mut buf = BytesMut::from(&input[..]);
        match Attribute::decode(&mut buf, false) {
            Err(Error::UpdateMessage(e)) => assert_eq!(expected, e),
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn works_attribute_encode_extended_length() {
        let values: Vec<u32> = (0..64).collect();
        let attr = Attribute::new_communities(values);
        let mut dst = BytesMut::new();
        attr.encode(&mut dst, true);
        assert_eq!(
            Attribute::FLAG_OPTIONAL + Attribute::FLAG_TRANSITIVE + Attribute::FLAG_EXTENDED,
            dst[0]
        );
        assert_eq!(256, u16::from_be_bytes([dst[2], dst[3]]));
        assert_eq!(4 + 256, dst.len());
    }
}
