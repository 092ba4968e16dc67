use std::convert::TryFrom;

use bytes::{Buf, BufMut, BytesMut};

use crate::error::*;
use crate::family::AddressFamily;

// https://www.rfc-editor.org/rfc/rfc5492#section-4
#[derive(Debug, Clone, PartialEq)]
pub enum Cap {
    MultiProtocol(AddressFamily), // rfc 4760 // 1
    RouteRefresh,                 // rfc 2918 // 2
    FourOctetASNumber(u32),       // rfc 6793 // 65
    Unsupported(u8, Vec<u8>),
}

impl Cap {
    pub const MULTI_PROTOCOL: u8 = 1;
    pub const ROUTE_REFRESH: u8 = 2;
    pub const FOUR_OCTET_AS_NUMBER: u8 = 65;

    pub fn decode(code: u8, length: u8, data: &mut BytesMut) -> Result<Self, Error> {
        if data.remaining() < length as usize {
            return Err(Error::OpenMessage(OpenMessageError::Unspecific));
        }
        let mut value = data.split_to(length as usize);
        match (code, length) {
            (Self::MULTI_PROTOCOL, 4) => {
                let raw = value.get_u32();
                match AddressFamily::try_from(raw) {
                    Ok(family) => Ok(Self::MultiProtocol(family)),
                    // families we never announce are kept opaque
                    Err(_) => Ok(Self::Unsupported(code, raw.to_be_bytes().to_vec())),
                }
            }
            (Self::ROUTE_REFRESH, 0) => Ok(Self::RouteRefresh),
            (Self::FOUR_OCTET_AS_NUMBER, 4) => Ok(Self::FourOctetASNumber(value.get_u32())),
            (Self::MULTI_PROTOCOL, _)
            | (Self::ROUTE_REFRESH, _)
            | (Self::FOUR_OCTET_AS_NUMBER, _) => {
                Err(Error::OpenMessage(OpenMessageError::Unspecific))
            }
            _ => Ok(Self::Unsupported(code, value.to_vec())),
        }
    }

    pub fn encode(&self, dst: &mut BytesMut) {
        match self {
            Self::MultiProtocol(family) => {
                dst.put_u8(Self::MULTI_PROTOCOL);
                dst.put_u8(4);
                dst.put_u32(u32::from(*family));
            }
            Self::RouteRefresh => {
                dst.put_u8(Self::ROUTE_REFRESH);
                dst.put_u8(0);
            }
            Self::FourOctetASNumber(asn) => {
                dst.put_u8(Self::FOUR_OCTET_AS_NUMBER);
                dst.put_u8(4);
                dst.put_u32(*asn);
            }
            Self::Unsupported(code, data) => {
                dst.put_u8(*code);
                dst.put_u8(data.len() as u8);
                dst.put_slice(data);
            }
        }
    }

    /// Encoded length including the code and length octets.
    pub fn len(&self) -> usize {
        2 + match self {
            Self::MultiProtocol(_) => 4,
            Self::RouteRefresh => 0,
            Self::FourOctetASNumber(_) => 4,
            Self::Unsupported(_, data) => data.len(),
        }
    }
}
