use std::net::{Ipv4Addr, Ipv6Addr};

use bytes::{Buf, BufMut, BytesMut};
use ipnet::{IpNet, Ipv4Net, Ipv6Net};

use crate::error::*;
use crate::family::Afi;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Prefix {
    inner: IpNet,
}

impl Prefix {
    pub fn new(inner: IpNet) -> Self {
        Self { inner }
    }

    pub fn afi(&self) -> Afi {
        match self.inner {
            IpNet::V4(_) => Afi::IPv4,
            IpNet::V6(_) => Afi::IPv6,
        }
    }

    // https://www.rfc-editor.org/rfc/rfc4271#section-4.3
    pub fn decode(afi: Afi, data: &mut BytesMut) -> Result<Self, Error> {
        if data.remaining() < 1 {
            return Err(UpdateMessageError::InvalidNetworkField.into());
        }
        let length = data.get_u8();
        if length > afi.max_prefix_len() {
            return Err(UpdateMessageError::InvalidNetworkField.into());
        }
        let n = prefix_bytes_len(length as usize);
        if data.remaining() < n {
            return Err(UpdateMessageError::InvalidNetworkField.into());
        }
        let inner = match afi {
            Afi::IPv4 => {
                let mut b = [0u8; 4];
                data.copy_to_slice(&mut b[..n]);
                Ipv4Net::new(Ipv4Addr::from(b), length)
                    .map(IpNet::V4)
                    .map_err(|_| UpdateMessageError::InvalidNetworkField)?
            }
            Afi::IPv6 => {
                let mut b = [0u8; 16];
                data.copy_to_slice(&mut b[..n]);
                Ipv6Net::new(Ipv6Addr::from(b), length)
                    .map(IpNet::V6)
                    .map_err(|_| UpdateMessageError::InvalidNetworkField)?
            }
        };
        // host bits must be zero
        if inner.trunc() != inner {
            return Err(UpdateMessageError::InvalidNetworkField.into());
        }
        Ok(Prefix { inner })
    }

    pub fn encode(&self, dst: &mut BytesMut) {
        let n = prefix_bytes_len(self.inner.prefix_len() as usize);
        dst.put_u8(self.inner.prefix_len());
        match self.inner {
            IpNet::V4(a) => dst.put_slice(&a.network().octets()[..n]),
            IpNet::V6(a) => dst.put_slice(&a.network().octets()[..n]),
        }
    }

    pub fn len(&self) -> usize {
        1 + prefix_bytes_len(self.inner.prefix_len() as usize)
    }
}

fn prefix_bytes_len(prefix_len: usize) -> usize {
    (prefix_len + 7) / 8
}

impl From<IpNet> for Prefix {
    fn from(inner: IpNet) -> Self {
        Self { inner }
    }
}

impl From<Prefix> for IpNet {
    fn from(val: Prefix) -> Self {
        val.inner
    }
}

impl std::fmt::Display for Prefix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.inner.fmt(f)
    }
}
