use std::convert::TryFrom;
use std::net::IpAddr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AddressFamily {
    pub afi: Afi,
    pub safi: Safi,
}

impl AddressFamily {
    pub const IPV4_UNICAST: AddressFamily = AddressFamily {
        afi: Afi::IPv4,
        safi: Safi::Unicast,
    };
    pub const IPV6_UNICAST: AddressFamily = AddressFamily {
        afi: Afi::IPv6,
        safi: Safi::Unicast,
    };

    pub fn new(afi: u16, safi: u8) -> Result<Self, &'static str> {
        let afi = Afi::try_from(afi)?;
        let safi = Safi::try_from(safi)?;
        Ok(Self { afi, safi })
    }

    pub fn unicast_for(addr: &IpAddr) -> Self {
        match addr {
            IpAddr::V4(_) => Self::IPV4_UNICAST,
            IpAddr::V6(_) => Self::IPV6_UNICAST,
        }
    }
}

impl TryFrom<u32> for AddressFamily {
    type Error = &'static str;
    fn try_from(value: u32) -> Result<Self, Self::Error> {
        let afi = Afi::try_from((value >> 16) as u16)?;
        let safi = Safi::try_from(value as u8)?;
        Ok(Self { afi, safi })
    }
}

impl From<AddressFamily> for u32 {
    fn from(family: AddressFamily) -> u32 {
        ((u16::from(family.afi) as u32) << 16) + u8::from(family.safi) as u32
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Afi {
    IPv4 = 1,
    IPv6 = 2,
}

impl Afi {
    /// Longest prefix length representable in this family.
    pub fn max_prefix_len(&self) -> u8 {
        match self {
            Afi::IPv4 => 32,
            Afi::IPv6 => 128,
        }
    }
}

impl TryFrom<u16> for Afi {
    type Error = &'static str;
    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::IPv4),
            2 => Ok(Self::IPv6),
            _ => Err("invalid AFI"),
        }
    }
}

impl From<Afi> for u16 {
    fn from(afi: Afi) -> u16 {
        afi as u16
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Safi {
    Unicast = 1,
    Multicast = 2,
}

impl TryFrom<u8> for Safi {
    type Error = &'static str;
    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Unicast),
            2 => Ok(Self::Multicast),
            _ => Err("unsupported SAFI number"),
        }
    }
}

impl From<Safi> for u8 {
    fn from(safi: Safi) -> u8 {
        safi as u8
    }
}

#[cfg(test)]
mod tests {
    use super::{AddressFamily, Afi, Safi};
    use rstest::rstest;

    #[rstest(input, expected,
        case(0x0001_0001, AddressFamily{afi: Afi::IPv4, safi: Safi::Unicast}),
        case(0x0002_0001, AddressFamily{afi: Afi::IPv6, safi: Safi::Unicast}),
        case(0x0002_0002, AddressFamily{afi: Afi::IPv6, safi: Safi::Multicast}),
    )]
    fn works_address_family_try_from(input: u32, expected: AddressFamily) {
        let family = AddressFamily::try_from(input).unwrap();
        assert_eq!(family, expected);
        assert_eq!(input, u32::from(family));
    }

    #[rstest(
        input,
        expected,
        case(0x0003_0001, "invalid AFI"),
        case(0x0001_0000, "unsupported SAFI number")
    )]
    fn failed_address_family_try_from(input: u32, expected: &'static str) {
        assert_eq!(Err(expected), AddressFamily::try_from(input));
    }
}
