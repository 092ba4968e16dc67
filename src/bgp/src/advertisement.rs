use std::net::IpAddr;

use ipnet::IpNet;

use crate::error::AdvertisementError;

/// A route announced to a peer for one load balancer address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Advertisement {
    pub prefix: IpNet,
    pub next_hop: Option<IpAddr>,
    pub local_pref: u32,
    /// Kept sorted so that equal sets compare equal.
    pub communities: Vec<u32>,
}

impl Advertisement {
    pub const MAX_COMMUNITIES: usize = 63;

    /// Builds the advertisement for `ip` aggregated to `prefix_len` bits.
    pub fn new(
        ip: IpAddr,
        prefix_len: u8,
        local_pref: u32,
        mut communities: Vec<u32>,
    ) -> Result<Self, AdvertisementError> {
        let prefix = IpNet::new(ip, prefix_len)
            .map_err(|_| AdvertisementError::InvalidPrefixLength {
                addr: ip.to_string(),
                len: prefix_len,
            })?
            .trunc();
        communities.sort_unstable();
        communities.dedup();
        let ad = Self {
            prefix,
            next_hop: None,
            local_pref,
            communities,
        };
        ad.validate()?;
        Ok(ad)
    }

    pub fn validate(&self) -> Result<(), AdvertisementError> {
        if self.communities.len() > Self::MAX_COMMUNITIES {
            return Err(AdvertisementError::TooManyCommunities(
                self.communities.len(),
            ));
        }
        Ok(())
    }
}

/// Parses a community in `ASN:value` form, each half a 16 bit number.
pub fn parse_community(s: &str) -> Result<u32, AdvertisementError> {
    let invalid = || AdvertisementError::InvalidCommunity(s.to_string());
    let (high, low) = s.split_once(':').ok_or_else(invalid)?;
    let high: u16 = high.trim().parse().map_err(|_| invalid())?;
    let low: u16 = low.trim().parse().map_err(|_| invalid())?;
    Ok(((high as u32) << 16) + low as u32)
}
