use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::fs;
use std::net::IpAddr;

use ipnet::IpNet;
use lbspeakerd_bgp::advertisement::{parse_community, Advertisement};
use lbspeakerd_bgp::config::PeerConfig;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub(crate) const DEFAULT_METRICS_ENDPOINT: &str = "0.0.0.0:7472";
pub(crate) const DEFAULT_REQUEUE_INTERVAL: u64 = 10;

fn default_metrics_endpoint() -> String {
    DEFAULT_METRICS_ENDPOINT.to_string()
}

fn default_requeue_interval() -> u64 {
    DEFAULT_REQUEUE_INTERVAL
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub node_name: String,
    /// Merged over the labels of the Node object when selecting peers.
    #[serde(default)]
    pub node_labels: BTreeMap<String, String>,
    #[serde(default)]
    pub peers: Vec<PeerConfig>,
    #[serde(default)]
    pub pools: Vec<AddressPool>,
    /// Community aliases, name -> `ASN:value`.
    #[serde(default)]
    pub bgp_communities: BTreeMap<String, String>,
    /// Interfaces the layer2 responders may use, all when empty.
    #[serde(default)]
    pub interfaces: Vec<String>,
    #[serde(default = "default_metrics_endpoint")]
    pub metrics_endpoint: String,
    #[serde(default = "default_requeue_interval")]
    pub requeue_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node_name: String::new(),
            node_labels: BTreeMap::new(),
            peers: Vec::new(),
            pools: Vec::new(),
            bgp_communities: BTreeMap::new(),
            interfaces: Vec::new(),
            metrics_endpoint: default_metrics_endpoint(),
            requeue_interval_secs: default_requeue_interval(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Bgp,
    Layer2,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Bgp => write!(f, "bgp"),
            Protocol::Layer2 => write!(f, "layer2"),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AddressPool {
    pub name: String,
    pub protocol: Protocol,
    pub addresses: Vec<IpNet>,
    #[serde(default)]
    pub bgp_advertisements: Vec<BgpAdvertisementConfig>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct BgpAdvertisementConfig {
    #[serde(default)]
    pub aggregation_length: Option<u8>,
    #[serde(default)]
    pub aggregation_length_v6: Option<u8>,
    #[serde(default)]
    pub local_pref: u32,
    /// `ASN:value` or an alias from `bgp_communities`.
    #[serde(default)]
    pub communities: Vec<String>,
    /// Peer names this advertisement is limited to, every peer when empty.
    #[serde(default)]
    pub peers: Vec<String>,
}

/// An address pool with its advertisements resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pool {
    pub name: String,
    pub protocol: Protocol,
    pub cidrs: Vec<IpNet>,
    pub advertisements: Vec<BgpAdvertisement>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BgpAdvertisement {
    pub aggregation_length: u8,
    pub aggregation_length_v6: u8,
    pub local_pref: u32,
    pub communities: Vec<u32>,
    pub peers: Vec<String>,
}

impl Default for BgpAdvertisement {
    fn default() -> Self {
        Self {
            aggregation_length: 32,
            aggregation_length_v6: 128,
            local_pref: 0,
            communities: Vec::new(),
            peers: Vec::new(),
        }
    }
}

impl BgpAdvertisement {
    /// The route for `ip`, aggregated to this advertisement's length.
    pub fn route(&self, ip: IpAddr) -> Result<Advertisement, lbspeakerd_bgp::error::AdvertisementError> {
        let len = match ip {
            IpAddr::V4(_) => self.aggregation_length,
            IpAddr::V6(_) => self.aggregation_length_v6,
        };
        Advertisement::new(ip, len, self.local_pref, self.communities.clone())
    }
}

/// Whether an advertisement limited to `peers` goes to `peer`. An empty list selects all.
pub fn selects_peer(peers: &[String], peer: &PeerConfig) -> bool {
    peers.is_empty() || peers.iter().any(|name| *name == peer.name)
}

impl Pool {
    pub fn contains(&self, ip: &IpAddr) -> bool {
        self.cidrs.iter().any(|cidr| cidr.contains(ip))
    }
}

/// The pool whose CIDRs contain `ip`.
pub fn pool_for<'a>(pools: &'a [Pool], ip: &IpAddr) -> Option<&'a Pool> {
    pools.iter().find(|pool| pool.contains(ip))
}

impl Config {
    pub fn load(file: &str) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(file)?;
        let config: Config = serde_yaml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut keys = HashSet::new();
        for peer in self.peers.iter() {
            peer.validate().map_err(|source| ConfigError::Peer {
                peer: peer.display_name(),
                source,
            })?;
            if !keys.insert(peer.key()) {
                return Err(ConfigError::DuplicatePeer(peer.key()));
            }
        }
        self.pools().map(|_| ())
    }

    /// Resolves every pool, rejecting overlaps and bad advertisements.
    pub fn pools(&self) -> Result<Vec<Pool>, ConfigError> {
        let mut names = HashSet::new();
        let mut seen: Vec<(&str, IpNet)> = Vec::new();
        let mut pools = Vec::with_capacity(self.pools.len());
        for pool in self.pools.iter() {
            if !names.insert(pool.name.as_str()) {
                return Err(ConfigError::DuplicatePool(pool.name.clone()));
            }
            if pool.addresses.is_empty() {
                return Err(ConfigError::EmptyPool(pool.name.clone()));
            }
            for cidr in pool.addresses.iter() {
                if let Some((other_pool, other)) = seen
                    .iter()
                    .find(|(_, other)| other.contains(cidr) || cidr.contains(other))
                {
                    return Err(ConfigError::OverlappingCidr {
                        pool: pool.name.clone(),
                        cidr: cidr.to_string(),
                        other: format!("{} in pool {}", other, other_pool),
                    });
                }
                seen.push((pool.name.as_str(), *cidr));
            }

            let advertisements = if pool.bgp_advertisements.is_empty() {
                vec![BgpAdvertisement::default()]
            } else {
                pool.bgp_advertisements
                    .iter()
                    .map(|ad| self.resolve_advertisement(pool, ad))
                    .collect::<Result<Vec<_>, _>>()?
            };
            pools.push(Pool {
                name: pool.name.clone(),
                protocol: pool.protocol,
                cidrs: pool.addresses.clone(),
                advertisements,
            });
        }
        Ok(pools)
    }

    fn resolve_advertisement(
        &self,
        pool: &AddressPool,
        ad: &BgpAdvertisementConfig,
    ) -> Result<BgpAdvertisement, ConfigError> {
        let aggregation_length = ad.aggregation_length.unwrap_or(32);
        let aggregation_length_v6 = ad.aggregation_length_v6.unwrap_or(128);
        for cidr in pool.addresses.iter() {
            let (len, max) = match cidr {
                IpNet::V4(_) => (aggregation_length, 32),
                IpNet::V6(_) => (aggregation_length_v6, 128),
            };
            // an aggregate wider than the pool would cover addresses it does not own
            if len > max || len < cidr.prefix_len() {
                return Err(ConfigError::InvalidAggregationLength {
                    pool: pool.name.clone(),
                    cidr: cidr.to_string(),
                    len,
                });
            }
        }

        let mut communities = ad
            .communities
            .iter()
            .map(|c| {
                let value = self.bgp_communities.get(c).unwrap_or(c);
                parse_community(value).map_err(|_| ConfigError::InvalidCommunity(c.clone()))
            })
            .collect::<Result<Vec<u32>, _>>()?;
        communities.sort_unstable();
        communities.dedup();
        if communities.len() > Advertisement::MAX_COMMUNITIES {
            return Err(ConfigError::TooManyCommunities(pool.name.clone()));
        }

        Ok(BgpAdvertisement {
            aggregation_length,
            aggregation_length_v6,
            local_pref: ad.local_pref,
            communities,
            peers: ad.peers.clone(),
        })
    }
}
