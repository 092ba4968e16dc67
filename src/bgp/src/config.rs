use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::*;

fn default_port() -> u16 {
    PeerConfig::DEFAULT_PORT
}

fn default_hold_time() -> u64 {
    PeerConfig::DEFAULT_HOLD_TIME
}

/// A BGP neighbor this node may announce load balancer routes to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerConfig {
    #[serde(default)]
    pub name: String,
    pub my_asn: u32,
    pub asn: u32,
    pub addr: IpAddr,
    #[serde(default)]
    pub src_addr: Option<IpAddr>,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Seconds.
    #[serde(default = "default_hold_time")]
    pub hold_time: u64,
    /// Seconds, hold_time / 3 when unset.
    #[serde(default)]
    pub keepalive_time: Option<u64>,
    #[serde(default)]
    pub router_id: Option<Ipv4Addr>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub ebgp_multihop: bool,
    /// An empty list selects every node.
    #[serde(default)]
    pub node_selectors: Vec<BTreeMap<String, String>>,
}

impl PeerConfig {
    pub const DEFAULT_PORT: u16 = 179;
    pub const DEFAULT_HOLD_TIME: u64 = 90;
    pub const CONNECT_TIMEOUT: u64 = 10;
    pub const MAX_PASSWORD_LENGTH: usize = 80;

    pub fn new(my_asn: u32, asn: u32, addr: IpAddr) -> Self {
        Self {
            name: String::new(),
            my_asn,
            asn,
            addr,
            src_addr: None,
            port: Self::DEFAULT_PORT,
            hold_time: Self::DEFAULT_HOLD_TIME,
            keepalive_time: None,
            router_id: None,
            password: None,
            ebgp_multihop: false,
            node_selectors: Vec::new(),
        }
    }

    pub fn is_ibgp(&self) -> bool {
        self.asn == self.my_asn
    }

    /// Identity of the session, unique per neighbor.
    pub fn key(&self) -> String {
        match self.addr {
            IpAddr::V4(a) => format!("{}:{}", a, self.port),
            IpAddr::V6(a) => format!("[{}]:{}", a, self.port),
        }
    }

    pub fn display_name(&self) -> String {
        if self.name.is_empty() {
            self.key()
        } else {
            self.name.clone()
        }
    }

    pub fn selects(&self, labels: &BTreeMap<String, String>) -> bool {
        self.node_selectors.is_empty()
            || self
                .node_selectors
                .iter()
                .any(|selector| selector.iter().all(|(k, v)| labels.get(k) == Some(v)))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.hold_time == 1 || self.hold_time == 2 || self.hold_time > u16::MAX as u64 {
            return Err(ConfigError::InvalidHoldTime(self.hold_time));
        }
        if let Some(keepalive) = self.keepalive_time {
            if self.hold_time != 0 && keepalive >= self.hold_time {
                return Err(ConfigError::InvalidArgument(format!(
                    "keepalive_time {} must be shorter than hold_time {}",
                    keepalive, self.hold_time
                )));
            }
        }
        if let Some(password) = &self.password {
            if password.len() > Self::MAX_PASSWORD_LENGTH {
                return Err(ConfigError::PasswordTooLong(password.len()));
            }
        }
        if self.my_asn == 0 || self.asn == 0 {
            return Err(ConfigError::InvalidArgument(
                "AS numbers must be non-zero".to_string(),
            ));
        }
        if let Some(src) = self.src_addr {
            if src.is_ipv4() != self.addr.is_ipv4() {
                return Err(ConfigError::InvalidArgument(format!(
                    "src_addr {} and addr {} belong to different families",
                    src, self.addr
                )));
            }
        }
        Ok(())
    }

    /// Keepalive interval for a negotiated hold time, None when timers are disabled.
    pub fn keepalive(&self, hold_time: u16) -> Option<Duration> {
        if hold_time == 0 {
            return None;
        }
        let secs = match self.keepalive_time {
            Some(k) => k.min(hold_time as u64),
            None => hold_time as u64 / 3,
        };
        Some(Duration::from_secs(secs.max(1)))
    }
}
