use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::net::IpAddr;

use k8s_openapi::api::core::v1::{EndpointAddress, Endpoints, Service};
use kube::ResourceExt;

pub const LOADBALANCER: &str = "LoadBalancer";

/// Why a node does not announce a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
    NotLoadBalancer,
    NoIpAssigned,
    NoServingEndpoints,
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reason::NotLoadBalancer => write!(f, "not a LoadBalancer"),
            Reason::NoIpAssigned => write!(f, "no IP assigned yet"),
            Reason::NoServingEndpoints => write!(f, "no serving endpoints on this node"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// `weight` is the number of local ready endpoints.
    Serve { ip: IpAddr, weight: usize },
    Skip(Reason),
}

/// `namespace/name` of a service.
pub fn service_name(svc: &Service) -> String {
    format!("{}/{}", svc.namespace().unwrap_or_default(), svc.name_any())
}

pub fn is_loadbalancer(svc: &Service) -> bool {
    svc.spec
        .as_ref()
        .and_then(|spec| spec.type_.as_deref())
        .map(|t| t == LOADBALANCER)
        .unwrap_or(false)
}

/// The first ingress IP of the service status.
pub fn assigned_ip(svc: &Service) -> Option<IpAddr> {
    svc.status
        .as_ref()?
        .load_balancer
        .as_ref()?
        .ingress
        .as_ref()?
        .first()?
        .ip
        .as_ref()?
        .parse()
        .ok()
}

fn not_ready(eps: &Endpoints) -> HashSet<&str> {
    eps.subsets
        .iter()
        .flatten()
        .flat_map(|subset| subset.not_ready_addresses.iter().flatten())
        .map(|addr| addr.ip.as_str())
        .collect()
}

fn ready(eps: &Endpoints) -> impl Iterator<Item = &EndpointAddress> {
    eps.subsets
        .iter()
        .flatten()
        .flat_map(|subset| subset.addresses.iter().flatten())
}

/// Ready endpoint addresses on `node`. An address listed as not ready in any
/// subset is excluded no matter which node reports it.
pub fn local_endpoints(eps: &Endpoints, node: &str) -> BTreeSet<String> {
    let not_ready = not_ready(eps);
    ready(eps)
        .filter(|addr| addr.node_name.as_deref() == Some(node))
        .filter(|addr| !not_ready.contains(addr.ip.as_str()))
        .map(|addr| addr.ip.clone())
        .collect()
}

/// Every node hosting at least one serving endpoint.
pub fn serving_nodes(eps: &Endpoints) -> BTreeSet<String> {
    let not_ready = not_ready(eps);
    ready(eps)
        .filter(|addr| !not_ready.contains(addr.ip.as_str()))
        .filter_map(|addr| addr.node_name.clone())
        .collect()
}

/// Decides whether `node` should announce `svc`. Rules apply in order and the
/// first match wins.
pub fn resolve(svc: &Service, eps: &Endpoints, node: &str) -> Decision {
    if !is_loadbalancer(svc) {
        return Decision::Skip(Reason::NotLoadBalancer);
    }
    let ip = match assigned_ip(svc) {
        Some(ip) => ip,
        None => return Decision::Skip(Reason::NoIpAssigned),
    };
    let local = local_endpoints(eps, node);
    if local.is_empty() {
        return Decision::Skip(Reason::NoServingEndpoints);
    }
    Decision::Serve {
        ip,
        weight: local.len(),
    }
}
