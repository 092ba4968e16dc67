use std::collections::{BTreeMap, HashMap};
use std::net::IpAddr;
use std::sync::Mutex;

use futures::future::BoxFuture;
use futures::FutureExt;
use k8s_openapi::api::core::v1::{Endpoints, Service};
use lbspeakerd_bgp::advertisement::Advertisement;
use lbspeakerd_bgp::config::PeerConfig;
use lbspeakerd_bgp::server::SessionManager;
use lbspeakerd_trace::metrics::Metrics;

use crate::announcer::Announcer;
use crate::config::{selects_peer, Pool, Protocol};
use crate::error::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Route {
    ad: Advertisement,
    // names of the peers this route is limited to, all when empty
    peers: Vec<String>,
}

fn routes_for(services: &HashMap<String, Vec<Route>>, peer: &PeerConfig) -> Vec<Advertisement> {
    services
        .values()
        .flatten()
        .filter(|route| selects_peer(&route.peers, peer))
        .map(|route| route.ad.clone())
        .collect()
}

/// Announces load balancer addresses as BGP routes to every selected peer.
#[derive(Debug)]
pub struct BgpAnnouncer {
    node_name: String,
    peers: Vec<PeerConfig>,
    manager: Mutex<SessionManager>,
    services: Mutex<HashMap<String, Vec<Route>>>,
    metrics: Metrics,
}

impl BgpAnnouncer {
    pub fn new(node_name: &str, peers: Vec<PeerConfig>, metrics: Metrics) -> Self {
        Self {
            node_name: node_name.to_string(),
            peers,
            manager: Mutex::new(SessionManager::new(node_name, metrics.clone())),
            services: Mutex::new(HashMap::new()),
            metrics,
        }
    }

    /// Starts sessions to the peers selecting a node with `labels` and stops
    /// the rest. Returns the number of running sessions.
    pub fn sync_peers(&self, labels: &BTreeMap<String, String>) -> Result<usize, Error> {
        let services = self.services.lock().map_err(|_| Error::FailedToGetLock)?;
        let mut manager = self.manager.lock().map_err(|_| Error::FailedToGetLock)?;
        let n = manager.sync_peers(&self.peers, labels)?;
        manager.update(|peer| routes_for(&services, peer))?;
        Ok(n)
    }

    pub fn session_count(&self) -> usize {
        self.manager
            .lock()
            .map(|manager| manager.sessions().count())
            .unwrap_or_default()
    }

    fn push(&self, services: &HashMap<String, Vec<Route>>) -> Result<(), Error> {
        let manager = self.manager.lock().map_err(|_| Error::FailedToGetLock)?;
        manager.update(|peer| routes_for(services, peer))?;
        Ok(())
    }
}

impl Announcer for BgpAnnouncer {
    fn protocol(&self) -> Protocol {
        Protocol::Bgp
    }

    fn should_announce(&self, _name: &str, _svc: &Service, _eps: &Endpoints) -> Option<String> {
        None
    }

    #[tracing::instrument(skip(self, pool), fields(pool = %pool.name))]
    fn set_balancer(&self, name: &str, ip: IpAddr, pool: &Pool) -> Result<(), Error> {
        let routes = pool
            .advertisements
            .iter()
            .map(|ad| {
                Ok(Route {
                    ad: ad.route(ip)?,
                    peers: ad.peers.clone(),
                })
            })
            .collect::<Result<Vec<Route>, lbspeakerd_bgp::error::AdvertisementError>>()
            .map_err(lbspeakerd_bgp::error::Error::from)?;

        let mut services = self.services.lock().map_err(|_| Error::FailedToGetLock)?;
        if services.get(name) == Some(&routes) {
            return Ok(());
        }
        tracing::info!(routes = routes.len(), "advertise");
        services.insert(name.to_string(), routes);
        self.push(&services)
    }

    #[tracing::instrument(skip(self))]
    fn delete_balancer(&self, name: &str, reason: &str) -> Result<(), Error> {
        let mut services = self.services.lock().map_err(|_| Error::FailedToGetLock)?;
        if services.remove(name).is_none() {
            return Ok(());
        }
        tracing::info!("withdraw");
        self.push(&services)
    }

    fn shutdown(&self) -> BoxFuture<'_, ()> {
        async move {
            let manager = match self.manager.lock() {
                Ok(mut manager) => Some(std::mem::replace(
                    &mut *manager,
                    SessionManager::new(&self.node_name, self.metrics.clone()),
                )),
                Err(_) => None,
            };
            if let Some(mut manager) = manager {
                tracing::info!("close BGP sessions");
                manager.shutdown().await;
            }
            if let Ok(mut services) = self.services.lock() {
                services.clear();
            }
        }
        .boxed()
    }
}
