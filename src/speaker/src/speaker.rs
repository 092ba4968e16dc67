use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};

use k8s_openapi::api::core::v1::{Endpoints, Service};
use lbspeakerd_trace::metrics::Metrics;

use crate::announcer::Announcer;
use crate::config::{pool_for, Pool, Protocol};
use crate::error::Error;
use crate::resolver::{resolve, Decision};

pub const IP_NOT_ALLOWED: &str = "ip not allowed by config";
pub const PROTOCOL_CHANGED: &str = "protocol changed";
pub const SHUTDOWN: &str = "shutdown";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Announced {
    protocol: Protocol,
    // kept so that the gauge can be cleared on withdraw
    ip: IpAddr,
}

/// Turns service and endpoint changes into announcer calls.
pub struct Speaker {
    node_name: String,
    announced: Mutex<HashMap<String, Announced>>,
    announcers: HashMap<Protocol, Arc<dyn Announcer>>,
    pools: Vec<Pool>,
    metrics: Metrics,
}

impl std::fmt::Debug for Speaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Speaker")
            .field("node_name", &self.node_name)
            .field("protocols", &self.announcers.keys().collect::<Vec<_>>())
            .field("pools", &self.pools)
            .finish()
    }
}

impl Speaker {
    pub fn new(node_name: &str, pools: Vec<Pool>, metrics: Metrics) -> Self {
        Self {
            node_name: node_name.to_string(),
            announced: Mutex::new(HashMap::new()),
            announcers: HashMap::new(),
            pools,
            metrics,
        }
    }

    pub fn with_announcer(mut self, announcer: Arc<dyn Announcer>) -> Self {
        self.announcers.insert(announcer.protocol(), announcer);
        self
    }

    fn announcer(&self, protocol: Protocol) -> Result<&Arc<dyn Announcer>, Error> {
        self.announcers
            .get(&protocol)
            .ok_or_else(|| Error::NoAnnouncer(protocol.to_string()))
    }

    fn lookup(&self, name: &str) -> Result<Option<Announced>, Error> {
        Ok(self
            .announced
            .lock()
            .map_err(|_| Error::FailedToGetLock)?
            .get(name)
            .copied())
    }

    /// Names of every service this node currently announces.
    pub fn announced_names(&self) -> Result<Vec<String>, Error> {
        let announced = self.announced.lock().map_err(|_| Error::FailedToGetLock)?;
        let mut names: Vec<String> = announced.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    /// Brings the announcement of service `name` in line with `svc` and `eps`.
    /// Errors are returned so that the caller retries later.
    #[tracing::instrument(skip(self, svc, eps))]
    pub fn update_balancer(&self, name: &str, svc: &Service, eps: &Endpoints) -> Result<(), Error> {
        let ip = match resolve(svc, eps, &self.node_name) {
            Decision::Skip(reason) => return self.delete_balancer(name, &reason.to_string()),
            Decision::Serve { ip, weight } => {
                tracing::debug!(ip = %ip, weight = weight, "serve");
                ip
            }
        };

        let pool = match pool_for(&self.pools, &ip) {
            Some(pool) => pool,
            None => {
                tracing::warn!(ip = %ip, "no pool contains the address");
                return self.delete_balancer(name, IP_NOT_ALLOWED);
            }
        };

        if let Some(prev) = self.lookup(name)? {
            if prev.protocol != pool.protocol {
                self.delete_balancer(name, PROTOCOL_CHANGED)?;
            }
        }

        let announcer = self.announcer(pool.protocol)?;
        if let Some(reason) = announcer.should_announce(name, svc, eps) {
            return self.delete_balancer(name, &reason);
        }

        announcer.set_balancer(name, ip, pool)?;

        let current = Announced {
            protocol: pool.protocol,
            ip,
        };
        let prev = self
            .announced
            .lock()
            .map_err(|_| Error::FailedToGetLock)?
            .insert(name.to_string(), current);
        if prev != Some(current) {
            if let Some(prev) = prev {
                self.metrics.withdraw(
                    &prev.protocol.to_string(),
                    name,
                    &self.node_name,
                    &prev.ip.to_string(),
                );
            }
            self.metrics.announce(
                &pool.protocol.to_string(),
                name,
                &self.node_name,
                &ip.to_string(),
            );
            tracing::info!(ip = %ip, protocol = %pool.protocol, pool = %pool.name, "service announced");
        }
        Ok(())
    }

    /// Withdraws service `name`. Unknown names are ignored. On error the
    /// service stays recorded as announced.
    #[tracing::instrument(skip(self))]
    pub fn delete_balancer(&self, name: &str, reason: &str) -> Result<(), Error> {
        let announced = match self.lookup(name)? {
            Some(announced) => announced,
            None => return Ok(()),
        };
        self.announcer(announced.protocol)?
            .delete_balancer(name, reason)?;

        self.announced
            .lock()
            .map_err(|_| Error::FailedToGetLock)?
            .remove(name);
        self.metrics.withdraw(
            &announced.protocol.to_string(),
            name,
            &self.node_name,
            &announced.ip.to_string(),
        );
        tracing::info!(ip = %announced.ip, protocol = %announced.protocol, "service withdrawn");
        Ok(())
    }

    /// Withdraws every service, then disconnects every announcer.
    pub async fn shutdown(&self) {
        let names = match self.announced_names() {
            Ok(names) => names,
            Err(e) => {
                tracing::error!(error = %e, "failed to list announced services");
                Vec::new()
            }
        };
        for name in names.iter() {
            if let Err(e) = self.delete_balancer(name, SHUTDOWN) {
                tracing::error!(name = %name, error = %e, "failed to withdraw on shutdown");
            }
        }
        for announcer in self.announcers.values() {
            announcer.shutdown().await;
        }
        tracing::info!("speaker stopped");
    }
}
