use std::net::IpAddr;

use futures::future::BoxFuture;
use k8s_openapi::api::core::v1::{Endpoints, Service};

use crate::config::{Pool, Protocol};
use crate::error::Error;

/// Pushes load balancer addresses into the network with one protocol.
///
/// Calls must not block on network I/O: implementations hand work to their
/// own tasks and return.
pub trait Announcer: Send + Sync {
    fn protocol(&self) -> Protocol;

    /// Protocol specific gate run after the resolver decided to serve.
    /// `Some(reason)` means this node must not announce the service.
    fn should_announce(&self, name: &str, svc: &Service, eps: &Endpoints) -> Option<String>;

    /// Starts announcing `ip` for service `name`. Calling it again with the same
    /// arguments changes nothing.
    fn set_balancer(&self, name: &str, ip: IpAddr, pool: &Pool) -> Result<(), Error>;

    /// Stops announcing service `name`. Unknown names are ignored.
    fn delete_balancer(&self, name: &str, reason: &str) -> Result<(), Error>;

    /// Disconnects from the network once every service has been deleted.
    fn shutdown(&self) -> BoxFuture<'_, ()>;
}
