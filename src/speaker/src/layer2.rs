use std::net::IpAddr;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use k8s_openapi::api::core::v1::{Endpoints, Service};
use lbspeakerd_layer2::announce::Announce;
use lbspeakerd_layer2::election::{Decision, Election};

use crate::announcer::Announcer;
use crate::config::{Pool, Protocol};
use crate::error::Error;
use crate::resolver::{assigned_ip, serving_nodes};

pub const NOT_OWNER: &str = "notOwner";
pub const NO_USABLE_SPEAKERS: &str = "noUsableSpeakers";

/// Answers ARP and NDP for the addresses this node wins the election for.
#[derive(Debug)]
pub struct Layer2Announcer {
    announce: Announce,
    election: Arc<Election>,
}

impl Layer2Announcer {
    pub fn new(announce: Announce, election: Arc<Election>) -> Self {
        Self { announce, election }
    }

    pub fn election(&self) -> &Arc<Election> {
        &self.election
    }
}

impl Announcer for Layer2Announcer {
    fn protocol(&self) -> Protocol {
        Protocol::Layer2
    }

    fn should_announce(&self, name: &str, svc: &Service, eps: &Endpoints) -> Option<String> {
        let ip = match assigned_ip(svc) {
            Some(ip) => ip,
            None => return Some(NOT_OWNER.to_string()),
        };
        match self.election.decide(ip, &serving_nodes(eps)) {
            Ok(Decision::Leader) => None,
            Ok(Decision::NotOwner(leader)) => {
                tracing::debug!(name = name, ip = %ip, leader = %leader, "not the owner");
                Some(NOT_OWNER.to_string())
            }
            Ok(Decision::NoUsableSpeakers) => Some(NO_USABLE_SPEAKERS.to_string()),
            Err(e) => {
                tracing::warn!(name = name, ip = %ip, error = %e, "failed to elect a leader");
                Some(NO_USABLE_SPEAKERS.to_string())
            }
        }
    }

    fn set_balancer(&self, name: &str, ip: IpAddr, _pool: &Pool) -> Result<(), Error> {
        self.announce.set_balancer(name, ip)?;
        Ok(())
    }

    fn delete_balancer(&self, name: &str, reason: &str) -> Result<(), Error> {
        tracing::debug!(name = name, reason = reason, "delete layer2 balancer");
        self.announce.delete_balancer(name)?;
        Ok(())
    }

    fn shutdown(&self) -> BoxFuture<'_, ()> {
        async move {
            tracing::info!("stop layer2 responders");
            self.announce.close();
        }
        .boxed()
    }
}
