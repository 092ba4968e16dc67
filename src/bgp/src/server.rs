use std::collections::{BTreeMap, HashMap};

use lbspeakerd_trace::metrics::Metrics;

use crate::advertisement::Advertisement;
use crate::config::PeerConfig;
use crate::error::Error;
use crate::peer::session::SessionHandle;

/// Owns every BGP session of this node, keyed by neighbor address.
#[derive(Debug)]
pub struct SessionManager {
    node_name: String,
    sessions: HashMap<String, SessionHandle>,
    retired: Vec<SessionHandle>,
    metrics: Metrics,
}

impl SessionManager {
    pub fn new(node_name: &str, metrics: Metrics) -> Self {
        Self {
            node_name: node_name.to_string(),
            sessions: HashMap::new(),
            retired: Vec::new(),
            metrics,
        }
    }

    /// Makes the running sessions match `peers` for a node carrying `labels`.
    /// Nothing changes when any peer fails validation.
    #[tracing::instrument(skip_all, fields(node = %self.node_name))]
    pub fn sync_peers(
        &mut self,
        peers: &[PeerConfig],
        labels: &BTreeMap<String, String>,
    ) -> Result<usize, Error> {
        for peer in peers.iter() {
            peer.validate()?;
        }
        let mut wanted: HashMap<String, &PeerConfig> = HashMap::new();
        for peer in peers.iter().filter(|p| p.selects(labels)) {
            let key = peer.key();
            if wanted.contains_key(&key) {
                tracing::warn!(peer = %key, name = %peer.display_name(), "duplicate peer, ignored");
                continue;
            }
            wanted.insert(key, peer);
        }

        let stale: Vec<String> = self
            .sessions
            .iter()
            .filter(|(key, handle)| wanted.get(*key) != Some(&handle.config()))
            .map(|(key, _)| key.clone())
            .collect();
        for key in stale.into_iter() {
            if let Some(handle) = self.sessions.remove(&key) {
                tracing::info!(peer = %key, "close session");
                handle.close();
                self.retired.push(handle);
            }
        }
        self.retired.retain(|handle| !handle.is_finished());

        for (key, peer) in wanted.into_iter() {
            if self.sessions.contains_key(&key) {
                continue;
            }
            tracing::info!(peer = %key, asn = peer.asn, my_asn = peer.my_asn, "start session");
            let handle = SessionHandle::spawn(peer.clone(), &self.node_name, self.metrics.clone());
            self.sessions.insert(key, handle);
        }
        Ok(self.sessions.len())
    }

    /// Hands every session the routes `f` computes for its neighbor.
    pub fn update<F>(&self, f: F) -> Result<(), Error>
    where
        F: Fn(&PeerConfig) -> Vec<Advertisement>,
    {
        for handle in self.sessions.values() {
            handle.set(f(handle.config()))?;
        }
        Ok(())
    }

    pub fn sessions(&self) -> impl Iterator<Item = &SessionHandle> {
        self.sessions.values()
    }

    pub fn get(&self, key: &str) -> Option<&SessionHandle> {
        self.sessions.get(key)
    }

    /// Withdraws everything from every neighbor and waits for the sessions to end.
    pub async fn shutdown(&mut self) {
        let handles: Vec<SessionHandle> = self
            .sessions
            .drain()
            .map(|(_, handle)| handle)
            .chain(self.retired.drain(..))
            .collect();
        for handle in handles.iter() {
            handle.close();
        }
        futures::future::join_all(handles.into_iter().map(|handle| handle.closed())).await;
        tracing::info!(node = %self.node_name, "all sessions closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::codec::Codec;
    use crate::packet::message::Message;
    use futures::StreamExt;
    use tokio::net::TcpListener;
    use tokio_util::codec::Framed;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn peer(addr: &str, selector: Option<(&str, &str)>) -> PeerConfig {
        let mut conf = PeerConfig::new(64512, 65000, addr.parse().unwrap());
        // nothing listens here, sessions stay in their retry loop
        conf.port = 1;
        if let Some((k, v)) = selector {
            conf.node_selectors = vec![labels(&[(k, v)])];
        }
        conf
    }

    #[tokio::test]
    async fn works_sync_peers() {
        let mut manager = SessionManager::new("nodeA", Metrics::default());
        let node = labels(&[("rack", "r1")]);
        let peers = vec![
            peer("127.0.0.2", None),
            peer("127.0.0.3", Some(("rack", "r1"))),
            peer("127.0.0.4", Some(("rack", "r2"))),
            peer("127.0.0.2", Some(("rack", "r1"))),
        ];
        assert_eq!(2, manager.sync_peers(&peers, &node).unwrap());
        assert!(manager.get("127.0.0.2:1").is_some());
        assert!(manager.get("127.0.0.4:1").is_none());

        let mut changed = peers[1].clone();
        changed.hold_time = 30;
        assert_eq!(1, manager.sync_peers(&[changed], &node).unwrap());
        assert_eq!(
            30,
            manager.get("127.0.0.3:1").unwrap().config().hold_time
        );
        manager.shutdown().await;
        assert_eq!(0, manager.sessions().count());
    }

    #[tokio::test]
    async fn failed_sync_peers_invalid_config() {
        let mut manager = SessionManager::new("nodeA", Metrics::default());
        let mut bad = peer("127.0.0.2", None);
        bad.hold_time = 2;
        let res = manager.sync_peers(&[peer("127.0.0.3", None), bad], &BTreeMap::new());
        assert!(matches!(res, Err(Error::Config(_))));
        assert_eq!(0, manager.sessions().count());
    }

    #[tokio::test]
    async fn works_update_per_peer() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let local = listener.local_addr().unwrap();
        let mut conf = PeerConfig::new(64512, 64512, local.ip());
        conf.port = local.port();

        let mut manager = SessionManager::new("nodeA", Metrics::default());
        manager.sync_peers(&[conf], &BTreeMap::new()).unwrap();
        manager
            .update(|peer| {
                vec![Advertisement::new(
                    "10.0.0.5".parse().unwrap(),
                    32,
                    peer.asn,
                    vec![],
                )
                .unwrap()]
            })
            .unwrap();

        let (stream, _) = listener.accept().await.unwrap();
        let mut framed = Framed::new(stream, Codec::default());
        let open = framed.next().await.unwrap().unwrap();
        assert!(matches!(open, Message::Open { as_num: 64512, .. }));

        manager.shutdown().await;
    }
}
