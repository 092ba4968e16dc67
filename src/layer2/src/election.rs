use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;
use std::sync::RwLock;

use tokio::sync::mpsc;

use crate::error::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemberEvent {
    Join(String),
    Leave(String),
    Update(String),
}

/// Which speakers may take over a layer2 address.
#[derive(Debug, Default)]
pub struct SpeakerList {
    // node name -> ready, from Kubernetes
    nodes: BTreeMap<String, bool>,
    members: Option<BTreeSet<String>>,
}

impl SpeakerList {
    pub fn set_node(&mut self, node: &str, ready: bool) -> bool {
        self.nodes.insert(node.to_string(), ready) != Some(ready)
    }

    pub fn remove_node(&mut self, node: &str) -> bool {
        self.nodes.remove(node).is_some()
    }

    /// Applies a membership event, returns whether the view changed.
    /// `Update` only carries metadata and never brings back a member that left.
    pub fn handle_event(&mut self, event: &MemberEvent) -> bool {
        let members = self.members.get_or_insert_with(BTreeSet::new);
        match event {
            MemberEvent::Join(node) => members.insert(node.clone()),
            MemberEvent::Leave(node) => members.remove(node),
            MemberEvent::Update(_) => false,
        }
    }

    /// Alive members when a membership view exists, ready nodes otherwise.
    /// Fails until Kubernetes has reported at least one ready speaker.
    pub fn usable_speakers(&self) -> Result<BTreeSet<String>, Error> {
        let ready: BTreeSet<String> = self
            .nodes
            .iter()
            .filter(|(_, ready)| **ready)
            .map(|(node, _)| node.clone())
            .collect();
        if ready.is_empty() {
            return Err(Error::NoUsableSpeakers);
        }
        match &self.members {
            Some(members) => Ok(members.clone()),
            None => Ok(ready),
        }
    }
}

/// Lowest node name that both serves the service and is usable.
pub fn elect(candidates: &BTreeSet<String>, usable: &BTreeSet<String>) -> Option<String> {
    candidates.intersection(usable).next().cloned()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Leader,
    NotOwner(String),
    NoUsableSpeakers,
}

/// Leader election for the layer2 addresses of this node.
#[derive(Debug)]
pub struct Election {
    node_name: String,
    speakers: RwLock<SpeakerList>,
    resync: Option<mpsc::UnboundedSender<()>>,
}

impl Election {
    pub fn new(node_name: &str) -> Self {
        Self {
            node_name: node_name.to_string(),
            speakers: RwLock::new(SpeakerList::default()),
            resync: None,
        }
    }

    /// Membership changes are signalled on `tx` so that every service gets re-evaluated.
    pub fn with_resync(mut self, tx: mpsc::UnboundedSender<()>) -> Self {
        self.resync = Some(tx);
        self
    }

    pub fn set_node(&self, node: &str, ready: bool) -> Result<(), Error> {
        let changed = self
            .speakers
            .write()
            .map_err(|_| Error::FailedToGetLock)?
            .set_node(node, ready);
        if changed {
            tracing::info!(node = node, ready = ready, "speaker changed");
            self.notify();
        }
        Ok(())
    }

    pub fn remove_node(&self, node: &str) -> Result<(), Error> {
        let changed = self
            .speakers
            .write()
            .map_err(|_| Error::FailedToGetLock)?
            .remove_node(node);
        if changed {
            tracing::info!(node = node, "speaker removed");
            self.notify();
        }
        Ok(())
    }

    pub fn handle_event(&self, event: &MemberEvent) -> Result<(), Error> {
        let changed = self
            .speakers
            .write()
            .map_err(|_| Error::FailedToGetLock)?
            .handle_event(event);
        if changed {
            tracing::info!(event=?event, "membership changed");
            self.notify();
        }
        Ok(())
    }

    fn notify(&self) {
        if let Some(tx) = &self.resync {
            if tx.send(()).is_err() {
                tracing::debug!("resync receiver is gone");
            }
        }
    }

    /// Decides whether this node owns `ip` given the nodes serving it.
    pub fn decide(&self, ip: IpAddr, serving: &BTreeSet<String>) -> Result<Decision, Error> {
        let usable = match self
            .speakers
            .read()
            .map_err(|_| Error::FailedToGetLock)?
            .usable_speakers()
        {
            Ok(usable) => usable,
            Err(Error::NoUsableSpeakers) => return Ok(Decision::NoUsableSpeakers),
            Err(e) => return Err(e),
        };
        let decision = match elect(serving, &usable) {
            None => Decision::NoUsableSpeakers,
            Some(leader) if leader == self.node_name => Decision::Leader,
            Some(leader) => Decision::NotOwner(leader),
        };
        tracing::debug!(ip = %ip, decision = ?decision, "elected");
        Ok(decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn set(nodes: &[&str]) -> BTreeSet<String> {
        nodes.iter().map(|n| n.to_string()).collect()
    }

    #[rstest(
        candidates,
        usable,
        expected,
        case(vec!["nodeB", "nodeA"], vec!["nodeA", "nodeB"], Some("nodeA")),
        case(vec!["nodeB", "nodeA"], vec!["nodeB", "nodeC"], Some("nodeB")),
        case(vec!["nodeA"], vec!["nodeB"], None),
        case(vec![], vec!["nodeB"], None),
    )]
    fn works_elect(candidates: Vec<&str>, usable: Vec<&str>, expected: Option<&str>) {
        assert_eq!(
            expected.map(|s| s.to_string()),
            elect(&set(&candidates), &set(&usable))
        );
    }

    #[test]
    fn works_usable_speakers() {
        let mut list = SpeakerList::default();
        assert!(matches!(list.usable_speakers(), Err(Error::NoUsableSpeakers)));

        list.set_node("nodeB", false);
        assert!(matches!(list.usable_speakers(), Err(Error::NoUsableSpeakers)));
        list.set_node("nodeA", true);
        assert_eq!(set(&["nodeA"]), list.usable_speakers().unwrap());

        // the membership view takes over once populated
        assert!(list.handle_event(&MemberEvent::Join("nodeB".to_string())));
        assert!(!list.handle_event(&MemberEvent::Update("nodeB".to_string())));
        assert_eq!(set(&["nodeB"]), list.usable_speakers().unwrap());
        assert!(list.handle_event(&MemberEvent::Leave("nodeB".to_string())));
        assert!(list.usable_speakers().unwrap().is_empty());
    }

    #[test]
    fn works_update_does_not_revive_member() {
        let mut list = SpeakerList::default();
        list.set_node("nodeA", true);
        list.set_node("nodeB", true);
        list.handle_event(&MemberEvent::Join("nodeA".to_string()));
        list.handle_event(&MemberEvent::Join("nodeB".to_string()));
        list.handle_event(&MemberEvent::Leave("nodeB".to_string()));

        assert!(!list.handle_event(&MemberEvent::Update("nodeB".to_string())));
        assert!(!list.handle_event(&MemberEvent::Update("nodeC".to_string())));
        assert_eq!(set(&["nodeA"]), list.usable_speakers().unwrap());
    }

    #[test]
    fn failed_usable_speakers_without_ready_nodes() {
        let mut list = SpeakerList::default();
        list.handle_event(&MemberEvent::Join("nodeA".to_string()));
        assert!(matches!(list.usable_speakers(), Err(Error::NoUsableSpeakers)));

        list.set_node("nodeA", true);
        assert_eq!(set(&["nodeA"]), list.usable_speakers().unwrap());
        list.remove_node("nodeA");
        assert!(matches!(list.usable_speakers(), Err(Error::NoUsableSpeakers)));
    }

    #[test]
    fn works_decide() {
        let ip: IpAddr = "192.168.1.20".parse().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let election = Election::new("nodeB").with_resync(tx);
        let serving = set(&["nodeA", "nodeB"]);
        assert_eq!(Decision::NoUsableSpeakers, election.decide(ip, &serving).unwrap());

        election.set_node("nodeA", true).unwrap();
        election.set_node("nodeB", true).unwrap();
        assert_eq!(
            Decision::NotOwner("nodeA".to_string()),
            election.decide(ip, &serving).unwrap()
        );

        election.set_node("nodeA", false).unwrap();
        assert_eq!(Decision::Leader, election.decide(ip, &serving).unwrap());
        assert_eq!(3, std::iter::from_fn(|| rx.try_recv().ok()).count());
    }

    fn cluster(nodes: &[&str]) -> Vec<Election> {
        nodes
            .iter()
            .map(|n| {
                let election = Election::new(n);
                for node in nodes {
                    election.set_node(node, true).unwrap();
                }
                election
            })
            .collect()
    }

    fn leaders<'a>(
        elections: &[Election],
        nodes: &[&'a str],
        ip: IpAddr,
        serving: &BTreeSet<String>,
    ) -> Vec<&'a str> {
        elections
            .iter()
            .zip(nodes.iter())
            .filter(|(e, _)| e.decide(ip, serving).unwrap() == Decision::Leader)
            .map(|(_, n)| *n)
            .collect()
    }

    #[test]
    fn works_election_converges_after_disagreement() {
        let nodes = ["nodeA", "nodeB", "nodeC"];
        let elections = cluster(&nodes);
        let ip: IpAddr = "192.168.1.20".parse().unwrap();
        let serving = set(&nodes);

        for e in elections.iter() {
            for node in nodes {
                e.handle_event(&MemberEvent::Join(node.to_string())).unwrap();
            }
        }
        assert_eq!(vec!["nodeA"], leaders(&elections, &nodes, ip, &serving));

        // nodeA fails: nodeB learns of it first while nodeC still sees nodeA alive
        let leave = MemberEvent::Leave("nodeA".to_string());
        elections[1].handle_event(&leave).unwrap();
        assert_eq!(
            Decision::NotOwner("nodeA".to_string()),
            elections[2].decide(ip, &serving).unwrap()
        );
        assert_eq!(vec!["nodeA", "nodeB"], leaders(&elections, &nodes, ip, &serving));

        // the rest of the cluster catches up
        elections[0].handle_event(&leave).unwrap();
        elections[2].handle_event(&leave).unwrap();
        assert_eq!(vec!["nodeB"], leaders(&elections, &nodes, ip, &serving));
        assert_eq!(
            Decision::NotOwner("nodeB".to_string()),
            elections[2].decide(ip, &serving).unwrap()
        );

        // nodeA comes back, seen by nodeC before nodeB
        let join = MemberEvent::Join("nodeA".to_string());
        elections[2].handle_event(&join).unwrap();
        assert_eq!(vec!["nodeB"], leaders(&elections[1..], &nodes[1..], ip, &serving));
        elections[0].handle_event(&join).unwrap();
        elections[1].handle_event(&join).unwrap();
        assert_eq!(vec!["nodeA"], leaders(&elections, &nodes, ip, &serving));
    }

    #[test]
    fn works_election_under_churn() {
        let nodes = ["nodeA", "nodeB", "nodeC", "nodeD"];
        let elections = cluster(&nodes);
        let ip: IpAddr = "192.168.1.20".parse().unwrap();
        let serving = set(&["nodeB", "nodeC", "nodeD"]);

        let events = vec![
            MemberEvent::Join("nodeA".to_string()),
            MemberEvent::Join("nodeC".to_string()),
            MemberEvent::Join("nodeB".to_string()),
            MemberEvent::Leave("nodeB".to_string()),
            MemberEvent::Join("nodeD".to_string()),
            MemberEvent::Leave("nodeC".to_string()),
            MemberEvent::Update("nodeB".to_string()),
            MemberEvent::Leave("nodeD".to_string()),
            MemberEvent::Join("nodeB".to_string()),
            MemberEvent::Join("nodeC".to_string()),
        ];
        for (step, event) in events.iter().enumerate() {
            // half of the cluster applies the event before the other half
            let (early, late) = elections.split_at(2);
            for e in early {
                e.handle_event(event).unwrap();
            }
            let split = leaders(&elections, &nodes, ip, &serving);
            assert!(split.len() <= 2, "step {step}: {split:?}");
            for e in late {
                e.handle_event(event).unwrap();
            }
            let converged = leaders(&elections, &nodes, ip, &serving);
            assert!(converged.len() <= 1, "step {step}: {converged:?}");
        }
        assert_eq!(vec!["nodeB"], leaders(&elections, &nodes, ip, &serving));
    }
}
