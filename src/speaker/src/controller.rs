use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;

use futures::{FutureExt, StreamExt};
use k8s_openapi::api::core::v1::{Endpoints, Node, Service};
use kube::{
    runtime::{
        controller::Action,
        reflector::{ObjectRef, Store},
        watcher::{self, Config},
        Controller, WatchStreamExt,
    },
    Api, Client, ResourceExt,
};
use lbspeakerd_layer2::election::Election;
use lbspeakerd_trace::{error::TraceableError, metrics::Metrics};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing_futures::Instrument;

use crate::bgp::BgpAnnouncer;
use crate::error::Error;
use crate::resolver::service_name;
use crate::speaker::Speaker;

pub const SERVICE_DELETED: &str = "service deleted";
/// Nodes carrying this label never take over layer2 addresses.
pub const EXCLUDE_LABEL: &str = "node.kubernetes.io/exclude-from-external-load-balancers";

pub struct Context {
    pub client: Client,
    pub speaker: Arc<Speaker>,
    pub interval: u64,
    pub metrics: Metrics,
}

#[tracing::instrument(skip_all, fields(name = %service_name(&svc)))]
pub async fn reconciler(svc: Arc<Service>, ctx: Arc<Context>) -> Result<Action, Error> {
    let _timer = ctx
        .metrics
        .reconcile_duration
        .with_label_values(&[])
        .start_timer();

    let name = service_name(&svc);
    let ns = svc
        .namespace()
        .ok_or_else(|| Error::MissingField("metadata.namespace".to_string()))?;
    let endpoints = Api::<Endpoints>::namespaced(ctx.client.clone(), &ns);
    let eps = endpoints.get_opt(&svc.name_any()).await?.unwrap_or_default();

    ctx.speaker.update_balancer(&name, &svc, &eps)?;
    Ok(Action::await_change())
}

pub fn error_policy(svc: Arc<Service>, error: &Error, ctx: Arc<Context>) -> Action {
    if error.is_transient() {
        tracing::warn!(name = %service_name(&svc), error = %error, "reconcile failed");
    } else {
        tracing::error!(name = %service_name(&svc), error = %error, "reconcile failed");
    }
    ctx.metrics.reconcile_failure(&error.metric_label());
    Action::requeue(Duration::from_secs(ctx.interval))
}

/// Withdraws services this node announces that no longer exist.
pub fn sweep(speaker: &Speaker, live: &HashSet<String>) -> Result<usize, Error> {
    let mut deleted = 0;
    for name in speaker.announced_names()?.iter() {
        if live.contains(name) {
            continue;
        }
        speaker.delete_balancer(name, SERVICE_DELETED)?;
        deleted += 1;
    }
    Ok(deleted)
}

async fn sweep_loop(store: Store<Service>, speaker: Arc<Speaker>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        let live: HashSet<String> = store.state().iter().map(|svc| service_name(svc)).collect();
        match sweep(&speaker, &live) {
            Ok(0) => {}
            Ok(n) => tracing::info!(count = n, "withdrew deleted services"),
            Err(e) => tracing::warn!(error = %e, "failed to sweep deleted services"),
        }
    }
}

pub fn node_ready(node: &Node) -> bool {
    if node.labels().contains_key(EXCLUDE_LABEL) {
        return false;
    }
    node.status
        .as_ref()
        .and_then(|status| status.conditions.as_ref())
        .and_then(|conditions| conditions.iter().find(|c| c.type_ == "Ready"))
        .map(|c| c.status == "True")
        .unwrap_or(false)
}

/// Labels used for peer selection, `overrides` win over the Node object.
pub fn node_labels(
    node: &Node,
    overrides: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut labels = node.labels().clone();
    labels.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
    labels
}

/// Feeds node readiness into the election and this node's labels into the
/// BGP peer selection.
pub struct NodeWatcher {
    node_name: String,
    overrides: BTreeMap<String, String>,
    election: Arc<Election>,
    bgp: Option<Arc<BgpAnnouncer>>,
    known: BTreeSet<String>,
    labels: Option<BTreeMap<String, String>>,
}

impl NodeWatcher {
    pub fn new(
        node_name: &str,
        overrides: BTreeMap<String, String>,
        election: Arc<Election>,
        bgp: Option<Arc<BgpAnnouncer>>,
    ) -> Self {
        Self {
            node_name: node_name.to_string(),
            overrides,
            election,
            bgp,
            known: BTreeSet::new(),
            labels: None,
        }
    }

    fn apply(&mut self, node: &Node) -> Result<(), Error> {
        let name = node.name_any();
        self.election.set_node(&name, node_ready(node))?;
        self.known.insert(name.clone());
        if name != self.node_name {
            return Ok(());
        }
        let labels = node_labels(node, &self.overrides);
        if self.labels.as_ref() == Some(&labels) {
            return Ok(());
        }
        if let Some(bgp) = &self.bgp {
            let sessions = bgp.sync_peers(&labels)?;
            tracing::info!(sessions = sessions, "synced BGP peers");
        }
        self.labels = Some(labels);
        Ok(())
    }

    fn remove(&mut self, name: &str) -> Result<(), Error> {
        self.known.remove(name);
        self.election.remove_node(name)?;
        Ok(())
    }

    pub fn handle(&mut self, event: watcher::Event<Node>) -> Result<(), Error> {
        match event {
            watcher::Event::Applied(node) => self.apply(&node),
            watcher::Event::Deleted(node) => self.remove(&node.name_any()),
            watcher::Event::Restarted(nodes) => {
                let current: BTreeSet<String> = nodes.iter().map(|n| n.name_any()).collect();
                let gone: Vec<String> = self.known.difference(&current).cloned().collect();
                for name in gone.iter() {
                    self.remove(name)?;
                }
                for node in nodes.iter() {
                    self.apply(node)?;
                }
                Ok(())
            }
        }
    }

    pub async fn run(mut self, api: Api<Node>) {
        tracing::info!("Start Node watcher");
        let stream = watcher::watcher(api, Config::default()).default_backoff();
        futures::pin_mut!(stream);
        while let Some(event) = stream.next().await {
            let res = match event {
                Ok(event) => self.handle(event),
                Err(e) => {
                    tracing::warn!(error = %e, "node watch failed");
                    continue;
                }
            };
            if let Err(e) = res {
                tracing::error!(error = %e, "failed to handle node event");
            }
        }
    }
}

/// Runs the Service controller, the Node watcher and the deleted-service sweep
/// until a signal stops the controller.
pub async fn run(
    client: Client,
    ctx: Arc<Context>,
    nodes: NodeWatcher,
    resync: mpsc::UnboundedReceiver<()>,
) {
    let services = Api::<Service>::all(client.clone());
    let endpoints = Api::<Endpoints>::all(client.clone());

    tracing::info!("Start Service watcher");

    let controller = Controller::new(services, Config::default().any_semantic())
        .watches(endpoints, Config::default(), |eps| {
            let ns = eps.namespace()?;
            Some(ObjectRef::<Service>::new(&eps.name_any()).within(&ns))
        })
        .reconcile_all_on(UnboundedReceiverStream::new(resync))
        .shutdown_on_signal();
    let store = controller.store();

    let sweep = sweep_loop(
        store,
        ctx.speaker.clone(),
        Duration::from_secs(ctx.interval),
    )
    .instrument(tracing::info_span!("sweep"))
    .fuse();
    let nodes = nodes
        .run(Api::<Node>::all(client))
        .instrument(tracing::info_span!("node_watcher"))
        .fuse();
    let controller = controller
        .run(reconciler, error_policy, ctx)
        .filter_map(|x| async move { std::result::Result::ok(x) })
        .for_each(|_| futures::future::ready(()))
        .fuse();
    futures::pin_mut!(sweep, nodes, controller);

    futures::select_biased! {
        _ = controller => tracing::info!("Service watcher stopped"),
        _ = nodes => tracing::warn!("Node watcher stopped"),
        _ = sweep => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::announcer::Announcer;
    use crate::config::{BgpAdvertisement, Pool, Protocol};
    use crate::layer2::Layer2Announcer;
    use crate::resolver::fixtures::{endpoints, service};
    use k8s_openapi::api::core::v1::{NodeCondition, NodeStatus};
    use kube::core::ObjectMeta;
    use lbspeakerd_layer2::announce::Announce;

    fn node(name: &str, ready: &str, labels: &[(&str, &str)]) -> Node {
        Node {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(
                    labels
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect(),
                ),
                ..Default::default()
            },
            status: Some(NodeStatus {
                conditions: Some(vec![NodeCondition {
                    type_: "Ready".to_string(),
                    status: ready.to_string(),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn works_node_ready() {
        assert!(node_ready(&node("nodeA", "True", &[])));
        assert!(!node_ready(&node("nodeA", "False", &[])));
        assert!(!node_ready(&node("nodeA", "Unknown", &[])));
        assert!(!node_ready(&node("nodeA", "True", &[(EXCLUDE_LABEL, "")])));
        assert!(!node_ready(&Node::default()));
    }

    #[test]
    fn works_node_labels() {
        let n = node("nodeA", "True", &[("rack", "r1"), ("zone", "a")]);
        let overrides = BTreeMap::from([("rack".to_string(), "r2".to_string())]);
        let labels = node_labels(&n, &overrides);
        assert_eq!(Some(&"r2".to_string()), labels.get("rack"));
        assert_eq!(Some(&"a".to_string()), labels.get("zone"));
    }

    #[test]
    fn works_node_watcher_feeds_election() {
        let election = Arc::new(Election::new("nodeB"));
        let mut nodes = NodeWatcher::new("nodeB", BTreeMap::new(), election.clone(), None);
        let l2 = Layer2Announcer::new(
            Announce::new(Vec::new(), Metrics::default()),
            election.clone(),
        );
        let svc = service("LoadBalancer", Some("192.168.1.20"));
        let eps = endpoints(vec![(vec![("10.1.0.1", "nodeA"), ("10.1.0.2", "nodeB")], vec![])]);

        nodes
            .handle(watcher::Event::Restarted(vec![
                node("nodeA", "True", &[]),
                node("nodeB", "True", &[]),
            ]))
            .unwrap();
        assert_eq!(
            Some("notOwner".to_string()),
            l2.should_announce("ns/svc1", &svc, &eps)
        );

        nodes
            .handle(watcher::Event::Applied(node("nodeA", "False", &[])))
            .unwrap();
        assert_eq!(None, l2.should_announce("ns/svc1", &svc, &eps));

        nodes
            .handle(watcher::Event::Applied(node("nodeA", "True", &[])))
            .unwrap();
        nodes
            .handle(watcher::Event::Deleted(node("nodeA", "True", &[])))
            .unwrap();
        assert_eq!(None, l2.should_announce("ns/svc1", &svc, &eps));

        // a relist without nodeB leaves no usable speaker
        nodes
            .handle(watcher::Event::Restarted(vec![node("nodeC", "True", &[])]))
            .unwrap();
        assert_eq!(
            Some("noUsableSpeakers".to_string()),
            l2.should_announce("ns/svc1", &svc, &eps)
        );
    }

    #[tokio::test]
    async fn works_node_watcher_syncs_peers() {
        let mut peer = lbspeakerd_bgp::config::PeerConfig::new(
            64512,
            64512,
            "127.0.0.1".parse().unwrap(),
        );
        peer.port = 1;
        peer.node_selectors = vec![BTreeMap::from([("rack".to_string(), "r1".to_string())])];
        let bgp = Arc::new(BgpAnnouncer::new("nodeA", vec![peer], Metrics::default()));
        let election = Arc::new(Election::new("nodeA"));
        let mut nodes = NodeWatcher::new("nodeA", BTreeMap::new(), election, Some(bgp.clone()));

        nodes
            .handle(watcher::Event::Applied(node("nodeA", "True", &[("rack", "r2")])))
            .unwrap();
        assert_eq!(0, bgp.session_count());
        nodes
            .handle(watcher::Event::Applied(node("nodeA", "True", &[("rack", "r1")])))
            .unwrap();
        assert_eq!(1, bgp.session_count());
        // other nodes do not touch the peers
        nodes
            .handle(watcher::Event::Applied(node("nodeB", "True", &[("rack", "r2")])))
            .unwrap();
        assert_eq!(1, bgp.session_count());

        bgp.shutdown().await;
    }

    #[tokio::test]
    async fn works_sweep() {
        let announcer = Arc::new(Layer2Announcer::new(
            Announce::new(Vec::new(), Metrics::default()),
            Arc::new(Election::new("nodeA")),
        ));
        announcer.election().set_node("nodeA", true).unwrap();
        let speaker = Speaker::new(
            "nodeA",
            vec![Pool {
                name: "lan".to_string(),
                protocol: Protocol::Layer2,
                cidrs: vec!["192.168.1.0/24".parse().unwrap()],
                advertisements: vec![BgpAdvertisement::default()],
            }],
            Metrics::default(),
        )
        .with_announcer(announcer);

        let svc = service("LoadBalancer", Some("192.168.1.20"));
        let eps = endpoints(vec![(vec![("10.1.0.1", "nodeA")], vec![])]);
        speaker.update_balancer("ns/svc1", &svc, &eps).unwrap();
        assert_eq!(vec!["ns/svc1".to_string()], speaker.announced_names().unwrap());

        let live = HashSet::from(["ns/svc1".to_string()]);
        assert_eq!(0, sweep(&speaker, &live).unwrap());
        assert_eq!(1, sweep(&speaker, &HashSet::new()).unwrap());
        assert!(speaker.announced_names().unwrap().is_empty());
    }
}
