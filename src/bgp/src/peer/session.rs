use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::pin::Pin;
use std::time::Duration;

use futures::{FutureExt, Sink, SinkExt, StreamExt};
use ipnet::IpNet;
use lbspeakerd_trace::metrics::Metrics;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, timeout, Instant, Interval, MissedTickBehavior, Sleep};
use tokio_util::codec::Framed;
use tracing_futures::Instrument;

use crate::advertisement::Advertisement;
use crate::config::PeerConfig;
use crate::error::*;
use crate::event::{AdministrativeEvent, BgpMessageEvent, Event, TcpConnectionEvent, TimerEvent};
use crate::family::AddressFamily;
use crate::packet::attribute::Attribute;
use crate::packet::capability::Cap;
use crate::packet::codec::Codec;
use crate::packet::message::{Message, NotificationCode, NotificationSubCode};
use crate::packet::prefix::Prefix;
use crate::sockopt;

use super::backoff::Backoff;
use super::fsm::{FiniteStateMachine, State};
use super::router_id;

#[derive(Debug)]
enum Command {
    Set(HashMap<IpNet, Advertisement>),
    Close,
}

/// Handle to a session task. The task owns the connection; callers only
/// ever talk to it through the command channel.
#[derive(Debug)]
pub struct SessionHandle {
    config: PeerConfig,
    tx: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<State>,
    task: JoinHandle<()>,
}

impl SessionHandle {
    pub fn spawn(config: PeerConfig, node_name: &str, metrics: Metrics) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(State::Idle);
        let span = tracing::info_span!(
            "bgp_session",
            peer.addr = %config.addr,
            peer.asn = config.asn,
        );
        let session = Session {
            config: config.clone(),
            node_name: node_name.to_string(),
            fsm: FiniteStateMachine::with_notifier(state_tx),
            commands: rx,
            desired: HashMap::new(),
            advertised: HashMap::new(),
            backoff: Backoff::new(),
            metrics,
        };
        let task = tokio::spawn(session.run().instrument(span));
        Self {
            config,
            tx,
            state: state_rx,
            task,
        }
    }

    pub fn config(&self) -> &PeerConfig {
        &self.config
    }

    /// Replaces the routes this session should announce. Returns without
    /// waiting for the peer; routes are buffered until the session is up.
    pub fn set(&self, ads: Vec<Advertisement>) -> Result<(), Error> {
        let mut desired = HashMap::with_capacity(ads.len());
        for ad in ads.into_iter() {
            ad.validate()?;
            desired.insert(ad.prefix, ad);
        }
        self.tx
            .send(Command::Set(desired))
            .map_err(|_| Error::SessionClosed)
    }

    pub fn state(&self) -> State {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<State> {
        self.state.clone()
    }

    /// Asks the session to withdraw its routes and hang up.
    pub fn close(&self) {
        if self.tx.send(Command::Close).is_err() {
            tracing::debug!(peer.addr=%self.config.addr, "session already stopped");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub async fn closed(self) {
        if let Err(e) = self.task.await {
            tracing::error!(peer.addr=%self.config.addr, error=%e, "session task failed");
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Negotiated {
    hold_time: u16,
    as4: bool,
    local: SocketAddr,
}

enum Input {
    Command(Option<Command>),
    Message(Option<Result<Message, Error>>),
    HoldTimerExpired,
    KeepaliveTimerExpired,
}

struct Session {
    config: PeerConfig,
    node_name: String,
    fsm: FiniteStateMachine,
    commands: mpsc::UnboundedReceiver<Command>,
    desired: HashMap<IpNet, Advertisement>,
    advertised: HashMap<IpNet, Advertisement>,
    backoff: Backoff,
    metrics: Metrics,
}

impl Session {
    // Separates the OPEN exchange from the time the peer takes to answer it.
    const OPEN_TIMEOUT: Duration = Duration::from_secs(PeerConfig::CONNECT_TIMEOUT);
    const WITHDRAW_CHUNK: usize = 256;

    async fn run(mut self) {
        self.fsm.mv(Event::Admin(AdministrativeEvent::ManualStart));
        loop {
            match self.connect_and_serve().await {
                Ok(()) => {
                    self.fsm.mv(Event::Admin(AdministrativeEvent::ManualStop));
                    self.metrics.session_down(&self.config.key());
                    tracing::info!("session closed");
                    return;
                }
                Err(e) => {
                    tracing::warn!(error=%e, "session failed");
                    self.fsm.mv(Event::from(&e));
                    self.advertised.clear();
                    self.metrics.session_down(&self.config.key());
                    let delay = self.backoff.next();
                    tracing::debug!(delay=?delay, "reconnect scheduled");
                    if !self.wait(delay).await {
                        self.fsm.mv(Event::Admin(AdministrativeEvent::ManualStop));
                        tracing::info!("session closed");
                        return;
                    }
                    self.fsm.mv(Event::Timer(TimerEvent::ConnectRetryTimerExpire));
                }
            }
        }
    }

    /// Sleeps while still taking route updates. Returns false once closed.
    async fn wait(&mut self, delay: Duration) -> bool {
        let timer = sleep(delay).fuse();
        futures::pin_mut!(timer);
        loop {
            futures::select_biased! {
                cmd = self.commands.recv().fuse() => match cmd {
                    Some(Command::Set(ads)) => self.desired = ads,
                    Some(Command::Close) | None => return false,
                },
                _ = timer => return true,
            }
        }
    }

    async fn connect_and_serve(&mut self) -> Result<(), Error> {
        let (framed, negotiated) = {
            let establish = establish(&self.config, &self.node_name, &mut self.fsm).fuse();
            futures::pin_mut!(establish);
            loop {
                futures::select_biased! {
                    res = establish => break res?,
                    cmd = self.commands.recv().fuse() => match cmd {
                        Some(Command::Set(ads)) => self.desired = ads,
                        Some(Command::Close) | None => return Ok(()),
                    },
                }
            }
        };
        tracing::info!(hold_time = negotiated.hold_time, local=%negotiated.local, "session established");
        self.backoff.reset();
        self.metrics.session_up(&self.config.key());

        let (mut sink, mut stream) = framed.split();
        let res = self.serve(&mut sink, &mut stream, &negotiated).await;
        if let Err(e) = &res {
            notify(&mut sink, e).await;
        }
        res
    }

    async fn serve<S, R>(
        &mut self,
        sink: &mut S,
        stream: &mut R,
        negotiated: &Negotiated,
    ) -> Result<(), Error>
    where
        S: Sink<Message, Error = Error> + Unpin,
        R: futures::Stream<Item = Result<Message, Error>> + Unpin,
    {
        self.send_updates(sink, negotiated).await?;

        let hold = (negotiated.hold_time > 0)
            .then(|| Duration::from_secs(negotiated.hold_time as u64));
        let mut hold_timer: Option<Pin<Box<Sleep>>> = hold.map(|h| Box::pin(sleep(h)));
        let mut keepalive_timer: Option<Interval> =
            self.config.keepalive(negotiated.hold_time).map(|period| {
                let mut timer = interval_at(Instant::now() + period, period);
                timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
                timer
            });

        loop {
            let input = {
                let hold_expire = async {
                    match hold_timer.as_mut() {
                        Some(timer) => timer.as_mut().await,
                        None => futures::future::pending::<()>().await,
                    }
                };
                let keepalive_tick = async {
                    match keepalive_timer.as_mut() {
                        Some(timer) => {
                            timer.tick().await;
                        }
                        None => futures::future::pending::<()>().await,
                    }
                };
                futures::select_biased! {
                    cmd = self.commands.recv().fuse() => Input::Command(cmd),
                    msg = stream.next().fuse() => Input::Message(msg),
                    _ = hold_expire.fuse() => Input::HoldTimerExpired,
                    _ = keepalive_tick.fuse() => Input::KeepaliveTimerExpired,
                }
            };
            match input {
                Input::Command(Some(Command::Set(ads))) => {
                    self.desired = ads;
                    self.send_updates(sink, negotiated).await?;
                }
                Input::Command(Some(Command::Close)) | Input::Command(None) => {
                    self.desired.clear();
                    self.send_updates(sink, negotiated).await?;
                    sink.send(Message::notification(
                        NotificationCode::Cease,
                        Some(NotificationSubCode::AdministrativeShutdown),
                    ))
                    .await?;
                    sink.close().await?;
                    return Ok(());
                }
                Input::Message(Some(Ok(msg))) => {
                    if let (Some(timer), Some(hold)) = (hold_timer.as_mut(), hold) {
                        timer.as_mut().reset(Instant::now() + hold);
                    }
                    self.handle_message(sink, msg, negotiated).await?;
                }
                Input::Message(Some(Err(e))) => return Err(e),
                Input::Message(None) => return Err(Error::ConnectionClosed),
                Input::HoldTimerExpired => return Err(Error::HoldTimerExpired),
                Input::KeepaliveTimerExpired => {
                    self.fsm
                        .mv(Event::Timer(TimerEvent::KeepaliveTimerExpire));
                    sink.send(Message::Keepalive).await?;
                }
            }
        }
    }

    async fn handle_message<S>(
        &mut self,
        sink: &mut S,
        msg: Message,
        negotiated: &Negotiated,
    ) -> Result<(), Error>
    where
        S: Sink<Message, Error = Error> + Unpin,
    {
        match msg {
            Message::Keepalive => {
                self.fsm.mv(Event::Message(BgpMessageEvent::KeepAliveMsg));
                Ok(())
            }
            Message::Update { .. } => {
                // routes learned from peers are not used
                self.fsm.mv(Event::Message(BgpMessageEvent::UpdateMsg));
                tracing::trace!("ignore UPDATE from peer");
                Ok(())
            }
            Message::RouteRefresh { family } => {
                tracing::info!(family=?family, "peer requested route refresh");
                self.advertised.retain(|prefix, _| {
                    AddressFamily::unicast_for(&prefix.addr()) != family
                });
                self.send_updates(sink, negotiated).await
            }
            Message::Notification { code, subcode, .. } => {
                Err(Error::PeerNotification { code, subcode })
            }
            Message::Open { .. } => Err(Error::FiniteStateMachine {
                state: self.fsm.get_state().to_string(),
            }),
        }
    }

    /// Sends what it takes to turn `advertised` into `desired`.
    async fn send_updates<S>(&mut self, sink: &mut S, negotiated: &Negotiated) -> Result<(), Error>
    where
        S: Sink<Message, Error = Error> + Unpin,
    {
        let mut changed: Vec<Advertisement> = self
            .desired
            .values()
            .filter(|ad| self.advertised.get(&ad.prefix) != Some(*ad))
            .cloned()
            .collect();
        changed.sort_by_key(|ad| ad.prefix);
        let mut withdrawn: Vec<IpNet> = self
            .advertised
            .keys()
            .filter(|prefix| !self.desired.contains_key(*prefix))
            .cloned()
            .collect();
        withdrawn.sort();

        for ad in changed.into_iter() {
            let msg = match build_update(&self.config, negotiated, &ad)? {
                Some(msg) => msg,
                None => {
                    tracing::warn!(prefix=%ad.prefix, local=%negotiated.local, "no next hop of the prefix family, skip");
                    continue;
                }
            };
            sink.send(msg).await?;
            self.metrics.update_sent(&self.config.key());
            tracing::info!(prefix=%ad.prefix, local_pref=ad.local_pref, communities=?ad.communities, "advertise");
            self.advertised.insert(ad.prefix, ad);
        }

        let (v4, v6): (Vec<IpNet>, Vec<IpNet>) = withdrawn
            .into_iter()
            .partition(|prefix| matches!(prefix, IpNet::V4(_)));
        for chunk in v4.chunks(Self::WITHDRAW_CHUNK) {
            sink.send(Message::Update {
                withdrawn_routes: chunk.iter().map(|p| Prefix::from(*p)).collect(),
                attributes: Vec::new(),
                nlri: Vec::new(),
            })
            .await?;
            self.metrics.update_sent(&self.config.key());
            for prefix in chunk.iter() {
                tracing::info!(prefix=%prefix, "withdraw");
                self.advertised.remove(prefix);
            }
        }
        for chunk in v6.chunks(Self::WITHDRAW_CHUNK / 2) {
            sink.send(Message::Update {
                withdrawn_routes: Vec::new(),
                attributes: vec![Attribute::new_mp_unreach_nlri(
                    AddressFamily::IPV6_UNICAST,
                    chunk.iter().map(|p| Prefix::from(*p)).collect(),
                )],
                nlri: Vec::new(),
            })
            .await?;
            self.metrics.update_sent(&self.config.key());
            for prefix in chunk.iter() {
                tracing::info!(prefix=%prefix, "withdraw");
                self.advertised.remove(prefix);
            }
        }
        Ok(())
    }
}

/// Runs Connect through OpenConfirm and returns an Established connection.
async fn establish(
    config: &PeerConfig,
    node_name: &str,
    fsm: &mut FiniteStateMachine,
) -> Result<(Framed<TcpStream, Codec>, Negotiated), Error> {
    let stream = sockopt::connect(config).await?;
    fsm.mv(Event::Connection(TcpConnectionEvent::TcpConnectionConfirmed));
    let local = stream.local_addr()?;
    let mut framed = Framed::new(stream, Codec::default());
    match open_exchange(config, node_name, fsm, &mut framed, local).await {
        Ok(negotiated) => Ok((framed, negotiated)),
        Err(e) => {
            notify(&mut framed, &e).await;
            Err(e)
        }
    }
}

async fn open_exchange(
    config: &PeerConfig,
    node_name: &str,
    fsm: &mut FiniteStateMachine,
    framed: &mut Framed<TcpStream, Codec>,
    local: SocketAddr,
) -> Result<Negotiated, Error> {
    let router_id = router_id::resolve(config.router_id, local.ip(), node_name);
    let mut capabilities = vec![Cap::MultiProtocol(AddressFamily::IPV4_UNICAST)];
    if config.addr.is_ipv6() {
        capabilities.push(Cap::MultiProtocol(AddressFamily::IPV6_UNICAST));
    }
    capabilities.push(Cap::RouteRefresh);
    capabilities.push(Cap::FourOctetASNumber(config.my_asn));
    framed
        .send(Message::open(
            config.my_asn,
            config.hold_time as u16,
            router_id,
            capabilities,
        ))
        .await?;
    tracing::debug!(router_id=%router_id, "sent OPEN");

    let negotiated = match recv(framed, Session::OPEN_TIMEOUT).await? {
        Message::Open {
            as_num,
            hold_time,
            identifier,
            capabilities,
            ..
        } => validate_open(config, as_num, hold_time, identifier, &capabilities, local)?,
        Message::Notification { code, subcode, .. } => {
            return Err(Error::PeerNotification { code, subcode })
        }
        _ => {
            return Err(Error::FiniteStateMachine {
                state: fsm.get_state().to_string(),
            })
        }
    };
    fsm.mv(Event::Message(BgpMessageEvent::BgpOpen));
    framed.codec_mut().set_as4(negotiated.as4);
    framed.send(Message::Keepalive).await?;

    let wait = match negotiated.hold_time {
        0 => Session::OPEN_TIMEOUT,
        hold => Duration::from_secs(hold as u64),
    };
    match recv(framed, wait).await? {
        Message::Keepalive => {
            fsm.mv(Event::Message(BgpMessageEvent::KeepAliveMsg));
            Ok(negotiated)
        }
        Message::Notification { code, subcode, .. } => Err(Error::PeerNotification { code, subcode }),
        _ => Err(Error::FiniteStateMachine {
            state: fsm.get_state().to_string(),
        }),
    }
}

async fn recv(framed: &mut Framed<TcpStream, Codec>, wait: Duration) -> Result<Message, Error> {
    match timeout(wait, framed.next()).await {
        Err(_) => Err(Error::HoldTimerExpired),
        Ok(None) => Err(Error::ConnectionClosed),
        Ok(Some(res)) => res,
    }
}

// https://www.rfc-editor.org/rfc/rfc4271#section-6.2
fn validate_open(
    config: &PeerConfig,
    as_num: u32,
    hold_time: u16,
    identifier: std::net::Ipv4Addr,
    capabilities: &[Cap],
    local: SocketAddr,
) -> Result<Negotiated, Error> {
    let four_octet = capabilities.iter().find_map(|cap| match cap {
        Cap::FourOctetASNumber(asn) => Some(*asn),
        _ => None,
    });
    let peer_asn = four_octet.unwrap_or(as_num);
    if peer_asn != config.asn {
        return Err(OpenMessageError::BadPeerAS {
            expected: config.asn,
            got: peer_asn,
        }
        .into());
    }
    if hold_time == 1 || hold_time == 2 {
        return Err(OpenMessageError::UnacceptableHoldTime(hold_time).into());
    }
    if identifier.is_unspecified() {
        return Err(OpenMessageError::BadBGPIdentifier.into());
    }
    if config.my_asn > u16::MAX as u32 && four_octet.is_none() {
        return Err(OpenMessageError::UnsupportedCapability.into());
    }
    Ok(Negotiated {
        hold_time: hold_time.min(config.hold_time as u16),
        as4: four_octet.is_some(),
        local,
    })
}

fn build_update(
    config: &PeerConfig,
    negotiated: &Negotiated,
    ad: &Advertisement,
) -> Result<Option<Message>, Error> {
    let mut attributes = vec![Attribute::new_origin(Attribute::ORIGIN_IGP)?];
    attributes.push(if config.is_ibgp() {
        Attribute::new_as_path(Vec::new())
    } else {
        Attribute::new_as_path(vec![config.my_asn])
    });
    let next_hop = ad.next_hop.unwrap_or_else(|| negotiated.local.ip());
    let mut nlri = Vec::new();
    match (ad.prefix, next_hop) {
        (IpNet::V4(_), IpAddr::V4(nh)) => {
            attributes.push(Attribute::new_nexthop(nh));
            nlri.push(Prefix::from(ad.prefix));
        }
        (IpNet::V6(_), IpAddr::V6(_)) => attributes.push(Attribute::new_mp_reach_nlri(
            AddressFamily::IPV6_UNICAST,
            next_hop,
            vec![Prefix::from(ad.prefix)],
        )),
        _ => return Ok(None),
    }
    if config.is_ibgp() {
        attributes.push(Attribute::new_local_pref(ad.local_pref));
    }
    if !ad.communities.is_empty() {
        attributes.push(Attribute::new_communities(ad.communities.clone()));
    }
    attributes.sort_by_key(|attr| attr.code());
    Ok(Some(Message::Update {
        withdrawn_routes: Vec::new(),
        attributes,
        nlri,
    }))
}

/// Best effort NOTIFICATION before the connection is dropped.
async fn notify<S>(sink: &mut S, err: &Error)
where
    S: Sink<Message, Error = Error> + Unpin,
{
    if let Some((code, subcode)) = err.notification() {
        if let Err(e) = sink.send(Message::notification(code, subcode)).await {
            tracing::debug!(error=%e, "failed to send notification");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use tokio::net::TcpListener;

    struct FakePeer {
        listener: TcpListener,
        asn: u32,
    }

    impl FakePeer {
        async fn new(asn: u32) -> Self {
            Self {
                listener: TcpListener::bind("127.0.0.1:0").await.unwrap(),
                asn,
            }
        }

        fn config(&self, my_asn: u32) -> PeerConfig {
            let local = self.listener.local_addr().unwrap();
            let mut conf = PeerConfig::new(my_asn, self.asn, local.ip());
            conf.port = local.port();
            conf
        }

        async fn accept(&self) -> Framed<TcpStream, Codec> {
            let (stream, _) = self.listener.accept().await.unwrap();
            let mut framed = Framed::new(stream, Codec::default());
            match framed.next().await.unwrap().unwrap() {
                Message::Open { .. } => {}
                msg => panic!("expected OPEN, got {msg:?}"),
            }
            framed
                .send(Message::open(
                    self.asn,
                    90,
                    Ipv4Addr::new(2, 2, 2, 2),
                    vec![
                        Cap::MultiProtocol(AddressFamily::IPV4_UNICAST),
                        Cap::FourOctetASNumber(self.asn),
                    ],
                ))
                .await
                .unwrap();
            framed.send(Message::Keepalive).await.unwrap();
            assert_eq!(Message::Keepalive, framed.next().await.unwrap().unwrap());
            framed.codec_mut().set_as4(true);
            framed
        }
    }

    async fn next_update(framed: &mut Framed<TcpStream, Codec>) -> Message {
        loop {
            let msg = timeout(Duration::from_secs(5), framed.next())
                .await
                .unwrap()
                .unwrap()
                .unwrap();
            if msg != Message::Keepalive {
                return msg;
            }
        }
    }

    fn announced(msg: &Message) -> Vec<IpNet> {
        match msg {
            Message::Update { nlri, .. } => nlri.iter().map(|p| IpNet::from(*p)).collect(),
            _ => panic!("expected UPDATE, got {msg:?}"),
        }
    }

    fn withdrawn(msg: &Message) -> Vec<IpNet> {
        match msg {
            Message::Update {
                withdrawn_routes, ..
            } => withdrawn_routes.iter().map(|p| IpNet::from(*p)).collect(),
            _ => panic!("expected UPDATE, got {msg:?}"),
        }
    }

    fn ad(ip: &str) -> Advertisement {
        Advertisement::new(ip.parse().unwrap(), 32, 100, vec![0xfde8_0001]).unwrap()
    }

    #[tokio::test]
    async fn works_session_set_then_delete() {
        let peer = FakePeer::new(64512).await;
        let handle = SessionHandle::spawn(peer.config(64512), "nodeA", Metrics::default());
        let mut framed = peer.accept().await;
        handle
            .subscribe()
            .wait_for(|s| *s == State::Established)
            .await
            .unwrap();

        handle.set(vec![ad("10.0.0.5")]).unwrap();
        let msg = next_update(&mut framed).await;
        assert_eq!(vec!["10.0.0.5/32".parse::<IpNet>().unwrap()], announced(&msg));
        match &msg {
            Message::Update { attributes, .. } => {
                assert!(attributes.contains(&Attribute::new_local_pref(100)));
                assert!(attributes.contains(&Attribute::new_as_path(vec![])));
                assert!(attributes.contains(&Attribute::new_communities(vec![0xfde8_0001])));
                assert!(attributes.contains(&Attribute::new_nexthop(Ipv4Addr::LOCALHOST)));
            }
            _ => unreachable!(),
        }

        handle.set(vec![]).unwrap();
        let msg = next_update(&mut framed).await;
        assert_eq!(vec!["10.0.0.5/32".parse::<IpNet>().unwrap()], withdrawn(&msg));

        handle.close();
        handle.closed().await;
    }

    #[tokio::test]
    async fn works_session_double_set_is_idempotent() {
        let peer = FakePeer::new(65000).await;
        let handle = SessionHandle::spawn(peer.config(64512), "nodeA", Metrics::default());
        let mut framed = peer.accept().await;

        handle.set(vec![ad("10.0.0.5")]).unwrap();
        handle.set(vec![ad("10.0.0.5")]).unwrap();
        handle.set(vec![ad("10.0.0.5"), ad("10.0.0.6")]).unwrap();

        let first = next_update(&mut framed).await;
        assert_eq!(vec!["10.0.0.5/32".parse::<IpNet>().unwrap()], announced(&first));
        match &first {
            Message::Update { attributes, .. } => {
                assert!(attributes.contains(&Attribute::new_as_path(vec![64512])));
                assert!(!attributes.iter().any(|a| a.code() == Attribute::LOCAL_PREF));
            }
            _ => unreachable!(),
        }
        // the second identical set puts nothing on the wire
        let second = next_update(&mut framed).await;
        assert_eq!(vec!["10.0.0.6/32".parse::<IpNet>().unwrap()], announced(&second));

        handle.close();
        handle.closed().await;
    }

    #[tokio::test]
    async fn works_session_buffers_until_established() {
        let peer = FakePeer::new(64512).await;
        let handle = SessionHandle::spawn(peer.config(64512), "nodeA", Metrics::default());
        handle.set(vec![ad("10.0.0.5")]).unwrap();
        assert_ne!(State::Established, handle.state());

        let mut framed = peer.accept().await;
        let msg = next_update(&mut framed).await;
        assert_eq!(vec!["10.0.0.5/32".parse::<IpNet>().unwrap()], announced(&msg));

        handle.close();
        handle.closed().await;
    }

    #[tokio::test]
    async fn works_session_reconnect_and_readvertise() {
        let peer = FakePeer::new(64512).await;
        let handle = SessionHandle::spawn(peer.config(64512), "nodeA", Metrics::default());
        let mut states = handle.subscribe();
        let mut framed = peer.accept().await;
        handle.set(vec![ad("10.0.0.5")]).unwrap();
        next_update(&mut framed).await;

        // the peer goes away while Established
        drop(framed);
        states.wait_for(|s| *s == State::Idle).await.unwrap();

        let mut framed = peer.accept().await;
        states
            .wait_for(|s| *s == State::Established)
            .await
            .unwrap();
        let msg = next_update(&mut framed).await;
        assert_eq!(vec!["10.0.0.5/32".parse::<IpNet>().unwrap()], announced(&msg));

        handle.close();
        handle.closed().await;
    }

    #[tokio::test]
    async fn works_session_close_withdraws_and_ceases() {
        let peer = FakePeer::new(64512).await;
        let handle = SessionHandle::spawn(peer.config(64512), "nodeA", Metrics::default());
        let mut framed = peer.accept().await;
        handle.set(vec![ad("10.0.0.5")]).unwrap();
        next_update(&mut framed).await;

        handle.close();
        let msg = next_update(&mut framed).await;
        assert_eq!(vec!["10.0.0.5/32".parse::<IpNet>().unwrap()], withdrawn(&msg));
        assert_eq!(
            Message::notification(
                NotificationCode::Cease,
                Some(NotificationSubCode::AdministrativeShutdown)
            ),
            next_update(&mut framed).await
        );
        handle.closed().await;
    }

    #[tokio::test]
    async fn failed_session_bad_peer_as() {
        let peer = FakePeer::new(65000).await;
        // configured for a different neighbor AS than the one the peer announces
        let mut conf = peer.config(64512);
        conf.asn = 65001;
        let handle = SessionHandle::spawn(conf, "nodeA", Metrics::default());

        let (stream, _) = peer.listener.accept().await.unwrap();
        let mut framed = Framed::new(stream, Codec::default());
        framed.next().await.unwrap().unwrap();
        framed
            .send(Message::open(
                65000,
                90,
                Ipv4Addr::new(2, 2, 2, 2),
                vec![Cap::FourOctetASNumber(65000)],
            ))
            .await
            .unwrap();
        assert_eq!(
            Message::notification(
                NotificationCode::OpenMessage,
                Some(NotificationSubCode::BadPeerAS)
            ),
            next_update(&mut framed).await
        );
        assert_ne!(State::Established, handle.state());
        handle.close();
        handle.closed().await;
    }

    #[rstest::rstest(
        my_asn,
        hold_time,
        capabilities,
        expected,
        case(65000, 3, vec![], Ok(3)),
        case(65000, 2, vec![Cap::FourOctetASNumber(64512)], Err(OpenMessageError::UnacceptableHoldTime(2))),
        case(65000, 30, vec![Cap::FourOctetASNumber(64513)], Err(OpenMessageError::BadPeerAS { expected: 64512, got: 64513 })),
        case(65000, 120, vec![Cap::FourOctetASNumber(64512)], Ok(90)),
        case(65000, 0, vec![], Ok(0)),
        case(4200000000, 30, vec![], Err(OpenMessageError::UnsupportedCapability)),
    )]
    fn works_validate_open(
        my_asn: u32,
        hold_time: u16,
        capabilities: Vec<Cap>,
        expected: Result<u16, OpenMessageError>,
    ) {
        let mut conf = PeerConfig::new(my_asn, 64512, "10.0.0.1".parse().unwrap());
        conf.hold_time = 90;
        let local: SocketAddr = "10.0.0.2:40000".parse().unwrap();
        let res = validate_open(
            &conf,
            64512,
            hold_time,
            Ipv4Addr::new(2, 2, 2, 2),
            &capabilities,
            local,
        );
        match (expected, res) {
            (Ok(hold), Ok(negotiated)) => assert_eq!(hold, negotiated.hold_time),
            (Err(expected), Err(Error::OpenMessage(e))) => assert_eq!(expected, e),
            (expected, res) => panic!("expected {expected:?}, got {res:?}"),
        }
    }

    #[test]
    fn works_build_update_ipv6() {
        let conf = PeerConfig::new(64512, 65000, "2001:db8::1".parse().unwrap());
        let negotiated = Negotiated {
            hold_time: 90,
            as4: true,
            local: "[2001:db8::2]:40000".parse().unwrap(),
        };
        let ad = Advertisement::new("2001:db8:1::5".parse().unwrap(), 128, 0, vec![]).unwrap();
        match build_update(&conf, &negotiated, &ad).unwrap() {
            Some(Message::Update {
                attributes, nlri, ..
            }) => {
                assert!(nlri.is_empty());
                assert!(attributes.contains(&Attribute::new_mp_reach_nlri(
                    AddressFamily::IPV6_UNICAST,
                    "2001:db8::2".parse().unwrap(),
                    vec![Prefix::from(ad.prefix)],
                )));
            }
            other => panic!("unexpected {other:?}"),
        }
        let v4 = Advertisement::new("10.0.0.5".parse().unwrap(), 32, 0, vec![]).unwrap();
        assert_eq!(None, build_update(&conf, &negotiated, &v4).unwrap());
    }
}
