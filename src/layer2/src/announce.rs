use std::collections::{BTreeSet, HashMap};
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use futures::FutureExt;
use lbspeakerd_trace::metrics::Metrics;
use tokio::sync::Notify;
use tokio::time::{interval, sleep, Instant};
use tracing_futures::Instrument;

use crate::arp::ArpResponder;
use crate::error::Error;
use crate::interface::{self, Interface};
use crate::ndp::NdpResponder;
use crate::packet::HardwareAddr;
use crate::responder::{AnnounceFn, Responder};

#[derive(Debug, Default)]
struct Table {
    ips: HashMap<String, BTreeSet<IpAddr>>,
    refcount: HashMap<IpAddr, usize>,
}

impl Table {
    fn count(&self, ip: &IpAddr) -> usize {
        self.refcount.get(ip).copied().unwrap_or(0)
    }

    /// Returns the addresses whose refcount dropped to zero.
    fn release(&mut self, ips: BTreeSet<IpAddr>) -> Vec<IpAddr> {
        let mut released = Vec::new();
        for ip in ips.into_iter() {
            if let Some(count) = self.refcount.get_mut(&ip) {
                *count -= 1;
                if *count == 0 {
                    self.refcount.remove(&ip);
                    released.push(ip);
                }
            }
        }
        released
    }
}

#[derive(Debug, Default)]
struct Responders {
    arp: HashMap<u32, Arc<Responder<ArpResponder>>>,
    ndp: HashMap<u32, Arc<Responder<NdpResponder>>>,
}

#[derive(Debug)]
struct Inner {
    table: Arc<RwLock<Table>>,
    responders: Mutex<Responders>,
    interfaces: Vec<String>,
    closed: AtomicBool,
    stop: Notify,
    metrics: Metrics,
}

/// Owns the ARP and NDP responders of this node and the addresses they answer for.
#[derive(Debug, Clone)]
pub struct Announce {
    inner: Arc<Inner>,
}

impl Announce {
    pub const SCAN_INTERVAL: Duration = Duration::from_secs(10);
    pub const GRATUITOUS_INTERVAL: Duration = Duration::from_millis(1100);
    pub const GRATUITOUS_DURATION: Duration = Duration::from_secs(5);

    /// `interfaces` restricts the responders to the named interfaces, empty means all.
    pub fn new(interfaces: Vec<String>, metrics: Metrics) -> Self {
        Self {
            inner: Arc::new(Inner {
                table: Arc::new(RwLock::new(Table::default())),
                responders: Mutex::new(Responders::default()),
                interfaces,
                closed: AtomicBool::new(false),
                stop: Notify::new(),
                metrics,
            }),
        }
    }

    /// Starts the periodic interface scan.
    pub fn start(&self) {
        let this = self.clone();
        tokio::spawn(
            async move {
                while !this.inner.closed.load(Ordering::Relaxed) {
                    if let Err(e) = this.update_interfaces() {
                        tracing::error!(error=%e, "failed to update interfaces");
                    }
                    let stopped = this.inner.stop.notified().fuse();
                    let tick = sleep(Self::SCAN_INTERVAL).fuse();
                    futures::pin_mut!(stopped, tick);
                    futures::select_biased! {
                        _ = stopped => break,
                        _ = tick => {},
                    }
                }
                tracing::info!("interface scan stopped");
            }
            .instrument(tracing::info_span!("interface_scan")),
        );
    }

    /// Callback handed to responders, backed by the refcount table.
    pub fn announce_fn(&self) -> AnnounceFn {
        let table = self.inner.table.clone();
        Arc::new(move |ip| table.read().map(|t| t.count(&ip) > 0).unwrap_or(false))
    }

    pub fn should_announce(&self, ip: &IpAddr) -> bool {
        self.inner
            .table
            .read()
            .map(|t| t.count(ip) > 0)
            .unwrap_or(false)
    }

    /// Announces `ip` for `name`, replacing what `name` announced before.
    #[tracing::instrument(skip(self))]
    pub fn set_balancer(&self, name: &str, ip: IpAddr) -> Result<(), Error> {
        let (first, released) = {
            let mut table = self.inner.table.write().map_err(|_| Error::FailedToGetLock)?;
            if table.ips.get(name).map_or(false, |ips| ips.len() == 1 && ips.contains(&ip)) {
                return Ok(());
            }
            let previous = table.ips.insert(name.to_string(), BTreeSet::from([ip]));
            let released = previous.map(|prev| table.release(prev)).unwrap_or_default();
            let count = table.refcount.entry(ip).or_insert(0);
            *count += 1;
            (*count == 1, released)
        };
        self.leave_groups(&released)?;
        if first {
            if let IpAddr::V6(addr) = ip {
                for responder in self.ndp_responders()?.iter() {
                    if let Err(e) = responder.join_group(HardwareAddr::solicited_node(&addr)) {
                        tracing::warn!(interface = %responder.interface().name, error=%e, "failed to join multicast group");
                    }
                }
            }
            tracing::info!(name = name, ip = %ip, "start announcing");
            self.spawn_gratuitous(ip);
        }
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    pub fn delete_balancer(&self, name: &str) -> Result<(), Error> {
        let released = {
            let mut table = self.inner.table.write().map_err(|_| Error::FailedToGetLock)?;
            match table.ips.remove(name) {
                Some(ips) => table.release(ips),
                None => return Ok(()),
            }
        };
        for ip in released.iter() {
            tracing::info!(name = name, ip = %ip, "stop announcing");
        }
        self.leave_groups(&released)
    }

    fn leave_groups(&self, released: &[IpAddr]) -> Result<(), Error> {
        let v6: Vec<HardwareAddr> = released
            .iter()
            .filter_map(|ip| match ip {
                IpAddr::V6(addr) => Some(HardwareAddr::solicited_node(addr)),
                IpAddr::V4(_) => None,
            })
            .collect();
        if v6.is_empty() {
            return Ok(());
        }
        for responder in self.ndp_responders()?.iter() {
            for group in v6.iter() {
                if let Err(e) = responder.leave_group(*group) {
                    tracing::warn!(interface = %responder.interface().name, error=%e, "failed to leave multicast group");
                }
            }
        }
        Ok(())
    }

    fn ndp_responders(&self) -> Result<Vec<Arc<Responder<NdpResponder>>>, Error> {
        let responders = self
            .inner
            .responders
            .lock()
            .map_err(|_| Error::FailedToGetLock)?;
        Ok(responders.ndp.values().cloned().collect())
    }

    /// Repeats the announcement for a while after a takeover, until the address is released.
    fn spawn_gratuitous(&self, ip: IpAddr) {
        let this = self.clone();
        tokio::spawn(
            async move {
                let until = Instant::now() + Self::GRATUITOUS_DURATION;
                let mut ticker = interval(Self::GRATUITOUS_INTERVAL);
                loop {
                    ticker.tick().await;
                    if Instant::now() > until
                        || this.inner.closed.load(Ordering::Relaxed)
                        || !this.should_announce(&ip)
                    {
                        break;
                    }
                    this.gratuitous(ip).await;
                }
            }
            .instrument(tracing::debug_span!("gratuitous", ip = %ip)),
        );
    }

    async fn gratuitous(&self, ip: IpAddr) {
        let (arp, ndp) = match self.inner.responders.lock() {
            Ok(responders) => (
                responders.arp.values().cloned().collect::<Vec<_>>(),
                responders.ndp.values().cloned().collect::<Vec<_>>(),
            ),
            Err(_) => return,
        };
        let results = match ip {
            IpAddr::V4(_) => {
                futures::future::join_all(arp.iter().map(|r| r.gratuitous(ip))).await
            }
            IpAddr::V6(_) => {
                futures::future::join_all(ndp.iter().map(|r| r.gratuitous(ip))).await
            }
        };
        for res in results.into_iter() {
            if let Err(e) = res {
                tracing::warn!(ip = %ip, error=%e, "failed to send gratuitous announcement");
            }
        }
    }

    /// Brings responders in line with the interfaces currently on the host.
    pub fn update_interfaces(&self) -> Result<(), Error> {
        let interfaces = interface::scan()?;
        self.apply_interfaces(interfaces)
    }

    fn apply_interfaces(&self, interfaces: Vec<Interface>) -> Result<(), Error> {
        if self.inner.closed.load(Ordering::Relaxed) {
            return Ok(());
        }
        let (keep_arp, keep_ndp) = interface::plan(&interfaces, &self.inner.interfaces);
        let groups: Vec<HardwareAddr> = {
            let table = self.inner.table.read().map_err(|_| Error::FailedToGetLock)?;
            table
                .refcount
                .keys()
                .filter_map(|ip| match ip {
                    IpAddr::V6(addr) => Some(HardwareAddr::solicited_node(addr)),
                    IpAddr::V4(_) => None,
                })
                .collect()
        };
        let mut responders = self
            .inner
            .responders
            .lock()
            .map_err(|_| Error::FailedToGetLock)?;

        responders.arp.retain(|index, responder| {
            let keep = keep_arp.contains(index) && !responder.is_finished();
            if !keep {
                tracing::info!(interface = %responder.interface().name, "delete ARP responder");
                responder.close();
            }
            keep
        });
        responders.ndp.retain(|index, responder| {
            let keep = keep_ndp.contains(index) && !responder.is_finished();
            if !keep {
                tracing::info!(interface = %responder.interface().name, "delete NDP responder");
                responder.close();
            }
            keep
        });

        for intf in interfaces.into_iter() {
            if keep_arp.contains(&intf.index) && !responders.arp.contains_key(&intf.index) {
                let handler = ArpResponder::new(intf.mac, self.announce_fn());
                match Responder::spawn(intf.clone(), handler, self.inner.metrics.clone()) {
                    Ok(responder) => {
                        tracing::info!(interface = %intf.name, "create ARP responder");
                        responders.arp.insert(intf.index, Arc::new(responder));
                    }
                    Err(e) => {
                        tracing::error!(interface = %intf.name, error=%e, "failed to create ARP responder")
                    }
                }
            }
            if keep_ndp.contains(&intf.index) && !responders.ndp.contains_key(&intf.index) {
                let handler = NdpResponder::new(intf.mac, self.announce_fn());
                match Responder::spawn(intf.clone(), handler, self.inner.metrics.clone()) {
                    Ok(responder) => {
                        tracing::info!(interface = %intf.name, "create NDP responder");
                        for group in groups.iter() {
                            if let Err(e) = responder.join_group(*group) {
                                tracing::warn!(interface = %intf.name, error=%e, "failed to join multicast group");
                            }
                        }
                        responders.ndp.insert(intf.index, Arc::new(responder));
                    }
                    Err(e) => {
                        tracing::error!(interface = %intf.name, error=%e, "failed to create NDP responder")
                    }
                }
            }
        }
        Ok(())
    }

    /// Stops the scan and every responder.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Relaxed);
        self.inner.stop.notify_waiters();
        if let Ok(mut responders) = self.inner.responders.lock() {
            responders.arp.drain().for_each(|(_, r)| r.close());
            responders.ndp.drain().for_each(|(_, r)| r.close());
        }
        tracing::info!("closed all responders");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn works_set_and_delete_balancer() {
        let announce = Announce::new(vec![], Metrics::default());
        let callback = announce.announce_fn();

        announce.set_balancer("ns/svc1", ip("192.168.1.20")).unwrap();
        announce.set_balancer("ns/svc2", ip("192.168.1.20")).unwrap();
        // repeated calls are no-ops
        announce.set_balancer("ns/svc1", ip("192.168.1.20")).unwrap();
        assert!(announce.should_announce(&ip("192.168.1.20")));
        assert!(callback(ip("192.168.1.20")));
        assert!(!callback(ip("192.168.1.21")));

        announce.delete_balancer("ns/svc1").unwrap();
        assert!(announce.should_announce(&ip("192.168.1.20")));
        announce.delete_balancer("ns/svc2").unwrap();
        assert!(!announce.should_announce(&ip("192.168.1.20")));
        assert!(!callback(ip("192.168.1.20")));

        // unknown names are ignored
        announce.delete_balancer("ns/svc3").unwrap();
    }

    #[tokio::test]
    async fn works_set_balancer_replaces_address() {
        let announce = Announce::new(vec![], Metrics::default());
        announce.set_balancer("ns/svc1", ip("2001:db8::5")).unwrap();
        announce.set_balancer("ns/svc1", ip("2001:db8::6")).unwrap();
        assert!(!announce.should_announce(&ip("2001:db8::5")));
        assert!(announce.should_announce(&ip("2001:db8::6")));
        let table = announce.inner.table.read().unwrap();
        assert_eq!(1, table.count(&ip("2001:db8::6")));
        assert_eq!(0, table.count(&ip("2001:db8::5")));
    }

    #[tokio::test]
    async fn works_apply_interfaces_skips_ineligible() {
        let announce = Announce::new(vec!["eth9".to_string()], Metrics::default());
        let lo = Interface {
            name: "lo".to_string(),
            index: 1,
            up: true,
            loopback: true,
            ..Default::default()
        };
        announce.apply_interfaces(vec![lo]).unwrap();
        let responders = announce.inner.responders.lock().unwrap();
        assert!(responders.arp.is_empty());
        assert!(responders.ndp.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn works_close_stops_scan() {
        let announce = Announce::new(vec!["eth9".to_string()], Metrics::default());
        announce.start();
        tokio::task::yield_now().await;
        announce.close();
        assert!(announce.inner.closed.load(Ordering::Relaxed));
        // no responders are created after close
        announce.update_interfaces().unwrap();
        assert!(announce.inner.responders.lock().unwrap().arp.is_empty());
    }
}
