use prometheus::{histogram_opts, opts, HistogramVec, IntCounterVec, IntGaugeVec, Registry};

#[derive(Debug, Clone)]
pub struct Metrics {
    pub announced: IntGaugeVec,
    pub reconcile_errors: IntCounterVec,
    pub reconcile_duration: HistogramVec,
    pub bgp_session_up: IntGaugeVec,
    pub bgp_updates: IntCounterVec,
    pub layer2_requests: IntCounterVec,
    pub layer2_responses: IntCounterVec,
    pub layer2_gratuitous: IntCounterVec,
}

impl Default for Metrics {
    fn default() -> Self {
        let announced = IntGaugeVec::new(
            opts!(
                "lbspeakerd_announced",
                "Services announced from this node, by protocol"
            ),
            &["protocol", "service", "node", "ip"],
        )
        .unwrap();
        let reconcile_errors = IntCounterVec::new(
            opts!(
                "lbspeakerd_reconcile_errors_total",
                "Total count of reconciliation errors"
            ),
            &["label"],
        )
        .unwrap();
        let reconcile_duration = HistogramVec::new(
            histogram_opts!(
                "lbspeakerd_reconcile_duration_seconds",
                "The duration of reconcile to complete in seconds"
            )
            .buckets(vec![0.001, 0.01, 0.1, 0.25, 0.5, 1., 5.]),
            &[],
        )
        .unwrap();
        let bgp_session_up = IntGaugeVec::new(
            opts!("lbspeakerd_bgp_session_up", "BGP session state, 1 when established"),
            &["peer"],
        )
        .unwrap();
        let bgp_updates = IntCounterVec::new(
            opts!(
                "lbspeakerd_bgp_updates_total",
                "Total count of BGP UPDATE messages sent"
            ),
            &["peer"],
        )
        .unwrap();
        let layer2_requests = IntCounterVec::new(
            opts!(
                "lbspeakerd_layer2_requests_received_total",
                "Total count of ARP requests and neighbor solicitations received for announced IPs"
            ),
            &["ip"],
        )
        .unwrap();
        let layer2_responses = IntCounterVec::new(
            opts!(
                "lbspeakerd_layer2_responses_sent_total",
                "Total count of ARP replies and neighbor advertisements sent"
            ),
            &["ip"],
        )
        .unwrap();
        let layer2_gratuitous = IntCounterVec::new(
            opts!(
                "lbspeakerd_layer2_gratuitous_sent_total",
                "Total count of gratuitous announcements sent"
            ),
            &["ip"],
        )
        .unwrap();
        Metrics {
            announced,
            reconcile_errors,
            reconcile_duration,
            bgp_session_up,
            bgp_updates,
            layer2_requests,
            layer2_responses,
            layer2_gratuitous,
        }
    }
}

impl Metrics {
    pub fn register(self, registry: &Registry) -> Result<Self, prometheus::Error> {
        registry.register(Box::new(self.announced.clone()))?;
        registry.register(Box::new(self.reconcile_errors.clone()))?;
        registry.register(Box::new(self.reconcile_duration.clone()))?;
        registry.register(Box::new(self.bgp_session_up.clone()))?;
        registry.register(Box::new(self.bgp_updates.clone()))?;
        registry.register(Box::new(self.layer2_requests.clone()))?;
        registry.register(Box::new(self.layer2_responses.clone()))?;
        registry.register(Box::new(self.layer2_gratuitous.clone()))?;
        Ok(self)
    }

    pub fn announce(&self, protocol: &str, service: &str, node: &str, ip: &str) {
        self.announced
            .with_label_values(&[protocol, service, node, ip])
            .set(1);
    }

    pub fn withdraw(&self, protocol: &str, service: &str, node: &str, ip: &str) {
        // The series may already be gone after a failed announce.
        let _ = self
            .announced
            .remove_label_values(&[protocol, service, node, ip]);
    }

    pub fn reconcile_failure(&self, label: &str) {
        self.reconcile_errors.with_label_values(&[label]).inc();
    }

    pub fn session_up(&self, peer: &str) {
        self.bgp_session_up.with_label_values(&[peer]).set(1);
    }

    pub fn session_down(&self, peer: &str) {
        self.bgp_session_up.with_label_values(&[peer]).set(0);
    }

    pub fn update_sent(&self, peer: &str) {
        self.bgp_updates.with_label_values(&[peer]).inc();
    }

    pub fn request_received(&self, ip: &str) {
        self.layer2_requests.with_label_values(&[ip]).inc();
    }

    pub fn response_sent(&self, ip: &str) {
        self.layer2_responses.with_label_values(&[ip]).inc();
    }

    pub fn gratuitous_sent(&self, ip: &str) {
        self.layer2_gratuitous.with_label_values(&[ip]).inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn works_metrics_register_and_withdraw() {
        let registry = Registry::new();
        let metrics = Metrics::default().register(&registry).unwrap();
        metrics.announce("bgp", "ns/svc1", "nodeA", "10.0.0.5");
        assert_eq!(
            1,
            metrics
                .announced
                .with_label_values(&["bgp", "ns/svc1", "nodeA", "10.0.0.5"])
                .get()
        );
        metrics.withdraw("bgp", "ns/svc1", "nodeA", "10.0.0.5");
        metrics.withdraw("bgp", "ns/svc1", "nodeA", "10.0.0.5");
        let families = registry.gather();
        let announced = families
            .iter()
            .find(|f| f.get_name() == "lbspeakerd_announced");
        assert!(announced.map(|f| f.get_metric().is_empty()).unwrap_or(true));
    }

    #[test]
    fn failed_metrics_register_twice() {
        let registry = Registry::new();
        let _metrics = Metrics::default().register(&registry).unwrap();
        assert!(Metrics::default().register(&registry).is_err());
    }
}
