use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use actix_web::{get, middleware, web::Data, App, HttpRequest, HttpResponse, HttpServer, Responder};
use kube::Client;
use lbspeakerd_layer2::announce::Announce;
use lbspeakerd_layer2::election::Election;
use lbspeakerd_trace::init::{prepare_tracing, TraceConfig};
use lbspeakerd_trace::metrics::Metrics;
use prometheus::{Encoder, Registry, TextEncoder};
use tokio::sync::mpsc;

use crate::bgp::BgpAnnouncer;
use crate::config::Config;
use crate::controller::{self, Context, NodeWatcher};
use crate::error::Error;
use crate::layer2::Layer2Announcer;
use crate::speaker::Speaker;

#[derive(Debug, Clone, Default)]
pub struct State {
    registry: Registry,
    ready: Arc<AtomicBool>,
}

impl State {
    pub fn metrics(&self) -> Vec<prometheus::proto::MetricFamily> {
        self.registry.gather()
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Relaxed);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }
}

pub fn start(config: Config, trace: TraceConfig) -> Result<(), Error> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(run(config, trace))
}

#[tracing::instrument(skip_all)]
async fn run(config: Config, trace_config: TraceConfig) -> Result<(), Error> {
    prepare_tracing(trace_config)?;

    if config.node_name.is_empty() {
        return Err(Error::MissingField("node_name".to_string()));
    }
    let node_name = config.node_name.clone();
    let pools = config.pools()?;

    let state = State::default();
    let metrics = Metrics::default().register(&state.registry)?;
    let client = Client::try_default().await?;

    let (resync_tx, resync_rx) = mpsc::unbounded_channel();
    let election = Arc::new(Election::new(&node_name).with_resync(resync_tx));

    let announce = Announce::new(config.interfaces.clone(), metrics.clone());
    announce.start();
    let layer2 = Arc::new(Layer2Announcer::new(announce, election.clone()));
    let bgp = Arc::new(BgpAnnouncer::new(
        &node_name,
        config.peers.clone(),
        metrics.clone(),
    ));

    let speaker = Arc::new(
        Speaker::new(&node_name, pools, metrics.clone())
            .with_announcer(bgp.clone())
            .with_announcer(layer2),
    );
    let nodes = NodeWatcher::new(
        &node_name,
        config.node_labels.clone(),
        election,
        Some(bgp),
    );
    let ctx = Arc::new(Context {
        client: client.clone(),
        speaker: speaker.clone(),
        interval: config.requeue_interval_secs,
        metrics,
    });

    let server_state = state.clone();
    let server = HttpServer::new(move || {
        App::new()
            .app_data(Data::new(server_state.clone()))
            .wrap(middleware::Logger::default().exclude("/healthz"))
            .wrap(middleware::Logger::default().exclude("/readyz"))
            .service(health)
            .service(readyz)
            .service(metrics_)
    })
    .bind(&config.metrics_endpoint)?
    .shutdown_timeout(5)
    .disable_signals()
    .run();
    let handle = server.handle();

    tracing::info!(node = %node_name, endpoint = %config.metrics_endpoint, "Start speaker");

    let speaker_state = state.clone();
    let speaker_task = tokio::spawn(async move {
        speaker_state.set_ready(true);
        controller::run(client, ctx, nodes, resync_rx).await;
        speaker_state.set_ready(false);
        // withdraw before the sessions and sockets go away
        speaker.shutdown().await;
        handle.stop(true).await;
    });

    server.await?;
    if let Err(e) = speaker_task.await {
        tracing::error!(error = %e, "speaker task failed");
    }
    tracing::info!("Stop speaker");
    Ok(())
}

#[get("/healthz")]
async fn health(_: HttpRequest) -> impl Responder {
    HttpResponse::Ok().json("healthy")
}

#[get("/readyz")]
async fn readyz(c: Data<State>, _req: HttpRequest) -> impl Responder {
    if c.is_ready() {
        HttpResponse::Ok().json("ready")
    } else {
        HttpResponse::ServiceUnavailable().json("not ready")
    }
}

#[get("/metrics")]
async fn metrics_(c: Data<State>, _req: HttpRequest) -> impl Responder {
    let metrics = c.metrics();
    let encoder = TextEncoder::new();
    let mut buffer = vec![];
    match encoder.encode(&metrics, &mut buffer) {
        Ok(()) => HttpResponse::Ok().body(buffer),
        Err(e) => {
            tracing::error!(error = %e, "failed to encode metrics");
            HttpResponse::InternalServerError().finish()
        }
    }
}
