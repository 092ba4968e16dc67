use lbspeakerd_trace::error::TraceableError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("BGP error: {0}")]
    Bgp(#[from] lbspeakerd_bgp::error::Error),

    #[error("layer2 error: {0}")]
    Layer2(#[from] lbspeakerd_layer2::error::Error),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("kube error: {0}")]
    Kube(#[from] kube::Error),

    #[error("failed to initialize tracing: {0}")]
    Trace(#[from] lbspeakerd_trace::init::InitError),

    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("no announcer for protocol {0}")]
    NoAnnouncer(String),

    #[error("failed to get lock")]
    FailedToGetLock,

    #[error("missing field: {0}")]
    MissingField(String),

    #[error("std::io::Error: {0}")]
    StdIoErr(#[from] std::io::Error),
}

impl TraceableError for Error {
    fn metric_label(&self) -> String {
        match self {
            Error::Bgp(e) => format!("bgp_{}", e.metric_label()),
            Error::Layer2(e) => format!("layer2_{}", e.metric_label()),
            Error::Config(_) => "config".to_string(),
            Error::Kube(_) => "kube".to_string(),
            Error::Trace(_) => "trace".to_string(),
            Error::Metrics(_) => "metrics".to_string(),
            Error::NoAnnouncer(_) => "no_announcer".to_string(),
            Error::FailedToGetLock => "failed_to_get_lock".to_string(),
            Error::MissingField(_) => "missing_field".to_string(),
            Error::StdIoErr(_) => "io".to_string(),
        }
    }

    fn is_transient(&self) -> bool {
        match self {
            Error::Bgp(e) => e.is_transient(),
            Error::Layer2(e) => e.is_transient(),
            Error::Kube(_) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load: {0}")]
    Load(#[from] std::io::Error),

    #[error("failed to parse: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("duplicate pool {0}")]
    DuplicatePool(String),

    #[error("pool {0} has no addresses")]
    EmptyPool(String),

    #[error("CIDR {cidr} in pool {pool} overlaps {other}")]
    OverlappingCidr {
        pool: String,
        cidr: String,
        other: String,
    },

    #[error("invalid aggregation length {len} for {cidr} in pool {pool}")]
    InvalidAggregationLength { pool: String, cidr: String, len: u8 },

    #[error("invalid community {0}")]
    InvalidCommunity(String),

    #[error("too many communities in pool {0}")]
    TooManyCommunities(String),

    #[error("duplicate peer {0}")]
    DuplicatePeer(String),

    #[error("peer {peer}: {source}")]
    Peer {
        peer: String,
        source: lbspeakerd_bgp::error::ConfigError,
    },
}
