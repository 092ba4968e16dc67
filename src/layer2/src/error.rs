use lbspeakerd_trace::error::TraceableError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("std::io::Error: {0}")]
    StdIoErr(#[from] std::io::Error),
    #[error("failed to list interfaces: {0}")]
    Interface(#[from] nix::Error),
    #[error("packet error: {0}")]
    Packet(#[from] PacketError),
    #[error("no speaker is usable")]
    NoUsableSpeakers,
    #[error("responder is closed")]
    Closed,
    #[error("lock is poisoned")]
    FailedToGetLock,
}

impl TraceableError for Error {
    fn metric_label(&self) -> String {
        match self {
            Error::StdIoErr(_) => "io",
            Error::Interface(_) => "interface",
            Error::Packet(_) => "packet",
            Error::NoUsableSpeakers => "no_usable_speakers",
            Error::Closed => "closed",
            Error::FailedToGetLock => "lock",
        }
        .to_string()
    }

    fn is_transient(&self) -> bool {
        !matches!(self, Error::FailedToGetLock)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PacketError {
    #[error("frame too short: need {expected} bytes, got {got}")]
    TooShort { expected: usize, got: usize },
    #[error("unexpected ether type {0:#06x}")]
    EtherType(u16),
    #[error("unsupported hardware type {0}")]
    HardwareType(u16),
    #[error("unsupported protocol type {0:#06x}")]
    ProtocolType(u16),
    #[error("invalid address length")]
    AddressLength,
    #[error("unknown ARP operation {0}")]
    Operation(u16),
    #[error("invalid IPv6 header")]
    Ipv6Header,
    #[error("invalid NDP option")]
    Option,
}
