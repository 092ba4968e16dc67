use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;

use futures::FutureExt;
use lbspeakerd_trace::metrics::Metrics;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing_futures::Instrument;

use crate::error::Error;
use crate::interface::Interface;
use crate::packet::HardwareAddr;
use crate::socket::PacketSocket;

/// Answers whether this node currently claims an address. Must not block.
pub type AnnounceFn = Arc<dyn Fn(IpAddr) -> bool + Send + Sync>;

/// Outcome of handling one received frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    None,
    Closed,
    Error,
    ArpReply,
    EthernetDestination,
    MessageType,
    NoSourceLL,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DropReason::None => write!(f, "none"),
            DropReason::Closed => write!(f, "closed"),
            DropReason::Error => write!(f, "error"),
            DropReason::ArpReply => write!(f, "arp reply"),
            DropReason::EthernetDestination => write!(f, "ethernet destination"),
            DropReason::MessageType => write!(f, "message type"),
            DropReason::NoSourceLL => write!(f, "no source link-layer address"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub ip: IpAddr,
    pub frame: Vec<u8>,
}

/// Protocol side of a responder: turns received frames into replies.
pub trait FrameHandler: Send + Sync + 'static {
    const PROTOCOL: &'static str;
    const ETHER_TYPE: u16;

    fn process(&self, frame: &[u8]) -> (DropReason, Option<Reply>);

    /// Unsolicited announcement of `ip`, None for the wrong family.
    fn gratuitous(&self, ip: IpAddr) -> Option<Vec<u8>>;
}

/// A receive loop on one interface for one protocol.
pub struct Responder<H: FrameHandler> {
    interface: Interface,
    handler: Arc<H>,
    socket: Arc<PacketSocket>,
    close: Arc<Notify>,
    task: JoinHandle<DropReason>,
    metrics: Metrics,
}

impl<H: FrameHandler> fmt::Debug for Responder<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Responder")
            .field("protocol", &H::PROTOCOL)
            .field("interface", &self.interface.name)
            .finish()
    }
}

impl<H: FrameHandler> Responder<H> {
    pub fn spawn(interface: Interface, handler: H, metrics: Metrics) -> Result<Self, Error> {
        let socket = Arc::new(PacketSocket::open(interface.index, H::ETHER_TYPE)?);
        let handler = Arc::new(handler);
        let close = Arc::new(Notify::new());
        let span = tracing::info_span!("responder", protocol = H::PROTOCOL, interface = %interface.name);
        let task = tokio::spawn(
            run(
                socket.clone(),
                handler.clone(),
                close.clone(),
                metrics.clone(),
            )
            .instrument(span),
        );
        Ok(Self {
            interface,
            handler,
            socket,
            close,
            task,
            metrics,
        })
    }

    pub fn interface(&self) -> &Interface {
        &self.interface
    }

    pub async fn gratuitous(&self, ip: IpAddr) -> Result<(), Error> {
        let frame = match self.handler.gratuitous(ip) {
            Some(frame) => frame,
            None => return Ok(()),
        };
        self.socket.send(&frame).await?;
        self.metrics.gratuitous_sent(&ip.to_string());
        Ok(())
    }

    pub fn join_group(&self, group: HardwareAddr) -> Result<(), Error> {
        self.socket.add_membership(self.interface.index, group)?;
        Ok(())
    }

    pub fn leave_group(&self, group: HardwareAddr) -> Result<(), Error> {
        self.socket.drop_membership(self.interface.index, group)?;
        Ok(())
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wakes the receive loop and lets it drop the socket.
    pub fn close(&self) {
        self.close.notify_one();
    }
}

async fn run<H: FrameHandler>(
    socket: Arc<PacketSocket>,
    handler: Arc<H>,
    close: Arc<Notify>,
    metrics: Metrics,
) -> DropReason {
    tracing::info!("start responder");
    let mut buf = vec![0u8; PacketSocket::MAX_FRAME];
    loop {
        let received = {
            let closed = close.notified().fuse();
            let recv = socket.recv(&mut buf).fuse();
            futures::pin_mut!(closed, recv);
            futures::select_biased! {
                _ = closed => None,
                res = recv => Some(res),
            }
        };
        let n = match received {
            None => {
                tracing::info!("responder closed");
                return DropReason::Closed;
            }
            Some(Ok(n)) => n,
            Some(Err(e)) => {
                tracing::error!(error=%e, "failed to read from socket");
                return DropReason::Error;
            }
        };
        let (reason, reply) = handler.process(&buf[..n]);
        let reply = match (reason, reply) {
            (DropReason::None, Some(reply)) => reply,
            (reason, _) => {
                tracing::trace!(reason=%reason, "drop frame");
                continue;
            }
        };
        let ip = reply.ip.to_string();
        metrics.request_received(&ip);
        match socket.send(&reply.frame).await {
            Ok(_) => {
                tracing::debug!(ip = %ip, "sent reply");
                metrics.response_sent(&ip);
            }
            Err(e) => tracing::warn!(ip = %ip, error=%e, "failed to send reply"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn works_drop_reason_display() {
        assert_eq!("none", DropReason::None.to_string());
        assert_eq!("ethernet destination", DropReason::EthernetDestination.to_string());
        assert_eq!("no source link-layer address", DropReason::NoSourceLL.to_string());
    }
}
