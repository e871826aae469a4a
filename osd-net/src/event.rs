//! Event types for the host controller router loop.

use std::fmt;
use std::sync::mpsc;

use crate::bus::{Closer, Writer};

/// Identifies one connected bus peer (host module or gateway).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(pub u64);

/// Copy of the routing tables, for inspection.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct RoutingSnapshot {
    pub subnet: u16,
    /// Claimed DI addresses in the controller's own subnet.
    pub modules: Vec<u16>,
    /// Subnets served by a gateway.
    pub gateways: Vec<u16>,
    pub peers: usize,
}

/// Events sent to the router thread.
pub enum Event {
    /// A frame arrived from a peer.
    Frame { peer: PeerId, data: Vec<u8> },
    /// A peer connected; the router takes over its writer and closer.
    PeerUp(PeerId, Box<dyn Writer>, Box<dyn Closer>),
    /// A peer's link closed or failed.
    PeerDown(PeerId),
    /// Request a copy of the routing tables.
    Snapshot(mpsc::Sender<RoutingSnapshot>),
    /// Shut down the router loop.
    Shutdown,
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Frame { peer, data } => f
                .debug_struct("Frame")
                .field("peer", peer)
                .field("data_len", &data.len())
                .finish(),
            Event::PeerUp(id, _, _) => f.debug_tuple("PeerUp").field(id).finish(),
            Event::PeerDown(id) => f.debug_tuple("PeerDown").field(id).finish(),
            Event::Snapshot(_) => write!(f, "Snapshot"),
            Event::Shutdown => write!(f, "Shutdown"),
        }
    }
}

pub type EventSender = mpsc::Sender<Event>;
pub type EventReceiver = mpsc::Receiver<Event>;

pub fn channel() -> (EventSender, EventReceiver) {
    mpsc::channel()
}
