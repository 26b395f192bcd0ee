use std::fmt;

use bytes::Bytes;
use tokio::sync::mpsc;

/// Label for an attached transport stack. The relay never special-cases a
/// transport by name — the id only partitions dedup state and tags events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransportId(pub &'static str);

impl fmt::Display for TransportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// Opaque peer address as reported by a transport.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerId(pub String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        PeerId(id.into())
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a transport reports upward into the relay's single event queue.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    PeerConnected {
        transport: TransportId,
        peer: PeerId,
    },
    PeerDisconnected {
        transport: TransportId,
        peer: PeerId,
    },
    /// A decoded wire frame (the 5-field envelope tuple). `direct` marks
    /// point-to-point delivery as opposed to broadcast gossip.
    EnvelopeReceived {
        transport: TransportId,
        peer: PeerId,
        frame: Bytes,
        direct: bool,
    },
}

/// Contract implemented by each peer network stack.
///
/// The relay drives transports through this interface only: started with
/// the shared event queue, asked to fan frames out, stopped on shutdown.
/// Send failures are connectivity noise, reported as `Err(String)` and
/// recovered by the transport itself — never fatal to the relay.
///
/// `broadcast` and `send` must not block indefinitely: a slow peer is the
/// transport's problem (bound it with a timeout and drop), not the relay
/// worker's.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    fn id(&self) -> TransportId;

    /// Start the stack and begin pushing events into `events`.
    async fn start(&mut self, events: mpsc::Sender<TransportEvent>) -> Result<(), String>;

    /// Stop the stack. Idempotent.
    async fn stop(&mut self);

    /// Fan a frame out to every connected peer.
    async fn broadcast(&self, frame: Bytes) -> Result<(), String>;

    /// Send a frame to one peer (the protocol's direct p2p message).
    async fn send(&self, peer: &PeerId, frame: Bytes) -> Result<(), String>;
}

// ── MockTransport (tests) ─────────────────────────────────────────────
