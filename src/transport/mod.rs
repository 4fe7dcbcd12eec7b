// Peer transport: relay-bootstrapped signaling and the reliable/unreliable data channel pair
// Everything here is sans-I/O; the runtime module feeds sockets and timers in

pub mod channels;
pub mod client;
pub mod events;
pub mod peer;
pub mod relay;
pub mod rtc;
pub mod server;
pub mod signaling;

#[cfg(test)]
pub(crate) mod testing;

use thiserror::Error;

pub use channels::{Connectivity, DualChannel};
pub use client::TransportClient;
pub use events::{EventHub, EventKind, TransportEvent};
pub use peer::{BackendEvent, PeerBackend, PeerEvent, PeerTransport};
pub use relay::{RelayDelivery, RelayEnvelope, RelayEvent};
pub use server::{BackendFactory, TransportServer};
pub use signaling::{NegotiationState, SessionDescription, SignalMessage, SignalingPeer};

/// Local identity of a remote peer, allocated by the transport server
pub type PeerId = u32;

/// Which of the two data channels a payload travels on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    /// Ordered, retransmitted until delivered
    Reliable,
    /// Unordered, dropped after the configured retention time
    Unreliable,
}

impl ChannelKind {
    pub fn label(self) -> &'static str {
        match self {
            ChannelKind::Reliable => "reliable",
            ChannelKind::Unreliable => "unreliable",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "reliable" => Some(ChannelKind::Reliable),
            "unreliable" => Some(ChannelKind::Unreliable),
            _ => None,
        }
    }
}

/// A data channel message, tagged text or binary
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Text(String),
    Binary(Vec<u8>),
}

impl Payload {
    pub fn is_binary(&self) -> bool {
        matches!(self, Payload::Binary(_))
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Payload::Text(text) => text.as_bytes(),
            Payload::Binary(bytes) => bytes,
        }
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("{0} channel is not open")]
    ChannelNotOpen(&'static str),

    #[error("negotiation failed: {0}")]
    Negotiation(String),

    #[error("invalid candidate: {0}")]
    InvalidCandidate(String),

    #[error("send failed: {0}")]
    Send(String),

    #[error("unknown peer {0}")]
    UnknownPeer(PeerId),

    #[error("peer connection failed: {0}")]
    Rtc(String),
}
