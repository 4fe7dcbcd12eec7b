// One remote peer: negotiation plus the channel pair, over a pluggable connection backend

use tracing::{debug, info, warn};

use super::channels::{Connectivity, DualChannel};
use super::signaling::{NegotiationState, SessionDescription, SignalMessage, SignalingPeer};
use super::{ChannelKind, Payload, PeerId, TransportError};

/// The connection engine underneath a peer (str0m in production, a fake in tests)
pub trait PeerBackend {
    /// Create the reliable and unreliable channels and produce a local offer
    fn create_offer(&mut self) -> Result<SessionDescription, TransportError>;

    /// Apply a remote offer and produce the local answer
    fn accept_offer(
        &mut self,
        offer: &SessionDescription,
    ) -> Result<SessionDescription, TransportError>;

    fn accept_answer(&mut self, answer: &SessionDescription) -> Result<(), TransportError>;

    fn add_remote_candidate(&mut self, candidate: &str) -> Result<(), TransportError>;

    fn send(&mut self, channel: ChannelKind, payload: &Payload) -> Result<(), TransportError>;

    fn close(&mut self);
}

/// Things a backend reports while being driven
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendEvent {
    LocalCandidate(String),
    ChannelOpen(ChannelKind),
    ChannelClosed(ChannelKind),
    Data(ChannelKind, Payload),
    /// The underlying connection failed or timed out
    ConnectionLost,
}

/// What the transport layer makes of a backend event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    Connected,
    Disconnected,
    /// The peer died before both channels were ever open
    Failed,
    Message { channel: ChannelKind, payload: Payload },
}

pub struct PeerTransport<B> {
    id: PeerId,
    name: String,
    signaling: SignalingPeer<B>,
    channels: DualChannel,
}

impl<B: PeerBackend> PeerTransport<B> {
    pub fn offerer(id: PeerId, name: impl Into<String>, backend: B) -> Self {
        Self::new(id, name.into(), SignalingPeer::offerer(backend))
    }

    pub fn answerer(id: PeerId, name: impl Into<String>, backend: B) -> Self {
        Self::new(id, name.into(), SignalingPeer::answerer(backend))
    }

    fn new(id: PeerId, name: String, signaling: SignalingPeer<B>) -> Self {
        Self {
            id,
            name,
            signaling,
            channels: DualChannel::new(),
        }
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    /// The relay name this peer is addressed by
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> NegotiationState {
        self.signaling.state()
    }

    pub fn is_connected(&self) -> bool {
        self.channels.is_connected()
    }

    pub fn is_closed(&self) -> bool {
        self.signaling.state() == NegotiationState::Closed
    }

    pub fn backend(&self) -> &B {
        self.signaling.backend()
    }

    pub fn backend_mut(&mut self) -> &mut B {
        self.signaling.backend_mut()
    }

    pub fn start(&mut self) {
        self.signaling.start();
    }

    pub fn handle_signal(&mut self, message: SignalMessage) {
        self.signaling.handle_signal(message);
    }

    pub fn poll_outgoing(&mut self) -> Option<SignalMessage> {
        self.signaling.poll_outgoing()
    }

    pub fn handle_backend_event(&mut self, event: BackendEvent) -> Option<PeerEvent> {
        match event {
            BackendEvent::LocalCandidate(candidate) => {
                self.signaling.local_candidate(candidate);
                None
            }
            BackendEvent::ChannelOpen(kind) => {
                debug!(peer = self.id, channel = kind.label(), "Channel open");
                let transition = self.channels.open(kind);
                if !self.channels.is_finished() {
                    self.signaling.channel_opened(self.channels.is_connected());
                }
                transition.map(|_| {
                    info!(peer = self.id, name = %self.name, "Peer connected");
                    PeerEvent::Connected
                })
            }
            BackendEvent::ChannelClosed(kind) => {
                debug!(peer = self.id, channel = kind.label(), "Channel closed");
                let transition = self.channels.close(kind);
                self.finish(transition)
            }
            BackendEvent::ConnectionLost => {
                let transition = self.channels.close_all();
                self.finish(transition)
            }
            BackendEvent::Data(channel, payload) => {
                if !self.channels.is_open(channel) {
                    debug!(peer = self.id, channel = channel.label(), "Data on a channel not marked open");
                }
                Some(PeerEvent::Message { channel, payload })
            }
        }
    }

    fn finish(&mut self, transition: Option<Connectivity>) -> Option<PeerEvent> {
        if self.is_closed() {
            return None;
        }
        self.signaling.close();
        match transition {
            Some(Connectivity::Disconnected) => {
                info!(peer = self.id, name = %self.name, "Peer disconnected");
                Some(PeerEvent::Disconnected)
            }
            _ => {
                warn!(peer = self.id, name = %self.name, "Peer closed before connecting");
                Some(PeerEvent::Failed)
            }
        }
    }

    pub fn send(&mut self, channel: ChannelKind, payload: &Payload) -> Result<(), TransportError> {
        if !self.channels.is_open(channel) {
            return Err(TransportError::ChannelNotOpen(channel.label()));
        }
        self.signaling.backend_mut().send(channel, payload)
    }

    pub fn send_reliable_text(&mut self, text: &str) -> Result<(), TransportError> {
        self.send(ChannelKind::Reliable, &Payload::Text(text.to_string()))
    }

    pub fn send_reliable_binary(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.send(ChannelKind::Reliable, &Payload::Binary(bytes.to_vec()))
    }

    pub fn send_unreliable_text(&mut self, text: &str) -> Result<(), TransportError> {
        self.send(ChannelKind::Unreliable, &Payload::Text(text.to_string()))
    }

    pub fn send_unreliable_binary(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.send(ChannelKind::Unreliable, &Payload::Binary(bytes.to_vec()))
    }

    pub fn close(&mut self) {
        self.channels.close_all();
        self.signaling.close();
    }
}
