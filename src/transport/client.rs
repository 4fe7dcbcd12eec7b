// Joiner side of the transport: a single connection to the named host

use std::collections::VecDeque;
use std::sync::mpsc::Receiver;

use serde_json::Value;
use tracing::{debug, info, warn};

use super::events::{EventHub, EventKind, TransportEvent};
use super::peer::{BackendEvent, PeerBackend, PeerEvent, PeerTransport};
use super::relay::{RelayEnvelope, RelayEvent};
use super::signaling::SignalMessage;
use super::{ChannelKind, Payload, PeerId, TransportError};

/// Peer id used for the host in events raised on the joining side
pub const HOST_PEER: PeerId = 0;

pub struct TransportClient<B> {
    peer: PeerTransport<B>,
    hub: EventHub,
    outbox: VecDeque<RelayEnvelope>,
    connect_sent: bool,
}

impl<B: PeerBackend> TransportClient<B> {
    pub fn new(host_name: impl Into<String>, backend: B) -> Self {
        Self {
            peer: PeerTransport::answerer(HOST_PEER, host_name, backend),
            hub: EventHub::new(),
            outbox: VecDeque::new(),
            connect_sent: false,
        }
    }

    pub fn subscribe(&mut self, kinds: &[EventKind]) -> Receiver<TransportEvent> {
        self.hub.subscribe(kinds)
    }

    pub fn host_name(&self) -> &str {
        self.peer.name()
    }

    pub fn is_connected(&self) -> bool {
        self.peer.is_connected()
    }

    pub fn is_closed(&self) -> bool {
        self.peer.is_closed()
    }

    pub fn peer(&self) -> &PeerTransport<B> {
        &self.peer
    }

    pub fn peer_mut(&mut self) -> &mut PeerTransport<B> {
        &mut self.peer
    }

    pub fn handle_relay(&mut self, event: RelayEvent) {
        match event {
            RelayEvent::Connected => {
                if self.connect_sent {
                    debug!("Relay reconnected, connect already sent");
                    return;
                }
                info!(host = self.peer.name(), "Relay connected, asking host to connect");
                self.connect_sent = true;
                self.queue(SignalMessage::Connect);
            }
            RelayEvent::Disconnected => warn!("Relay connection lost"),
            RelayEvent::Message { from, message } => self.handle_relay_message(from, message),
        }
    }

    fn handle_relay_message(&mut self, from: String, message: Value) {
        if from != self.peer.name() {
            warn!(%from, "Dropping signaling from someone other than the host");
            return;
        }
        match serde_json::from_value::<SignalMessage>(message) {
            Ok(signal) => {
                self.peer.handle_signal(signal);
                self.flush_signaling();
            }
            Err(e) => warn!("Dropping malformed signaling message: {}", e),
        }
    }

    fn queue(&mut self, signal: SignalMessage) {
        match serde_json::to_value(&signal) {
            Ok(message) => self.outbox.push_back(RelayEnvelope {
                to: self.peer.name().to_string(),
                message,
            }),
            Err(e) => warn!("Failed to encode signaling message: {}", e),
        }
    }

    fn flush_signaling(&mut self) {
        while let Some(signal) = self.peer.poll_outgoing() {
            self.queue(signal);
        }
    }

    pub fn poll_relay(&mut self) -> Option<RelayEnvelope> {
        self.outbox.pop_front()
    }

    pub fn handle_backend_event(&mut self, event: BackendEvent) {
        let outcome = self.peer.handle_backend_event(event);
        self.flush_signaling();
        match outcome {
            None => {}
            Some(PeerEvent::Connected) => {
                self.hub.publish(TransportEvent::Connected {
                    peer: HOST_PEER,
                    name: self.peer.name().to_string(),
                });
            }
            Some(PeerEvent::Disconnected) => {
                self.hub
                    .publish(TransportEvent::Disconnected { peer: HOST_PEER });
            }
            Some(PeerEvent::Failed) => warn!("Connection to host failed before opening"),
            Some(PeerEvent::Message { channel, payload }) => {
                self.hub.publish(TransportEvent::Message {
                    peer: HOST_PEER,
                    channel,
                    payload,
                });
            }
        }
    }

    pub fn send(&mut self, channel: ChannelKind, payload: &Payload) -> Result<(), TransportError> {
        self.peer.send(channel, payload)
    }

    pub fn send_reliable_text(&mut self, text: &str) -> Result<(), TransportError> {
        self.peer.send_reliable_text(text)
    }

    pub fn send_reliable_binary(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.peer.send_reliable_binary(bytes)
    }

    pub fn send_unreliable_text(&mut self, text: &str) -> Result<(), TransportError> {
        self.peer.send_unreliable_text(text)
    }

    pub fn send_unreliable_binary(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.peer.send_unreliable_binary(bytes)
    }

    pub fn close(&mut self) {
        self.peer.close();
    }
}
