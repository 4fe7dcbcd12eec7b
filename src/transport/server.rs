// Host side of the transport: roster of joiners, one peer connection each

use std::collections::{HashMap, VecDeque};
use std::sync::mpsc::Receiver;

use serde_json::Value;
use tracing::{debug, info, warn};

use super::events::{EventHub, EventKind, TransportEvent};
use super::peer::{BackendEvent, PeerBackend, PeerEvent, PeerTransport};
use super::relay::{RelayEnvelope, RelayEvent};
use super::signaling::SignalMessage;
use super::{ChannelKind, Payload, PeerId, TransportError};

/// Builds a fresh connection backend for each joining peer
pub trait BackendFactory {
    type Backend: PeerBackend;

    fn create(&mut self, peer: PeerId, name: &str) -> Result<Self::Backend, TransportError>;
}

pub struct TransportServer<F: BackendFactory> {
    factory: F,
    roster: HashMap<String, PeerId>,
    peers: HashMap<PeerId, PeerTransport<F::Backend>>,
    next_peer: PeerId,
    hub: EventHub,
    outbox: VecDeque<RelayEnvelope>,
}

impl<F: BackendFactory> TransportServer<F> {
    pub fn new(factory: F) -> Self {
        Self {
            factory,
            roster: HashMap::new(),
            peers: HashMap::new(),
            next_peer: 1,
            hub: EventHub::new(),
            outbox: VecDeque::new(),
        }
    }

    pub fn subscribe(&mut self, kinds: &[EventKind]) -> Receiver<TransportEvent> {
        self.hub.subscribe(kinds)
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn peer_of(&self, name: &str) -> Option<PeerId> {
        self.roster.get(name).copied()
    }

    pub fn peer(&self, peer: PeerId) -> Option<&PeerTransport<F::Backend>> {
        self.peers.get(&peer)
    }

    pub fn connected_peers(&self) -> Vec<PeerId> {
        self.peers
            .values()
            .filter(|p| p.is_connected())
            .map(|p| p.id())
            .collect()
    }

    pub fn peers(&self) -> impl Iterator<Item = &PeerTransport<F::Backend>> {
        self.peers.values()
    }

    /// Mutable access for the runtime to drive each backend
    pub fn peers_mut(&mut self) -> impl Iterator<Item = (PeerId, &mut PeerTransport<F::Backend>)> {
        self.peers.iter_mut().map(|(id, peer)| (*id, peer))
    }

    pub fn handle_relay(&mut self, event: RelayEvent) {
        match event {
            RelayEvent::Connected => info!("Relay connected, waiting for joiners"),
            RelayEvent::Disconnected => {
                warn!("Relay connection lost; existing peers stay up, no new joiners")
            }
            RelayEvent::Message { from, message } => self.handle_relay_message(from, message),
        }
    }

    fn handle_relay_message(&mut self, from: String, message: Value) {
        let signal: SignalMessage = match serde_json::from_value(message) {
            Ok(signal) => signal,
            Err(e) => {
                warn!(%from, "Dropping malformed signaling message: {}", e);
                return;
            }
        };
        match signal {
            SignalMessage::Connect => self.accept_joiner(from),
            SignalMessage::Unknown => warn!(%from, "Dropping unknown signaling message"),
            signal => {
                let Some(peer_id) = self.roster.get(&from).copied() else {
                    warn!(%from, kind = signal.name(), "Signaling from unknown sender");
                    return;
                };
                if let Some(peer) = self.peers.get_mut(&peer_id) {
                    peer.handle_signal(signal);
                }
                self.flush_signaling(peer_id);
            }
        }
    }

    fn accept_joiner(&mut self, name: String) {
        if let Some(existing) = self.roster.get(&name) {
            warn!(%name, peer = existing, "Duplicate connect ignored");
            return;
        }
        let peer_id = self.next_peer;
        let backend = match self.factory.create(peer_id, &name) {
            Ok(backend) => backend,
            Err(e) => {
                warn!(%name, "Could not create peer connection: {}", e);
                return;
            }
        };
        self.next_peer = self.next_peer.wrapping_add(1);

        let mut peer = PeerTransport::offerer(peer_id, name.clone(), backend);
        peer.start();
        if peer.is_closed() {
            warn!(%name, "Negotiation could not start, dropping joiner");
            return;
        }
        info!(%name, peer = peer_id, "Joiner registered, offer sent");
        self.roster.insert(name, peer_id);
        self.peers.insert(peer_id, peer);
        self.flush_signaling(peer_id);
    }

    fn flush_signaling(&mut self, peer_id: PeerId) {
        let Some(peer) = self.peers.get_mut(&peer_id) else {
            return;
        };
        while let Some(signal) = peer.poll_outgoing() {
            match serde_json::to_value(&signal) {
                Ok(message) => self.outbox.push_back(RelayEnvelope {
                    to: peer.name().to_string(),
                    message,
                }),
                Err(e) => warn!("Failed to encode signaling message: {}", e),
            }
        }
    }

    /// Next envelope the runtime should write to the relay socket
    pub fn poll_relay(&mut self) -> Option<RelayEnvelope> {
        self.outbox.pop_front()
    }

    pub fn handle_backend_event(&mut self, peer_id: PeerId, event: BackendEvent) {
        let Some(peer) = self.peers.get_mut(&peer_id) else {
            debug!(peer = peer_id, "Backend event for a removed peer");
            return;
        };
        let outcome = peer.handle_backend_event(event);
        let name = peer.name().to_string();
        self.flush_signaling(peer_id);

        match outcome {
            None => {}
            Some(PeerEvent::Connected) => {
                self.hub.publish(TransportEvent::Connected {
                    peer: peer_id,
                    name,
                });
            }
            Some(PeerEvent::Disconnected) => {
                self.remove_client(peer_id);
                self.hub
                    .publish(TransportEvent::Disconnected { peer: peer_id });
            }
            Some(PeerEvent::Failed) => {
                self.remove_client(peer_id);
            }
            Some(PeerEvent::Message { channel, payload }) => {
                self.hub.publish(TransportEvent::Message {
                    peer: peer_id,
                    channel,
                    payload,
                });
            }
        }
    }

    pub fn send(
        &mut self,
        peer_id: PeerId,
        channel: ChannelKind,
        payload: &Payload,
    ) -> Result<(), TransportError> {
        let peer = self
            .peers
            .get_mut(&peer_id)
            .ok_or(TransportError::UnknownPeer(peer_id))?;
        peer.send(channel, payload)
    }

    pub fn send_reliable_text(&mut self, peer: PeerId, text: &str) -> Result<(), TransportError> {
        self.send(peer, ChannelKind::Reliable, &Payload::Text(text.to_string()))
    }

    pub fn send_unreliable_binary(
        &mut self,
        peer: PeerId,
        bytes: &[u8],
    ) -> Result<(), TransportError> {
        self.send(peer, ChannelKind::Unreliable, &Payload::Binary(bytes.to_vec()))
    }

    /// Send to every connected peer; one failing peer does not stop the rest
    pub fn broadcast(&mut self, channel: ChannelKind, payload: &Payload) -> usize {
        let mut sent = 0;
        for peer in self.peers.values_mut().filter(|p| p.is_connected()) {
            match peer.send(channel, payload) {
                Ok(()) => sent += 1,
                Err(e) => warn!(peer = peer.id(), "Broadcast send failed: {}", e),
            }
        }
        sent
    }

    /// Tear down a peer and forget its name; unknown ids are a no-op
    pub fn remove_client(&mut self, peer_id: PeerId) {
        let Some(mut peer) = self.peers.remove(&peer_id) else {
            return;
        };
        peer.close();
        self.roster.remove(peer.name());
        debug!(peer = peer_id, name = peer.name(), "Peer removed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::signaling::SessionDescription;
    use crate::transport::testing::FakeFactory;
    use serde_json::json;

    fn relay_from(name: &str, message: Value) -> RelayEvent {
        RelayEvent::Message {
            from: name.to_string(),
            message,
        }
    }

    fn drain(server: &mut TransportServer<FakeFactory>) -> Vec<RelayEnvelope> {
        std::iter::from_fn(|| server.poll_relay()).collect()
    }

    fn answer() -> Value {
        serde_json::to_value(SignalMessage::Answer {
            answer: SessionDescription::answer("fake-answer"),
        })
        .unwrap()
    }

    fn connected_server(names: &[&str]) -> TransportServer<FakeFactory> {
        let mut server = TransportServer::new(FakeFactory::default());
        for name in names {
            server.handle_relay(relay_from(name, json!({"type": "connect"})));
            server.handle_relay(relay_from(name, answer()));
            let id = server.peer_of(name).unwrap();
            server.handle_backend_event(id, BackendEvent::ChannelOpen(ChannelKind::Reliable));
            server.handle_backend_event(id, BackendEvent::ChannelOpen(ChannelKind::Unreliable));
        }
        drain(&mut server);
        server
    }

    #[test]
    fn test_connect_creates_peer_and_sends_offer() {
        let mut server = TransportServer::new(FakeFactory::default());
        server.handle_relay(relay_from("alice", json!({"type": "connect"})));

        assert_eq!(server.peer_of("alice"), Some(1));
        let out = drain(&mut server);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].to, "alice");
        assert_eq!(out[0].message["type"], "offer");
    }

    #[test]
    fn test_duplicate_connect_ignored() {
        let mut server = TransportServer::new(FakeFactory::default());
        server.handle_relay(relay_from("alice", json!({"type": "connect"})));
        server.handle_relay(relay_from("alice", json!({"type": "connect"})));
        assert_eq!(server.peer_count(), 1);
        assert_eq!(server.factory().created.len(), 1);
        assert_eq!(drain(&mut server).len(), 1);
    }

    #[test]
    fn test_signal_from_unknown_sender_dropped() {
        let mut server = TransportServer::new(FakeFactory::default());
        server.handle_relay(relay_from("mallory", answer()));
        server.handle_relay(relay_from("mallory", json!({"type": "nonsense"})));
        server.handle_relay(relay_from("mallory", json!("not even an object")));
        assert_eq!(server.peer_count(), 0);
        assert!(drain(&mut server).is_empty());
    }

    #[test]
    fn test_factory_failure_leaves_no_trace() {
        let mut server = TransportServer::new(FakeFactory {
            fail_create: true,
            ..Default::default()
        });
        server.handle_relay(relay_from("alice", json!({"type": "connect"})));
        assert_eq!(server.peer_count(), 0);
        assert_eq!(server.peer_of("alice"), None);
    }

    #[test]
    fn test_connected_event_published_once() {
        let mut server = TransportServer::new(FakeFactory::default());
        let events = server.subscribe(&[EventKind::Connected]);
        server.handle_relay(relay_from("alice", json!({"type": "connect"})));
        server.handle_relay(relay_from("alice", answer()));

        server.handle_backend_event(1, BackendEvent::ChannelOpen(ChannelKind::Unreliable));
        assert!(events.try_recv().is_err());
        server.handle_backend_event(1, BackendEvent::ChannelOpen(ChannelKind::Reliable));
        assert_eq!(
            events.try_recv().unwrap(),
            TransportEvent::Connected {
                peer: 1,
                name: "alice".to_string()
            }
        );
        server.handle_backend_event(1, BackendEvent::ChannelOpen(ChannelKind::Reliable));
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_disconnect_removes_once() {
        let mut server = connected_server(&["alice", "bob"]);
        let events = server.subscribe(&[EventKind::Disconnected]);

        server.handle_backend_event(1, BackendEvent::ChannelClosed(ChannelKind::Reliable));
        server.handle_backend_event(1, BackendEvent::ChannelClosed(ChannelKind::Unreliable));
        server.handle_backend_event(1, BackendEvent::ConnectionLost);

        assert_eq!(events.try_recv().unwrap(), TransportEvent::Disconnected { peer: 1 });
        assert!(events.try_recv().is_err());
        assert_eq!(server.peer_of("alice"), None);
        assert_eq!(server.peer_count(), 1);

        // the same name may join again and gets a fresh id
        server.handle_relay(relay_from("alice", json!({"type": "connect"})));
        assert_eq!(server.peer_of("alice"), Some(3));
    }

    #[test]
    fn test_failed_handshake_is_silent() {
        let mut server = TransportServer::new(FakeFactory::default());
        let events = server.subscribe(&[EventKind::Disconnected]);
        server.handle_relay(relay_from("alice", json!({"type": "connect"})));
        server.handle_backend_event(1, BackendEvent::ConnectionLost);
        assert!(events.try_recv().is_err());
        assert_eq!(server.peer_count(), 0);
    }

    #[test]
    fn test_remove_client_idempotent() {
        let mut server = connected_server(&["alice"]);
        server.remove_client(1);
        server.remove_client(1);
        server.remove_client(42);
        assert_eq!(server.peer_count(), 0);
        assert!(server.send_reliable_text(1, "{}").is_err());
    }

    #[test]
    fn test_broadcast_reaches_connected_only() {
        let mut server = connected_server(&["alice", "bob"]);
        server.handle_relay(relay_from("carol", json!({"type": "connect"})));
        let sent = server.broadcast(ChannelKind::Reliable, &Payload::Text("hi".to_string()));
        assert_eq!(sent, 2);
        let carol = server.peer_of("carol").unwrap();
        assert!(server.peer(carol).unwrap().backend().sent.is_empty());
    }

    #[test]
    fn test_broadcast_survives_failing_peer() {
        let mut server = connected_server(&["alice", "bob", "carol"]);
        let bob = server.peer_of("bob").unwrap();
        for (id, peer) in server.peers_mut() {
            if id == bob {
                peer.backend_mut().fail_sends = true;
            }
        }

        let sent = server.broadcast(ChannelKind::Unreliable, &Payload::Binary(vec![7, 0]));
        assert_eq!(sent, 2);
        for name in ["alice", "carol"] {
            let id = server.peer_of(name).unwrap();
            assert_eq!(
                server.peer(id).unwrap().backend().sent,
                vec![(ChannelKind::Unreliable, Payload::Binary(vec![7, 0]))]
            );
        }
        assert!(server.peer(bob).unwrap().backend().sent.is_empty());
        assert_eq!(server.peer_count(), 3);
    }

    #[test]
    fn test_messages_routed_by_kind() {
        let mut server = connected_server(&["alice"]);
        let reports = server.subscribe(&[EventKind::UnreliableBinary]);
        server.handle_backend_event(
            1,
            BackendEvent::Data(ChannelKind::Unreliable, Payload::Binary(vec![1, 0, 2, 0, 0, 0])),
        );
        // no subscriber for reliable text: dropped, nothing breaks
        server.handle_backend_event(
            1,
            BackendEvent::Data(ChannelKind::Reliable, Payload::Text("{}".to_string())),
        );
        let event = reports.try_recv().unwrap();
        assert_eq!(event.kind(), EventKind::UnreliableBinary);
        assert_eq!(event.peer(), 1);
        assert!(reports.try_recv().is_err());
    }

    #[test]
    fn test_candidates_forwarded_through_relay() {
        let mut server = TransportServer::new(FakeFactory::default());
        server.handle_relay(relay_from("alice", json!({"type": "connect"})));
        drain(&mut server);
        server.handle_backend_event(1, BackendEvent::LocalCandidate("candidate:1".to_string()));
        server.handle_backend_event(1, BackendEvent::LocalCandidate(String::new()));
        let out = drain(&mut server);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].message, json!({"type": "candidate", "candidate": "candidate:1"}));
        assert_eq!(out[1].message, json!({"type": "candidate", "candidate": ""}));

        server.handle_relay(relay_from("alice", answer()));
        server.handle_relay(relay_from(
            "alice",
            json!({"type": "candidate", "candidate": "candidate:remote"}),
        ));
        assert_eq!(
            server.peer(1).unwrap().backend().remote_candidates,
            vec!["candidate:remote"]
        );
    }
}
