// Subscription fan-out for transport events
//
// Subscribers pick the kinds they care about and get an mpsc receiver.
// A message nobody subscribed to is dropped with a warning.

use std::sync::mpsc::{self, Receiver, Sender};

use tracing::{debug, warn};

use super::{ChannelKind, Payload, PeerId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connected,
    Disconnected,
    ReliableText,
    ReliableBinary,
    UnreliableText,
    UnreliableBinary,
}

impl EventKind {
    pub fn for_message(channel: ChannelKind, payload: &Payload) -> Self {
        match (channel, payload.is_binary()) {
            (ChannelKind::Reliable, false) => EventKind::ReliableText,
            (ChannelKind::Reliable, true) => EventKind::ReliableBinary,
            (ChannelKind::Unreliable, false) => EventKind::UnreliableText,
            (ChannelKind::Unreliable, true) => EventKind::UnreliableBinary,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Connected {
        peer: PeerId,
        name: String,
    },
    Disconnected {
        peer: PeerId,
    },
    Message {
        peer: PeerId,
        channel: ChannelKind,
        payload: Payload,
    },
}

impl TransportEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            TransportEvent::Connected { .. } => EventKind::Connected,
            TransportEvent::Disconnected { .. } => EventKind::Disconnected,
            TransportEvent::Message {
                channel, payload, ..
            } => EventKind::for_message(*channel, payload),
        }
    }

    pub fn peer(&self) -> PeerId {
        match self {
            TransportEvent::Connected { peer, .. }
            | TransportEvent::Disconnected { peer }
            | TransportEvent::Message { peer, .. } => *peer,
        }
    }
}

struct Subscriber {
    kinds: Vec<EventKind>,
    sender: Sender<TransportEvent>,
}

#[derive(Default)]
pub struct EventHub {
    subscribers: Vec<Subscriber>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, kinds: &[EventKind]) -> Receiver<TransportEvent> {
        let (sender, receiver) = mpsc::channel();
        self.subscribers.push(Subscriber {
            kinds: kinds.to_vec(),
            sender,
        });
        receiver
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Deliver to every interested subscriber; returns how many received it
    pub fn publish(&mut self, event: TransportEvent) -> usize {
        let kind = event.kind();
        let mut delivered = 0;
        self.subscribers.retain(|subscriber| {
            if !subscriber.kinds.contains(&kind) {
                return true;
            }
            match subscriber.sender.send(event.clone()) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(_) => {
                    debug!(?kind, "Dropping subscriber whose receiver is gone");
                    false
                }
            }
        });
        if delivered == 0 {
            match kind {
                EventKind::Connected | EventKind::Disconnected => {
                    debug!(?kind, peer = event.peer(), "No subscriber for lifecycle event");
                }
                _ => {
                    warn!(?kind, peer = event.peer(), "No subscriber for message, dropping");
                }
            }
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binary(peer: PeerId) -> TransportEvent {
        TransportEvent::Message {
            peer,
            channel: ChannelKind::Unreliable,
            payload: Payload::Binary(vec![0, 0]),
        }
    }

    #[test]
    fn test_kind_classification() {
        assert_eq!(binary(1).kind(), EventKind::UnreliableBinary);
        let text = TransportEvent::Message {
            peer: 1,
            channel: ChannelKind::Reliable,
            payload: Payload::Text("{}".to_string()),
        };
        assert_eq!(text.kind(), EventKind::ReliableText);
    }

    #[test]
    fn test_fan_out_to_multiple_subscribers() {
        let mut hub = EventHub::new();
        let a = hub.subscribe(&[EventKind::UnreliableBinary]);
        let b = hub.subscribe(&[EventKind::UnreliableBinary, EventKind::Connected]);
        let c = hub.subscribe(&[EventKind::ReliableText]);

        assert_eq!(hub.publish(binary(3)), 2);
        assert_eq!(a.try_recv().unwrap(), binary(3));
        assert_eq!(b.try_recv().unwrap(), binary(3));
        assert!(c.try_recv().is_err());
    }

    #[test]
    fn test_unsubscribed_message_is_dropped() {
        let mut hub = EventHub::new();
        let rx = hub.subscribe(&[EventKind::Connected]);
        assert_eq!(hub.publish(binary(1)), 0);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_dead_subscriber_is_pruned() {
        let mut hub = EventHub::new();
        let rx = hub.subscribe(&[EventKind::UnreliableBinary]);
        drop(rx);
        assert_eq!(hub.publish(binary(1)), 0);
        assert_eq!(hub.subscriber_count(), 0);
    }
}
