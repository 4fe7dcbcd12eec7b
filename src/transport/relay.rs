// Envelopes exchanged with the name-addressed relay
//
// Outgoing: {"to": "<peer name>", "message": {...}}
// Incoming: {"from": "<peer name>", "message": {...}}

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayEnvelope {
    pub to: String,
    pub message: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayDelivery {
    pub from: String,
    pub message: Value,
}

/// What the relay socket hands to the transport
#[derive(Debug, Clone, PartialEq)]
pub enum RelayEvent {
    Connected,
    Disconnected,
    Message { from: String, message: Value },
}

impl From<RelayDelivery> for RelayEvent {
    fn from(delivery: RelayDelivery) -> Self {
        RelayEvent::Message {
            from: delivery.from,
            message: delivery.message,
        }
    }
}
