// Application messages carried as JSON on the reliable channel

use serde::{Deserialize, Serialize};

use super::entity::EntityId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AppMessage {
    /// Binds the receiver's locally-controlled entity
    Identify {
        #[serde(rename = "entityId")]
        entity_id: EntityId,
    },

    /// Display name of an entity's owner
    Name {
        #[serde(rename = "entityId")]
        entity_id: EntityId,
        name: String,
    },

    /// Server sequence at connect time, used as the client's time base
    Time { seq: u16 },

    /// Any other tag; logged and ignored by receivers
    #[serde(other)]
    Unknown,
}

impl AppMessage {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}
