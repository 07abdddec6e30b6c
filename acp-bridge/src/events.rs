//! Internal event bus payloads consumed by the bridge

use crate::error::{BridgeError, Result};
use crate::session_api::Part;
use serde::Deserialize;
use serde_json::Value;

/// Tool call a permission request belongs to
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PermissionToolRef {
    #[serde(rename = "messageID")]
    pub message_id: String,
    #[serde(rename = "callID")]
    pub call_id: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PermissionAsked {
    pub id: String,
    #[serde(rename = "sessionID")]
    pub session_id: String,
    /// Permission kind, e.g. `edit`, `bash`, `webfetch`
    pub permission: String,
    #[serde(default)]
    pub patterns: Vec<String>,
    #[serde(default)]
    pub metadata: Value,
    #[serde(default)]
    pub tool: Option<PermissionToolRef>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PartUpdated {
    pub part: Part,
    /// Text appended since the previous update of this part
    #[serde(default)]
    pub delta: Option<String>,
}

/// One event from the bus
#[derive(Debug, Clone, PartialEq)]
pub enum BusEvent {
    /// A (re)connection was established; per-connection state must reset
    Connected,
    PermissionAsked(PermissionAsked),
    PartUpdated(PartUpdated),
    /// An event type the bridge does not translate
    Other(String),
}

/// Envelope as it appears on the wire
#[derive(Debug, Deserialize)]
pub struct RawEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub properties: Value,
}

impl TryFrom<RawEvent> for BusEvent {
    type Error = BridgeError;

    fn try_from(raw: RawEvent) -> Result<Self> {
        let event = match raw.event_type.as_str() {
            "server.connected" => BusEvent::Connected,
            "permission.asked" => BusEvent::PermissionAsked(
                serde_json::from_value(raw.properties).map_err(|e| {
                    BridgeError::Translation(format!("malformed permission.asked: {}", e))
                })?,
            ),
            "message.part.updated" => BusEvent::PartUpdated(
                serde_json::from_value(raw.properties).map_err(|e| {
                    BridgeError::Translation(format!("malformed message.part.updated: {}", e))
                })?,
            ),
            _ => BusEvent::Other(raw.event_type),
        };
        Ok(event)
    }
}

impl BusEvent {
    /// Decode one event from its JSON text
    pub fn parse(data: &str) -> Result<Self> {
        let raw: RawEvent = serde_json::from_str(data)
            .map_err(|e| BridgeError::Translation(format!("malformed event envelope: {}", e)))?;
        raw.try_into()
    }
}
