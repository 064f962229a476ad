//! Wire protocol: inbound message normalization and outbound frames.
//!
//! Clients speak JSON in one of two shapes: v2 wraps the payload under
//! `data`, v1 puts the fields at the top level. The presence of a `data`
//! object selects the shape; everything downstream of this module only sees
//! the normalized form. Malformed input maps to `None` and is dropped by the
//! reader without breaking the session.

use serde::Deserialize;
use serde_json::{json, Value};

use crate::core::domain::{FilterSpec, Order, Tick, UniverseUpdate};
use crate::error::Result;

/// Normalized configure payload.
#[derive(Debug, Deserialize)]
pub struct ConfigurePayload {
    #[serde(default = "default_paper_trade")]
    pub paper_trade: bool,
    #[serde(default = "default_protocol_version")]
    pub protocol_version: u8,
    #[serde(default)]
    pub subscribe: Option<Vec<String>>,
    #[serde(default)]
    pub filter: Option<FilterSpec>,
}

const fn default_paper_trade() -> bool {
    true
}

const fn default_protocol_version() -> u8 {
    1
}

/// A client action the session engine knows how to route.
#[derive(Debug)]
pub enum ClientMessage {
    Configure(ConfigurePayload),
    Order(Order),
}

/// Parse one inbound text frame. `None` covers everything the session
/// ignores: malformed JSON, unknown actions, payloads that fail validation.
#[must_use]
pub fn parse_client_message(raw: &str) -> Option<ClientMessage> {
    let value: Value = serde_json::from_str(raw).ok()?;
    let action = value.get("action")?.as_str()?;

    match action {
        "configure" => {
            let payload = unwrap_payload(&value);
            serde_json::from_value(payload)
                .ok()
                .map(ClientMessage::Configure)
        }
        "order" => {
            let payload = if value.get("data").is_some_and(Value::is_object) {
                value.get("data").cloned()?
            } else if value.get("symbol").is_some() {
                // Legacy flat shape: the message itself is the order.
                value.clone()
            } else {
                return None;
            };
            serde_json::from_value(payload).ok().map(ClientMessage::Order)
        }
        _ => None,
    }
}

fn unwrap_payload(value: &Value) -> Value {
    match value.get("data") {
        Some(data) if data.is_object() => data.clone(),
        _ => value.clone(),
    }
}

/// Outbound frame, serialized per negotiated protocol version at send time.
#[derive(Debug, Clone)]
pub enum ServerFrame {
    Tick(Tick),
    Universe(UniverseUpdate),
    Error(String),
}

impl ServerFrame {
    /// Encode for the wire. v1 sends ticks as bare objects; universe and
    /// error frames are always action-wrapped.
    pub fn to_wire(&self, protocol_version: u8) -> Result<String> {
        let value = match self {
            Self::Tick(tick) if protocol_version >= 2 => {
                json!({"action": "tick", "data": tick})
            }
            Self::Tick(tick) => serde_json::to_value(tick)?,
            Self::Universe(update) => json!({"action": "universe", "data": update}),
            Self::Error(message) => json!({"action": "error", "data": {"message": message}}),
        };
        Ok(value.to_string())
    }
}
