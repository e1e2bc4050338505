//! # Messages
//!
//! The envelope every port and actor exchanges, and the closed set of payload
//! types the kernel reasons about when it validates connections.

use crate::id::{correlation_token, ActorId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Metadata key stamped by protocol adapters and read by the metrics layer
pub const PROTOCOL_METADATA_KEY: &str = "protocol";

/// Descriptor of a payload's type.
///
/// Connection validation, conversion rules and adapters only ever compare
/// these values for equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PayloadType {
    Unit,
    Bool,
    Int,
    Float,
    Text,
    Bytes,
    Json,
    /// An application defined record type, identified by name
    Named(String),
}

impl PayloadType {
    pub fn named(name: impl Into<String>) -> Self {
        PayloadType::Named(name.into())
    }
}

impl fmt::Display for PayloadType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PayloadType::Unit => write!(f, "Unit"),
            PayloadType::Bool => write!(f, "Bool"),
            PayloadType::Int => write!(f, "Int"),
            PayloadType::Float => write!(f, "Float"),
            PayloadType::Text => write!(f, "Text"),
            PayloadType::Bytes => write!(f, "Bytes"),
            PayloadType::Json => write!(f, "Json"),
            PayloadType::Named(name) => write!(f, "Named({})", name),
        }
    }
}

/// A message payload, one variant per [`PayloadType`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Payload {
    Unit,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    Json(Value),
    Named { type_name: String, value: Value },
}

impl Payload {
    pub fn payload_type(&self) -> PayloadType {
        match self {
            Payload::Unit => PayloadType::Unit,
            Payload::Bool(_) => PayloadType::Bool,
            Payload::Int(_) => PayloadType::Int,
            Payload::Float(_) => PayloadType::Float,
            Payload::Text(_) => PayloadType::Text,
            Payload::Bytes(_) => PayloadType::Bytes,
            Payload::Json(_) => PayloadType::Json,
            Payload::Named { type_name, .. } => PayloadType::Named(type_name.clone()),
        }
    }

    pub fn named(type_name: impl Into<String>, value: Value) -> Self {
        Payload::Named {
            type_name: type_name.into(),
            value,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Payload::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Payload::Int(value) => Some(*value),
            _ => None,
        }
    }
}

impl From<&str> for Payload {
    fn from(value: &str) -> Self {
        Payload::Text(value.to_string())
    }
}

impl From<String> for Payload {
    fn from(value: String) -> Self {
        Payload::Text(value)
    }
}

impl From<i64> for Payload {
    fn from(value: i64) -> Self {
        Payload::Int(value)
    }
}

impl From<bool> for Payload {
    fn from(value: bool) -> Self {
        Payload::Bool(value)
    }
}

impl From<f64> for Payload {
    fn from(value: f64) -> Self {
        Payload::Float(value)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(value: Vec<u8>) -> Self {
        Payload::Bytes(value)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MessagePriority {
    High,
    #[default]
    Normal,
    Low,
}

impl fmt::Display for MessagePriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessagePriority::High => write!(f, "HIGH"),
            MessagePriority::Normal => write!(f, "NORMAL"),
            MessagePriority::Low => write!(f, "LOW"),
        }
    }
}

/// # ActorMessage
///
/// Immutable envelope around a [`Payload`].
///
/// Every `with_*` method consumes the message and returns a new one, so a
/// message that has been handed to a port can never be changed underneath
/// its receiver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActorMessage {
    correlation_id: String,
    payload: Payload,
    sender: Option<ActorId>,
    timestamp: DateTime<Utc>,
    priority: MessagePriority,
    metadata: BTreeMap<String, String>,
}

impl ActorMessage {
    pub fn new(payload: impl Into<Payload>) -> Self {
        Self {
            correlation_id: correlation_token(),
            payload: payload.into(),
            sender: None,
            timestamp: Utc::now(),
            priority: MessagePriority::Normal,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = correlation_id.into();
        self
    }

    pub fn with_sender(mut self, sender: ActorId) -> Self {
        self.sender = Some(sender);
        self
    }

    pub fn with_priority(mut self, priority: MessagePriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Same envelope, new payload. Used by handlers, adapters and rules.
    pub fn with_payload(mut self, payload: impl Into<Payload>) -> Self {
        self.payload = payload.into();
        self
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn into_payload(self) -> Payload {
        self.payload
    }

    /// Moves the payload out, leaving `Unit` in the returned envelope until a
    /// converted payload is put back with [`ActorMessage::with_payload`].
    pub(crate) fn take_payload(mut self) -> (Payload, ActorMessage) {
        let payload = std::mem::replace(&mut self.payload, Payload::Unit);
        (payload, self)
    }

    pub fn payload_type(&self) -> PayloadType {
        self.payload.payload_type()
    }

    pub fn sender(&self) -> Option<&ActorId> {
        self.sender.as_ref()
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn priority(&self) -> MessagePriority {
        self.priority
    }

    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    pub fn metadata_value(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    pub fn protocol(&self) -> Option<&str> {
        self.metadata_value(PROTOCOL_METADATA_KEY)
    }
}
