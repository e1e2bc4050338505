//! Transformation units that can sit between a sender and a port's queue:
//! message handlers, protocol adapters and conversion rules.

use crate::messages::{ActorMessage, Payload, PayloadType, PROTOCOL_METADATA_KEY};
use anyhow::{anyhow, bail, Result};
use std::fmt;
use std::sync::Arc;

/// A transformation applied to every message, in registration order.
/// Returning an error rejects the message.
pub trait MessageHandler: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn handle(&self, message: ActorMessage) -> Result<ActorMessage>;
}

/// Encodes and decodes between two concrete representations of a message
pub trait ProtocolAdapter: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Protocol label recorded in message metadata and in the metrics
    fn protocol(&self) -> &str {
        self.name()
    }

    fn source_type(&self) -> &PayloadType;

    fn target_type(&self) -> &PayloadType;

    fn can_handle(&self, from: &PayloadType, to: &PayloadType) -> bool {
        from == self.source_type() && to == self.target_type()
    }

    /// Source representation to target representation
    fn encode(&self, payload: Payload) -> Result<Payload>;

    /// Target representation back to source representation
    fn decode(&self, payload: Payload) -> Result<Payload>;
}

/// A single, type-checked step usable as a link in a conversion chain
pub trait ConversionRule: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn input_type(&self) -> &PayloadType;

    fn output_type(&self) -> &PayloadType;

    fn can_handle(&self, input: &PayloadType, output: &PayloadType) -> bool {
        input == self.input_type() && output == self.output_type()
    }

    fn convert(&self, payload: Payload) -> Result<Payload>;
}

pub(crate) fn apply_handler(handler: &dyn MessageHandler, message: ActorMessage) -> Result<ActorMessage> {
    handler
        .handle(message)
        .map_err(|e| anyhow!("handler '{}' rejected message: {}", handler.name(), e))
}

/// Runs one rule and checks it produced what it declared
pub(crate) fn apply_rule(rule: &dyn ConversionRule, message: ActorMessage) -> Result<ActorMessage> {
    let (payload, envelope) = split(message);
    let converted = rule
        .convert(payload)
        .map_err(|e| anyhow!("conversion rule '{}' failed: {}", rule.name(), e))?;
    if &converted.payload_type() != rule.output_type() {
        bail!(
            "conversion rule '{}' produced {} instead of {}",
            rule.name(),
            converted.payload_type(),
            rule.output_type()
        );
    }
    Ok(envelope.with_payload(converted))
}

pub(crate) fn apply_encode(adapter: &dyn ProtocolAdapter, message: ActorMessage) -> Result<ActorMessage> {
    let (payload, envelope) = split(message);
    let encoded = adapter
        .encode(payload)
        .map_err(|e| anyhow!("protocol adapter '{}' failed to encode: {}", adapter.name(), e))?;
    Ok(envelope
        .with_payload(encoded)
        .with_metadata(PROTOCOL_METADATA_KEY, adapter.protocol()))
}

pub(crate) fn apply_decode(adapter: &dyn ProtocolAdapter, message: ActorMessage) -> Result<ActorMessage> {
    let (payload, envelope) = split(message);
    let decoded = adapter
        .decode(payload)
        .map_err(|e| anyhow!("protocol adapter '{}' failed to decode: {}", adapter.name(), e))?;
    Ok(envelope
        .with_payload(decoded)
        .with_metadata(PROTOCOL_METADATA_KEY, adapter.protocol()))
}

fn split(message: ActorMessage) -> (Payload, ActorMessage) {
    message.take_payload()
}

/// Closure backed [`MessageHandler`]
pub struct FnHandler<F> {
    name: String,
    f: F,
}

impl<F> MessageHandler for FnHandler<F>
where
    F: Fn(ActorMessage) -> Result<ActorMessage> + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn handle(&self, message: ActorMessage) -> Result<ActorMessage> {
        (self.f)(message)
    }
}

impl<F> fmt::Debug for FnHandler<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnHandler").field("name", &self.name).finish()
    }
}

pub fn handler_fn<F>(name: impl Into<String>, f: F) -> Arc<dyn MessageHandler>
where
    F: Fn(ActorMessage) -> Result<ActorMessage> + Send + Sync + 'static,
{
    Arc::new(FnHandler {
        name: name.into(),
        f,
    })
}

/// Closure backed [`ConversionRule`]
pub struct FnRule<F> {
    name: String,
    input: PayloadType,
    output: PayloadType,
    f: F,
}

impl<F> ConversionRule for FnRule<F>
where
    F: Fn(Payload) -> Result<Payload> + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn input_type(&self) -> &PayloadType {
        &self.input
    }

    fn output_type(&self) -> &PayloadType {
        &self.output
    }

    fn convert(&self, payload: Payload) -> Result<Payload> {
        (self.f)(payload)
    }
}

impl<F> fmt::Debug for FnRule<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnRule")
            .field("name", &self.name)
            .field("input", &self.input)
            .field("output", &self.output)
            .finish()
    }
}

pub fn rule_fn<F>(
    name: impl Into<String>,
    input: PayloadType,
    output: PayloadType,
    f: F,
) -> Arc<dyn ConversionRule>
where
    F: Fn(Payload) -> Result<Payload> + Send + Sync + 'static,
{
    Arc::new(FnRule {
        name: name.into(),
        input,
        output,
        f,
    })
}

/// JSON values carried as their serialized text
#[derive(Debug, Clone)]
pub struct JsonTextAdapter {
    source: PayloadType,
    target: PayloadType,
}

impl JsonTextAdapter {
    pub fn new() -> Self {
        Self {
            source: PayloadType::Json,
            target: PayloadType::Text,
        }
    }
}

impl Default for JsonTextAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProtocolAdapter for JsonTextAdapter {
    fn name(&self) -> &str {
        "json"
    }

    fn source_type(&self) -> &PayloadType {
        &self.source
    }

    fn target_type(&self) -> &PayloadType {
        &self.target
    }

    fn encode(&self, payload: Payload) -> Result<Payload> {
        match payload {
            Payload::Json(value) => Ok(Payload::Text(serde_json::to_string(&value)?)),
            other => bail!("expected Json, got {}", other.payload_type()),
        }
    }

    fn decode(&self, payload: Payload) -> Result<Payload> {
        match payload {
            Payload::Text(text) => Ok(Payload::Json(serde_json::from_str(&text)?)),
            other => bail!("expected Text, got {}", other.payload_type()),
        }
    }
}

/// Text carried as UTF-8 bytes
#[derive(Debug, Clone)]
pub struct Utf8BytesAdapter {
    source: PayloadType,
    target: PayloadType,
}

impl Utf8BytesAdapter {
    pub fn new() -> Self {
        Self {
            source: PayloadType::Text,
            target: PayloadType::Bytes,
        }
    }
}

impl Default for Utf8BytesAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProtocolAdapter for Utf8BytesAdapter {
    fn name(&self) -> &str {
        "utf8"
    }

    fn source_type(&self) -> &PayloadType {
        &self.source
    }

    fn target_type(&self) -> &PayloadType {
        &self.target
    }

    fn encode(&self, payload: Payload) -> Result<Payload> {
        match payload {
            Payload::Text(text) => Ok(Payload::Bytes(text.into_bytes())),
            other => bail!("expected Text, got {}", other.payload_type()),
        }
    }

    fn decode(&self, payload: Payload) -> Result<Payload> {
        match payload {
            Payload::Bytes(bytes) => Ok(Payload::Text(String::from_utf8(bytes)?)),
            other => bail!("expected Bytes, got {}", other.payload_type()),
        }
    }
}
