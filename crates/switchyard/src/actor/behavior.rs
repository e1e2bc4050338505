//! # Actor Behavior
//!
//! The hooks an application implements to give an actor its behavior. The
//! kernel owns the lifecycle and the port loops and calls into these hooks.

use super::runtime::Actor;
use super::state::ActorState;
use crate::errors::ProcessingError;
use crate::id::ActorId;
use crate::messages::ActorMessage;
use crate::metrics::ActorMetrics;
use crate::port::Port;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::error;

/// What the kernel does after a message failed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ErrorDirective {
    /// Keep processing; the failure is only counted
    #[default]
    Continue,
    /// Move the actor to its `Error` state
    Fail,
}

/// Declared type of an actor, compared by the supervisor during hot swap
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActorType(String);

impl ActorType {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn of<T: ?Sized>() -> Self {
        Self(std::any::type_name::<T>().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ActorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ActorType {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// View of the running actor handed to every hook
#[derive(Clone)]
pub struct ActorContext {
    actor: Actor,
}

impl ActorContext {
    pub(crate) fn new(actor: Actor) -> Self {
        Self { actor }
    }

    pub fn id(&self) -> &ActorId {
        self.actor.id()
    }

    pub fn name(&self) -> &str {
        self.actor.name()
    }

    pub fn actor_type(&self) -> &ActorType {
        self.actor.actor_type()
    }

    pub fn state(&self) -> ActorState {
        self.actor.state()
    }

    pub fn metrics(&self) -> &Arc<ActorMetrics> {
        self.actor.metrics()
    }

    pub async fn port(&self, name: &str) -> Option<Arc<Port>> {
        self.actor.get_port(name).await
    }

    pub async fn state_value(&self, key: &str) -> Option<serde_json::Value> {
        self.actor.state_value(key).await
    }

    pub async fn set_state_value(&self, key: impl Into<String>, value: serde_json::Value) {
        self.actor.set_state_value(key, value).await
    }

    /// The full actor handle, for hooks that need to manage ports
    pub fn actor(&self) -> &Actor {
        &self.actor
    }
}

impl fmt::Debug for ActorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActorContext")
            .field("id", self.id())
            .field("name", &self.name())
            .finish()
    }
}

/// # ActorBehavior
///
/// Only [`ActorBehavior::on_message`] is required. Port messages go to
/// [`ActorBehavior::on_port_message`], which delegates to `on_message` unless
/// overridden.
///
/// Hooks run on the actor's port loop tasks, concurrently across ports, so
/// implementations keep their own state behind a lock or in atomics.
#[async_trait]
pub trait ActorBehavior: Send + Sync + 'static {
    /// Declared type used by the supervisor's hot-swap guard
    fn actor_type(&self) -> ActorType {
        ActorType::of::<Self>()
    }

    async fn on_start(&self, _ctx: &ActorContext) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_stop(&self, _ctx: &ActorContext) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_message(&self, ctx: &ActorContext, message: ActorMessage) -> anyhow::Result<()>;

    async fn on_port_message(
        &self,
        ctx: &ActorContext,
        _port: &str,
        message: ActorMessage,
    ) -> anyhow::Result<()> {
        self.on_message(ctx, message).await
    }

    async fn on_error(&self, ctx: &ActorContext, error: &ProcessingError) -> ErrorDirective {
        error!(actor = %ctx.id(), "Error processing message: {}", error);
        ErrorDirective::Continue
    }

    /// Called after a message timed out, failed or panicked. `port` is `None`
    /// for direct sends.
    async fn handle_message_processing_error(
        &self,
        ctx: &ActorContext,
        _port: Option<&str>,
        _message: &ActorMessage,
        error: &ProcessingError,
    ) -> ErrorDirective {
        self.on_error(ctx, error).await
    }
}
