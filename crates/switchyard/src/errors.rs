//! # Kernel Errors
//!
//! Every failure the kernel reports is typed, so outer layers can tell a
//! connection that was never established from a message dropped at runtime
//! or an actor that entered its `Error` state.

use crate::actor::ActorState;
use crate::id::{ActorId, PortId};
use crate::messages::PayloadType;
use std::time::Duration;
use thiserror::Error;

pub type Result<T, E = KernelError> = std::result::Result<T, E>;

/// A handler or conversion rule rejected a message during `send`.
/// The message was not enqueued.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("validation failed on port '{port_name}' ({port_id}): {reason}")]
pub struct ValidationError {
    pub port_id: PortId,
    pub port_name: String,
    pub reason: String,
}

/// The link of a declared chain that could not be proven
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BrokenLink {
    #[error("type {from} does not match {to} and no adapter or conversion rule was declared")]
    TypeMismatch { from: PayloadType, to: PayloadType },

    #[error("protocol adapter '{adapter}' cannot convert {from} -> {to}")]
    AdapterRejected {
        adapter: String,
        from: PayloadType,
        to: PayloadType,
    },

    #[error("conversion rule #{index} '{rule}' cannot convert {input} -> {output}")]
    RuleRejected {
        index: usize,
        rule: String,
        input: PayloadType,
        output: PayloadType,
    },

    #[error("conversion chain produces {produced} but the target expects {expected}")]
    ChainEndsAt {
        produced: PayloadType,
        expected: PayloadType,
    },

    #[error("port {port_id} is closed")]
    PortClosed { port_id: PortId },
}

/// Raised at wiring time; no forwarding has been installed
#[derive(Error, Debug, Clone, PartialEq)]
#[error("cannot connect {source_port} -> {target_port}: {link}")]
pub struct ConnectionError {
    pub source_port: PortId,
    pub target_port: PortId,
    pub link: BrokenLink,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendFailure {
    #[error("queue is closed")]
    Closed,
    #[error("queue is full (capacity {capacity})")]
    QueueFull { capacity: usize },
}

/// The queue could not accept a message at dispatch time
#[derive(Error, Debug, Clone, PartialEq)]
#[error("send to port '{port_name}' ({port_id}) failed: {reason}")]
pub struct SendError {
    pub port_id: PortId,
    pub port_name: String,
    pub reason: SendFailure,
}

/// A failure isolated to one message or one hook invocation
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProcessingError {
    #[error("handler for port '{port}' timed out after {timeout:?}")]
    Timeout { port: String, timeout: Duration },

    #[error("handler for port '{port}' failed: {message}")]
    Handler { port: String, message: String },

    #[error("handler for port '{port}' panicked: {message}")]
    Panicked { port: String, message: String },

    #[error("{hook} hook failed: {message}")]
    Hook { hook: String, message: String },
}

/// An operation was attempted in a state that does not permit it
#[derive(Error, Debug, Clone, PartialEq)]
#[error("cannot {operation} actor {actor_id} while it is {state}")]
pub struct StateError {
    pub actor_id: ActorId,
    pub operation: String,
    pub state: ActorState,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum KernelError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Send(#[from] SendError),

    #[error(transparent)]
    Processing(#[from] ProcessingError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error("port '{port}' not found on actor {actor_id}")]
    PortNotFound { actor_id: ActorId, port: String },

    #[error("port '{port_name}' ({port_id}) is already wired and can no longer be reconfigured")]
    PortSealed { port_id: PortId, port_name: String },

    #[error("actor not found: {0}")]
    ActorNotFound(ActorId),

    #[error("actor already registered: {0}")]
    ActorAlreadyRegistered(ActorId),

    #[error("configuration error: {0}")]
    Config(String),
}

impl KernelError {
    pub fn is_state_error(&self) -> bool {
        matches!(self, KernelError::State(_))
    }

    pub fn is_connection_error(&self) -> bool {
        matches!(self, KernelError::Connection(_))
    }
}
