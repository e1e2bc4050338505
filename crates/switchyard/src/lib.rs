//! # Switchyard
//!
//! Switchyard is an actor/port kernel: a substrate for building applications
//! as networks of independent, message-driven actors that can be created,
//! wired, reconfigured and hot-swapped while the system runs.
//!
//! ## Core Features
//!
//! * **Typed ports**: every port carries a fixed payload type, checked when
//!   ports are connected and again on every send
//! * **Conversion chains**: handlers, protocol adapters and conversion rules
//!   bridge ports of different types
//! * **Actor lifecycle**: `Initialized -> Running <-> Paused -> Stopped`, with
//!   one processing loop per port and per-message failure isolation
//! * **Supervision**: a registry of actors with type-guarded hot swap
//!
//! ## Architecture
//!
//! * [`Port`]: typed, queue-backed endpoint with a transformation pipeline
//! * [`connect`]: validates a connection and installs forwarding
//! * [`Actor`]: owns ports and runs their loops, delegating to an
//!   [`ActorBehavior`]
//! * [`ActorMetrics`]: counters and timings updated by the port loops
//! * [`Supervisor`]: registers, bulk-controls and hot-swaps actors

pub mod actor;
pub mod config;
pub mod errors;
pub mod id;
pub mod lifecycle;
pub mod logging;
pub mod messages;
pub mod metrics;
pub mod port;
pub mod snapshot;
pub mod supervisor;

pub use actor::{
    Actor, ActorBehavior, ActorBuilder, ActorContext, ActorState, ActorType, ErrorDirective,
};
pub use config::{ActorConfig, KernelConfig, LogOutput, LoggingConfig};
pub use errors::{
    BrokenLink, ConnectionError, KernelError, ProcessingError, Result, SendError, SendFailure,
    StateError, ValidationError,
};
pub use id::{ActorId, PortId};
pub use lifecycle::{Disposable, Lifecycle};
pub use messages::{ActorMessage, MessagePriority, Payload, PayloadType};
pub use metrics::{ActorMetrics, MetricsSnapshot};
pub use port::{
    connect, handler_fn, rule_fn, ConnectionSpec, ConversionRule, JsonTextAdapter,
    MessageHandler, OverflowPolicy, Port, PortConfig, PortConnection, PortStats, ProtocolAdapter,
    QueuePolicy, RouteKind, Utf8BytesAdapter,
};
pub use snapshot::{ActorSnapshot, InMemorySnapshotStore, SnapshotStore};
pub use supervisor::{ActorRegistry, BulkOutcome, Supervisor, SwapOutcome};
