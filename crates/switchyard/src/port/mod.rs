//! # Ports
//!
//! A port is a typed, queue-backed endpoint owned by an actor. Messages sent
//! to a port pass through its handlers, its protocol adapter and its
//! conversion rules. A port wired by [`connect`] forwards what it accepts
//! to its targets; an unwired port enqueues it for its owner.
//!
//! Ports are shared as `Arc<Port>`; connections only hold their target weakly
//! so a removed port is never kept alive by the ports that feed it.

pub mod chain;
pub mod connection;

pub use chain::{
    handler_fn, rule_fn, ConversionRule, FnHandler, FnRule, JsonTextAdapter, MessageHandler,
    ProtocolAdapter, Utf8BytesAdapter,
};
pub use connection::{connect, ConnectionSpec, PortConnection, RouteKind};

use crate::errors::{KernelError, SendError, SendFailure, ValidationError};
use crate::id::PortId;
use crate::lifecycle::{Disposable, Lifecycle};
use crate::messages::{ActorMessage, PayloadType};
use crate::Result;
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

/// Default capacity of a bounded port queue
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// What a bounded queue does when it is full
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverflowPolicy {
    /// The sender waits until the queue has capacity
    #[default]
    Suspend,
    /// The send fails immediately
    Fail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum QueuePolicy {
    Unbounded,
    Bounded {
        capacity: usize,
        #[serde(default)]
        overflow: OverflowPolicy,
    },
}

impl Default for QueuePolicy {
    fn default() -> Self {
        QueuePolicy::Bounded {
            capacity: DEFAULT_QUEUE_CAPACITY,
            overflow: OverflowPolicy::Suspend,
        }
    }
}

/// Serializable description of a port
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortConfig {
    pub name: String,
    pub payload_type: PayloadType,
    /// Falls back to the owning actor's default queue policy when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue: Option<QueuePolicy>,
}

impl PortConfig {
    pub fn new(name: impl Into<String>, payload_type: PayloadType) -> Self {
        Self {
            name: name.into(),
            payload_type,
            queue: None,
        }
    }

    pub fn with_queue(mut self, queue: QueuePolicy) -> Self {
        self.queue = Some(queue);
        self
    }
}

#[derive(Clone)]
enum QueueSender {
    Bounded {
        tx: mpsc::Sender<ActorMessage>,
        capacity: usize,
        overflow: OverflowPolicy,
    },
    Unbounded(mpsc::UnboundedSender<ActorMessage>),
}

/// Consuming side of a port's queue, handed to the processing loop
#[derive(Debug)]
pub enum PortReceiver {
    Bounded(mpsc::Receiver<ActorMessage>),
    Unbounded(mpsc::UnboundedReceiver<ActorMessage>),
}

impl PortReceiver {
    /// Waits for the next message; `None` once the queue is closed and drained
    pub async fn recv(&mut self) -> Option<ActorMessage> {
        match self {
            PortReceiver::Bounded(rx) => rx.recv().await,
            PortReceiver::Unbounded(rx) => rx.recv().await,
        }
    }

    pub fn try_recv(&mut self) -> Option<ActorMessage> {
        match self {
            PortReceiver::Bounded(rx) => rx.try_recv().ok(),
            PortReceiver::Unbounded(rx) => rx.try_recv().ok(),
        }
    }

    pub fn close(&mut self) {
        match self {
            PortReceiver::Bounded(rx) => rx.close(),
            PortReceiver::Unbounded(rx) => rx.close(),
        }
    }
}

fn open_queue(policy: QueuePolicy) -> (QueueSender, PortReceiver) {
    match policy {
        QueuePolicy::Unbounded => {
            let (tx, rx) = mpsc::unbounded_channel();
            (QueueSender::Unbounded(tx), PortReceiver::Unbounded(rx))
        }
        QueuePolicy::Bounded { capacity, overflow } => {
            // tokio panics on a zero capacity channel
            let capacity = capacity.max(1);
            let (tx, rx) = mpsc::channel(capacity);
            (
                QueueSender::Bounded {
                    tx,
                    capacity,
                    overflow,
                },
                PortReceiver::Bounded(rx),
            )
        }
    }
}

#[derive(Default)]
struct PortChain {
    handlers: Vec<Arc<dyn MessageHandler>>,
    adapter: Option<Arc<dyn ProtocolAdapter>>,
    rules: Vec<Arc<dyn ConversionRule>>,
}

/// Forwarding installed on a source port by a successful connect
pub(crate) struct Route {
    target_id: PortId,
    target: Weak<Port>,
    spec: ConnectionSpec,
    kind: RouteKind,
}

impl Route {
    pub(crate) fn new(target: &Arc<Port>, spec: ConnectionSpec, kind: RouteKind) -> Self {
        Self {
            target_id: target.id(),
            target: Arc::downgrade(target),
            spec,
            kind,
        }
    }

    fn transform(&self, message: ActorMessage) -> anyhow::Result<ActorMessage> {
        let mut message = message;
        for handler in &self.spec.handlers {
            message = chain::apply_handler(handler.as_ref(), message)?;
        }
        match &self.kind {
            RouteKind::Identity => Ok(message),
            RouteKind::Adapter { .. } => match &self.spec.adapter {
                Some(adapter) if adapter.target_type() == &message.payload_type() => {
                    chain::apply_decode(adapter.as_ref(), message)
                }
                Some(adapter) => chain::apply_encode(adapter.as_ref(), message),
                None => Ok(message),
            },
            RouteKind::RuleChain { .. } => {
                for rule in &self.spec.rules {
                    message = chain::apply_rule(rule.as_ref(), message)?;
                }
                Ok(message)
            }
        }
    }
}

/// Point-in-time counters of a single port
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortStats {
    pub accepted: u64,
    pub rejected: u64,
    pub forwarded: u64,
    pub forward_failures: u64,
}

#[derive(Default)]
struct PortCounters {
    accepted: AtomicU64,
    rejected: AtomicU64,
    forwarded: AtomicU64,
    forward_failures: AtomicU64,
}

/// # Port
///
/// A typed, bidirectional communication endpoint.
///
/// The payload type is fixed at construction. Handlers, the protocol adapter
/// and conversion rules can only be registered until the port is sealed,
/// which happens the first time it is connected or its queue is taken by a
/// processing loop.
pub struct Port {
    id: PortId,
    name: String,
    payload_type: PayloadType,
    queue_policy: QueuePolicy,
    sender: RwLock<Option<QueueSender>>,
    receiver: Mutex<Option<PortReceiver>>,
    chain: RwLock<PortChain>,
    routes: RwLock<Vec<Arc<Route>>>,
    sealed: AtomicBool,
    disposed: AtomicBool,
    counters: PortCounters,
}

impl fmt::Debug for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Port")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("payload_type", &self.payload_type)
            .field("queue_policy", &self.queue_policy)
            .field("sealed", &self.is_sealed())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

impl Port {
    pub fn new(name: impl Into<String>, payload_type: PayloadType, queue_policy: QueuePolicy) -> Arc<Self> {
        let (sender, receiver) = open_queue(queue_policy);
        let port = Arc::new(Self {
            id: PortId::generate(),
            name: name.into(),
            payload_type,
            queue_policy,
            sender: RwLock::new(Some(sender)),
            receiver: Mutex::new(Some(receiver)),
            chain: RwLock::new(PortChain::default()),
            routes: RwLock::new(Vec::new()),
            sealed: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
            counters: PortCounters::default(),
        });
        debug!(port = %port.id, name = %port.name, payload_type = %port.payload_type, "Port created");
        port
    }

    /// Builds a port from its config, using `default_queue` when the config
    /// does not name a queue policy
    pub fn from_config(config: &PortConfig, default_queue: QueuePolicy) -> Arc<Self> {
        Self::new(
            config.name.clone(),
            config.payload_type.clone(),
            config.queue.unwrap_or(default_queue),
        )
    }

    pub fn id(&self) -> PortId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn payload_type(&self) -> &PayloadType {
        &self.payload_type
    }

    pub fn queue_policy(&self) -> QueuePolicy {
        self.queue_policy
    }

    pub fn config(&self) -> PortConfig {
        PortConfig {
            name: self.name.clone(),
            payload_type: self.payload_type.clone(),
            queue: Some(self.queue_policy),
        }
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::Acquire)
    }

    pub(crate) fn seal(&self) {
        self.sealed.store(true, Ordering::Release);
    }

    fn ensure_unsealed(&self) -> Result<()> {
        if self.is_sealed() {
            return Err(KernelError::PortSealed {
                port_id: self.id,
                port_name: self.name.clone(),
            });
        }
        Ok(())
    }

    pub async fn add_handler(&self, handler: Arc<dyn MessageHandler>) -> Result<()> {
        self.ensure_unsealed()?;
        debug!(port = %self.id, handler = handler.name(), "Registering message handler");
        self.chain.write().await.handlers.push(handler);
        Ok(())
    }

    /// Sets the port's protocol adapter, replacing any previous one
    pub async fn set_protocol_adapter(&self, adapter: Arc<dyn ProtocolAdapter>) -> Result<()> {
        self.ensure_unsealed()?;
        debug!(port = %self.id, adapter = adapter.name(), "Setting protocol adapter");
        self.chain.write().await.adapter = Some(adapter);
        Ok(())
    }

    pub async fn add_conversion_rule(&self, rule: Arc<dyn ConversionRule>) -> Result<()> {
        self.ensure_unsealed()?;
        debug!(port = %self.id, rule = rule.name(), "Registering conversion rule");
        self.chain.write().await.rules.push(rule);
        Ok(())
    }

    /// Validates a message, then forwards it along every route or, when the
    /// port has no live route, enqueues it for the owning actor.
    ///
    /// Outbound traffic of a connected port is not seen by its owner, and a
    /// sender only waits for room in the targets' queues.
    ///
    /// Fails with a validation error when a handler or rule rejects the
    /// message or the result does not match the port type, and with a send
    /// error when the queue is closed or full under [`OverflowPolicy::Fail`].
    /// Forwarding failures do not fail the send; they are logged and counted
    /// in [`PortStats::forward_failures`].
    pub fn send(&self, message: ActorMessage) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if self.is_disposed() {
                return Err(self.send_error(SendFailure::Closed));
            }

            let message = match self.prepare(message).await {
                Ok(message) => message,
                Err(reason) => {
                    self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                    return Err(ValidationError {
                        port_id: self.id,
                        port_name: self.name.clone(),
                        reason,
                    }
                    .into());
                }
            };

            // A wired port hands its traffic to its targets. The owner's
            // queue only receives messages while no live route remains.
            if self.forward(&message).await == 0 {
                self.enqueue(message).await?;
            }
            self.counters.accepted.fetch_add(1, Ordering::Relaxed);
            Ok(())
        })
    }

    async fn prepare(&self, message: ActorMessage) -> std::result::Result<ActorMessage, String> {
        let chain = self.chain.read().await;
        let mut message = message;

        for handler in &chain.handlers {
            message = chain::apply_handler(handler.as_ref(), message).map_err(|e| e.to_string())?;
        }

        if let Some(adapter) = &chain.adapter {
            let current = message.payload_type();
            if adapter.can_handle(&current, &self.payload_type) {
                message = chain::apply_encode(adapter.as_ref(), message).map_err(|e| e.to_string())?;
            } else if adapter.can_handle(&self.payload_type, &current) {
                message = chain::apply_decode(adapter.as_ref(), message).map_err(|e| e.to_string())?;
            }
        }

        for rule in &chain.rules {
            let current = message.payload_type();
            if rule.can_handle(&current, rule.output_type()) {
                message = chain::apply_rule(rule.as_ref(), message).map_err(|e| e.to_string())?;
            }
        }

        let produced = message.payload_type();
        if produced != self.payload_type {
            return Err(format!(
                "payload type {} does not match port type {}",
                produced, self.payload_type
            ));
        }
        Ok(message)
    }

    async fn enqueue(&self, message: ActorMessage) -> Result<()> {
        let sender = self.sender.read().await.clone();
        match sender {
            None => Err(self.send_error(SendFailure::Closed)),
            Some(QueueSender::Unbounded(tx)) => tx
                .send(message)
                .map_err(|_| self.send_error(SendFailure::Closed)),
            Some(QueueSender::Bounded {
                tx,
                capacity,
                overflow,
            }) => match overflow {
                OverflowPolicy::Suspend => tx
                    .send(message)
                    .await
                    .map_err(|_| self.send_error(SendFailure::Closed)),
                OverflowPolicy::Fail => tx.try_send(message).map_err(|e| match e {
                    TrySendError::Full(_) => self.send_error(SendFailure::QueueFull { capacity }),
                    TrySendError::Closed(_) => self.send_error(SendFailure::Closed),
                }),
            },
        }
    }

    /// Offers the message to every live route. Returns how many routes had a
    /// live target, whether or not the delivery succeeded.
    async fn forward(&self, message: &ActorMessage) -> usize {
        let routes: Vec<Arc<Route>> = self.routes.read().await.clone();
        if routes.is_empty() {
            return 0;
        }

        let mut live = 0;
        let mut dropped_targets = Vec::new();
        for route in routes {
            let Some(target) = route.target.upgrade() else {
                dropped_targets.push(route.target_id);
                continue;
            };
            live += 1;

            let outgoing = match route.transform(message.clone()) {
                Ok(outgoing) => outgoing,
                Err(e) => {
                    warn!(source = %self.id, target = %route.target_id, "Forwarding transform failed: {}", e);
                    self.counters.forward_failures.fetch_add(1, Ordering::Relaxed);
                    continue;
                }
            };

            match target.send(outgoing).await {
                Ok(()) => {
                    self.counters.forwarded.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    warn!(source = %self.id, target = %route.target_id, "Forwarding failed: {}", e);
                    self.counters.forward_failures.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        if !dropped_targets.is_empty() {
            debug!(port = %self.id, count = dropped_targets.len(), "Pruning routes to dropped ports");
            self.routes
                .write()
                .await
                .retain(|route| !dropped_targets.contains(&route.target_id));
        }
        live
    }

    /// Hands the raw queue to the processing loop. Seals the port.
    /// Returns `None` if the queue was already taken or the port is disposed.
    pub async fn take_receiver(&self) -> Option<PortReceiver> {
        self.seal();
        self.receiver.lock().await.take()
    }

    pub(crate) async fn install_route(&self, route: Route) {
        self.routes.write().await.push(Arc::new(route));
    }

    /// Removes every route to `target`; returns whether one existed
    pub async fn disconnect(&self, target: PortId) -> bool {
        let mut routes = self.routes.write().await;
        let before = routes.len();
        routes.retain(|route| route.target_id != target);
        let removed = before != routes.len();
        if removed {
            debug!(source = %self.id, target = %target, "Port disconnected");
        }
        removed
    }

    /// Removes all outgoing routes; returns how many were removed
    pub async fn disconnect_all(&self) -> usize {
        let mut routes = self.routes.write().await;
        let removed = routes.len();
        routes.clear();
        removed
    }

    pub async fn connected_targets(&self) -> Vec<PortId> {
        self.routes
            .read()
            .await
            .iter()
            .map(|route| route.target_id)
            .collect()
    }

    pub fn stats(&self) -> PortStats {
        PortStats {
            accepted: self.counters.accepted.load(Ordering::Relaxed),
            rejected: self.counters.rejected.load(Ordering::Relaxed),
            forwarded: self.counters.forwarded.load(Ordering::Relaxed),
            forward_failures: self.counters.forward_failures.load(Ordering::Relaxed),
        }
    }

    fn send_error(&self, reason: SendFailure) -> KernelError {
        SendError {
            port_id: self.id,
            port_name: self.name.clone(),
            reason,
        }
        .into()
    }
}

#[async_trait]
impl Disposable for Port {
    /// Closes the queue for good. Later sends fail with a send error.
    async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.seal();
        self.sender.write().await.take();
        if let Some(mut receiver) = self.receiver.lock().await.take() {
            receiver.close();
        }
        self.routes.write().await.clear();
        debug!(port = %self.id, name = %self.name, "Port disposed");
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }
}

#[async_trait]
impl Lifecycle for Port {
    async fn start(&self) -> Result<()> {
        if self.is_disposed() {
            return Err(self.send_error(SendFailure::Closed));
        }
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.dispose().await;
        Ok(())
    }

    fn is_active(&self) -> bool {
        !self.is_disposed()
    }
}
