//! # Actor Runtime
//!
//! [`Actor`] is a cheap, cloneable handle to a running actor. It owns the
//! actor's ports and runs one processing loop per port once started.
//!
//! All lifecycle operations are serialized by a single lock, so concurrent
//! `start`, `stop` and `dispose` calls observe each other's completed effects.

use super::behavior::{ActorBehavior, ActorContext, ActorType, ErrorDirective};
use super::state::{ActorState, ActorStateManager};
use crate::config::ActorConfig;
use crate::errors::{KernelError, ProcessingError, StateError};
use crate::id::ActorId;
use crate::lifecycle::{Disposable, Lifecycle};
use crate::messages::ActorMessage;
use crate::metrics::ActorMetrics;
use crate::port::{self, ConnectionSpec, Port, PortConfig, PortReceiver, RouteKind};
use crate::snapshot::ActorSnapshot;
use crate::Result;
use async_trait::async_trait;
use chrono::Utc;
use futures::FutureExt;
use serde_json::Value;
use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Label used in errors for messages delivered with [`Actor::tell`]
const DIRECT_PORT: &str = "<direct>";

tokio::task_local! {
    /// Actor id and port name of the processing loop running on this task
    static PORT_LOOP: (ActorId, String);
}

struct PortJob {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

struct ActorInner {
    id: ActorId,
    name: String,
    actor_type: ActorType,
    config: ActorConfig,
    state: ActorStateManager,
    lifecycle: Mutex<()>,
    ports: Mutex<HashMap<String, Arc<Port>>>,
    jobs: Mutex<HashMap<String, PortJob>>,
    shutdown: CancellationToken,
    metrics: Arc<ActorMetrics>,
    behavior: Arc<dyn ActorBehavior>,
    custom_state: Mutex<BTreeMap<String, Value>>,
    disposed: AtomicBool,
}

pub struct ActorBuilder {
    id: Option<ActorId>,
    name: Option<String>,
    actor_type: Option<ActorType>,
    config: ActorConfig,
    behavior: Arc<dyn ActorBehavior>,
}

impl ActorBuilder {
    /// Use a caller supplied id instead of a generated one
    pub fn id(mut self, id: impl Into<ActorId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Overrides the type declared by the behavior
    pub fn actor_type(mut self, actor_type: impl Into<ActorType>) -> Self {
        self.actor_type = Some(actor_type.into());
        self
    }

    pub fn config(mut self, config: ActorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Actor {
        let id = self.id.unwrap_or_else(ActorId::generate);
        let name = self.name.unwrap_or_else(|| id.to_string());
        let actor_type = self
            .actor_type
            .unwrap_or_else(|| self.behavior.actor_type());

        debug!(actor = %id, name = %name, actor_type = %actor_type, "Actor created");

        Actor {
            inner: Arc::new(ActorInner {
                id,
                name,
                actor_type,
                config: self.config,
                state: ActorStateManager::new(),
                lifecycle: Mutex::new(()),
                ports: Mutex::new(HashMap::new()),
                jobs: Mutex::new(HashMap::new()),
                shutdown: CancellationToken::new(),
                metrics: Arc::new(ActorMetrics::new()),
                behavior: self.behavior,
                custom_state: Mutex::new(BTreeMap::new()),
                disposed: AtomicBool::new(false),
            }),
        }
    }
}

/// # Actor
///
/// Handle to a lifecycle-managed unit of behavior. Clones share the same
/// actor.
#[derive(Clone)]
pub struct Actor {
    inner: Arc<ActorInner>,
}

impl fmt::Debug for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Actor")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("actor_type", &self.inner.actor_type)
            .field("state", &self.state())
            .finish()
    }
}

impl Actor {
    pub fn new(name: impl Into<String>, behavior: impl ActorBehavior) -> Self {
        Self::builder(behavior).name(name).build()
    }

    pub fn builder(behavior: impl ActorBehavior) -> ActorBuilder {
        Self::builder_shared(Arc::new(behavior))
    }

    /// Builder for a behavior that is already shared
    pub fn builder_shared(behavior: Arc<dyn ActorBehavior>) -> ActorBuilder {
        ActorBuilder {
            id: None,
            name: None,
            actor_type: None,
            config: ActorConfig::default(),
            behavior,
        }
    }

    pub fn id(&self) -> &ActorId {
        &self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn actor_type(&self) -> &ActorType {
        &self.inner.actor_type
    }

    pub fn config(&self) -> &ActorConfig {
        &self.inner.config
    }

    pub fn state(&self) -> ActorState {
        self.inner.state.get()
    }

    pub fn is_running(&self) -> bool {
        self.inner.state.is_running()
    }

    /// Watch channel that yields every state change
    pub fn subscribe_state(&self) -> watch::Receiver<ActorState> {
        self.inner.state.subscribe()
    }

    pub fn metrics(&self) -> &Arc<ActorMetrics> {
        &self.inner.metrics
    }

    pub fn context(&self) -> ActorContext {
        ActorContext::new(self.clone())
    }

    /// Whether two handles refer to the same actor
    pub fn ptr_eq(&self, other: &Actor) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn state_error(&self, operation: &str, state: ActorState) -> KernelError {
        StateError {
            actor_id: self.inner.id.clone(),
            operation: operation.to_string(),
            state,
        }
        .into()
    }

    fn hook_failed(&self, hook: &str, e: anyhow::Error) -> KernelError {
        let failure = ProcessingError::Hook {
            hook: hook.to_string(),
            message: format!("{:#}", e),
        };
        error!(actor = %self.inner.id, "{}", failure);
        self.inner.state.set(ActorState::Error {
            detail: failure.to_string(),
        });
        failure.into()
    }

    // ---------------- Lifecycle ----------------

    /// Runs `on_start`, launches one loop per port and moves to `Running`.
    /// Starting a running actor does nothing.
    pub async fn start(&self) -> Result<()> {
        let _guard = self.inner.lifecycle.lock().await;
        match self.state() {
            ActorState::Initialized => {}
            ActorState::Running => {
                warn!(actor = %self.inner.id, "Start ignored: actor is already running");
                return Ok(());
            }
            other => return Err(self.state_error("start", other)),
        }

        info!(actor = %self.inner.id, name = %self.inner.name, "Starting actor");
        let ctx = self.context();
        if let Err(e) = self.inner.behavior.on_start(&ctx).await {
            return Err(self.hook_failed("on_start", e));
        }

        let ports: Vec<Arc<Port>> = self.inner.ports.lock().await.values().cloned().collect();
        for port in &ports {
            self.spawn_port_loop(port).await;
        }

        self.inner.state.set(ActorState::Running);
        info!(actor = %self.inner.id, ports = ports.len(), "Actor started");
        Ok(())
    }

    pub async fn pause(&self, reason: impl Into<String>) -> Result<()> {
        let _guard = self.inner.lifecycle.lock().await;
        match self.state() {
            ActorState::Running => {
                let reason = reason.into();
                info!(actor = %self.inner.id, reason = %reason, "Pausing actor");
                self.inner.state.set(ActorState::Paused { reason });
                Ok(())
            }
            ActorState::Paused { .. } => {
                warn!(actor = %self.inner.id, "Pause ignored: actor is already paused");
                Ok(())
            }
            other => Err(self.state_error("pause", other)),
        }
    }

    pub async fn resume(&self) -> Result<()> {
        let _guard = self.inner.lifecycle.lock().await;
        match self.state() {
            ActorState::Paused { .. } => {
                info!(actor = %self.inner.id, "Resuming actor");
                self.inner.state.set(ActorState::Running);
                Ok(())
            }
            ActorState::Running => {
                warn!(actor = %self.inner.id, "Resume ignored: actor is already running");
                Ok(())
            }
            other => Err(self.state_error("resume", other)),
        }
    }

    /// Cancels every port loop, disposes every port, then runs `on_stop`.
    /// Stopping a stopped actor does nothing.
    pub async fn stop(&self) -> Result<()> {
        let _guard = self.inner.lifecycle.lock().await;
        match self.state() {
            ActorState::Running | ActorState::Paused { .. } => self.shutdown().await,
            ActorState::Stopped => {
                warn!(actor = %self.inner.id, "Stop ignored: actor is already stopped");
                Ok(())
            }
            other => Err(self.state_error("stop", other)),
        }
    }

    /// Terminal release of the actor. Safe to call any number of times and
    /// from any state.
    pub async fn dispose(&self) {
        let _guard = self.inner.lifecycle.lock().await;
        if self.inner.disposed.swap(true, Ordering::AcqRel) {
            return;
        }

        match self.state() {
            ActorState::Running | ActorState::Paused { .. } => {
                if let Err(e) = self.shutdown().await {
                    warn!(actor = %self.inner.id, "Error while disposing actor: {}", e);
                }
            }
            ActorState::Initialized | ActorState::Error { .. } => {
                self.inner.shutdown.cancel();
                self.join_port_loops().await;
                self.release_ports().await;
            }
            ActorState::Stopped => {}
        }

        self.inner.state.set(ActorState::Stopped);
        debug!(actor = %self.inner.id, "Actor disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    /// Caller must hold the lifecycle lock
    async fn shutdown(&self) -> Result<()> {
        info!(actor = %self.inner.id, name = %self.inner.name, "Stopping actor");
        self.inner.shutdown.cancel();
        self.join_port_loops().await;
        self.release_ports().await;

        let ctx = self.context();
        if let Err(e) = self.inner.behavior.on_stop(&ctx).await {
            return Err(self.hook_failed("on_stop", e));
        }

        self.inner.state.set(ActorState::Stopped);
        info!(actor = %self.inner.id, "Actor stopped");
        Ok(())
    }

    async fn join_port_loops(&self) {
        let jobs: Vec<(String, PortJob)> = self.inner.jobs.lock().await.drain().collect();
        let deadline = tokio::time::Instant::now() + self.inner.config.stop_timeout();
        for (port, job) in jobs {
            self.join_port_loop(&port, job, deadline).await;
        }
    }

    async fn join_port_loop(&self, port: &str, mut job: PortJob, deadline: tokio::time::Instant) {
        job.token.cancel();
        if self.is_current_port_loop(port) {
            // A hook on this loop asked for it; the loop exits once the hook returns
            debug!(actor = %self.inner.id, port = %port, "Port loop stopping itself");
            return;
        }
        if tokio::time::timeout_at(deadline, &mut job.handle).await.is_err() {
            warn!(actor = %self.inner.id, port = %port, "Port loop did not stop in time, aborting");
            job.handle.abort();
        }
    }

    fn is_current_port_loop(&self, port: &str) -> bool {
        PORT_LOOP
            .try_with(|(actor, current)| actor == &self.inner.id && current == port)
            .unwrap_or(false)
    }

    async fn release_ports(&self) {
        let ports: Vec<Arc<Port>> = self
            .inner
            .ports
            .lock()
            .await
            .drain()
            .map(|(_, port)| port)
            .collect();
        for port in ports {
            port.dispose().await;
        }
    }

    // ---------------- Port loops ----------------

    async fn spawn_port_loop(&self, port: &Arc<Port>) {
        let Some(receiver) = port.take_receiver().await else {
            warn!(actor = %self.inner.id, port = %port.name(), "Port queue already taken, no loop started");
            return;
        };

        let token = self.inner.shutdown.child_token();
        let actor = self.clone();
        let port_name = port.name().to_string();
        let loop_token = token.clone();
        let scope = (self.inner.id.clone(), port_name.clone());
        let handle = tokio::spawn(PORT_LOOP.scope(scope, async move {
            actor.run_port_loop(port_name, receiver, loop_token).await;
        }));

        self.inner
            .jobs
            .lock()
            .await
            .insert(port.name().to_string(), PortJob { token, handle });
    }

    async fn stop_port_loop(&self, port: &str) {
        let job = self.inner.jobs.lock().await.remove(port);
        if let Some(job) = job {
            let deadline = tokio::time::Instant::now() + self.inner.config.stop_timeout();
            self.join_port_loop(port, job, deadline).await;
        }
    }

    async fn run_port_loop(self, port: String, mut receiver: PortReceiver, token: CancellationToken) {
        debug!(actor = %self.inner.id, port = %port, "Port loop started");
        loop {
            let message = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                next = receiver.recv() => match next {
                    Some(message) => message,
                    None => break,
                },
            };
            self.inner.metrics.record_received();

            if !self.inner.state.is_running() {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = self.inner.state.wait_until_running() => {}
                }
            }

            // Failures are recorded and reported to the hooks inside `process`
            let _ = self.process(Some(&port), message).await;
        }
        receiver.close();
        debug!(actor = %self.inner.id, port = %port, "Port loop stopped");
    }

    /// Runs one message through the behavior under the processing timeout
    async fn process(
        &self,
        port: Option<&str>,
        message: ActorMessage,
    ) -> std::result::Result<(), ProcessingError> {
        let ctx = self.context();
        let behavior = &self.inner.behavior;
        let timeout = self.inner.config.processing_timeout();
        let label = port.unwrap_or(DIRECT_PORT).to_string();
        let priority = message.priority();
        let protocol = message.protocol().map(str::to_string);

        let invocation = match port {
            Some(port) => behavior.on_port_message(&ctx, port, message.clone()),
            None => behavior.on_message(&ctx, message.clone()),
        };

        let started = Instant::now();
        let outcome = tokio::time::timeout(timeout, AssertUnwindSafe(invocation).catch_unwind()).await;

        let failure = match outcome {
            Ok(Ok(Ok(()))) => {
                self.inner
                    .metrics
                    .record_processed(port, priority, protocol.as_deref(), started.elapsed());
                return Ok(());
            }
            Ok(Ok(Err(e))) => ProcessingError::Handler {
                port: label,
                message: format!("{:#}", e),
            },
            Ok(Err(panic)) => ProcessingError::Panicked {
                port: label,
                message: panic_message(panic.as_ref()),
            },
            Err(_) => ProcessingError::Timeout {
                port: label,
                timeout,
            },
        };

        self.inner.metrics.record_failure();
        error!(actor = %self.inner.id, "Message processing failed: {}", failure);

        let directive = AssertUnwindSafe(behavior.handle_message_processing_error(
            &ctx, port, &message, &failure,
        ))
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| {
            error!(
                actor = %self.inner.id,
                "Error hook panicked: {}",
                panic_message(panic.as_ref())
            );
            ErrorDirective::Fail
        });

        if directive == ErrorDirective::Fail && self.inner.state.fail_if_active(failure.to_string()) {
            warn!(actor = %self.inner.id, "Actor moved to Error state");
        }
        Err(failure)
    }

    /// Delivers a message straight to `on_message`, bypassing every port.
    /// Failures are metered, passed to the error hook and returned.
    pub async fn tell(&self, message: ActorMessage) -> Result<()> {
        let state = self.state();
        if !state.is_running() {
            return Err(self.state_error("tell", state));
        }
        self.inner.metrics.record_received();
        self.process(None, message).await.map_err(KernelError::from)
    }

    // ---------------- Ports ----------------

    /// Creates a port, replacing and disposing any port of the same name.
    /// The port gets a processing loop right away if the actor is running.
    pub async fn create_port(&self, config: PortConfig) -> Result<Arc<Port>> {
        let _guard = self.inner.lifecycle.lock().await;
        self.install_port(config).await
    }

    /// Caller must hold the lifecycle lock
    async fn install_port(&self, config: PortConfig) -> Result<Arc<Port>> {
        let state = self.state();
        if state.is_terminal() || self.is_disposed() {
            return Err(self.state_error("create port", state));
        }

        let port = Port::from_config(&config, self.inner.config.default_queue);
        let previous = self
            .inner
            .ports
            .lock()
            .await
            .insert(config.name.clone(), port.clone());

        if let Some(previous) = previous {
            debug!(actor = %self.inner.id, port = %config.name, "Replacing existing port");
            self.stop_port_loop(&config.name).await;
            previous.dispose().await;
        }

        if state.is_running() || state.is_paused() {
            self.spawn_port_loop(&port).await;
        }

        debug!(
            actor = %self.inner.id,
            port = %port.id(),
            name = %config.name,
            payload_type = %config.payload_type,
            "Port added to actor"
        );
        Ok(port)
    }

    pub async fn get_port(&self, name: &str) -> Option<Arc<Port>> {
        self.inner.ports.lock().await.get(name).cloned()
    }

    pub async fn port_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.ports.lock().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Stops the port's loop and disposes it. Returns whether it existed.
    pub async fn remove_port(&self, name: &str) -> bool {
        let _guard = self.inner.lifecycle.lock().await;
        let removed = self.inner.ports.lock().await.remove(name);
        match removed {
            Some(port) => {
                self.stop_port_loop(name).await;
                port.dispose().await;
                debug!(actor = %self.inner.id, port = %name, "Port removed");
                true
            }
            None => false,
        }
    }

    /// Connects the named port of this actor to `target`
    pub async fn connect(&self, source: &str, target: &Arc<Port>, spec: ConnectionSpec) -> Result<RouteKind> {
        let source_port = self.require_port(source).await?;
        port::connect(&source_port, target, spec).await
    }

    /// Removes every outgoing connection of the named port
    pub async fn disconnect_port(&self, name: &str) -> Result<usize> {
        let port = self.require_port(name).await?;
        Ok(port.disconnect_all().await)
    }

    async fn require_port(&self, name: &str) -> Result<Arc<Port>> {
        self.get_port(name)
            .await
            .ok_or_else(|| KernelError::PortNotFound {
                actor_id: self.inner.id.clone(),
                port: name.to_string(),
            })
    }

    // ---------------- Custom state and snapshots ----------------

    pub async fn set_state_value(&self, key: impl Into<String>, value: Value) {
        self.inner.custom_state.lock().await.insert(key.into(), value);
    }

    pub async fn state_value(&self, key: &str) -> Option<Value> {
        self.inner.custom_state.lock().await.get(key).cloned()
    }

    pub async fn remove_state_value(&self, key: &str) -> Option<Value> {
        self.inner.custom_state.lock().await.remove(key)
    }

    pub async fn custom_state(&self) -> BTreeMap<String, Value> {
        self.inner.custom_state.lock().await.clone()
    }

    pub async fn capture_snapshot(&self) -> ActorSnapshot {
        let mut ports: Vec<PortConfig> = self
            .inner
            .ports
            .lock()
            .await
            .values()
            .map(|port| port.config())
            .collect();
        ports.sort_by(|a, b| a.name.cmp(&b.name));

        ActorSnapshot {
            actor_id: self.inner.id.clone(),
            name: self.inner.name.clone(),
            actor_type: self.inner.actor_type.clone(),
            state: self.state(),
            ports,
            metrics: self.inner.metrics.snapshot(),
            custom_state: self.custom_state().await,
            captured_at: Utc::now(),
        }
    }

    /// Re-creates the snapshot's ports and custom state. Only an actor that
    /// has not been started yet can be restored; the lifecycle lock is held
    /// throughout so a concurrent `start` waits for the restore to finish.
    pub async fn restore_snapshot(&self, snapshot: &ActorSnapshot) -> Result<()> {
        let _guard = self.inner.lifecycle.lock().await;
        let state = self.state();
        if state != ActorState::Initialized || self.is_disposed() {
            return Err(self.state_error("restore snapshot", state));
        }

        for config in &snapshot.ports {
            self.install_port(config.clone()).await?;
        }
        *self.inner.custom_state.lock().await = snapshot.custom_state.clone();

        info!(
            actor = %self.inner.id,
            from = %snapshot.actor_id,
            ports = snapshot.ports.len(),
            "Restored actor from snapshot"
        );
        Ok(())
    }
}

#[async_trait]
impl Disposable for Actor {
    async fn dispose(&self) {
        Actor::dispose(self).await
    }

    fn is_disposed(&self) -> bool {
        Actor::is_disposed(self)
    }
}

#[async_trait]
impl Lifecycle for Actor {
    async fn start(&self) -> Result<()> {
        Actor::start(self).await
    }

    async fn stop(&self) -> Result<()> {
        Actor::stop(self).await
    }

    fn is_active(&self) -> bool {
        self.is_running()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic payload".to_string()
    }
}
