//! # Supervisor
//!
//! An actor that keeps a registry of other actors and can replace one of
//! them while the system runs. There is no restart-on-failure policy: the
//! supervisor only does what it is asked to.

use crate::actor::{Actor, ActorBehavior, ActorContext, ActorState, ActorType};
use crate::config::ActorConfig;
use crate::errors::{KernelError, StateError};
use crate::id::ActorId;
use crate::lifecycle::{Disposable, Lifecycle};
use crate::messages::ActorMessage;
use crate::snapshot::ActorSnapshot;
use crate::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

struct RegistryEntry {
    actor: Actor,
    actor_type: ActorType,
}

/// Actors known to a supervisor, keyed by the id they were registered under
#[derive(Default)]
pub struct ActorRegistry {
    entries: Mutex<HashMap<ActorId, RegistryEntry>>,
}

impl ActorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    pub async fn contains(&self, id: &ActorId) -> bool {
        self.entries.lock().await.contains_key(id)
    }

    /// Type recorded at registration; hot swaps must match it
    pub async fn recorded_type(&self, id: &ActorId) -> Option<ActorType> {
        self.entries
            .lock()
            .await
            .get(id)
            .map(|entry| entry.actor_type.clone())
    }

    async fn actors(&self) -> Vec<(ActorId, Actor)> {
        let mut actors: Vec<(ActorId, Actor)> = self
            .entries
            .lock()
            .await
            .iter()
            .map(|(id, entry)| (id.clone(), entry.actor.clone()))
            .collect();
        actors.sort_by(|a, b| a.0.cmp(&b.0));
        actors
    }
}

/// Result of [`Supervisor::hot_swap_actor`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwapOutcome {
    Swapped,
    /// Nothing is registered under the id
    NotFound,
    /// The replacement declares a different type; the registry is unchanged
    TypeMismatch {
        expected: ActorType,
        found: ActorType,
    },
    /// The replacement is the registered actor itself; the registry is unchanged
    SameActor,
    /// The replacement is neither `Initialized` nor `Running`, or it has
    /// been disposed; the registry is unchanged
    NotStartable { state: ActorState },
}

impl SwapOutcome {
    pub fn is_swapped(&self) -> bool {
        matches!(self, SwapOutcome::Swapped)
    }
}

/// Per-actor results of a bulk operation
#[derive(Debug, Default)]
pub struct BulkOutcome {
    pub succeeded: Vec<ActorId>,
    pub failed: Vec<(ActorId, KernelError)>,
}

impl BulkOutcome {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

struct SupervisorBehavior;

#[async_trait]
impl ActorBehavior for SupervisorBehavior {
    fn actor_type(&self) -> ActorType {
        ActorType::new("switchyard::Supervisor")
    }

    async fn on_message(&self, ctx: &ActorContext, message: ActorMessage) -> anyhow::Result<()> {
        debug!(supervisor = %ctx.id(), correlation_id = %message.correlation_id(), "Supervisor ignoring message");
        Ok(())
    }
}

/// # Supervisor
///
/// Registry operations that change the registry require the supervisor
/// itself to be `Running`. Lookups work in any state.
#[derive(Clone)]
pub struct Supervisor {
    actor: Actor,
    registry: Arc<ActorRegistry>,
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("actor", &self.actor)
            .finish_non_exhaustive()
    }
}

impl Supervisor {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(name, ActorConfig::default())
    }

    pub fn with_config(name: impl Into<String>, config: ActorConfig) -> Self {
        let actor = Actor::builder(SupervisorBehavior)
            .name(name)
            .config(config)
            .build();
        Self {
            actor,
            registry: Arc::new(ActorRegistry::new()),
        }
    }

    /// The supervisor's own actor
    pub fn actor(&self) -> &Actor {
        &self.actor
    }

    pub fn id(&self) -> &ActorId {
        self.actor.id()
    }

    pub fn state(&self) -> ActorState {
        self.actor.state()
    }

    pub fn registry(&self) -> &Arc<ActorRegistry> {
        &self.registry
    }

    pub async fn start(&self) -> Result<()> {
        self.actor.start().await
    }

    pub async fn stop(&self) -> Result<()> {
        self.actor.stop().await
    }

    fn ensure_running(&self, operation: &str) -> Result<()> {
        let state = self.actor.state();
        if state.is_running() {
            return Ok(());
        }
        Err(StateError {
            actor_id: self.actor.id().clone(),
            operation: operation.to_string(),
            state,
        }
        .into())
    }

    pub async fn register_actor(&self, actor: Actor) -> Result<()> {
        self.ensure_running("register actor")?;
        let mut entries = self.registry.entries.lock().await;
        let id = actor.id().clone();
        if entries.contains_key(&id) {
            return Err(KernelError::ActorAlreadyRegistered(id));
        }

        info!(supervisor = %self.actor.id(), actor = %id, actor_type = %actor.actor_type(), "Registering actor");
        let actor_type = actor.actor_type().clone();
        entries.insert(id, RegistryEntry { actor, actor_type });
        Ok(())
    }

    /// Removes the actor from the registry without stopping it
    pub async fn unregister_actor(&self, id: &ActorId) -> Result<Option<Actor>> {
        self.ensure_running("unregister actor")?;
        let removed = self.registry.entries.lock().await.remove(id);
        match &removed {
            Some(_) => info!(supervisor = %self.actor.id(), actor = %id, "Unregistered actor"),
            None => warn!(supervisor = %self.actor.id(), actor = %id, "Attempted to unregister unknown actor"),
        }
        Ok(removed.map(|entry| entry.actor))
    }

    pub async fn get_actor(&self, id: &ActorId) -> Option<Actor> {
        self.registry
            .entries
            .lock()
            .await
            .get(id)
            .map(|entry| entry.actor.clone())
    }

    /// Every registered actor, ordered by registration id
    pub async fn get_all_actors(&self) -> Vec<Actor> {
        self.registry
            .actors()
            .await
            .into_iter()
            .map(|(_, actor)| actor)
            .collect()
    }

    pub async fn get_actors_by_type(&self, actor_type: &ActorType) -> Vec<Actor> {
        let entries = self.registry.entries.lock().await;
        let mut matching: Vec<(&ActorId, Actor)> = entries
            .iter()
            .filter(|(_, entry)| &entry.actor_type == actor_type)
            .map(|(id, entry)| (id, entry.actor.clone()))
            .collect();
        matching.sort_by(|a, b| a.0.cmp(b.0));
        matching.into_iter().map(|(_, actor)| actor).collect()
    }

    /// Replaces the actor registered under `old_id` with `new_actor`.
    ///
    /// The replacement must declare the recorded type and be `Initialized`
    /// or `Running`; otherwise nothing is touched. The old actor is stopped
    /// and disposed; messages still queued on its ports are dropped.
    /// The new actor is started only if the old one was `Running`, otherwise
    /// it is left in the state it was handed over in.
    ///
    /// The whole exchange happens under the registry lock, so concurrent
    /// lookups see either the old or the new actor.
    pub async fn hot_swap_actor(&self, old_id: &ActorId, new_actor: Actor) -> Result<SwapOutcome> {
        self.ensure_running("hot swap actor")?;
        let mut entries = self.registry.entries.lock().await;

        let Some(entry) = entries.get(old_id) else {
            warn!(supervisor = %self.actor.id(), actor = %old_id, "Hot swap target not found");
            return Ok(SwapOutcome::NotFound);
        };

        if new_actor.actor_type() != &entry.actor_type {
            warn!(
                supervisor = %self.actor.id(),
                actor = %old_id,
                expected = %entry.actor_type,
                found = %new_actor.actor_type(),
                "Hot swap rejected: type mismatch"
            );
            return Ok(SwapOutcome::TypeMismatch {
                expected: entry.actor_type.clone(),
                found: new_actor.actor_type().clone(),
            });
        }

        if new_actor.ptr_eq(&entry.actor) {
            warn!(supervisor = %self.actor.id(), actor = %old_id, "Hot swap rejected: replacement is the registered actor");
            return Ok(SwapOutcome::SameActor);
        }

        let replacement_state = new_actor.state();
        let startable = matches!(replacement_state, ActorState::Initialized | ActorState::Running);
        if !startable || new_actor.is_disposed() {
            warn!(
                supervisor = %self.actor.id(),
                actor = %old_id,
                replacement = %new_actor.id(),
                state = %replacement_state,
                "Hot swap rejected: replacement cannot run"
            );
            return Ok(SwapOutcome::NotStartable {
                state: replacement_state,
            });
        }

        let old_actor = entry.actor.clone();
        let actor_type = entry.actor_type.clone();
        let was_running = old_actor.is_running();

        info!(
            supervisor = %self.actor.id(),
            actor = %old_id,
            replacement = %new_actor.id(),
            was_running,
            "Hot swapping actor"
        );

        match old_actor.state() {
            ActorState::Running | ActorState::Paused { .. } => {
                if let Err(e) = old_actor.stop().await {
                    warn!(actor = %old_id, "Old actor failed to stop cleanly: {}", e);
                }
            }
            ActorState::Error { detail } => {
                debug!(actor = %old_id, detail = %detail, "Disposing failed actor");
            }
            ActorState::Initialized | ActorState::Stopped => {}
        }
        old_actor.dispose().await;

        entries.insert(
            old_id.clone(),
            RegistryEntry {
                actor: new_actor.clone(),
                actor_type,
            },
        );

        if was_running {
            if let Err(e) = new_actor.start().await {
                error!(actor = %old_id, "Replacement actor failed to start: {}", e);
                return Err(e);
            }
        }

        info!(supervisor = %self.actor.id(), actor = %old_id, "Hot swap complete");
        Ok(SwapOutcome::Swapped)
    }

    pub async fn start_all_actors(&self) -> Result<BulkOutcome> {
        self.ensure_running("start all actors")?;
        let mut outcome = BulkOutcome::default();
        for (id, actor) in self.registry.actors().await {
            match actor.start().await {
                Ok(()) => outcome.succeeded.push(id),
                Err(e) => {
                    warn!(actor = %id, "Failed to start actor: {}", e);
                    outcome.failed.push((id, e));
                }
            }
        }
        info!(
            supervisor = %self.actor.id(),
            started = outcome.succeeded.len(),
            failed = outcome.failed.len(),
            "Started registered actors"
        );
        Ok(outcome)
    }

    pub async fn stop_all_actors(&self) -> Result<BulkOutcome> {
        self.ensure_running("stop all actors")?;
        let mut outcome = BulkOutcome::default();
        for (id, actor) in self.registry.actors().await {
            match actor.stop().await {
                Ok(()) => outcome.succeeded.push(id),
                Err(e) => {
                    warn!(actor = %id, "Failed to stop actor: {}", e);
                    outcome.failed.push((id, e));
                }
            }
        }
        info!(
            supervisor = %self.actor.id(),
            stopped = outcome.succeeded.len(),
            failed = outcome.failed.len(),
            "Stopped registered actors"
        );
        Ok(outcome)
    }

    /// Snapshot of every registered actor, ordered by registration id
    pub async fn capture_snapshots(&self) -> Vec<ActorSnapshot> {
        let mut snapshots = Vec::new();
        for (_, actor) in self.registry.actors().await {
            snapshots.push(actor.capture_snapshot().await);
        }
        snapshots
    }

    /// Disposes every registered actor, clears the registry, then disposes
    /// the supervisor itself
    pub async fn dispose(&self) {
        let drained: Vec<(ActorId, RegistryEntry)> = self.registry.entries.lock().await.drain().collect();
        for (id, entry) in drained {
            debug!(supervisor = %self.actor.id(), actor = %id, "Disposing registered actor");
            entry.actor.dispose().await;
        }
        self.actor.dispose().await;
        info!(supervisor = %self.actor.id(), "Supervisor disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.actor.is_disposed()
    }
}

#[async_trait]
impl Disposable for Supervisor {
    async fn dispose(&self) {
        Supervisor::dispose(self).await
    }

    fn is_disposed(&self) -> bool {
        Supervisor::is_disposed(self)
    }
}

#[async_trait]
impl Lifecycle for Supervisor {
    async fn start(&self) -> Result<()> {
        Supervisor::start(self).await
    }

    async fn stop(&self) -> Result<()> {
        Supervisor::stop(self).await
    }

    fn is_active(&self) -> bool {
        self.actor.is_running()
    }
}
