//! # Actor Snapshots
//!
//! The externally visible configuration of an actor: its ports, metrics and
//! custom state. In-flight messages are not part of a snapshot.
//!
//! Where snapshots end up is the caller's business. [`SnapshotStore`] is the
//! seam; [`InMemorySnapshotStore`] is the reference implementation.

use crate::actor::{ActorState, ActorType};
use crate::id::ActorId;
use crate::metrics::MetricsSnapshot;
use crate::port::PortConfig;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActorSnapshot {
    pub actor_id: ActorId,
    pub name: String,
    pub actor_type: ActorType,
    pub state: ActorState,
    pub ports: Vec<PortConfig>,
    pub metrics: MetricsSnapshot,
    pub custom_state: BTreeMap<String, Value>,
    pub captured_at: DateTime<Utc>,
}

impl ActorSnapshot {
    pub fn port(&self, name: &str) -> Option<&PortConfig> {
        self.ports.iter().find(|port| port.name == name)
    }
}

/// Storage for snapshots, keyed by actor id
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Stores a snapshot, replacing any previous one for the same actor
    async fn save(&self, snapshot: ActorSnapshot) -> anyhow::Result<()>;

    async fn load(&self, actor_id: &ActorId) -> anyhow::Result<Option<ActorSnapshot>>;

    /// Returns whether a snapshot was removed
    async fn remove(&self, actor_id: &ActorId) -> anyhow::Result<bool>;

    async fn list(&self) -> anyhow::Result<Vec<ActorId>>;
}

#[derive(Debug, Default)]
pub struct InMemorySnapshotStore {
    snapshots: RwLock<HashMap<ActorId, ActorSnapshot>>,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn save(&self, snapshot: ActorSnapshot) -> anyhow::Result<()> {
        self.snapshots
            .write()
            .await
            .insert(snapshot.actor_id.clone(), snapshot);
        Ok(())
    }

    async fn load(&self, actor_id: &ActorId) -> anyhow::Result<Option<ActorSnapshot>> {
        Ok(self.snapshots.read().await.get(actor_id).cloned())
    }

    async fn remove(&self, actor_id: &ActorId) -> anyhow::Result<bool> {
        Ok(self.snapshots.write().await.remove(actor_id).is_some())
    }

    async fn list(&self) -> anyhow::Result<Vec<ActorId>> {
        let mut ids: Vec<ActorId> = self.snapshots.read().await.keys().cloned().collect();
        ids.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        Ok(ids)
    }
}
