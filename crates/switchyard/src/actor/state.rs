use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::watch;

/// Lifecycle state of an actor.
///
/// Legal edges: `Initialized -> Running`, `Running <-> Paused`,
/// `Running | Paused -> Stopped`, and any state to `Stopped` through
/// dispose. A failing hook moves the actor to `Error`, from which only
/// dispose is allowed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActorState {
    Initialized,
    Running,
    Paused { reason: String },
    Stopped,
    Error { detail: String },
}

impl ActorState {
    pub fn is_running(&self) -> bool {
        matches!(self, ActorState::Running)
    }

    pub fn is_paused(&self) -> bool {
        matches!(self, ActorState::Paused { .. })
    }

    pub fn is_stopped(&self) -> bool {
        matches!(self, ActorState::Stopped)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ActorState::Error { .. })
    }

    /// `Stopped` and `Error` accept no further work
    pub fn is_terminal(&self) -> bool {
        self.is_stopped() || self.is_error()
    }

    pub fn name(&self) -> &'static str {
        match self {
            ActorState::Initialized => "Initialized",
            ActorState::Running => "Running",
            ActorState::Paused { .. } => "Paused",
            ActorState::Stopped => "Stopped",
            ActorState::Error { .. } => "Error",
        }
    }
}

impl fmt::Display for ActorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActorState::Paused { reason } => write!(f, "Paused ({})", reason),
            ActorState::Error { detail } => write!(f, "Error ({})", detail),
            other => write!(f, "{}", other.name()),
        }
    }
}

/// Holds the current state and lets port loops wait for `Running`.
///
/// Reads are synchronous; transitions are serialized by the actor's
/// lifecycle lock, not by this type.
#[derive(Debug)]
pub struct ActorStateManager {
    tx: watch::Sender<ActorState>,
}

impl Default for ActorStateManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ActorStateManager {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(ActorState::Initialized);
        Self { tx }
    }

    pub fn get(&self) -> ActorState {
        self.tx.borrow().clone()
    }

    /// Replaces the state, returning the previous one
    pub fn set(&self, state: ActorState) -> ActorState {
        self.tx.send_replace(state)
    }

    pub fn is_running(&self) -> bool {
        self.tx.borrow().is_running()
    }

    /// Moves a `Running` or `Paused` actor to `Error`. Returns whether the
    /// state changed.
    pub fn fail_if_active(&self, detail: impl Into<String>) -> bool {
        let detail = detail.into();
        self.tx.send_if_modified(|state| {
            if state.is_running() || state.is_paused() {
                *state = ActorState::Error { detail };
                true
            } else {
                false
            }
        })
    }

    pub fn subscribe(&self) -> watch::Receiver<ActorState> {
        self.tx.subscribe()
    }

    /// Resolves as soon as the state is `Running`
    pub async fn wait_until_running(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = rx.wait_for(ActorState::is_running).await;
    }
}
