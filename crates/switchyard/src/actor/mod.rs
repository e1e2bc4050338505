//! # Actors
//!
//! An actor is a named, lifecycle-managed unit that owns zero or more ports.
//! Each port gets its own processing loop while the actor runs, and the
//! application supplies behavior through the hooks of [`ActorBehavior`].

pub mod behavior;
pub mod runtime;
pub mod state;

pub use behavior::{ActorBehavior, ActorContext, ActorType, ErrorDirective};
pub use runtime::{Actor, ActorBuilder};
pub use state::{ActorState, ActorStateManager};
