//! # Lifecycle Contracts
//!
//! The two small contracts every port, actor and supervisor satisfies.

use crate::Result;
use async_trait::async_trait;

/// Explicit resource release.
///
/// `dispose` must be idempotent: calling it a second time has the same
/// observable effect as calling it once.
#[async_trait]
pub trait Disposable: Send + Sync {
    async fn dispose(&self);

    fn is_disposed(&self) -> bool;
}

/// Start/stop control on top of [`Disposable`]
#[async_trait]
pub trait Lifecycle: Disposable {
    async fn start(&self) -> Result<()>;

    async fn stop(&self) -> Result<()>;

    fn is_active(&self) -> bool;
}
