//! Runtime adapters used to drive background work.

pub mod tokio_spawner;

use futures::future::BoxFuture;

pub use tokio_spawner::TokioSpawner;

/// Spawner abstraction so the gate can run background tasks on any runtime.
pub trait Spawn: Send + Sync {
    /// Spawn a detached future.
    fn spawn(&self, fut: BoxFuture<'static, ()>);
}
