//! Tokio runtime spawner implementation.

use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::runtime::{Handle, Runtime};

use crate::core::GateError;

use super::Spawn;

/// Tokio-based spawner that executes tasks on a tokio runtime.
#[derive(Clone)]
pub struct TokioSpawner {
    handle: Handle,
    // Keeps an owned runtime alive for spawners built by `with_worker_threads`.
    owned: Option<Arc<Runtime>>,
}

impl TokioSpawner {
    /// Create a new `TokioSpawner` from a tokio runtime handle.
    #[must_use]
    pub const fn new(handle: Handle) -> Self {
        Self {
            handle,
            owned: None,
        }
    }

    /// Spawner for the runtime the caller is running on.
    ///
    /// # Errors
    ///
    /// Returns `GateError::InvalidConfig` when called outside a tokio runtime.
    pub fn current() -> Result<Self, GateError> {
        Handle::try_current()
            .map(Self::new)
            .map_err(|e| GateError::InvalidConfig(format!("no tokio runtime available: {e}")))
    }

    /// Create a `TokioSpawner` with a new multi-threaded runtime with the
    /// specified number of worker threads.
    ///
    /// # Errors
    ///
    /// Returns the I/O error raised while building the runtime.
    pub fn with_worker_threads(worker_threads: usize) -> Result<Self, std::io::Error> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(worker_threads)
            .thread_name("offload-gate-io")
            .enable_all()
            .build()?;
        Ok(Self {
            handle: runtime.handle().clone(),
            owned: Some(Arc::new(runtime)),
        })
    }
}

impl Spawn for TokioSpawner {
    fn spawn(&self, fut: BoxFuture<'static, ()>) {
        self.handle.spawn(fut);
    }
}

impl std::fmt::Debug for TokioSpawner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokioSpawner")
            .field("owns_runtime", &self.owned.is_some())
            .finish()
    }
}
