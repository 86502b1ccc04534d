//! Builders to construct offload gates from configuration.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::config::{GateConfig, GateSetConfig};
use crate::core::worker_pool::{ProcessPool, ThreadPool};
use crate::core::{AuditSink, GateError, OffloadGate};
use crate::runtime::{Spawn, TokioSpawner};

/// Assembles an [`OffloadGate`] with optional collaborators.
pub struct GateBuilder {
    config: GateConfig,
    audit: Option<Arc<dyn AuditSink>>,
    spawner: Option<Arc<dyn Spawn>>,
}

impl GateBuilder {
    /// Start from `config`.
    #[must_use]
    pub fn new(config: GateConfig) -> Self {
        Self {
            config,
            audit: None,
            spawner: None,
        }
    }

    /// Record lifecycle events of every work item to `sink`.
    #[must_use]
    pub fn with_audit(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(sink);
        self
    }

    /// Drive process jobs on `spawner` instead of the current runtime.
    #[must_use]
    pub fn with_spawner(mut self, spawner: Arc<dyn Spawn>) -> Self {
        self.spawner = Some(spawner);
        self
    }

    /// Validate the configuration and start the worker pools.
    ///
    /// # Errors
    ///
    /// - `GateError::InvalidConfig` for invalid configuration, or when a
    ///   process pool is configured without a spawner outside a tokio
    ///   runtime
    /// - `GateError::Internal` if worker threads cannot be started
    pub fn build(self) -> Result<OffloadGate, GateError> {
        let Self {
            config,
            audit,
            spawner,
        } = self;
        config.validate()?;

        let threads = ThreadPool::new(
            config.max_worker_concurrency,
            config.queue_depth(),
            config.thread_stack_size,
            config.shutdown_join_timeout(),
        )?;

        let processes = match &config.process {
            Some(process) => {
                let spawner: Arc<dyn Spawn> = match spawner {
                    Some(spawner) => spawner,
                    None => Arc::new(TokioSpawner::current()?),
                };
                Some(ProcessPool::new(
                    process,
                    config.max_worker_concurrency,
                    config.queue_depth(),
                    spawner,
                ))
            }
            None => None,
        };

        Ok(OffloadGate::from_parts(config, threads, processes, audit))
    }
}

impl std::fmt::Debug for GateBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GateBuilder")
            .field("config", &self.config)
            .field("audit", &self.audit.is_some())
            .field("spawner", &self.spawner.is_some())
            .finish()
    }
}

/// Build one gate per entry of a gate set.
///
/// # Errors
///
/// Returns the first configuration or startup error, prefixed with the
/// gate's name.
pub fn build_gates(cfg: &GateSetConfig) -> Result<HashMap<String, OffloadGate>, GateError> {
    cfg.validate()?;

    let mut gates = HashMap::new();
    for (name, gate_cfg) in &cfg.gates {
        let gate = GateBuilder::new(gate_cfg.clone())
            .build()
            .map_err(|e| match e {
                GateError::InvalidConfig(msg) => {
                    GateError::InvalidConfig(format!("gate `{name}`: {msg}"))
                }
                other => other,
            })?;
        debug!(gate = %name, "gate built");
        gates.insert(name.clone(), gate);
    }

    Ok(gates)
}
