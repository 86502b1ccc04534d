//! # Offload Gate
//!
//! Keeps a cooperative async scheduler responsive by deciding, per unit of
//! work, whether it may run on the calling task or must be offloaded to a
//! worker thread or process.
//!
//! A single-threaded tokio runtime makes progress only while every task
//! yields quickly. One CPU-heavy closure or one blocking call stalls every
//! other task on that thread. The gate takes a tagged [`core::WorkItem`] and
//! routes it:
//!
//! | Class          | Closure                  | Future          | Job     |
//! |----------------|--------------------------|-----------------|---------|
//! | `InlineSafe`   | calling task             | calling task    | process |
//! | `CpuBound`     | thread pool (or rejected)| thread pool     | process |
//! | `BlockingIo`   | thread pool              | calling task    | process |
//!
//! `CpuBound` work never runs on the scheduler thread. Offloaded work is
//! bounded by `max_worker_concurrency` with a bounded FIFO queue behind it,
//! and every item can carry a timeout and a cancellation token.
//!
//! ## Example
//!
//! ```rust,ignore
//! use offload_gate::config::GateConfig;
//! use offload_gate::core::{OffloadGate, WorkItem};
//! use std::time::Duration;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> anyhow::Result<()> {
//!     let gate = OffloadGate::new(
//!         GateConfig::new()
//!             .with_max_worker_concurrency(4)
//!             .with_default_timeout(Duration::from_secs(30)),
//!     )?;
//!
//!     let primes = gate
//!         .submit(WorkItem::cpu_bound(|ctx| Ok(count_primes(10_000_000, ctx))))
//!         .await?;
//!     let body = gate
//!         .submit(WorkItem::non_blocking_io(async { fetch().await }))
//!         .await?;
//!
//!     gate.shutdown(true).await;
//!     Ok(())
//! }
//! ```
//!
//! ## Process workers
//!
//! With a worker program configured, named jobs run in isolated OS
//! processes. The worker side is a [`infra::JobRegistry`] served by
//! [`infra::serve_stdio`]; an application can act as its own worker with
//! [`infra::serve_if_worker`] and
//! [`config::ProcessWorkerConfig::current_exe`].

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Configuration models for gates, worker pools and timeouts.
pub mod config;
/// Core offload abstractions: work items, routing, pools and the gate.
pub mod core;
/// Builders to construct gates from configuration.
pub mod builders;
/// Infrastructure adapters for external workers.
pub mod infra;
/// Runtime adapters used to drive background work.
pub mod runtime;
/// Shared utilities.
pub mod util;
