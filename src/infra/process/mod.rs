//! Worker-process side of process offload.
//!
//! A worker process reads one [`wire::WorkerRequest`] from stdin, runs the
//! named job from its [`JobRegistry`] and writes one [`wire::WorkerResponse`]
//! line to stdout.

pub mod host;
pub mod registry;
pub mod wire;

pub use host::{is_worker_process, serve_if_worker, serve_stdio};
pub use registry::JobRegistry;
pub use wire::{WorkerRequest, WorkerResponse, WORKER_ENV};
