//! Configuration models for gates, worker pools and timeouts.

pub mod gate;

pub use gate::{
    GateConfig, GateSetConfig, OverflowPolicy, ProcessWorkerConfig, WorkerKind, ENV_PREFIX,
};
