//! Core offload abstractions: work items, routing, pools and the gate.

pub mod audit;
pub mod cancel;
pub mod error;
pub mod gate;
pub mod handle;
pub mod routing;
pub mod work_item;
pub mod worker_pool;

pub use audit::{build_audit_event, AuditEvent, AuditSink, InMemoryAuditSink, WorkState};
pub use cancel::CancelToken;
pub use error::{AppResult, FailureOrigin, GateError, WorkerFailure};
pub use gate::{BatchOptions, GateStats, InlineStats, OffloadGate};
pub use handle::WorkHandle;
pub use routing::{route, Route};
pub use work_item::{PayloadKind, WorkClass, WorkContext, WorkId, WorkItem};
pub use worker_pool::{OffloadPool, PoolStats, ProcessPool, ThreadPool};
