//! Dispatch decisions: where a work item executes.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::WorkerKind;
use crate::core::{GateError, PayloadKind, WorkClass};

/// Execution context chosen for a work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    /// Run on the calling task.
    Inline,
    /// Await the item's non-blocking future on the calling task.
    NativeAsync,
    /// Run on the thread worker pool.
    Thread,
    /// Run in a worker process.
    Process,
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Inline => "inline",
            Self::NativeAsync => "native-async",
            Self::Thread => "thread",
            Self::Process => "process",
        };
        f.write_str(name)
    }
}

/// Decide where a work item executes.
///
/// Blocking I/O prefers the scheduler's own non-blocking form, then a
/// thread, then a process. CPU-bound work never routes inline.
///
/// # Errors
///
/// Returns `GateError::Unroutable` when no configured context can run the
/// item: jobs without a process pool, or CPU-bound closures and futures on
/// a gate whose `worker_kind` is `process`.
pub fn route(
    class: WorkClass,
    payload: PayloadKind,
    worker_kind: WorkerKind,
    process_pool_available: bool,
) -> Result<Route, GateError> {
    if payload == PayloadKind::Job {
        return if process_pool_available {
            Ok(Route::Process)
        } else {
            Err(GateError::Unroutable(
                "jobs require a worker process program".into(),
            ))
        };
    }

    match (class, payload) {
        (WorkClass::InlineSafe, _) => Ok(Route::Inline),
        (WorkClass::BlockingIo, PayloadKind::Future) => Ok(Route::NativeAsync),
        (WorkClass::BlockingIo, _) => Ok(Route::Thread),
        (WorkClass::CpuBound, _) => match worker_kind {
            WorkerKind::Thread => Ok(Route::Thread),
            WorkerKind::Process => Err(GateError::Unroutable(
                "cpu-bound closures cannot cross a process boundary; submit a job".into(),
            )),
        },
    }
}
