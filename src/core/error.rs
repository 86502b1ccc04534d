//! Error types for gate operations.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Where a work item failure originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOrigin {
    /// The computation returned an error.
    Error,
    /// The computation panicked.
    Panic,
    /// A worker process exited without producing a response.
    ProcessExit,
    /// A worker process could not be started or fed its input.
    Spawn,
    /// A worker process produced output that could not be decoded.
    Protocol,
}

impl fmt::Display for FailureOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Error => "error",
            Self::Panic => "panic",
            Self::ProcessExit => "process exit",
            Self::Spawn => "spawn",
            Self::Protocol => "protocol",
        };
        f.write_str(name)
    }
}

/// Failure raised while executing a work item.
///
/// Carries the full context chain of the original error as text. When the
/// failure happened in this process, the original `anyhow::Error` is kept as
/// well so callers can downcast it.
#[derive(Debug)]
pub struct WorkerFailure {
    origin: FailureOrigin,
    message: String,
    error: Option<anyhow::Error>,
}

impl WorkerFailure {
    /// Wrap an error returned by a work item.
    #[must_use]
    pub fn from_error(error: anyhow::Error) -> Self {
        Self {
            origin: FailureOrigin::Error,
            message: format!("{error:#}"),
            error: Some(error),
        }
    }

    /// Build a failure from an origin and message.
    pub fn new(origin: FailureOrigin, message: impl Into<String>) -> Self {
        Self {
            origin,
            message: message.into(),
            error: None,
        }
    }

    /// Where the failure originated.
    #[must_use]
    pub const fn origin(&self) -> FailureOrigin {
        self.origin
    }

    /// Failure message, including the context chain.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The original error, when the item failed in this process.
    #[must_use]
    pub const fn error(&self) -> Option<&anyhow::Error> {
        self.error.as_ref()
    }
}

impl fmt::Display for WorkerFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.origin)
    }
}

/// Errors produced by the offload gate.
#[derive(Debug, Error)]
pub enum GateError {
    /// The work item's computation failed.
    #[error("work item failed: {0}")]
    WorkerExecution(WorkerFailure),
    /// The pool is at its configured maximum and cannot queue more work.
    #[error("capacity exceeded: limit {limit}")]
    CapacityExceeded {
        /// Maximum number of admitted items (executing plus queued).
        limit: usize,
    },
    /// The work item exceeded its deadline.
    #[error("work item timed out after {0:?}")]
    Timeout(Duration),
    /// The work item was cancelled before it completed.
    #[error("work item cancelled")]
    Cancelled,
    /// The gate no longer accepts work.
    #[error("gate is shut down")]
    ShutDown,
    /// No execution context can run this work item.
    #[error("work item cannot be routed: {0}")]
    Unroutable(String),
    /// Configuration validation failed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// Infrastructure failure (runtime or thread creation, closed channels).
    #[error("internal error: {0}")]
    Internal(String),
}

impl GateError {
    /// Shorthand for a failure returned by the work item itself.
    #[must_use]
    pub fn execution(error: anyhow::Error) -> Self {
        Self::WorkerExecution(WorkerFailure::from_error(error))
    }

    /// Returns the worker failure, if this is a `WorkerExecution` error.
    #[must_use]
    pub const fn worker_failure(&self) -> Option<&WorkerFailure> {
        match self {
            Self::WorkerExecution(failure) => Some(failure),
            _ => None,
        }
    }
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
