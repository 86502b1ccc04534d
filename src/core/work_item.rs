//! Work items: the unit of computation submitted to the gate.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::{CancelToken, FailureOrigin, GateError, WorkerFailure};

/// Unique identifier of a work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkId(Uuid);

impl WorkId {
    /// Generate a fresh random identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for WorkId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WorkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// How a work item must be scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkClass {
    /// Short work that may run on the calling task.
    InlineSafe,
    /// Computation that would monopolise the scheduler thread.
    CpuBound,
    /// Work that waits on I/O.
    BlockingIo,
}

impl fmt::Display for WorkClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::InlineSafe => "inline-safe",
            Self::CpuBound => "cpu-bound",
            Self::BlockingIo => "blocking-io",
        };
        f.write_str(name)
    }
}

/// The shape of a work item's computation, used for routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    /// A synchronous closure.
    Call,
    /// An async computation.
    Future,
    /// A named job runnable in a worker process.
    Job,
}

/// Per-item context handed to closures while they run.
#[derive(Debug, Clone)]
pub struct WorkContext {
    id: WorkId,
    cancel: CancelToken,
}

impl WorkContext {
    pub(crate) const fn new(id: WorkId, cancel: CancelToken) -> Self {
        Self { id, cancel }
    }

    /// Identifier of the running item.
    #[must_use]
    pub const fn id(&self) -> WorkId {
        self.id
    }

    /// Whether the item has been cancelled or timed out.
    ///
    /// Long-running closures should check this periodically and return
    /// early; threads cannot be interrupted preemptively.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// The item's cancellation token.
    #[must_use]
    pub const fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }
}

pub(crate) type CallFn<T> = Box<dyn FnOnce(&WorkContext) -> anyhow::Result<T> + Send>;

/// A named job and its JSON input, plus the decoder for its output.
pub(crate) struct JobSpec<T> {
    pub name: String,
    pub input: serde_json::Value,
    pub decode: fn(serde_json::Value) -> serde_json::Result<T>,
}

pub(crate) enum Payload<T> {
    Call(CallFn<T>),
    Future(BoxFuture<'static, anyhow::Result<T>>),
    Job(JobSpec<T>),
}

impl<T> Payload<T> {
    pub(crate) const fn kind(&self) -> PayloadKind {
        match self {
            Self::Call(_) => PayloadKind::Call,
            Self::Future(_) => PayloadKind::Future,
            Self::Job(_) => PayloadKind::Job,
        }
    }
}

/// One unit of computation submitted to the gate.
///
/// # Example
///
/// ```rust,ignore
/// use offload_gate::core::WorkItem;
/// use std::time::Duration;
///
/// let item = WorkItem::cpu_bound(|_ctx| Ok(fib(32)))
///     .with_timeout(Duration::from_secs(5))
///     .with_label("fib");
/// let value = gate.submit(item).await?;
/// ```
pub struct WorkItem<T> {
    pub(crate) class: WorkClass,
    pub(crate) payload: Payload<T>,
    pub(crate) timeout: Option<Duration>,
    pub(crate) cancel: Vec<CancelToken>,
    pub(crate) label: Option<String>,
}

impl<T: Send + 'static> WorkItem<T> {
    fn with_payload(class: WorkClass, payload: Payload<T>) -> Self {
        Self {
            class,
            payload,
            timeout: None,
            cancel: Vec::new(),
            label: None,
        }
    }

    /// A closure with an explicit classification.
    pub fn from_fn<F>(class: WorkClass, f: F) -> Self
    where
        F: FnOnce(&WorkContext) -> anyhow::Result<T> + Send + 'static,
    {
        Self::with_payload(class, Payload::Call(Box::new(f)))
    }

    /// An async computation with an explicit classification.
    pub fn from_future<F>(class: WorkClass, fut: F) -> Self
    where
        F: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        Self::with_payload(class, Payload::Future(fut.boxed()))
    }

    /// Short work that runs synchronously on the calling task.
    pub fn inline<F>(f: F) -> Self
    where
        F: FnOnce(&WorkContext) -> anyhow::Result<T> + Send + 'static,
    {
        Self::from_fn(WorkClass::InlineSafe, f)
    }

    /// CPU-heavy work that must leave the scheduler thread.
    pub fn cpu_bound<F>(f: F) -> Self
    where
        F: FnOnce(&WorkContext) -> anyhow::Result<T> + Send + 'static,
    {
        Self::from_fn(WorkClass::CpuBound, f)
    }

    /// Blocking I/O performed with synchronous calls; offloaded to a thread.
    pub fn blocking_io<F>(f: F) -> Self
    where
        F: FnOnce(&WorkContext) -> anyhow::Result<T> + Send + 'static,
    {
        Self::from_fn(WorkClass::BlockingIo, f)
    }

    /// I/O written against the scheduler's own non-blocking primitives.
    ///
    /// This is the preferred form for I/O: it is awaited on the calling
    /// task and never occupies a worker.
    pub fn non_blocking_io<F>(fut: F) -> Self
    where
        F: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        Self::from_future(WorkClass::BlockingIo, fut)
    }

    /// Bound the item's execution time, measured from dispatch.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Cancel the item when `token` is cancelled.
    ///
    /// May be called more than once; any of the tokens cancels the item.
    #[must_use]
    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel.push(token);
        self
    }

    /// Attach a label used in logs and lifecycle events.
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// The item's classification.
    #[must_use]
    pub const fn class(&self) -> WorkClass {
        self.class
    }

    /// The shape of the item's computation.
    #[must_use]
    pub const fn payload_kind(&self) -> PayloadKind {
        self.payload.kind()
    }
}

impl<T: DeserializeOwned + Send + 'static> WorkItem<T> {
    /// A named job executed in a worker process.
    ///
    /// `input` is serialized to JSON and sent to the worker; the worker's
    /// JSON output is decoded into `T`.
    ///
    /// # Errors
    ///
    /// Returns `GateError::WorkerExecution` with origin
    /// [`FailureOrigin::Protocol`] if `input` cannot be serialized.
    pub fn job<I: Serialize>(
        class: WorkClass,
        name: impl Into<String>,
        input: &I,
    ) -> Result<Self, GateError> {
        let name = name.into();
        let input = serde_json::to_value(input)
            .map_err(|e| {
                GateError::WorkerExecution(WorkerFailure::new(
                    FailureOrigin::Protocol,
                    format!("encoding input of job `{name}`: {e}"),
                ))
            })?;
        Ok(Self::with_payload(
            class,
            Payload::Job(JobSpec {
                name,
                input,
                decode: serde_json::from_value::<T>,
            }),
        ))
    }
}

impl<T> fmt::Debug for WorkItem<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkItem")
            .field("class", &self.class)
            .field("payload", &self.payload.kind())
            .field("timeout", &self.timeout)
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn test_unencodable_job_input_is_protocol_failure() {
        // JSON object keys must be strings.
        let input = HashMap::from([((1_u8, 2_u8), 3_u8)]);
        let err = WorkItem::<u8>::job(WorkClass::CpuBound, "pairs", &input).unwrap_err();
        let failure = err.worker_failure().unwrap();
        assert_eq!(failure.origin(), FailureOrigin::Protocol);
        assert!(failure.message().contains("pairs"));
    }

    #[test]
    fn test_constructors_set_class_and_kind() {
        let item = WorkItem::cpu_bound(|_| Ok(1_u32));
        assert_eq!(item.class(), WorkClass::CpuBound);
        assert_eq!(item.payload_kind(), PayloadKind::Call);

        let item = WorkItem::non_blocking_io(async { Ok(1_u32) });
        assert_eq!(item.class(), WorkClass::BlockingIo);
        assert_eq!(item.payload_kind(), PayloadKind::Future);

        let item = WorkItem::<u64>::job(WorkClass::CpuBound, "fib", &30_u64).unwrap();
        assert_eq!(item.payload_kind(), PayloadKind::Job);
    }

    #[test]
    fn test_class_display() {
        assert_eq!(WorkClass::InlineSafe.to_string(), "inline-safe");
        assert_eq!(WorkClass::CpuBound.to_string(), "cpu-bound");
        assert_eq!(WorkClass::BlockingIo.to_string(), "blocking-io");
    }
}
