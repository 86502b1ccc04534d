//! The offload gate: routes work items and delivers their results.
//!
//! The gate is meant to be used from a cooperative scheduler (a tokio
//! runtime, typically `current_thread`). Nothing it does on the calling
//! task blocks for the duration of offloaded work: admission is a CAS on a
//! counter, handing work to a pool is a non-blocking send, and results come
//! back through channels the caller awaits.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::runtime::Runtime;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::builders::GateBuilder;
use crate::config::GateConfig;
use crate::core::audit::ItemTrace;
use crate::core::handle::{expire, Deadline};
use crate::core::routing::route;
use crate::core::work_item::{CallFn, JobSpec, Payload};
use crate::core::worker_pool::{
    JobCompletion, OffloadPool, PoolCounters, PoolStats, ProcessPool, TaskOutcome, ThreadPool,
    ThreadTask,
};
use crate::core::{
    AuditSink, CancelToken, FailureOrigin, GateError, Route, WorkContext, WorkHandle, WorkId,
    WorkItem, WorkState, WorkerFailure,
};
use crate::infra::process::wire::WorkerRequest;
use crate::util::panic_message;

/// Options for [`OffloadGate::submit_batch`].
#[derive(Debug, Clone, Default)]
pub struct BatchOptions {
    /// Deadline shared by every member, measured from dispatch.
    pub timeout: Option<Duration>,
    /// Cancels every outstanding member when triggered.
    pub cancel: Option<CancelToken>,
}

impl BatchOptions {
    /// Options with neither timeout nor cancellation.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound the whole batch.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Cancel outstanding members when `token` is cancelled.
    #[must_use]
    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// Counters for work that ran on the calling task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlineStats {
    /// Items run inline or awaited natively.
    pub executed: u64,
    /// Items currently running on a calling task.
    pub active: u64,
    /// Items that completed successfully.
    pub completed: u64,
    /// Items that failed.
    pub failed: u64,
    /// Items cancelled or timed out.
    pub cancelled: u64,
}

/// Snapshot of gate utilization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateStats {
    /// Inline and native-async work.
    pub inline: InlineStats,
    /// Thread worker pool.
    pub thread: PoolStats,
    /// Process worker pool, when configured.
    pub process: Option<PoolStats>,
}

struct GateShared {
    config: GateConfig,
    threads: ThreadPool,
    processes: Option<ProcessPool>,
    root: CancelToken,
    closed: AtomicBool,
    audit: Option<Arc<dyn AuditSink>>,
    local: Arc<PoolCounters>,
}

impl Drop for GateShared {
    fn drop(&mut self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            // Same as a non-draining shutdown, minus the wait.
            self.root.cancel();
            debug!("offload gate dropped without explicit shutdown - in-flight items cancelled");
        }
    }
}

/// Cooperative-scheduler offload gate.
///
/// Cheap to clone; clones share pools and state.
///
/// # Example
///
/// ```rust,ignore
/// use offload_gate::config::GateConfig;
/// use offload_gate::core::{OffloadGate, WorkItem};
///
/// let gate = OffloadGate::new(GateConfig::new().with_max_worker_concurrency(4))?;
/// let digest = gate.submit(WorkItem::cpu_bound(move |_| Ok(hash(&bytes)))).await?;
/// gate.shutdown(true).await;
/// ```
#[derive(Clone)]
pub struct OffloadGate {
    shared: Arc<GateShared>,
}

impl OffloadGate {
    /// Create a gate from configuration.
    ///
    /// Must be called inside a tokio runtime when a process pool is
    /// configured.
    ///
    /// # Errors
    ///
    /// Returns `GateError::InvalidConfig` for invalid configuration and
    /// `GateError::Internal` if worker threads cannot be started.
    pub fn new(config: GateConfig) -> Result<Self, GateError> {
        GateBuilder::new(config).build()
    }

    /// Start building a gate with optional collaborators.
    #[must_use]
    pub fn builder(config: GateConfig) -> GateBuilder {
        GateBuilder::new(config)
    }

    pub(crate) fn from_parts(
        config: GateConfig,
        threads: ThreadPool,
        processes: Option<ProcessPool>,
        audit: Option<Arc<dyn AuditSink>>,
    ) -> Self {
        info!(
            max_worker_concurrency = config.max_worker_concurrency,
            worker_kind = ?config.worker_kind,
            process_pool = processes.is_some(),
            "offload gate ready"
        );
        Self {
            shared: Arc::new(GateShared {
                config,
                threads,
                processes,
                root: CancelToken::new(),
                closed: AtomicBool::new(false),
                audit,
                local: Arc::new(PoolCounters::default()),
            }),
        }
    }

    /// The gate's configuration.
    #[must_use]
    pub fn config(&self) -> &GateConfig {
        &self.shared.config
    }

    /// Whether `shutdown` has begun.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Submit a work item and wait for its result.
    ///
    /// # Errors
    ///
    /// Any [`GateError`]: admission failures are returned immediately,
    /// execution failures, timeouts and cancellation once they happen.
    pub async fn submit<T: Send + 'static>(&self, item: WorkItem<T>) -> Result<T, GateError> {
        self.dispatch(item)?.await
    }

    /// Admit a work item and return a handle to its result.
    ///
    /// Inline closures have already run when this returns. Everything else
    /// runs while the caller is free to do other work.
    ///
    /// # Errors
    ///
    /// - `GateError::ShutDown` once shutdown has begun
    /// - `GateError::Unroutable` if no configured context can run the item
    /// - `GateError::CapacityExceeded` if the target pool is full
    pub fn dispatch<T: Send + 'static>(&self, item: WorkItem<T>) -> Result<WorkHandle<T>, GateError> {
        let shared = &self.shared;
        if shared.closed.load(Ordering::Acquire) {
            return Err(GateError::ShutDown);
        }

        let WorkItem {
            class,
            payload,
            timeout,
            cancel: parents,
            label,
        } = item;

        let route = route(
            class,
            payload.kind(),
            shared.config.worker_kind,
            shared.processes.is_some(),
        )
        .map_err(|e| {
            warn!(%class, error = %e, "rejecting work item");
            e
        })?;

        let id = WorkId::new();
        let cancel = shared.root.child_token();
        for parent in &parents {
            parent.link(&cancel);
        }
        let deadline = timeout
            .or_else(|| shared.config.default_timeout())
            .and_then(Deadline::after);
        let trace = ItemTrace::new(id, label, route, shared.audit.clone());
        trace.record(WorkState::Submitted, None);

        match (route, payload) {
            (Route::Inline, Payload::Call(f)) => Ok(self.run_inline(id, f, cancel, &trace)),
            (Route::Inline | Route::NativeAsync, Payload::Future(fut)) => {
                Ok(self.run_local(id, route, fut, cancel, deadline, trace))
            }
            (Route::Thread, payload) => self.dispatch_thread(id, payload, cancel, deadline, trace),
            (Route::Process, Payload::Job(job)) => {
                self.dispatch_process(id, job, cancel, deadline, trace)
            }
            (route, payload) => Err(GateError::Internal(format!(
                "{route} route cannot run a {:?} payload",
                payload.kind()
            ))),
        }
    }

    /// Submit several items and wait for all of them.
    ///
    /// Results are returned in submission order. With a batch timeout,
    /// members still running at the deadline yield `GateError::Timeout`;
    /// cancelling the batch token cancels every outstanding member.
    pub async fn submit_batch<T: Send + 'static>(
        &self,
        items: Vec<WorkItem<T>>,
        options: BatchOptions,
    ) -> Vec<Result<T, GateError>> {
        let default_timeout = self.shared.config.default_timeout();
        let handles: Vec<_> = items
            .into_iter()
            .map(|mut item| {
                if let Some(batch_timeout) = options.timeout {
                    let own = item.timeout.or(default_timeout);
                    item.timeout = Some(own.map_or(batch_timeout, |t| t.min(batch_timeout)));
                }
                if let Some(token) = &options.cancel {
                    item.cancel.push(token.clone());
                }
                self.dispatch(item)
            })
            .collect();

        debug!(members = handles.len(), "batch dispatched");
        join_all(handles.into_iter().map(|handle| async move {
            match handle {
                Ok(handle) => handle.await,
                Err(e) => Err(e),
            }
        }))
        .await
    }

    /// Stop accepting work and release the pools.
    ///
    /// With `drain`, waits for every item already admitted to a pool to
    /// finish. Without it, cancels in-flight items (workers observe the
    /// cancellation best-effort) and returns without joining threads.
    /// Calling it again has no effect.
    pub async fn shutdown(&self, drain: bool) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            debug!("offload gate already shut down");
            return;
        }
        info!(drain, "shutting down offload gate");
        if !drain {
            self.shared.root.cancel();
        }
        for pool in self.pools() {
            pool.shutdown(drain).await;
            debug!(pool = pool.name(), "pool released");
        }
        info!(drain, "offload gate shut down");
    }

    /// Current utilization snapshot.
    #[must_use]
    pub fn stats(&self) -> GateStats {
        let local = &self.shared.local;
        GateStats {
            inline: InlineStats {
                executed: local.submitted.load(Ordering::Relaxed),
                active: local.active.load(Ordering::Relaxed),
                completed: local.completed.load(Ordering::Relaxed),
                failed: local.failed.load(Ordering::Relaxed),
                cancelled: local.cancelled.load(Ordering::Relaxed),
            },
            thread: self.shared.threads.stats(),
            process: self.shared.processes.as_ref().map(OffloadPool::stats),
        }
    }

    fn pools(&self) -> Vec<&dyn OffloadPool> {
        let mut pools: Vec<&dyn OffloadPool> = vec![&self.shared.threads];
        if let Some(processes) = &self.shared.processes {
            pools.push(processes);
        }
        pools
    }

    fn run_inline<T: Send + 'static>(
        &self,
        id: WorkId,
        f: CallFn<T>,
        cancel: CancelToken,
        trace: &ItemTrace,
    ) -> WorkHandle<T> {
        let local = &self.shared.local;
        local.submitted.fetch_add(1, Ordering::Relaxed);
        let ctx = WorkContext::new(id, cancel);
        let result = if ctx.is_cancelled() {
            Err(GateError::Cancelled)
        } else {
            trace.record(WorkState::InlineExecuting, None);
            run_call(f, &ctx)
        };
        local.record(TaskOutcome::of(&result));
        trace.finish(&result);
        WorkHandle::ready(id, result)
    }

    fn run_local<T: Send + 'static>(
        &self,
        id: WorkId,
        route: Route,
        fut: BoxFuture<'static, anyhow::Result<T>>,
        cancel: CancelToken,
        deadline: Option<Deadline>,
        trace: ItemTrace,
    ) -> WorkHandle<T> {
        let counters = Arc::clone(&self.shared.local);
        counters.submitted.fetch_add(1, Ordering::Relaxed);
        let token = cancel.clone();
        let running_state = if route == Route::Inline {
            WorkState::InlineExecuting
        } else {
            WorkState::Executing
        };

        let fut = async move {
            let _active = ActiveGuard::enter(Arc::clone(&counters));
            trace.record(running_state, None);
            let result = tokio::select! {
                biased;
                result = run_future(fut) => result,
                () = token.cancelled() => Err(GateError::Cancelled),
                after = expire(deadline) => Err(GateError::Timeout(after)),
            };
            counters.record(TaskOutcome::of(&result));
            trace.finish(&result);
            result
        }
        .boxed();

        WorkHandle::local(id, cancel, fut)
    }

    fn dispatch_thread<T: Send + 'static>(
        &self,
        id: WorkId,
        payload: Payload<T>,
        cancel: CancelToken,
        deadline: Option<Deadline>,
        trace: ItemTrace,
    ) -> Result<WorkHandle<T>, GateError> {
        let permit = self.shared.threads.admit().map_err(|e| {
            warn!(work_id = %id, error = %e, "thread pool rejected work item");
            e
        })?;
        if permit.queued() {
            trace.record(WorkState::Queued, None);
        }

        let (tx, rx) = oneshot::channel();
        let ctx = WorkContext::new(id, cancel.clone());
        let run = Box::new(move |rt: &Runtime| {
            let result = if ctx.is_cancelled() {
                Err(GateError::Cancelled)
            } else {
                trace.record(WorkState::Executing, None);
                match payload {
                    Payload::Call(f) => run_call(f, &ctx),
                    Payload::Future(fut) => rt.block_on(async {
                        tokio::select! {
                            biased;
                            result = run_future(fut) => result,
                            () = ctx.cancel_token().cancelled() => Err(GateError::Cancelled),
                        }
                    }),
                    Payload::Job(_) => Err(GateError::Internal(
                        "jobs cannot run on worker threads".into(),
                    )),
                }
            };
            // The caller stopped waiting; a late value is discarded.
            let result = match result {
                Ok(_) if ctx.is_cancelled() => Err(GateError::Cancelled),
                other => other,
            };
            trace.finish(&result);
            let outcome = TaskOutcome::of(&result);
            let _ = tx.send(result);
            outcome
        });

        self.shared.threads.submit(ThreadTask { id, permit, run })?;
        Ok(WorkHandle::remote(id, rx, cancel, deadline))
    }

    fn dispatch_process<T: Send + 'static>(
        &self,
        id: WorkId,
        job: JobSpec<T>,
        cancel: CancelToken,
        deadline: Option<Deadline>,
        trace: ItemTrace,
    ) -> Result<WorkHandle<T>, GateError> {
        let pool = self
            .shared
            .processes
            .as_ref()
            .ok_or_else(|| GateError::Unroutable("no process pool configured".into()))?;
        let permit = pool.admit().map_err(|e| {
            warn!(work_id = %id, error = %e, "process pool rejected work item");
            e
        })?;
        if permit.queued() {
            trace.record(WorkState::Queued, None);
        }

        let (tx, rx) = oneshot::channel();
        let JobSpec {
            name,
            input,
            decode,
        } = job;
        let finish = trace.clone();
        let complete: JobCompletion = Box::new(move |raw| {
            let result = raw.and_then(|value| {
                decode(value).map_err(|e| {
                    GateError::WorkerExecution(WorkerFailure::new(
                        FailureOrigin::Protocol,
                        format!("decoding job output: {e}"),
                    ))
                })
            });
            finish.finish(&result);
            let outcome = TaskOutcome::of(&result);
            let _ = tx.send(result);
            outcome
        });

        let request = WorkerRequest {
            id,
            job: name,
            input,
        };
        pool.run(request, permit, cancel.clone(), trace, complete);
        Ok(WorkHandle::remote(id, rx, cancel, deadline))
    }
}

impl std::fmt::Debug for OffloadGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OffloadGate")
            .field("config", &self.shared.config)
            .field("shut_down", &self.is_shut_down())
            .finish_non_exhaustive()
    }
}

/// Decrements the active counter when local work stops, however it stops.
struct ActiveGuard(Arc<PoolCounters>);

impl ActiveGuard {
    fn enter(counters: Arc<PoolCounters>) -> Self {
        counters.active.fetch_add(1, Ordering::Relaxed);
        Self(counters)
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::Relaxed);
    }
}

fn panic_failure(payload: &(dyn std::any::Any + Send)) -> GateError {
    let message = panic_message(payload);
    warn!(panic = %message, "work item panicked");
    GateError::WorkerExecution(WorkerFailure::new(FailureOrigin::Panic, message))
}

/// Run a closure, turning errors and panics into `WorkerExecution`.
fn run_call<T>(f: CallFn<T>, ctx: &WorkContext) -> Result<T, GateError> {
    match panic::catch_unwind(AssertUnwindSafe(|| f(ctx))) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(GateError::execution(e)),
        Err(payload) => Err(panic_failure(payload.as_ref())),
    }
}

/// Await a future, turning errors and panics into `WorkerExecution`.
async fn run_future<T>(fut: BoxFuture<'static, anyhow::Result<T>>) -> Result<T, GateError> {
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(GateError::execution(e)),
        Err(payload) => Err(panic_failure(payload.as_ref())),
    }
}
