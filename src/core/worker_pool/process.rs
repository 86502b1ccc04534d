//! Process worker pool: each job runs in its own OS process.
//!
//! Processes give full isolation: the job's memory, panics and crashes stay
//! in the child. Input is copied in over stdin and the result copied out
//! over stdout (see [`crate::infra::process::wire`]). Processes are spawned
//! lazily, one per job, and a fair semaphore bounds how many run at once so
//! queued jobs start in submission order.

use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

use crate::config::ProcessWorkerConfig;
use crate::core::audit::ItemTrace;
use crate::core::{CancelToken, FailureOrigin, GateError, WorkState, WorkerFailure};
use crate::infra::process::wire::{WorkerRequest, WorkerResponse, WORKER_ENV};
use crate::runtime::Spawn;

use super::{Admission, AdmissionPermit, OffloadPool, PoolCounters, PoolStats, TaskOutcome};

/// Delivers a job's raw JSON result to its caller and reports the outcome.
pub(crate) type JobCompletion =
    Box<dyn FnOnce(Result<serde_json::Value, GateError>) -> TaskOutcome + Send>;

const STDERR_TAIL_BYTES: usize = 512;

/// Worker pool that runs each job in a fresh OS process.
pub struct ProcessPool {
    program: PathBuf,
    args: Vec<String>,
    semaphore: Arc<Semaphore>,
    admission: Arc<Admission>,
    counters: Arc<PoolCounters>,
    spawner: Arc<dyn Spawn>,
    shutdown: AtomicBool,
}

impl ProcessPool {
    pub(crate) fn new(
        config: &ProcessWorkerConfig,
        max_concurrency: usize,
        max_queue_depth: usize,
        spawner: Arc<dyn Spawn>,
    ) -> Self {
        info!(
            program = %config.program.display(),
            max_concurrency,
            max_queue_depth,
            "process pool initialized (workers spawn on demand)"
        );
        Self {
            program: config.program.clone(),
            args: config.args.clone(),
            semaphore: Arc::new(Semaphore::new(max_concurrency)),
            admission: Arc::new(Admission::new(max_concurrency, max_queue_depth)),
            counters: Arc::new(PoolCounters::default()),
            spawner,
            shutdown: AtomicBool::new(false),
        }
    }

    /// Program launched for each job.
    #[must_use]
    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Reserve a slot for one job.
    pub(crate) fn admit(&self) -> Result<AdmissionPermit, GateError> {
        self.admission.try_admit().map_err(|e| {
            self.counters.rejected.fetch_add(1, Ordering::Relaxed);
            e
        })
    }

    /// Run an admitted job in the background.
    ///
    /// `complete` is called exactly once with the job's result unless the
    /// host runtime shuts down first.
    pub(crate) fn run(
        &self,
        request: WorkerRequest,
        permit: AdmissionPermit,
        cancel: CancelToken,
        trace: ItemTrace,
        complete: JobCompletion,
    ) {
        let program = self.program.clone();
        let args = self.args.clone();
        let semaphore = Arc::clone(&self.semaphore);
        let counters = Arc::clone(&self.counters);
        counters.submitted.fetch_add(1, Ordering::Relaxed);
        debug!(work_id = %request.id, job = %request.job, "job submitted to process pool");

        self.spawner.spawn(Box::pin(async move {
            let result = match acquire_slot(semaphore, &cancel).await {
                Ok(slot) => {
                    counters.active.fetch_add(1, Ordering::Relaxed);
                    trace.record(WorkState::Executing, None);
                    let result = execute_job(&program, &args, &request, &cancel).await;
                    counters.active.fetch_sub(1, Ordering::Relaxed);
                    drop(slot);
                    result
                }
                Err(e) => Err(e),
            };
            let outcome = complete(result);
            counters.record(outcome);
            drop(permit);
        }));
    }
}

#[async_trait]
impl OffloadPool for ProcessPool {
    fn name(&self) -> &'static str {
        "process"
    }

    fn stats(&self) -> PoolStats {
        self.counters.snapshot(&self.admission)
    }

    async fn shutdown(&self, drain: bool) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        info!(drain, "shutting down process pool");
        self.admission.close();
        if drain {
            self.admission.wait_idle().await;
        }
        // Jobs still waiting for a slot fail fast once the semaphore closes.
        self.semaphore.close();
        info!("process pool shut down complete");
    }
}

async fn acquire_slot(
    semaphore: Arc<Semaphore>,
    cancel: &CancelToken,
) -> Result<OwnedSemaphorePermit, GateError> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(GateError::Cancelled),
        permit = semaphore.acquire_owned() => permit.map_err(|_| GateError::ShutDown),
    }
}

fn failure(origin: FailureOrigin, message: impl Into<String>) -> GateError {
    GateError::WorkerExecution(WorkerFailure::new(origin, message))
}

/// Spawn the worker program, feed it the request and collect its response.
///
/// The child is killed if `cancel` fires first.
async fn execute_job(
    program: &Path,
    args: &[String],
    request: &WorkerRequest,
    cancel: &CancelToken,
) -> Result<serde_json::Value, GateError> {
    let body = serde_json::to_vec(request)
        .map_err(|e| failure(FailureOrigin::Protocol, format!("encoding request: {e}")))?;

    let mut child = Command::new(program)
        .args(args)
        .env(WORKER_ENV, "1")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| {
            failure(
                FailureOrigin::Spawn,
                format!("starting {}: {e}", program.display()),
            )
        })?;

    let id = request.id;
    let stdin = child.stdin.take();
    let run = async move {
        if let Some(mut stdin) = stdin {
            if let Err(e) = stdin.write_all(&body).await {
                debug!(work_id = %id, error = %e, "worker closed stdin early");
            }
        }
        child.wait_with_output().await
    };

    let output = tokio::select! {
        biased;
        () = cancel.cancelled() => {
            // Dropping `run` drops the child, which kills it.
            warn!(work_id = %id, "terminating worker process");
            return Err(GateError::Cancelled);
        }
        output = run => output.map_err(|e| {
            failure(FailureOrigin::ProcessExit, format!("waiting for worker: {e}"))
        })?,
    };

    decode_output(&output)
}

fn decode_output(out: &Output) -> Result<serde_json::Value, GateError> {
    let stdout = String::from_utf8_lossy(&out.stdout);
    let response = stdout
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .map(serde_json::from_str::<WorkerResponse>);

    match response {
        Some(Ok(WorkerResponse::Success { output })) => Ok(output),
        Some(Ok(WorkerResponse::Failure { message, panicked })) => {
            let origin = if panicked {
                FailureOrigin::Panic
            } else {
                FailureOrigin::Error
            };
            Err(failure(origin, message))
        }
        _ if !out.status.success() => Err(failure(
            FailureOrigin::ProcessExit,
            format!(
                "worker process exited with {}: {}",
                out.status,
                stderr_tail(&out.stderr)
            ),
        )),
        Some(Err(e)) => Err(failure(
            FailureOrigin::Protocol,
            format!("malformed worker response: {e}"),
        )),
        None => Err(failure(FailureOrigin::Protocol, "worker produced no response")),
    }
}

fn stderr_tail(stderr: &[u8]) -> String {
    let start = stderr.len().saturating_sub(STDERR_TAIL_BYTES);
    String::from_utf8_lossy(&stderr[start..]).trim().to_owned()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::process::ExitStatusExt;
    use std::process::ExitStatus;

    fn output(code: i32, stdout: &str, stderr: &str) -> Output {
        Output {
            status: ExitStatus::from_raw(code << 8),
            stdout: stdout.as_bytes().to_vec(),
            stderr: stderr.as_bytes().to_vec(),
        }
    }

    #[test]
    fn test_decode_success_uses_last_line() {
        let out = output(0, "noise\n{\"status\":\"ok\",\"output\":42}\n", "");
        assert_eq!(decode_output(&out).unwrap(), serde_json::json!(42));
    }

    #[test]
    fn test_decode_job_error_and_panic() {
        let out = output(0, r#"{"status":"error","message":"bad input"}"#, "");
        let err = decode_output(&out).unwrap_err();
        let failure = err.worker_failure().unwrap();
        assert_eq!(failure.origin(), FailureOrigin::Error);
        assert_eq!(failure.message(), "bad input");

        let out = output(0, r#"{"status":"error","message":"boom","panicked":true}"#, "");
        let err = decode_output(&out).unwrap_err();
        assert_eq!(err.worker_failure().unwrap().origin(), FailureOrigin::Panic);
    }

    #[test]
    fn test_decode_crash_reports_exit_and_stderr() {
        let out = output(3, "", "segfault-ish\n");
        let err = decode_output(&out).unwrap_err();
        let failure = err.worker_failure().unwrap();
        assert_eq!(failure.origin(), FailureOrigin::ProcessExit);
        assert!(failure.message().contains("segfault-ish"));
    }

    #[test]
    fn test_decode_garbage_is_protocol_error() {
        let out = output(0, "not json", "");
        let err = decode_output(&out).unwrap_err();
        assert_eq!(err.worker_failure().unwrap().origin(), FailureOrigin::Protocol);

        let out = output(0, "", "");
        let err = decode_output(&out).unwrap_err();
        assert_eq!(err.worker_failure().unwrap().origin(), FailureOrigin::Protocol);
    }

    #[test]
    fn test_stderr_tail_is_bounded() {
        let long = "x".repeat(2000);
        assert_eq!(stderr_tail(long.as_bytes()).len(), STDERR_TAIL_BYTES);
    }
}
