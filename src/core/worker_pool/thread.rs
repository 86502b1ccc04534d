//! Thread worker pool: dedicated OS threads with their own runtimes.
//!
//! Each worker thread owns a single-threaded tokio runtime so offloaded
//! futures can be driven to completion without touching the caller's
//! scheduler.
//!
//! # Design Principles
//!
//! - **No polling**: workers block on the channel; results travel back
//!   through oneshot channels owned by the gate
//! - **Panic isolation**: a panicking item never takes its worker down
//! - **Clean shutdown**: dropping the sender unblocks idle workers naturally

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use async_trait::async_trait;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use tokio::runtime::Runtime;
use tracing::{debug, error, info, warn};

use crate::core::{GateError, WorkId};
use crate::util::panic_message;

use super::{Admission, AdmissionPermit, OffloadPool, PoolCounters, PoolStats, TaskOutcome};

/// An admitted item waiting for a worker thread.
///
/// `run` delivers the item's result to its caller and reports how the item
/// ended. The permit is released once the worker is done with the item.
pub(crate) struct ThreadTask {
    pub id: WorkId,
    pub permit: AdmissionPermit,
    pub run: Box<dyn FnOnce(&Runtime) -> TaskOutcome + Send>,
}

/// Worker pool with dedicated OS threads.
pub struct ThreadPool {
    worker_count: usize,
    join_timeout: Duration,

    /// Task sender (to workers). Option allows clean shutdown by dropping.
    task_tx: Mutex<Option<Sender<ThreadTask>>>,

    admission: Arc<Admission>,
    counters: Arc<PoolCounters>,
    shutdown: AtomicBool,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl ThreadPool {
    /// Spawn `worker_count` threads, each with its own runtime.
    pub(crate) fn new(
        worker_count: usize,
        max_queue_depth: usize,
        stack_size: usize,
        join_timeout: Duration,
    ) -> Result<Self, GateError> {
        let admission = Arc::new(Admission::new(worker_count, max_queue_depth));
        let counters = Arc::new(PoolCounters::default());
        let (task_tx, task_rx) = bounded::<ThreadTask>(worker_count + max_queue_depth);

        let mut workers = Vec::with_capacity(worker_count);
        for worker_id in 0..worker_count {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .map_err(|e| GateError::Internal(format!("worker runtime: {e}")))?;
            let worker = spawn_worker(
                worker_id,
                task_rx.clone(),
                Arc::clone(&counters),
                rt,
                stack_size,
            )
            .map_err(|e| GateError::Internal(format!("spawning worker thread: {e}")))?;
            workers.push(worker);
        }

        info!(
            worker_count,
            max_queue_depth, "thread pool initialized with dedicated OS threads"
        );

        Ok(Self {
            worker_count,
            join_timeout,
            task_tx: Mutex::new(Some(task_tx)),
            admission,
            counters,
            shutdown: AtomicBool::new(false),
            workers: Mutex::new(workers),
        })
    }

    /// Number of worker threads.
    #[must_use]
    pub const fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Reserve a slot for one item.
    pub(crate) fn admit(&self) -> Result<AdmissionPermit, GateError> {
        self.admission.try_admit().map_err(|e| {
            self.counters.rejected.fetch_add(1, Ordering::Relaxed);
            e
        })
    }

    /// Hand an admitted item to the workers (non-blocking).
    pub(crate) fn submit(&self, task: ThreadTask) -> Result<(), GateError> {
        let id = task.id;
        let task_tx = self.task_tx.lock();
        let Some(sender) = task_tx.as_ref() else {
            return Err(GateError::ShutDown);
        };

        match sender.try_send(task) {
            Ok(()) => {
                self.counters.submitted.fetch_add(1, Ordering::Relaxed);
                debug!(work_id = %id, "item submitted to thread pool");
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                warn!(work_id = %id, "thread pool queue is full");
                Err(GateError::CapacityExceeded {
                    limit: sender.capacity().unwrap_or(self.worker_count),
                })
            }
            Err(TrySendError::Disconnected(_)) => Err(GateError::ShutDown),
        }
    }
}

#[async_trait]
impl OffloadPool for ThreadPool {
    fn name(&self) -> &'static str {
        "thread"
    }

    fn stats(&self) -> PoolStats {
        self.counters.snapshot(&self.admission)
    }

    async fn shutdown(&self, drain: bool) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        info!(drain, "shutting down thread pool");
        self.admission.close();

        if drain {
            self.admission.wait_idle().await;
        }

        // Dropping the sender unblocks idle workers.
        self.task_tx.lock().take();
        let workers = std::mem::take(&mut *self.workers.lock());
        let worker_count = workers.len();

        if drain {
            let timeout = self.join_timeout;
            if let Err(e) = tokio::task::spawn_blocking(move || join_workers(workers, timeout)).await {
                warn!(error = %e, "joining worker threads failed");
            }
        } else {
            debug!(worker_count, "detaching worker threads");
        }

        info!(worker_count, "thread pool shut down complete");
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        // Signal shutdown but don't join; explicit shutdown() is required for that.
        if !self.shutdown.swap(true, Ordering::AcqRel) {
            self.admission.close();
            self.task_tx.lock().take();
            debug!("thread pool dropped without explicit shutdown - workers will be detached");
        }
    }
}

/// Join workers, giving each `timeout` to exit before it is detached.
fn join_workers(workers: Vec<JoinHandle<()>>, timeout: Duration) {
    for (worker_id, worker) in workers.into_iter().enumerate() {
        let (tx, rx) = bounded(1);
        let joiner = thread::spawn(move || {
            let _ = tx.send(worker.join().is_ok());
        });

        match rx.recv_timeout(timeout) {
            Ok(true) => debug!(worker_id, "worker joined successfully"),
            Ok(false) => warn!(worker_id, "worker panicked"),
            Err(_) => {
                warn!(worker_id, "worker did not exit within timeout - detaching");
                continue;
            }
        }
        let _ = joiner.join();
    }
}

fn spawn_worker(
    worker_id: usize,
    task_rx: Receiver<ThreadTask>,
    counters: Arc<PoolCounters>,
    rt: Runtime,
    stack_size: usize,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(format!("offload-worker-{worker_id}"))
        .stack_size(stack_size)
        .spawn(move || {
            debug!(worker_id, "worker thread started");

            // Ends once every sender is dropped and the queue is empty.
            for task in &task_rx {
                let ThreadTask { id, permit, run } = task;
                counters.active.fetch_add(1, Ordering::Relaxed);
                debug!(worker_id, work_id = %id, "worker executing item");

                let outcome = match panic::catch_unwind(AssertUnwindSafe(|| run(&rt))) {
                    Ok(outcome) => outcome,
                    Err(payload) => {
                        error!(
                            worker_id,
                            work_id = %id,
                            panic = %panic_message(payload.as_ref()),
                            "item escaped panic isolation"
                        );
                        TaskOutcome::Failed
                    }
                };

                counters.active.fetch_sub(1, Ordering::Relaxed);
                counters.record(outcome);
                drop(permit);
                debug!(worker_id, work_id = %id, ?outcome, "worker finished item");
            }

            debug!(worker_id, "worker thread exiting");
        })
}
