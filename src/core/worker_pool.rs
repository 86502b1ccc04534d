//! Worker pools that execute offloaded work away from the scheduler thread.
//!
//! Two pool flavours exist:
//!
//! - [`ThreadPool`]: dedicated OS threads, each with its own single-threaded
//!   tokio runtime, fed FIFO through a bounded channel.
//! - [`ProcessPool`]: one OS process per job, spawned lazily, with
//!   concurrency bounded by a fair semaphore.
//!
//! Both pools share the same admission control: at most `max_concurrency`
//! items execute, at most `max_queue_depth` more wait, and everything beyond
//! that is rejected with `GateError::CapacityExceeded`.

mod process;
mod thread;

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

use crate::core::GateError;

pub use process::ProcessPool;
pub use thread::ThreadPool;

pub(crate) use process::JobCompletion;
pub(crate) use thread::ThreadTask;

/// Statistics about pool utilization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    /// Maximum number of concurrently executing items.
    pub max_concurrency: usize,

    /// Admitted items that have not finished yet (executing plus queued).
    pub in_flight: usize,

    /// Items waiting for a free worker.
    pub queued: usize,

    /// Items currently executing.
    pub active: u64,

    /// Total items admitted.
    pub submitted: u64,

    /// Total items that completed successfully.
    pub completed: u64,

    /// Total items that failed.
    pub failed: u64,

    /// Total items that were cancelled or timed out before completing.
    pub cancelled: u64,

    /// Total submissions rejected for capacity or shutdown.
    pub rejected: u64,
}

/// How an item left a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TaskOutcome {
    Completed,
    Failed,
    Cancelled,
}

impl TaskOutcome {
    pub(crate) fn of<T>(result: &Result<T, GateError>) -> Self {
        match result {
            Ok(_) => Self::Completed,
            Err(GateError::Cancelled | GateError::Timeout(_)) => Self::Cancelled,
            Err(_) => Self::Failed,
        }
    }
}

/// Internal counters for pool statistics (thread-safe).
#[derive(Debug, Default)]
pub(crate) struct PoolCounters {
    pub active: AtomicU64,
    pub submitted: AtomicU64,
    pub completed: AtomicU64,
    pub failed: AtomicU64,
    pub cancelled: AtomicU64,
    pub rejected: AtomicU64,
}

impl PoolCounters {
    pub fn record(&self, outcome: TaskOutcome) {
        let counter = match outcome {
            TaskOutcome::Completed => &self.completed,
            TaskOutcome::Failed => &self.failed,
            TaskOutcome::Cancelled => &self.cancelled,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a snapshot of current statistics.
    pub fn snapshot(&self, admission: &Admission) -> PoolStats {
        PoolStats {
            max_concurrency: admission.max_concurrency,
            in_flight: admission.in_flight(),
            queued: admission.queued(),
            active: self.active.load(Ordering::Relaxed),
            submitted: self.submitted.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }
}

/// Admission control shared by both pool flavours.
///
/// Counts admitted items with a CAS loop so the limit is never overshot,
/// and signals waiters when the pool drains to zero.
#[derive(Debug)]
pub(crate) struct Admission {
    in_flight: AtomicUsize,
    max_concurrency: usize,
    limit: usize,
    closed: AtomicBool,
    idle: Notify,
}

impl Admission {
    pub fn new(max_concurrency: usize, max_queue_depth: usize) -> Self {
        Self {
            in_flight: AtomicUsize::new(0),
            max_concurrency,
            limit: max_concurrency + max_queue_depth,
            closed: AtomicBool::new(false),
            idle: Notify::new(),
        }
    }

    /// Reserve a slot, or fail if the pool is closed or full.
    pub fn try_admit(self: &Arc<Self>) -> Result<AdmissionPermit, GateError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(GateError::ShutDown);
        }
        let mut current = self.in_flight.load(Ordering::Acquire);
        loop {
            if current >= self.limit {
                return Err(GateError::CapacityExceeded { limit: self.limit });
            }
            match self.in_flight.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    return Ok(AdmissionPermit {
                        admission: Arc::clone(self),
                        queued: current >= self.max_concurrency,
                    })
                }
                Err(actual) => current = actual,
            }
        }
    }

    fn release(&self) {
        if self.in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.idle.notify_waiters();
        }
    }

    /// Stop admitting new items.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn queued(&self) -> usize {
        self.in_flight().saturating_sub(self.max_concurrency)
    }

    /// Wait until every admitted item has released its slot.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.in_flight() == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// A reserved pool slot, released when dropped.
#[derive(Debug)]
pub(crate) struct AdmissionPermit {
    admission: Arc<Admission>,
    queued: bool,
}

impl AdmissionPermit {
    /// Whether the pool was at capacity when this slot was reserved.
    pub const fn queued(&self) -> bool {
        self.queued
    }
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        self.admission.release();
    }
}

/// Lifecycle surface shared by the pool flavours.
#[async_trait]
pub trait OffloadPool: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Current utilization snapshot.
    fn stats(&self) -> PoolStats;

    /// Stop accepting work. With `drain`, wait for in-flight items before
    /// releasing workers; otherwise release them immediately.
    async fn shutdown(&self, drain: bool);
}
