//! Lifecycle events for work items.
//!
//! Every state transition of a work item can be recorded to an
//! [`AuditSink`]. The in-memory sink keeps a bounded buffer for tests and
//! development.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::{GateError, Route, WorkId};
use crate::util::clock::now_ms;

/// States a work item passes through.
///
/// `Submitted -> {InlineExecuting | Queued} -> Executing -> {Completed | Failed | Cancelled}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkState {
    /// Accepted by the gate.
    Submitted,
    /// Running on the calling task.
    InlineExecuting,
    /// Waiting for a free worker.
    Queued,
    /// Running on a worker, or awaited natively.
    Executing,
    /// Finished with a result.
    Completed,
    /// Finished with an error.
    Failed,
    /// Cancelled or timed out before completing.
    Cancelled,
}

impl WorkState {
    /// Whether no further transitions follow.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Audit event structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Related work item.
    pub work_id: WorkId,
    /// Caller-supplied label, if any.
    pub label: Option<String>,
    /// Where the item was routed.
    pub route: Route,
    /// State entered.
    pub state: WorkState,
    /// Additional context (failure message, cancellation reason).
    pub detail: Option<String>,
    /// Timestamp milliseconds.
    pub created_at_ms: u128,
}

/// Audit sink abstraction.
pub trait AuditSink: Send + Sync {
    /// Record an audit event.
    fn record(&self, event: AuditEvent);
}

/// In-memory audit sink for testing and dev.
///
/// Clones share the same buffer, so a test can keep one clone and hand
/// another to the gate.
#[derive(Clone)]
pub struct InMemoryAuditSink {
    events: Arc<Mutex<VecDeque<AuditEvent>>>,
    max_events: usize,
}

impl InMemoryAuditSink {
    /// Create a new in-memory sink with a bounded buffer.
    #[must_use]
    pub fn new(max_events: usize) -> Self {
        Self {
            events: Arc::new(Mutex::new(VecDeque::with_capacity(max_events))),
            max_events,
        }
    }

    /// Retrieve a snapshot of stored events.
    #[must_use]
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().iter().cloned().collect()
    }

    /// States recorded for one item, in order.
    #[must_use]
    pub fn states_of(&self, work_id: WorkId) -> Vec<WorkState> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.work_id == work_id)
            .map(|e| e.state)
            .collect()
    }
}

impl AuditSink for InMemoryAuditSink {
    fn record(&self, event: AuditEvent) {
        let mut events = self.events.lock();
        if events.len() >= self.max_events {
            events.pop_front();
        }
        events.push_back(event);
    }
}

/// Helper to build an audit event stamped with the current time.
pub fn build_audit_event(
    work_id: WorkId,
    label: Option<String>,
    route: Route,
    state: WorkState,
    detail: Option<String>,
) -> AuditEvent {
    AuditEvent {
        work_id,
        label,
        route,
        state,
        detail,
        created_at_ms: now_ms(),
    }
}

/// Per-item recorder: logs every transition and forwards it to the sink.
#[derive(Clone)]
pub(crate) struct ItemTrace {
    id: WorkId,
    label: Option<Arc<str>>,
    route: Route,
    sink: Option<Arc<dyn AuditSink>>,
}

impl ItemTrace {
    pub fn new(
        id: WorkId,
        label: Option<String>,
        route: Route,
        sink: Option<Arc<dyn AuditSink>>,
    ) -> Self {
        Self {
            id,
            label: label.map(Arc::from),
            route,
            sink,
        }
    }

    pub fn record(&self, state: WorkState, detail: Option<String>) {
        debug!(
            work_id = %self.id,
            label = self.label.as_deref().unwrap_or(""),
            route = %self.route,
            ?state,
            "work item transition"
        );
        if let Some(sink) = &self.sink {
            sink.record(build_audit_event(
                self.id,
                self.label.as_deref().map(str::to_owned),
                self.route,
                state,
                detail,
            ));
        }
    }

    /// Record the terminal state matching `result`.
    pub fn finish<T>(&self, result: &Result<T, GateError>) {
        match result {
            Ok(_) => self.record(WorkState::Completed, None),
            Err(e @ (GateError::Cancelled | GateError::Timeout(_))) => {
                self.record(WorkState::Cancelled, Some(e.to_string()));
            }
            Err(e) => self.record(WorkState::Failed, Some(e.to_string())),
        }
    }
}
