//! Awaitable handles for dispatched work items.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::warn;

use crate::core::{CancelToken, GateError, WorkId};

/// Absolute deadline of a work item, remembering the configured timeout.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Deadline {
    at: Instant,
    after: Duration,
}

impl Deadline {
    /// `None` when `timeout` reaches past the clock's range, i.e. never.
    pub fn after(timeout: Duration) -> Option<Self> {
        Instant::now().checked_add(timeout).map(|at| Self {
            at,
            after: timeout,
        })
    }
}

/// Resolves once `deadline` passes; never resolves without one.
pub(crate) async fn expire(deadline: Option<Deadline>) -> Duration {
    match deadline {
        Some(deadline) => {
            tokio::time::sleep_until(deadline.at).await;
            deadline.after
        }
        None => std::future::pending().await,
    }
}

/// Handle to a dispatched work item.
///
/// Awaiting the handle suspends the calling task until the item yields
/// exactly one of its result or an error. Dropping a handle before it
/// resolves cancels the item.
#[must_use = "dropping a WorkHandle cancels the work item"]
pub struct WorkHandle<T> {
    id: WorkId,
    cancel: Option<CancelToken>,
    finished: bool,
    fut: BoxFuture<'static, Result<T, GateError>>,
}

impl<T: Send + 'static> WorkHandle<T> {
    /// A handle whose result is already known.
    pub(crate) fn ready(id: WorkId, result: Result<T, GateError>) -> Self {
        Self {
            id,
            cancel: None,
            finished: false,
            fut: futures::future::ready(result).boxed(),
        }
    }

    /// A handle driving `fut` on the awaiting task.
    pub(crate) fn local(
        id: WorkId,
        cancel: CancelToken,
        fut: BoxFuture<'static, Result<T, GateError>>,
    ) -> Self {
        Self {
            id,
            cancel: Some(cancel),
            finished: false,
            fut,
        }
    }

    /// A handle waiting for a worker to deliver the result.
    pub(crate) fn remote(
        id: WorkId,
        rx: oneshot::Receiver<Result<T, GateError>>,
        cancel: CancelToken,
        deadline: Option<Deadline>,
    ) -> Self {
        let token = cancel.clone();
        let fut = async move {
            tokio::select! {
                biased;
                // A worker that drops the sender without answering was shut down.
                delivered = rx => delivered.unwrap_or(Err(GateError::Cancelled)),
                () = token.cancelled() => Err(GateError::Cancelled),
                after = expire(deadline) => {
                    token.cancel();
                    warn!(work_id = %id, timeout = ?after, "work item timed out");
                    Err(GateError::Timeout(after))
                }
            }
        }
        .boxed();
        Self::local(id, cancel, fut)
    }
}

impl<T> WorkHandle<T> {
    /// Identifier of the work item.
    #[must_use]
    pub const fn id(&self) -> WorkId {
        self.id
    }

    /// Request cancellation of the work item (best-effort).
    pub fn cancel(&self) {
        if let Some(token) = &self.cancel {
            token.cancel();
        }
    }
}

impl<T> Future for WorkHandle<T> {
    type Output = Result<T, GateError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let poll = this.fut.as_mut().poll(cx);
        if poll.is_ready() {
            this.finished = true;
        }
        poll
    }
}

impl<T> Drop for WorkHandle<T> {
    fn drop(&mut self) {
        if !self.finished {
            self.cancel();
        }
    }
}

impl<T> std::fmt::Debug for WorkHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkHandle")
            .field("id", &self.id)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_remote_delivers_result() {
        let (tx, rx) = oneshot::channel();
        let handle = WorkHandle::remote(WorkId::new(), rx, CancelToken::new(), None);
        tx.send(Ok(5_u32)).unwrap();
        assert_eq!(handle.await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_remote_times_out_and_cancels() {
        let (_tx, rx) = oneshot::channel::<Result<u32, GateError>>();
        let token = CancelToken::new();
        let handle = WorkHandle::remote(
            WorkId::new(),
            rx,
            token.clone(),
            Deadline::after(Duration::from_millis(20)),
        );
        assert!(matches!(handle.await, Err(GateError::Timeout(_))));
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_dropped_sender_reports_cancelled() {
        let (tx, rx) = oneshot::channel::<Result<u32, GateError>>();
        drop(tx);
        let handle = WorkHandle::remote(WorkId::new(), rx, CancelToken::new(), None);
        assert!(matches!(handle.await, Err(GateError::Cancelled)));
    }

    #[test]
    fn test_unbounded_timeout_has_no_deadline() {
        assert!(Deadline::after(Duration::MAX).is_none());
        assert!(Deadline::after(Duration::from_secs(1)).is_some());
    }

    #[test]
    fn test_drop_before_completion_cancels() {
        let (_tx, rx) = oneshot::channel::<Result<u32, GateError>>();
        let token = CancelToken::new();
        let handle = WorkHandle::remote(WorkId::new(), rx, token.clone(), None);
        drop(handle);
        assert!(token.is_cancelled());
    }
}
