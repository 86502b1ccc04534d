//! Cooperative cancellation tokens.
//!
//! A token is a shared flag plus a wake-up signal. Tokens form a tree:
//! cancelling a token cancels every token linked below it. The gate links
//! each dispatched item below its root token, and below the caller's token
//! and batch token when those are present.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::Notify;

#[derive(Default)]
struct TokenState {
    cancelled: AtomicBool,
    notify: Notify,
    children: Mutex<Vec<Weak<TokenState>>>,
}

/// Cloneable cancellation token.
///
/// Clones share state: cancelling one clone cancels them all.
#[derive(Clone, Default)]
pub struct CancelToken {
    state: Arc<TokenState>,
}

impl CancelToken {
    /// Create a token that is not cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel this token and every token linked below it.
    pub fn cancel(&self) {
        let mut pending = vec![Arc::clone(&self.state)];
        while let Some(state) = pending.pop() {
            if state.cancelled.swap(true, Ordering::AcqRel) {
                continue;
            }
            state.notify.notify_waiters();
            let children = std::mem::take(&mut *state.children.lock());
            pending.extend(children.iter().filter_map(Weak::upgrade));
        }
    }

    /// Whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::Acquire)
    }

    /// Wait until the token is cancelled.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.state.notify.notified();
            tokio::pin!(notified);
            // Register before checking the flag so a concurrent cancel is not missed.
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }

    /// Create a new token that is cancelled whenever this one is.
    #[must_use]
    pub fn child_token(&self) -> Self {
        let child = Self::new();
        self.link(&child);
        child
    }

    /// Link `child` below this token.
    ///
    /// If this token is already cancelled, `child` is cancelled immediately.
    pub(crate) fn link(&self, child: &Self) {
        let mut children = self.state.children.lock();
        if self.is_cancelled() {
            drop(children);
            child.cancel();
            return;
        }
        children.retain(|c| c.strong_count() > 0);
        children.push(Arc::downgrade(&child.state));
    }
}

impl fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
