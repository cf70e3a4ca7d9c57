//! Cancellation token support for pipeline runs
//!
//! A [`CancellationToken`] carries a cooperative cancellation signal through
//! the engine and into handlers. The engine checks it between nodes;
//! long-running handlers (HTTP, sleep, exec, model calls) race their I/O
//! against [`CancellationToken::cancelled`] with `tokio::select!`.
//!
//! Tokens form a parent chain: a child created with
//! [`CancellationToken::child_token`] observes its parent's cancellation as
//! well as its own, which lets the CLI derive a deadline token from the run
//! token without the two interfering.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

/// A cloneable token that signals cancellation across async operations.
#[derive(Clone)]
pub struct CancellationToken {
    inner: Arc<TokenInner>,
}

struct TokenInner {
    cancelled: AtomicBool,
    notify: Notify,
    parent: Option<CancellationToken>,
}

impl CancellationToken {
    /// Create a new, uncancelled token.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(TokenInner {
                cancelled: AtomicBool::new(false),
                notify: Notify::new(),
                parent: None,
            }),
        }
    }

    /// Create a child token that is cancelled when either it or any
    /// ancestor is cancelled.
    pub fn child_token(&self) -> Self {
        Self {
            inner: Arc::new(TokenInner {
                cancelled: AtomicBool::new(false),
                notify: Notify::new(),
                parent: Some(self.clone()),
            }),
        }
    }

    /// Signal cancellation. Idempotent.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::Release);
        self.inner.notify.notify_waiters();
    }

    /// True if this token or any ancestor has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        if self.inner.cancelled.load(Ordering::Acquire) {
            return true;
        }
        match &self.inner.parent {
            Some(parent) => parent.is_cancelled(),
            None => false,
        }
    }

    /// Resolve when cancellation is requested on this token or an ancestor.
    ///
    /// Intended for `tokio::select!`:
    ///
    /// ```rust,ignore
    /// tokio::select! {
    ///     result = do_io() => handle(result),
    ///     _ = token.cancelled() => return Err(cancelled_error()),
    /// }
    /// ```
    pub async fn cancelled(&self) {
        loop {
            if self.is_cancelled() {
                return;
            }
            let notified = self.inner.notify.notified();
            // Re-check after registering so a cancel between the check and
            // the registration is not missed.
            if self.is_cancelled() {
                return;
            }
            match &self.inner.parent {
                Some(parent) => {
                    tokio::select! {
                        _ = notified => {}
                        _ = Box::pin(parent.cancelled()) => return,
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Spawn a background task that cancels this token after `deadline`.
    ///
    /// Used by the CLI to implement a total wall-clock timeout on a run.
    pub fn cancel_after(&self, deadline: Duration) {
        let token = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(deadline).await;
            token.cancel();
        });
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .field("has_parent", &self.inner.parent.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_sets_flag() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
        token.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_child_observes_parent() {
        let parent = CancellationToken::new();
        let child = parent.child_token();
        parent.cancel();
        assert!(child.is_cancelled());
        assert!(parent.is_cancelled());
    }

    #[test]
    fn test_child_does_not_cancel_parent() {
        let parent = CancellationToken::new();
        let child = parent.child_token();
        child.cancel();
        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancelled_future_resolves() {
        let token = CancellationToken::new();
        let waiter = token.clone();
        let handle = tokio::spawn(async move {
            waiter.cancelled().await;
            true
        });
        token.cancel();
        assert!(handle.await.unwrap());
    }

    #[tokio::test]
    async fn test_cancelled_future_observes_parent() {
        let parent = CancellationToken::new();
        let child = parent.child_token();
        let handle = tokio::spawn(async move {
            child.cancelled().await;
            true
        });
        parent.cancel();
        assert!(handle.await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_after_deadline() {
        let token = CancellationToken::new();
        token.cancel_after(Duration::from_secs(5));
        assert!(!token.is_cancelled());
        tokio::time::sleep(Duration::from_secs(6)).await;
        // Yield so the deadline task runs.
        tokio::task::yield_now().await;
        assert!(token.is_cancelled());
    }
}
