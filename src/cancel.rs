//! Hierarchical, cooperative cancellation.
//!
//! A [`CancelToken`] is a monotonic flag shared between the code that may
//! request cancellation and the task that is expected to observe it.
//! Tokens form a tree: cancelling a token cancels every descendant,
//! depth-first, before the call returns. The flag is advisory: a task only
//! stops at an explicit [`checkpoint`](CancelToken::checkpoint) or while
//! suspended on a primitive that watches the token. A loop that neither
//! suspends nor checks runs to completion regardless of pending requests;
//! that is the documented cost of the cooperative model, not a defect.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::task::{Context, Poll, Waker};

use crate::error::{Outcome, TaskError};

#[derive(Default)]
struct Inner {
    cancelled: AtomicBool,
    watchers: Mutex<Vec<Waker>>,
    children: Mutex<Vec<Weak<Inner>>>,
}

fn cancel_inner(inner: &Inner) {
    if inner.cancelled.swap(true, Ordering::SeqCst) {
        return;
    }
    for waker in inner.watchers.lock().expect("cancel watcher lock poisoned").drain(..) {
        waker.wake();
    }
    let children: Vec<_> = inner
        .children
        .lock()
        .expect("cancel child lock poisoned")
        .drain(..)
        .collect();
    for child in children {
        if let Some(child) = child.upgrade() {
            cancel_inner(&child);
        }
    }
}

/// A cancellation flag, linkable into a parent/child tree.
///
/// Cloning a token shares the same flag; use [`child`](CancelToken::child)
/// to derive a new flag that is cancelled whenever this one is.
#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

impl CancelToken {
    /// A fresh token with no parent.
    pub fn root() -> Self {
        CancelToken::default()
    }

    /// Derives a token cancelled whenever `self` is. Cancelling the child
    /// leaves the parent untouched.
    pub fn child(&self) -> Self {
        let child = Arc::new(Inner::default());
        self.inner
            .children
            .lock()
            .expect("cancel child lock poisoned")
            .push(Arc::downgrade(&child));
        // The parent may have been cancelled between the flag becoming set
        // and our registration landing; re-check so the child cannot miss it.
        if self.inner.cancelled.load(Ordering::SeqCst) {
            cancel_inner(&child);
        }
        CancelToken { inner: child }
    }

    /// Requests cancellation of this token and every descendant.
    /// Idempotent; the flag never clears once set.
    pub fn cancel(&self) {
        cancel_inner(&self.inner);
    }

    /// Advisory poll. The only way a pure-compute loop becomes cancellable
    /// is to call this (or [`checkpoint`](CancelToken::checkpoint)) at its
    /// loop boundary.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Liveness check: `Err(Cancelled)` once cancellation was requested.
    pub fn checkpoint(&self) -> Outcome<()> {
        if self.is_cancelled() {
            Err(TaskError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Resolves when cancellation is requested. Suspension-based waits race
    /// against this to observe cancellation within one suspension-point
    /// latency.
    pub fn cancelled(&self) -> CancelledFut<'_> {
        CancelledFut { token: self }
    }

    /// Registers a waker to be woken on cancellation. Used by suspending
    /// primitives that park on something else as well.
    pub(crate) fn register(&self, waker: &Waker) {
        if self.is_cancelled() {
            waker.wake_by_ref();
            return;
        }
        let mut watchers = self.inner.watchers.lock().expect("cancel watcher lock poisoned");
        if !watchers.iter().any(|w| w.will_wake(waker)) {
            watchers.push(waker.clone());
        }
    }
}

/// Future returned by [`CancelToken::cancelled`].
#[must_use = "futures do nothing unless polled or .awaited"]
pub struct CancelledFut<'a> {
    token: &'a CancelToken,
}

impl Future for CancelledFut<'_> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.token.is_cancelled() {
            Poll::Ready(())
        } else {
            self.token.register(cx.waker());
            Poll::Pending
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_is_monotonic_and_idempotent() {
        let token = CancelToken::root();
        assert!(!token.is_cancelled());
        token.cancel();
        token.cancel();
        assert!(token.is_cancelled());
        assert_eq!(token.checkpoint(), Err(TaskError::Cancelled));
    }

    #[test]
    fn cancel_cascades_to_descendants() {
        let root = CancelToken::root();
        let child = root.child();
        let grandchild = child.child();
        root.cancel();
        assert!(child.is_cancelled());
        assert!(grandchild.is_cancelled());
    }

    #[test]
    fn cancelling_a_child_leaves_the_parent_alone() {
        let root = CancelToken::root();
        let child = root.child();
        child.cancel();
        assert!(child.is_cancelled());
        assert!(!root.is_cancelled());
    }

    #[test]
    fn child_of_cancelled_parent_is_born_cancelled() {
        let root = CancelToken::root();
        root.cancel();
        assert!(root.child().is_cancelled());
    }

    #[test]
    fn cancelled_future_resolves() {
        let token = CancelToken::root();
        token.cancel();
        futures::executor::block_on(token.cancelled());
    }
}
