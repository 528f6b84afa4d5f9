//! Mutual exclusion for state shared between tasks.
//!
//! The lock itself is [`futures::lock::Mutex`], re-exported so callers do
//! not depend on the backing crate directly. [`MutexExt::with_lock`] is the
//! scoped form: the guard lives exactly as long as the critical closure and
//! is released on every exit path, a suspended acquisition included, since
//! dropping the future while it waits abandons the queue slot.

use std::future::{Future, poll_fn};
use std::pin::pin;
use std::task::Poll;

pub use futures::lock::{Mutex, MutexGuard};

use crate::context::TaskContext;
use crate::error::{Outcome, TaskError};

/// Scoped lock acquisition for [`Mutex`].
pub trait MutexExt<T> {
    /// Acquires the lock, runs `critical` with exclusive access, and
    /// releases on return.
    ///
    /// Waiting for the lock is a suspension point: a task cancelled while
    /// queued gives up its slot and gets `Err(Cancelled)` without ever
    /// holding the lock.
    fn with_lock<R, F>(
        &self,
        cx: &TaskContext,
        critical: F,
    ) -> impl Future<Output = Outcome<R>> + Send
    where
        R: Send,
        F: FnOnce(&mut T) -> R + Send;
}

impl<T: Send> MutexExt<T> for Mutex<T> {
    async fn with_lock<R, F>(&self, cx: &TaskContext, critical: F) -> Outcome<R>
    where
        R: Send,
        F: FnOnce(&mut T) -> R + Send,
    {
        let mut acquire = pin!(self.lock());
        let mut interrupted = pin!(cx.cancelled());
        let mut guard = poll_fn(|pcx| {
            if interrupted.as_mut().poll(pcx).is_ready() {
                return Poll::Ready(Err(TaskError::Cancelled));
            }
            acquire.as_mut().poll(pcx).map(Ok)
        })
        .await?;
        Ok(critical(&mut guard))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;

    #[test]
    fn with_lock_runs_the_critical_section() {
        let cx = TaskContext::detached();
        let counter = Mutex::new(0);
        let out = block_on(async {
            counter.with_lock(&cx, |n| *n += 1).await?;
            counter.with_lock(&cx, |n| *n).await
        });
        assert_eq!(out, Ok(1));
    }

    #[test]
    fn a_cancelled_waiter_never_gets_the_lock() {
        let cx = TaskContext::detached().child();
        cx.token().cancel();
        let counter = Mutex::new(0);
        let out = block_on(counter.with_lock(&cx, |n| *n += 1));
        assert_eq!(out, Err(TaskError::Cancelled));
        assert_eq!(*block_on(counter.lock()), 0, "the critical section must not have run");
    }
}
