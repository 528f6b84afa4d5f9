//! Execution contexts for task bodies.
//!
//! Every task runs on exactly one [`Dispatcher`], fixed at creation time.
//! Two shared pools cover the common cases (CPU-bound and blocking work), a
//! pinned dispatcher serializes everything submitted to it on one dedicated
//! thread, and [`Dispatcher::Caller`] runs the first poll inline on the
//! launching thread. Code that needs a different context mid-task
//! re-dispatches explicitly with [`relocate`].

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::{Arc, OnceLock};
use std::task::Context;

use futures::FutureExt;
use futures::channel::oneshot;
use futures::executor::{ThreadPool, ThreadPoolBuilder};
use futures::task::noop_waker;

use crate::context::TaskContext;
use crate::error::{Failure, Outcome, TaskError};

static COMPUTE_POOL: OnceLock<ThreadPool> = OnceLock::new();
static BLOCKING_POOL: OnceLock<ThreadPool> = OnceLock::new();

pub(crate) type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

fn compute_pool() -> &'static ThreadPool {
    COMPUTE_POOL.get_or_init(|| {
        let workers = std::thread::available_parallelism().map_or(4, |n| n.get());
        ThreadPoolBuilder::new()
            .pool_size(workers)
            .name_prefix("taskscope-compute-")
            .create()
            .expect("compute pool creation failed")
    })
}

fn blocking_pool() -> &'static ThreadPool {
    BLOCKING_POOL.get_or_init(|| {
        ThreadPoolBuilder::new()
            .pool_size(64)
            .name_prefix("taskscope-blocking-")
            .create()
            .expect("blocking pool creation failed")
    })
}

/// Where a task's future is polled.
#[derive(Clone)]
pub enum Dispatcher {
    /// Shared pool sized near the core count. The default for task bodies.
    Compute,
    /// Large shared pool for work that blocks its thread (file and socket
    /// calls, `std::thread::sleep`, third-party blocking clients).
    Blocking,
    /// First poll runs inline on the launching thread with no hand-off.
    /// If the body suspends, the remainder moves to the compute pool, so
    /// resumption may land on a different worker.
    Caller,
    /// A dedicated single thread; everything submitted to it is serialized.
    /// Useful for confining mutable state without a lock.
    Pinned(Arc<ThreadPool>),
}

impl Dispatcher {
    /// Creates a dispatcher backed by one dedicated thread.
    pub fn pinned(name: &str) -> Self {
        let pool = ThreadPoolBuilder::new()
            .pool_size(1)
            .name_prefix(format!("{name}-"))
            .create()
            .expect("pinned pool creation failed");
        Dispatcher::Pinned(Arc::new(pool))
    }

    pub(crate) fn spawn(&self, mut job: Job) {
        match self {
            Dispatcher::Compute => compute_pool().spawn_ok(job),
            Dispatcher::Blocking => blocking_pool().spawn_ok(job),
            Dispatcher::Pinned(pool) => pool.spawn_ok(job),
            Dispatcher::Caller => {
                // Inline first step. Well-behaved futures re-register their
                // waker on every poll, so handing the remainder to the pool
                // after a throwaway-waker poll loses no wakeups.
                let waker = noop_waker();
                let mut cx = Context::from_waker(&waker);
                if job.as_mut().poll(&mut cx).is_pending() {
                    compute_pool().spawn_ok(job);
                }
            }
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Dispatcher::Compute => f.write_str("Compute"),
            Dispatcher::Blocking => f.write_str("Blocking"),
            Dispatcher::Caller => f.write_str("Caller"),
            Dispatcher::Pinned(_) => f.write_str("Pinned"),
        }
    }
}

/// Runs `body` on `target`, suspending the caller until it finishes, then
/// resumes the caller on its original context with the body's outcome.
///
/// The block receives a [`TaskContext`] whose cancellation is linked to the
/// caller's, so cancelling the surrounding task reaches into the relocated
/// block. A panic inside the block surfaces as `Err(Failed)` rather than
/// poisoning the target pool.
pub async fn relocate<T, F, Fut>(cx: &TaskContext, target: Dispatcher, body: F) -> Outcome<T>
where
    T: Send + 'static,
    F: FnOnce(TaskContext) -> Fut,
    Fut: Future<Output = Outcome<T>> + Send + 'static,
{
    let sub = cx.child_on(target.clone());
    let fut = body(sub);

    if matches!(target, Dispatcher::Caller) {
        return match AssertUnwindSafe(fut).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(payload) => Err(TaskError::Failed(Failure::from_panic(payload))),
        };
    }

    let (tx, rx) = oneshot::channel();
    target.spawn(Box::pin(async move {
        let outcome = match AssertUnwindSafe(fut).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(payload) => Err(TaskError::Failed(Failure::from_panic(payload))),
        };
        let _ = tx.send(outcome);
    }));

    match rx.await {
        Ok(outcome) => outcome,
        // The target pool dropped the job without running it to completion.
        Err(oneshot::Canceled) => Err(TaskError::Cancelled),
    }
}
