//! Timers and deadline-bounded execution.
//!
//! [`Sleep`] parks a thread from a dedicated timer pool until its due
//! instant and then wakes the waiting task, so it works under any executor.
//! [`timeout`] races a block against a deadline and cancels the loser.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, OnceLock};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use futures::executor::{ThreadPool, ThreadPoolBuilder};
use futures::task::AtomicWaker;
use pin_project_lite::pin_project;

use crate::cancel::CancelToken;
use crate::context::TaskContext;
use crate::error::{Outcome, TaskError};

static TIMER_POOL: OnceLock<ThreadPool> = OnceLock::new();

fn timer_pool() -> &'static ThreadPool {
    TIMER_POOL.get_or_init(|| {
        ThreadPoolBuilder::new()
            .pool_size(32)
            .name_prefix("taskscope-timer-")
            .create()
            .expect("timer pool creation failed")
    })
}

/// A future that completes once its due instant has passed.
///
/// The countdown starts at construction. Not cancellable on its own; for a
/// sleep that reacts to cancellation use [`TaskContext::sleep`].
#[must_use = "futures do nothing unless polled or .awaited"]
pub struct Sleep {
    due: Instant,
    waker: Arc<AtomicWaker>,
    scheduled: bool,
}

impl Unpin for Sleep {}

/// Suspends for `duration`.
pub fn sleep(duration: Duration) -> Sleep {
    Sleep {
        due: Instant::now() + duration,
        waker: Arc::new(AtomicWaker::new()),
        scheduled: false,
    }
}

impl Future for Sleep {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if Instant::now() >= this.due {
            return Poll::Ready(());
        }
        this.waker.register(cx.waker());
        if !this.scheduled {
            this.scheduled = true;
            let due = this.due;
            let waker = Arc::clone(&this.waker);
            timer_pool().spawn_ok(async move {
                let now = Instant::now();
                if due > now {
                    std::thread::sleep(due - now);
                }
                waker.wake();
            });
        }
        Poll::Pending
    }
}

pin_project! {
    /// A future bounded by a deadline; returned by [`timeout`].
    ///
    /// Polls the wrapped block until either it completes or the deadline
    /// fires. When the deadline wins, the block's cancellation token is
    /// tripped and polling continues until the block observes it and winds
    /// down, so no work is orphaned.
    #[must_use = "futures do nothing unless polled or .awaited"]
    pub struct Deadline<F> {
        #[pin]
        future: F,
        timer: Sleep,
        limit: Duration,
        token: CancelToken,
        fired: bool,
    }
}

impl<T, F> Future for Deadline<F>
where
    F: Future<Output = Outcome<T>>,
{
    type Output = Outcome<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        if let Poll::Ready(outcome) = this.future.poll(cx) {
            // A deadline that fired wins even if the block limped to an
            // answer afterwards.
            return Poll::Ready(if *this.fired {
                Err(TaskError::TimedOut(*this.limit))
            } else {
                outcome
            });
        }
        if !*this.fired && Pin::new(this.timer).poll(cx).is_ready() {
            *this.fired = true;
            this.token.cancel();
        }
        Poll::Pending
    }
}

/// Runs `body` under a deadline.
///
/// The block gets a child context; when the deadline fires its token is
/// cancelled and the elapsed limit is reported as `Err(TimedOut)` at the
/// call site. A body that never suspends and never checkpoints cannot be
/// interrupted and simply runs past the deadline before the error is
/// reported.
pub fn timeout<T, F, Fut>(cx: &TaskContext, limit: Duration, body: F) -> Deadline<Fut>
where
    F: FnOnce(TaskContext) -> Fut,
    Fut: Future<Output = Outcome<T>>,
{
    let sub = cx.child();
    let token = sub.token().clone();
    Deadline { future: body(sub), timer: sleep(limit), limit, token, fired: false }
}

/// Like [`timeout`], but an elapsed deadline yields `Ok(None)` instead of
/// an error. Other failures pass through unchanged.
pub async fn timeout_or_none<T, F, Fut>(
    cx: &TaskContext,
    limit: Duration,
    body: F,
) -> Outcome<Option<T>>
where
    F: FnOnce(TaskContext) -> Fut,
    Fut: Future<Output = Outcome<T>>,
{
    match timeout(cx, limit, body).await {
        Ok(value) => Ok(Some(value)),
        Err(TaskError::TimedOut(_)) => Ok(None),
        Err(other) => Err(other),
    }
}
