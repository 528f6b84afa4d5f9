//! Per-task configuration and the context handed to task bodies.
//!
//! Configuration is an explicit record merged down the scope tree with
//! child-overrides-parent precedence; there is no ambient lookup. A task
//! body receives a [`TaskContext`] carrying the resolved name, dispatcher,
//! and cancellation linkage, and everything cancellable goes through it.

use std::future::{Future, poll_fn};
use std::pin::pin;
use std::sync::Arc;
use std::task::Poll;
use std::time::Duration;

use crate::cancel::{CancelToken, CancelledFut};
use crate::dispatch::Dispatcher;
use crate::error::Outcome;
use crate::scope::Supervision;
use crate::time;

/// Orthogonal per-task attributes, combined by [`merge`](TaskConfig::merge).
///
/// Unset fields inherit from the enclosing scope; the scope's own defaults
/// are a generated name, the compute dispatcher, and propagating
/// supervision.
#[derive(Clone, Default)]
pub struct TaskConfig {
    pub(crate) name: Option<Arc<str>>,
    pub(crate) dispatcher: Option<Dispatcher>,
    pub(crate) supervision: Option<Supervision>,
}

impl TaskConfig {
    pub fn new() -> Self {
        TaskConfig::default()
    }

    /// Sets a human-readable name, used in log lines and handle debugging.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into().into());
        self
    }

    /// Fixes the execution context for tasks created under this config.
    pub fn on(mut self, dispatcher: Dispatcher) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Chooses how child failures are treated.
    pub fn supervised(mut self, supervision: Supervision) -> Self {
        self.supervision = Some(supervision);
        self
    }

    /// Combines two configs; fields set in `overrides` win.
    pub fn merge(&self, overrides: &TaskConfig) -> TaskConfig {
        TaskConfig {
            name: overrides.name.clone().or_else(|| self.name.clone()),
            dispatcher: overrides.dispatcher.clone().or_else(|| self.dispatcher.clone()),
            supervision: overrides.supervision.or(self.supervision),
        }
    }
}

/// The handle a task body uses to interact with the kernel: liveness
/// checks, cancellable suspension, and shielded cleanup sections.
#[derive(Clone)]
pub struct TaskContext {
    name: Arc<str>,
    dispatcher: Dispatcher,
    token: CancelToken,
}

impl TaskContext {
    pub(crate) fn new(name: Arc<str>, dispatcher: Dispatcher, token: CancelToken) -> Self {
        TaskContext { name, dispatcher, token }
    }

    /// A context owned by nobody: never cancelled, compute dispatcher.
    /// Intended for bridging code that drives kernel primitives from
    /// outside any scope (tests, adapters).
    pub fn detached() -> Self {
        TaskContext::new("detached".into(), Dispatcher::Compute, CancelToken::root())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn token(&self) -> &CancelToken {
        &self.token
    }

    /// Advisory cancellation poll; see [`CancelToken::is_cancelled`].
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Liveness check; `Err(Cancelled)` once cancellation was requested.
    /// Loop bodies that never suspend must call this to stay cancellable.
    pub fn checkpoint(&self) -> Outcome<()> {
        self.token.checkpoint()
    }

    /// Resolves when this task's cancellation is requested.
    pub fn cancelled(&self) -> CancelledFut<'_> {
        self.token.cancelled()
    }

    /// Cancellable suspension for `duration`. Returns `Err(Cancelled)` as
    /// soon as cancellation is observed, without waiting out the timer.
    pub async fn sleep(&self, duration: Duration) -> Outcome<()> {
        let mut timer = pin!(time::sleep(duration));
        let mut interrupted = pin!(self.token.cancelled());
        poll_fn(|cx| {
            if interrupted.as_mut().poll(cx).is_ready() {
                return Poll::Ready(self.token.checkpoint());
            }
            if timer.as_mut().poll(cx).is_ready() {
                return Poll::Ready(Ok(()));
            }
            Poll::Pending
        })
        .await
    }

    /// Runs `body` in a critical section that cancellation cannot enter.
    ///
    /// The block receives a context whose token is never cancelled, so
    /// cleanup (releasing a resource, flushing a buffer) runs to
    /// completion even while a cancellation request is pending. The
    /// request is not lost: the surrounding task's flag is monotonic, and
    /// the next checkpoint after the section exits observes it.
    pub async fn shielded<T, F, Fut>(&self, body: F) -> T
    where
        F: FnOnce(TaskContext) -> Fut,
        Fut: Future<Output = T>,
    {
        let shield = TaskContext::new(
            Arc::clone(&self.name),
            self.dispatcher.clone(),
            CancelToken::root(),
        );
        body(shield).await
    }

    /// A child context on the same dispatcher, cancellation linked to this
    /// one.
    pub fn child(&self) -> TaskContext {
        self.child_on(self.dispatcher.clone())
    }

    /// A child context on a different dispatcher, cancellation linked to
    /// this one.
    pub(crate) fn child_on(&self, dispatcher: Dispatcher) -> TaskContext {
        TaskContext::new(Arc::clone(&self.name), dispatcher, self.token.child())
    }
}
