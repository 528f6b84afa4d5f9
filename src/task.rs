//! Task identity, lifecycle states, and the awaitable handle.
//!
//! A task's state only ever moves forward: `Active` through an optional
//! `Completing` into exactly one of the terminal states. The handle lets
//! the launcher cancel the task, watch its state, and await its outcome.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use futures::channel::oneshot;

use crate::cancel::CancelToken;
use crate::error::{Outcome, TaskError};

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique opaque task identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(u64);

impl TaskId {
    pub(crate) fn next() -> Self {
        TaskId(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle of a task. `Cancelled`, `Completed`, and `Failed` are
/// terminal; no transition leaves them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Body is running or suspended.
    Active,
    /// Cancellation requested, not yet observed by the body.
    Cancelling,
    /// Body finished; outcome being recorded.
    Completing,
    /// Terminal: ended by cooperative cancellation.
    Cancelled,
    /// Terminal: ended with a value.
    Completed,
    /// Terminal: ended with a failure.
    Failed,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Cancelled | TaskState::Completed | TaskState::Failed)
    }

    fn rank(self) -> u8 {
        match self {
            TaskState::Active => 0,
            TaskState::Cancelling => 1,
            TaskState::Completing => 2,
            TaskState::Cancelled | TaskState::Completed | TaskState::Failed => 3,
        }
    }
}

/// Monotonic state holder. `advance` refuses to leave a terminal state and
/// refuses to move backwards, so a late transition request is a no-op
/// rather than a corruption.
#[derive(Debug)]
pub(crate) struct StateCell {
    state: Mutex<TaskState>,
}

impl StateCell {
    pub(crate) fn new() -> Self {
        StateCell { state: Mutex::new(TaskState::Active) }
    }

    pub(crate) fn get(&self) -> TaskState {
        *self.state.lock().expect("task state lock poisoned")
    }

    pub(crate) fn advance(&self, to: TaskState) -> bool {
        let mut state = self.state.lock().expect("task state lock poisoned");
        if state.is_terminal() || to.rank() <= state.rank() {
            return false;
        }
        *state = to;
        true
    }
}

/// Handle to a launched task: cancel it, inspect it, or await its outcome.
///
/// Awaiting yields the body's [`Outcome`]; a task that was cancelled before
/// producing a value yields `Err(Cancelled)`.
#[must_use = "a task handle should be awaited, cancelled, or explicitly dropped"]
pub struct TaskHandle<T> {
    id: TaskId,
    name: Arc<str>,
    state: Arc<StateCell>,
    token: CancelToken,
    outcome: oneshot::Receiver<Outcome<T>>,
}

impl<T> TaskHandle<T> {
    pub(crate) fn new(
        id: TaskId,
        name: Arc<str>,
        state: Arc<StateCell>,
        token: CancelToken,
        outcome: oneshot::Receiver<Outcome<T>>,
    ) -> Self {
        TaskHandle { id, name, state, token, outcome }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current lifecycle state. An active task with a pending cancellation
    /// request reports `Cancelling` until the body observes the request.
    pub fn state(&self) -> TaskState {
        let state = self.state.get();
        if state == TaskState::Active && self.token.is_cancelled() {
            TaskState::Cancelling
        } else {
            state
        }
    }

    /// Requests cooperative cancellation of this task (and any contexts it
    /// derived). Returns immediately; await the handle to observe the end.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl<T> Future for TaskHandle<T> {
    type Output = Outcome<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.outcome).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            // Sender dropped without reporting: the executor discarded the
            // task, observable only as cancellation.
            Poll::Ready(Err(oneshot::Canceled)) => Poll::Ready(Err(TaskError::Cancelled)),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T> std::fmt::Debug for TaskHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}
