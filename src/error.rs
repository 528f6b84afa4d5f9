//! Error taxonomy shared across the crate.
//!
//! Cooperative cancellation is modeled as an error value rather than a
//! panic: task bodies return [`Outcome`], and `Err(TaskError::Cancelled)`
//! travels up through `?` exactly like any other early return. By
//! convention `Cancelled` is expected and is never treated as a failure by
//! scopes; everything else is.

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Result type of task bodies, joins, and terminal stream operations.
pub type Outcome<T> = Result<T, TaskError>;

/// A cheaply clonable user-failure payload.
///
/// Produced either by [`fail`] or by a caught panic inside a task body.
/// Only the message survives; failures that need structure should be
/// modeled in the task's own `Ok` type instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure(Arc<str>);

impl Failure {
    pub fn new(message: impl Into<String>) -> Self {
        Failure(message.into().into())
    }

    /// Extracts a message from a panic payload.
    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "task panicked".to_string());
        Failure(message.into())
    }

    pub fn message(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for Failure {}

/// Shorthand for an `Err(TaskError::Failed(..))` with the given message.
pub fn fail<T>(message: impl Into<String>) -> Outcome<T> {
    Err(TaskError::Failed(Failure::new(message)))
}

/// Terminal conditions a task, join, or stream collection can end with.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    /// Cooperative cancellation was observed at a checkpoint or suspension
    /// point. Expected, and filtered out of failure propagation.
    #[error("task was cancelled")]
    Cancelled,

    /// A deadline elapsed before the guarded block completed.
    #[error("deadline of {0:?} exceeded")]
    TimedOut(Duration),

    /// A task was launched into a scope that has already completed its join.
    #[error("scope is closed to new tasks")]
    ScopeClosed,

    /// A user-level failure raised inside a task body, or a caught panic.
    #[error("task failed: {0}")]
    Failed(Failure),
}

impl TaskError {
    /// `Cancelled` is benign; everything else counts as a failure.
    pub fn is_failure(&self) -> bool {
        !matches!(self, TaskError::Cancelled)
    }
}

/// Why a send did not deliver. The undelivered value is handed back.
#[derive(Debug, PartialEq, Eq)]
pub enum SendError<T> {
    /// The channel was closed, or every receiver is gone.
    Closed(T),

    /// The sending task was cancelled while waiting for room.
    Cancelled(T),

    /// The channel is full and the call was not allowed to suspend.
    Full(T),
}

impl<T> SendError<T> {
    /// Recovers the value that was not delivered.
    pub fn into_inner(self) -> T {
        match self {
            SendError::Closed(v) | SendError::Cancelled(v) | SendError::Full(v) => v,
        }
    }
}

/// Why a receive produced no item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvError {
    /// The channel is closed and its buffer has drained.
    Closed,

    /// The receiving task was cancelled while waiting.
    Cancelled,

    /// No item was immediately available.
    Empty,
}
