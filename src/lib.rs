//! Structured concurrency primitives with cooperative cancellation.
//!
//! `taskscope` runs concurrent work as a tree of owned tasks: every task
//! belongs to a [`Scope`], no task outlives its owner, and a scope's
//! [`join`](Scope::join) completes only after every child has reached a
//! terminal state. Cancellation flows from parents to children and is
//! always cooperative: it takes effect at suspension points and explicit
//! liveness checks, never preemptively.
//!
//! The pieces:
//! - [`Scope`] and [`TaskHandle`] for launching, supervising, and joining
//!   tasks, with [`run`] as the explicit process-wide entry point
//! - [`CancelToken`] trees, deadlines via [`timeout`], and non-cancellable
//!   cleanup sections ([`TaskContext::shielded`])
//! - [`Dispatcher`]s mapping tasks onto a compute pool, a blocking pool,
//!   the caller's thread, or a pinned single thread, with
//!   [`relocate`] for explicit mid-task context switches
//! - FIFO [`channel`]s with configurable capacity and overflow policy,
//!   fan-in/fan-out on both halves, and a fair [`select`]
//! - Cold [`Flow`] sequences whose staged operators compose lazily and run
//!   only when a terminal collector drives them
//! - A [`sync`] lock helper and a message-passing [`actor`] for state
//!   shared between tasks
//!
//! Everything is executor agnostic: the kernel owns its worker pools, and
//! every public future can be awaited from any executor.

pub mod actor;
pub mod cancel;
pub mod channel;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod flow;
pub mod scope;
pub mod sync;
pub mod task;
pub mod time;

pub use actor::{ActorRef, spawn_actor};
pub use cancel::CancelToken;
pub use channel::{Capacity, Overflow, Receiver, Sender, channel, select};
pub use context::{TaskConfig, TaskContext};
pub use dispatch::{Dispatcher, relocate};
pub use error::{Failure, Outcome, RecvError, SendError, TaskError, fail};
pub use flow::{Emitter, Flow, flow, flow_of};
pub use scope::{Scope, Supervision, run, run_default};
pub use task::{TaskHandle, TaskId, TaskState};
pub use time::{Deadline, Sleep, sleep, timeout, timeout_or_none};
