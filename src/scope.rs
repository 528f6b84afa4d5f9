//! Structured ownership of concurrent tasks.
//!
//! A [`Scope`] owns every task launched through it and refuses to complete
//! its [`join`](Scope::join) until each of them (including tasks launched
//! while the join was already waiting) has reached a terminal state.
//! Cancelling a scope cancels all current and future children; failure
//! handling is chosen per scope via [`Supervision`].
//!
//! There is no detached spawn. Work with no owner has no termination
//! tracking, so the only process-wide scope is the explicit one created by
//! [`run`], which starts when the call starts and is joined before the call
//! returns.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Waker};

use futures::FutureExt;
use futures::channel::oneshot;

use crate::cancel::CancelToken;
use crate::context::{TaskConfig, TaskContext};
use crate::dispatch::Dispatcher;
use crate::error::{Failure, Outcome, TaskError};
use crate::task::{StateCell, TaskHandle, TaskId, TaskState};

/// How a scope reacts to a child's failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Supervision {
    /// A failing child cancels its siblings and the failure is re-raised
    /// at the scope's `join`.
    Propagating,
    /// A failing child is contained: siblings keep running and `join`
    /// stays clean. The failure goes to the handler given at launch; with
    /// no handler it is logged, never silently swallowed.
    Isolating,
}

type FailureHook = Box<dyn FnOnce(&TaskError) + Send + 'static>;

struct Ledger {
    active: usize,
    closed: bool,
    first_failure: Option<TaskError>,
    join_wakers: Vec<Waker>,
}

struct ScopeCore {
    name: Arc<str>,
    dispatcher: Dispatcher,
    supervision: Supervision,
    token: CancelToken,
    ledger: Mutex<Ledger>,
}

impl ScopeCore {
    fn register(&self) -> Outcome<()> {
        let mut ledger = self.ledger.lock().expect("scope ledger lock poisoned");
        if ledger.closed {
            return Err(TaskError::ScopeClosed);
        }
        ledger.active += 1;
        Ok(())
    }

    fn record_failure(&self, error: TaskError) {
        {
            let mut ledger = self.ledger.lock().expect("scope ledger lock poisoned");
            if ledger.first_failure.is_none() {
                ledger.first_failure = Some(error);
            }
        }
        self.token.cancel();
    }

    fn finish_child(&self) {
        let wakers = {
            let mut ledger = self.ledger.lock().expect("scope ledger lock poisoned");
            ledger.active -= 1;
            if ledger.active == 0 {
                std::mem::take(&mut ledger.join_wakers)
            } else {
                Vec::new()
            }
        };
        for waker in wakers {
            waker.wake();
        }
    }
}

/// An owner of concurrent tasks with all-children-complete termination.
///
/// Cheap to clone; clones share the same ownership ledger.
#[derive(Clone)]
pub struct Scope {
    core: Arc<ScopeCore>,
}

impl Scope {
    /// A root scope with the given configuration. Unset fields default to
    /// a generated name, the compute dispatcher, and propagating
    /// supervision.
    pub fn new(config: TaskConfig) -> Self {
        Scope::build(config, CancelToken::root(), None)
    }

    fn build(config: TaskConfig, token: CancelToken, parent: Option<&ScopeCore>) -> Self {
        let name = config
            .name
            .unwrap_or_else(|| parent.map_or_else(|| "scope".into(), |p| format!("{}/sub", p.name).into()));
        let dispatcher = config
            .dispatcher
            .or_else(|| parent.map(|p| p.dispatcher.clone()))
            .unwrap_or(Dispatcher::Compute);
        let supervision = config
            .supervision
            .or(parent.map(|p| p.supervision))
            .unwrap_or(Supervision::Propagating);
        Scope {
            core: Arc::new(ScopeCore {
                name,
                dispatcher,
                supervision,
                token,
                ledger: Mutex::new(Ledger {
                    active: 0,
                    closed: false,
                    first_failure: None,
                    join_wakers: Vec::new(),
                }),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.core.name
    }

    pub fn supervision(&self) -> Supervision {
        self.core.supervision
    }

    /// A context tied to this scope's cancellation, for code running in
    /// the scope's own frame (not inside a launched task).
    pub fn task_context(&self) -> TaskContext {
        TaskContext::new(
            Arc::clone(&self.core.name),
            self.core.dispatcher.clone(),
            self.core.token.child(),
        )
    }

    /// Launches `body` as a child task on the scope's dispatcher.
    ///
    /// The scope must still be open; after its join has completed this
    /// fails with `ScopeClosed`. Launching into a scope that was cancelled
    /// but not yet closed succeeds, and the child is born cancelled.
    pub fn launch<T, F, Fut>(&self, body: F) -> Outcome<TaskHandle<T>>
    where
        T: Send + 'static,
        F: FnOnce(TaskContext) -> Fut,
        Fut: Future<Output = Outcome<T>> + Send + 'static,
    {
        self.launch_inner(TaskConfig::new(), None, body)
    }

    /// Launches with per-task config overrides (name, dispatcher).
    pub fn launch_with<T, F, Fut>(&self, overrides: TaskConfig, body: F) -> Outcome<TaskHandle<T>>
    where
        T: Send + 'static,
        F: FnOnce(TaskContext) -> Fut,
        Fut: Future<Output = Outcome<T>> + Send + 'static,
    {
        self.launch_inner(overrides, None, body)
    }

    /// Launches with a local failure handler.
    ///
    /// In an [`Isolating`](Supervision::Isolating) scope this is how a
    /// child's failure is observed at all; registering one is the caller's
    /// responsibility. The handler also fires in propagating scopes,
    /// before the failure cancels the sibling set.
    pub fn launch_supervised<T, F, Fut, H>(&self, body: F, handler: H) -> Outcome<TaskHandle<T>>
    where
        T: Send + 'static,
        F: FnOnce(TaskContext) -> Fut,
        Fut: Future<Output = Outcome<T>> + Send + 'static,
        H: FnOnce(&TaskError) + Send + 'static,
    {
        self.launch_inner(TaskConfig::new(), Some(Box::new(handler)), body)
    }

    fn launch_inner<T, F, Fut>(
        &self,
        overrides: TaskConfig,
        hook: Option<FailureHook>,
        body: F,
    ) -> Outcome<TaskHandle<T>>
    where
        T: Send + 'static,
        F: FnOnce(TaskContext) -> Fut,
        Fut: Future<Output = Outcome<T>> + Send + 'static,
    {
        let id = TaskId::next();
        let name: Arc<str> = overrides
            .name
            .unwrap_or_else(|| format!("{}{}", self.core.name, id).into());
        let dispatcher = overrides
            .dispatcher
            .unwrap_or_else(|| self.core.dispatcher.clone());
        let token = self.core.token.child();
        let state = Arc::new(StateCell::new());
        let cx = TaskContext::new(Arc::clone(&name), dispatcher.clone(), token.clone());

        let fut = body(cx);
        self.core.register()?;

        let (tx, rx) = oneshot::channel();
        let core = Arc::clone(&self.core);
        let cell = Arc::clone(&state);
        let task_name = Arc::clone(&name);
        let wrapped = async move {
            log::trace!("task '{task_name}' {id} starting");
            let outcome: Outcome<T> = match AssertUnwindSafe(fut).catch_unwind().await {
                Ok(outcome) => outcome,
                Err(payload) => Err(TaskError::Failed(Failure::from_panic(payload))),
            };
            cell.advance(TaskState::Completing);
            let terminal = match &outcome {
                Ok(_) => TaskState::Completed,
                Err(TaskError::Cancelled) => TaskState::Cancelled,
                Err(_) => TaskState::Failed,
            };
            if let Err(error) = &outcome {
                if error.is_failure() {
                    if let Some(hook) = hook {
                        hook(error);
                        if core.supervision == Supervision::Propagating {
                            core.record_failure(error.clone());
                        }
                    } else {
                        match core.supervision {
                            Supervision::Propagating => core.record_failure(error.clone()),
                            Supervision::Isolating => log::warn!(
                                "task '{task_name}' {id} failed in isolating scope '{}' with no handler: {error}",
                                core.name
                            ),
                        }
                    }
                }
            }
            cell.advance(terminal);
            let _ = tx.send(outcome);
            core.finish_child();
            log::trace!("task '{task_name}' {id} finished");
        };
        dispatcher.spawn(Box::pin(wrapped));

        Ok(TaskHandle::new(id, name, state, token, rx))
    }

    /// Requests cancellation of every live descendant, current and future.
    pub fn cancel(&self) {
        self.core.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.core.token.is_cancelled()
    }

    /// Suspends until every child has reached a terminal state, then
    /// closes the scope to new tasks.
    ///
    /// In a propagating scope the first child failure is re-raised here;
    /// cancelled children are not failures and do not surface.
    pub fn join(&self) -> Join<'_> {
        Join { scope: self }
    }

    /// Runs `body` inside a nested scope whose cancellation is linked to
    /// this one, joining the nested scope's children before returning.
    ///
    /// An isolating nested scope (`config.supervised(Isolating)`) contains
    /// child failures the way the propagating default does not.
    pub async fn enter<T, F, Fut>(&self, config: TaskConfig, body: F) -> Outcome<T>
    where
        F: FnOnce(Scope) -> Fut,
        Fut: Future<Output = Outcome<T>>,
    {
        let nested = Scope::build(config, self.core.token.child(), Some(&self.core));
        let result = body(nested.clone()).await;
        if result.is_err() {
            nested.cancel();
        }
        let joined = nested.join().await;
        match result {
            Ok(value) => joined.map(|()| value),
            Err(error) => Err(error),
        }
    }
}

impl std::fmt::Debug for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ledger = self.core.ledger.lock().expect("scope ledger lock poisoned");
        f.debug_struct("Scope")
            .field("name", &self.core.name)
            .field("supervision", &self.core.supervision)
            .field("active", &ledger.active)
            .field("closed", &ledger.closed)
            .finish()
    }
}

/// Future returned by [`Scope::join`].
#[must_use = "futures do nothing unless polled or .awaited"]
pub struct Join<'a> {
    scope: &'a Scope,
}

impl Future for Join<'_> {
    type Output = Outcome<()>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let core = &self.scope.core;
        let mut ledger = core.ledger.lock().expect("scope ledger lock poisoned");
        if ledger.active == 0 {
            ledger.closed = true;
            let result = match core.supervision {
                Supervision::Propagating => match ledger.first_failure.clone() {
                    Some(error) => Err(error),
                    None => Ok(()),
                },
                Supervision::Isolating => Ok(()),
            };
            return Poll::Ready(result);
        }
        if !ledger.join_wakers.iter().any(|w| w.will_wake(cx.waker())) {
            ledger.join_wakers.push(cx.waker().clone());
        }
        Poll::Pending
    }
}

/// Process entry point: creates the root scope, drives `main` on the
/// calling thread, and joins every child before returning.
///
/// The root scope is the only sanctioned owner of "background" work; its
/// lifetime is exactly this call. A failing `main` cancels the scope
/// before the final join.
pub fn run<T, F, Fut>(config: TaskConfig, main: F) -> Outcome<T>
where
    F: FnOnce(Scope, TaskContext) -> Fut,
    Fut: Future<Output = Outcome<T>>,
{
    let scope = Scope::new(config);
    let cx = scope.task_context();
    futures::executor::block_on(async move {
        let result = main(scope.clone(), cx).await;
        if result.is_err() {
            scope.cancel();
        }
        let joined = scope.join().await;
        match result {
            Ok(value) => joined.map(|()| value),
            Err(error) => Err(error),
        }
    })
}

/// [`run`] with a default root configuration.
pub fn run_default<T, F, Fut>(main: F) -> Outcome<T>
where
    F: FnOnce(Scope, TaskContext) -> Fut,
    Fut: Future<Output = Outcome<T>>,
{
    run(TaskConfig::new().named("main"), main)
}
