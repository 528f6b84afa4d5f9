//! Single-owner state mutation through message passing.
//!
//! An actor owns its state outright: one dedicated task drains one mailbox
//! and is the only code that ever touches the state, so mutation is
//! serialized without a lock. Messages are a caller-defined enum, which
//! keeps dispatch exhaustive at compile time; requests that need an answer
//! carry a oneshot reply sender, usually built through
//! [`ActorRef::ask`].

use futures::channel::oneshot;

use crate::channel::{Capacity, Overflow, Sender, channel};
use crate::context::{TaskConfig, TaskContext};
use crate::error::{Outcome, RecvError, SendError, TaskError, fail};
use crate::scope::Scope;
use crate::task::TaskHandle;

/// The way into an actor's mailbox. Clone freely; dropping every ref (or
/// calling [`close`](ActorRef::close)) ends the actor once the backlog has
/// drained.
pub struct ActorRef<M> {
    mailbox: Sender<M>,
}

impl<M> Clone for ActorRef<M> {
    fn clone(&self) -> Self {
        ActorRef { mailbox: self.mailbox.clone() }
    }
}

impl<M: Send + 'static> ActorRef<M> {
    /// Delivers a message, suspending while the mailbox is full.
    pub async fn tell(&self, cx: &TaskContext, message: M) -> Result<(), SendError<M>> {
        self.mailbox.send(cx, message).await
    }

    /// Sends a request carrying a reply sender and suspends until the actor
    /// answers.
    pub async fn ask<R, F>(&self, cx: &TaskContext, request: F) -> Outcome<R>
    where
        F: FnOnce(oneshot::Sender<R>) -> M,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        match self.mailbox.send(cx, request(reply_tx)).await {
            Ok(()) => {}
            Err(SendError::Cancelled(_)) => return Err(TaskError::Cancelled),
            Err(_) => return fail("actor mailbox is closed"),
        }
        match reply_rx.await {
            Ok(answer) => Ok(answer),
            // The actor ended without answering.
            Err(oneshot::Canceled) => fail("actor dropped the request"),
        }
    }

    /// Closes the mailbox. Queued messages are still handled; later sends
    /// fail. Idempotent.
    pub fn close(&self) {
        self.mailbox.close();
    }
}

/// Launches an actor as a child task of `scope` and hands back its ref.
///
/// `handler` runs strictly one message at a time against the state it owns.
/// The returned [`TaskHandle`] completes with the final state once the
/// mailbox is closed and drained; a handler error fails the actor task and
/// is supervised like any other child failure.
pub fn spawn_actor<S, M, H>(
    scope: &Scope,
    capacity: Capacity,
    state: S,
    mut handler: H,
) -> Outcome<(ActorRef<M>, TaskHandle<S>)>
where
    S: Send + 'static,
    M: Send + 'static,
    H: FnMut(&mut S, M) -> Outcome<()> + Send + 'static,
{
    let (mailbox, inbox) = channel(capacity, Overflow::Suspend);
    let handle = scope.launch_with(TaskConfig::new().named("actor"), move |cx| async move {
        let mut state = state;
        loop {
            match inbox.recv(&cx).await {
                Ok(message) => handler(&mut state, message)?,
                Err(RecvError::Cancelled) => return Err(TaskError::Cancelled),
                // Closed and drained: the mailbox is done.
                Err(_) => return Ok(state),
            }
        }
    })?;
    Ok((ActorRef { mailbox }, handle))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;

    enum Count {
        Add(u64),
        Total(oneshot::Sender<u64>),
    }

    #[test]
    fn actor_serializes_every_mutation() {
        let scope = Scope::new(TaskConfig::new().named("counting"));
        let cx = scope.task_context();
        let (counter, actor) =
            spawn_actor(&scope, Capacity::Bounded(16), 0u64, |total, message| {
                match message {
                    Count::Add(n) => *total += n,
                    Count::Total(reply) => {
                        let _ = reply.send(*total);
                    }
                }
                Ok(())
            })
            .expect("scope is open");

        block_on(async {
            for _ in 0..10 {
                assert!(counter.tell(&cx, Count::Add(3)).await.is_ok());
            }
            assert_eq!(counter.ask(&cx, Count::Total).await, Ok(30));
            counter.close();
            assert_eq!(actor.await, Ok(30), "the final state comes back on the handle");
            scope.join().await.expect("actor ends clean");
        });
    }

    #[test]
    fn asking_a_closed_mailbox_fails() {
        let scope = Scope::new(TaskConfig::new().named("gone"));
        let cx = scope.task_context();
        let (counter, _actor) =
            spawn_actor(&scope, Capacity::Bounded(1), 0u64, |_total, _message: Count| Ok(()))
                .expect("scope is open");
        counter.close();
        let answer = block_on(counter.ask(&cx, Count::Total));
        assert!(matches!(answer, Err(TaskError::Failed(_))));
        block_on(scope.join()).expect("actor ends clean");
    }
}
