//! Three ways to mutate state shared between tasks: a lock, a pinned
//! thread, and an actor.

use std::sync::Arc;
use std::time::Instant;

use futures::channel::oneshot;
use taskscope::sync::{Mutex, MutexExt};
use taskscope::{Capacity, Dispatcher, Outcome, TaskConfig, relocate, run, spawn_actor};

enum Count {
    Add(u64),
    Total(oneshot::Sender<u64>),
}

fn main() {
    let started = Instant::now();
    let stamp = move || started.elapsed().as_millis();

    let outcome: Outcome<()> = run(TaskConfig::new().named("shared"), |scope, cx| async move {
        // A mutex: the guard lives exactly as long as the critical closure.
        let counter = Arc::new(Mutex::new(0u64));
        let mut writers = Vec::new();
        for _ in 0..4 {
            let counter = Arc::clone(&counter);
            writers.push(scope.launch(move |cx| async move {
                for _ in 0..1000 {
                    counter.with_lock(&cx, |n| *n += 1).await?;
                }
                Ok(())
            })?);
        }
        for writer in writers {
            writer.await?;
        }
        let total = counter.with_lock(&cx, |n| *n).await?;
        println!("[{:>4} ms] mutex-guarded counter: {total}", stamp());

        // Thread confinement: every mutation relocated onto one pinned
        // thread, so increments can never interleave.
        let confined = Dispatcher::pinned("counter-thread");
        let mut lone = 0u64;
        for round in 1..=4 {
            lone = relocate(&cx, confined.clone(), move |_sub| async move {
                let here = std::thread::current().name().unwrap_or("<unnamed>").to_string();
                println!("[{:>4} ms] round {round} increments on '{here}'", stamp());
                Ok(lone + 1000)
            })
            .await?;
        }
        println!("[{:>4} ms] thread-confined counter: {lone}", stamp());

        // An actor: one owner, reachable only through its mailbox.
        let (tally, actor) = spawn_actor(&scope, Capacity::Bounded(64), 0u64, |total, message| {
            match message {
                Count::Add(n) => *total += n,
                Count::Total(reply) => {
                    let _ = reply.send(*total);
                }
            }
            Ok(())
        })?;
        let mut senders = Vec::new();
        for _ in 0..4 {
            let tally = tally.clone();
            senders.push(scope.launch(move |cx| async move {
                for _ in 0..1000 {
                    if tally.tell(&cx, Count::Add(1)).await.is_err() {
                        return taskscope::fail("mailbox closed early");
                    }
                }
                Ok(())
            })?);
        }
        for sender in senders {
            sender.await?;
        }
        let total = tally.ask(&cx, Count::Total).await?;
        println!("[{:>4} ms] actor-owned counter: {total}", stamp());
        tally.close();
        println!("[{:>4} ms] actor retired with state {:?}", stamp(), actor.await);

        Ok(())
    });

    println!("[{:>4} ms] root joined: {outcome:?}", stamp());
}
