use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::channel::oneshot;
use taskscope::sync::{Mutex, MutexExt};
use taskscope::{Capacity, Dispatcher, Scope, TaskConfig, TaskContext, fail, relocate, spawn_actor};

#[tokio::test(flavor = "multi_thread")]
async fn mutex_guarded_counter_converges() {
    let scope = Scope::new(TaskConfig::new().named("mutex"));
    let counter = Arc::new(Mutex::new(0u64));

    for _ in 0..8 {
        let counter = Arc::clone(&counter);
        let _ = scope
            .launch(move |cx| async move {
                for _ in 0..100 {
                    counter.with_lock(&cx, |n| *n += 1).await?;
                }
                Ok(())
            })
            .expect("scope should be open");
    }
    scope.join().await.expect("no child failed");

    let cx = TaskContext::detached();
    let total = counter.with_lock(&cx, |n| *n).await.expect("detached context never cancels");
    assert_eq!(total, 800, "every guarded increment must be visible");
}

#[tokio::test(flavor = "multi_thread")]
async fn pinned_dispatcher_confines_work_to_one_thread() {
    let scope = Scope::new(TaskConfig::new().named("pinned").on(Dispatcher::pinned("confined")));
    let threads = Arc::new(std::sync::Mutex::new(HashSet::new()));

    for _ in 0..6 {
        let threads = Arc::clone(&threads);
        let _ = scope
            .launch(move |cx| async move {
                // Resume after a suspension still lands on the pinned thread.
                cx.sleep(Duration::from_millis(5)).await?;
                let name = std::thread::current().name().unwrap_or("").to_string();
                threads.lock().unwrap().insert(name);
                Ok(())
            })
            .expect("scope should be open");
    }
    scope.join().await.expect("no child failed");

    let threads = threads.lock().unwrap();
    assert_eq!(
        threads.len(),
        1,
        "every task must run on the single pinned thread, saw {threads:?}"
    );
}

#[test]
fn relocate_runs_the_block_on_the_target_thread() {
    let outcome = taskscope::run_default(|_scope, cx| async move {
        relocate(&cx, Dispatcher::pinned("relocated"), |_sub| async move {
            Ok(std::thread::current().name().unwrap_or("").to_string())
        })
        .await
    });
    let name = outcome.expect("relocation should succeed");
    assert!(
        name.starts_with("relocated"),
        "the block must run on the pinned thread, ran on {name:?}"
    );
}

enum Count {
    Add(u64),
    Total(oneshot::Sender<u64>),
}

#[tokio::test(flavor = "multi_thread")]
async fn actor_owned_counter_converges() {
    let scope = Scope::new(TaskConfig::new().named("actor"));
    let (counter, actor) = spawn_actor(&scope, Capacity::Bounded(32), 0u64, |total, message| {
        match message {
            Count::Add(n) => *total += n,
            Count::Total(reply) => {
                let _ = reply.send(*total);
            }
        }
        Ok(())
    })
    .expect("scope should be open");

    let mut producers = Vec::new();
    for _ in 0..4 {
        let counter = counter.clone();
        producers.push(
            scope
                .launch(move |cx| async move {
                    for _ in 0..50 {
                        if counter.tell(&cx, Count::Add(2)).await.is_err() {
                            return fail("mailbox closed early");
                        }
                    }
                    Ok(())
                })
                .expect("scope should be open"),
        );
    }
    for producer in producers {
        producer.await.expect("producer finished");
    }

    let cx = scope.task_context();
    let total = counter.ask(&cx, Count::Total).await.expect("the actor answers");
    assert_eq!(total, 400, "the actor must have applied every message in order");

    counter.close();
    assert_eq!(actor.await, Ok(400), "the final state comes back on the actor handle");
    scope.join().await.expect("clean join");
}
