use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use taskscope::{Scope, Supervision, TaskConfig, TaskError, TaskState, fail};

#[tokio::test(flavor = "multi_thread")]
async fn join_waits_for_every_child() {
    let scope = Scope::new(TaskConfig::new().named("join"));
    let done = Arc::new(AtomicUsize::new(0));

    for i in 0..8u64 {
        let done = Arc::clone(&done);
        let _ = scope
            .launch(move |cx| async move {
                cx.sleep(Duration::from_millis(10 * (i + 1))).await?;
                done.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .expect("scope should be open");
    }

    scope.join().await.expect("no child failed");
    assert_eq!(
        done.load(Ordering::SeqCst),
        8,
        "every child must finish before join returns"
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn join_waits_for_children_spawned_while_joining() {
    let scope = Scope::new(TaskConfig::new().named("late"));
    let late_done = Arc::new(AtomicBool::new(false));
    let late_done_cl = Arc::clone(&late_done);
    let spawner = scope.clone();

    let _ = scope
        .launch(move |cx| async move {
            cx.sleep(Duration::from_millis(50)).await?;
            let _ = spawner
                .launch(move |cx| async move {
                    cx.sleep(Duration::from_millis(100)).await?;
                    late_done_cl.store(true, Ordering::SeqCst);
                    Ok(())
                })
                .expect("scope stays open while a child is still running");
            Ok(())
        })
        .expect("scope should be open");

    scope.join().await.expect("no child failed");
    assert!(
        late_done.load(Ordering::SeqCst),
        "join must also wait for the late-spawned child"
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn launching_after_join_fails() {
    let scope = Scope::new(TaskConfig::new());
    scope.join().await.expect("an empty scope joins clean");

    let result = scope.launch(|_cx| async { Ok(()) });
    assert!(
        matches!(result, Err(TaskError::ScopeClosed)),
        "a closed scope must reject new tasks"
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn cancellation_reaches_suspended_children_promptly() {
    let scope = Scope::new(TaskConfig::new().named("cancel"));
    let handle = scope
        .launch(|cx| async move { cx.sleep(Duration::from_secs(30)).await })
        .expect("scope should be open");

    let started = Instant::now();
    scope.cancel();
    assert_eq!(handle.await, Err(TaskError::Cancelled));
    assert!(
        started.elapsed() < Duration::from_secs(5),
        "a suspended child must observe cancellation without waiting out its sleep"
    );
    scope.join().await.expect("cancelled children are not failures");
}

#[tokio::test(flavor = "multi_thread")]
async fn tight_loops_ignore_cancellation_until_they_check() {
    let scope = Scope::new(TaskConfig::new().named("hot"));
    let release = Arc::new(AtomicBool::new(false));
    let release_cl = Arc::clone(&release);

    let mut handle = scope
        .launch(move |_cx| async move {
            // Never suspends, never checkpoints: cancellation cannot land.
            while !release_cl.load(Ordering::SeqCst) {
                std::hint::spin_loop();
            }
            Ok("ran to completion")
        })
        .expect("scope should be open");

    scope.cancel();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(
        !matches!(handle.state(), TaskState::Cancelled),
        "the loop must not be stopped preemptively"
    );

    release.store(true, Ordering::SeqCst);
    assert_eq!((&mut handle).await, Ok("ran to completion"));
    scope.join().await.expect("a voluntary completion joins clean");
}

#[tokio::test(flavor = "multi_thread")]
async fn a_failing_child_cancels_its_siblings() {
    let scope = Scope::new(TaskConfig::new().named("prop"));
    let sibling = scope
        .launch(|cx| async move {
            cx.sleep(Duration::from_secs(30)).await?;
            Ok(())
        })
        .expect("scope should be open");
    let _ = scope
        .launch(|cx| async move {
            cx.sleep(Duration::from_millis(50)).await?;
            fail::<()>("worker broke")
        })
        .expect("scope should be open");

    let started = Instant::now();
    let joined = scope.join().await;
    assert!(
        matches!(joined, Err(TaskError::Failed(_))),
        "the failure must be re-raised at join, got {joined:?}"
    );
    assert_eq!(
        sibling.await,
        Err(TaskError::Cancelled),
        "the sibling must be cancelled by the failure"
    );
    assert!(
        started.elapsed() < Duration::from_secs(5),
        "join must not wait out the cancelled sibling's sleep"
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn isolating_scope_contains_a_child_failure() {
    let scope = Scope::new(TaskConfig::new().named("iso").supervised(Supervision::Isolating));
    let observed = Arc::new(std::sync::Mutex::new(None));
    let observed_cl = Arc::clone(&observed);

    let _ = scope
        .launch_supervised(
            |cx| async move {
                cx.sleep(Duration::from_millis(50)).await?;
                fail::<()>("isolated breakage")
            },
            move |error| {
                *observed_cl.lock().unwrap() = Some(error.to_string());
            },
        )
        .expect("scope should be open");
    let sibling = scope
        .launch(|cx| async move {
            cx.sleep(Duration::from_millis(100)).await?;
            Ok(11)
        })
        .expect("scope should be open");

    assert_eq!(sibling.await, Ok(11), "the sibling must be unaffected");
    scope
        .join()
        .await
        .expect("an isolating scope joins clean after a child failure");
    let observed = observed.lock().unwrap().clone();
    assert_eq!(
        observed.as_deref(),
        Some("task failed: isolated breakage"),
        "the local handler is where the failure must surface"
    );
}

#[test]
fn nested_scopes_join_before_returning() {
    let outcome = taskscope::run_default(|scope, _cx| async move {
        let inner_done = Arc::new(AtomicBool::new(false));
        let inner_done_cl = Arc::clone(&inner_done);
        let value = scope
            .enter(TaskConfig::new().named("inner"), |inner| async move {
                let _ = inner.launch(move |cx| async move {
                    cx.sleep(Duration::from_millis(50)).await?;
                    inner_done_cl.store(true, Ordering::SeqCst);
                    Ok(())
                })?;
                Ok(21)
            })
            .await?;
        assert!(
            inner_done.load(Ordering::SeqCst),
            "enter must join the nested children before handing back its value"
        );
        Ok(value * 2)
    });
    assert_eq!(outcome, Ok(42));
}

#[tokio::test(flavor = "multi_thread")]
async fn a_finished_task_reports_a_terminal_state() {
    let scope = Scope::new(TaskConfig::new().named("states"));
    let mut handle = scope
        .launch(|cx| async move {
            cx.sleep(Duration::from_millis(20)).await?;
            Ok(5)
        })
        .expect("scope should be open");

    assert_eq!((&mut handle).await, Ok(5));
    assert_eq!(handle.state(), TaskState::Completed);
    assert!(handle.state().is_terminal());
    scope.join().await.expect("clean join");
}
