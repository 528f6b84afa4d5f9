use std::sync::Arc;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use taskscope::{Flow, TaskContext, TaskError, fail, flow, flow_of, sleep};

/// Ten values, one every `interval`.
fn paced(interval: Duration) -> Flow<u64> {
    flow(move |emitter| async move {
        for i in 1..=10u64 {
            sleep(interval).await;
            emitter.emit(i).await;
        }
        Ok(())
    })
}

#[tokio::test(flavor = "multi_thread")]
async fn buffering_decouples_producer_and_consumer() {
    let cx = TaskContext::detached();

    let unbuffered_start = Instant::now();
    paced(Duration::from_millis(30))
        .collect(&cx, |_value| sleep(Duration::from_millis(90)))
        .await
        .expect("flow completes");
    let unbuffered = unbuffered_start.elapsed();

    let buffered_start = Instant::now();
    paced(Duration::from_millis(30))
        .buffer(8)
        .collect(&cx, |_value| sleep(Duration::from_millis(90)))
        .await
        .expect("flow completes");
    let buffered = buffered_start.elapsed();

    assert!(
        buffered < unbuffered,
        "a buffered producer must run ahead instead of waiting out the consumer \
         (buffered {buffered:?} vs unbuffered {unbuffered:?})"
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn conflation_skips_to_the_latest_value() {
    let cx = TaskContext::detached();
    let observed = Arc::new(Mutex::new(Vec::new()));
    let observed_cl = Arc::clone(&observed);

    paced(Duration::from_millis(30))
        .conflate()
        .collect(&cx, move |value| {
            observed_cl.lock().unwrap().push(value);
            sleep(Duration::from_millis(150))
        })
        .await
        .expect("flow completes");

    let observed = observed.lock().unwrap().clone();
    assert!(
        observed.len() < 10,
        "a slow consumer must observe strictly fewer values than were produced, got {observed:?}"
    );
    assert_eq!(
        observed.last(),
        Some(&10),
        "the last observed value must be the last produced"
    );
}

fn two_part(i: u64, inner_delay: Duration) -> Flow<String> {
    flow(move |emitter| async move {
        emitter.emit(format!("{i}: first")).await;
        sleep(inner_delay).await;
        emitter.emit(format!("{i}: second")).await;
        Ok(())
    })
}

#[tokio::test(flavor = "multi_thread")]
async fn concat_drains_inner_flows_sequentially_and_merge_overlaps_them() {
    let cx = TaskContext::detached();
    let outer = || {
        flow(|emitter| async move {
            for i in 1..=3u64 {
                sleep(Duration::from_millis(100)).await;
                emitter.emit(i).await;
            }
            Ok(())
        })
    };
    let inner = |i| two_part(i, Duration::from_millis(300));

    let concat_start = Instant::now();
    let concatenated = outer()
        .flat_map_concat(inner)
        .to_vec(&cx)
        .await
        .expect("flow completes");
    let concat_elapsed = concat_start.elapsed();

    let merge_start = Instant::now();
    let merged = outer()
        .flat_map_merge(16, inner)
        .to_vec(&cx)
        .await
        .expect("flow completes");
    let merge_elapsed = merge_start.elapsed();

    assert_eq!(concatenated.len(), 6);
    assert_eq!(
        concatenated[0..2],
        ["1: first", "1: second"],
        "concat must fully drain an inner flow before starting the next"
    );
    assert_eq!(merged.len(), 6);
    assert!(
        concat_elapsed >= Duration::from_millis(1100),
        "sequential draining pays every inner delay in turn, took {concat_elapsed:?}"
    );
    assert!(
        merge_elapsed < concat_elapsed,
        "merged inner flows overlap, so the total must shrink \
         (merged {merge_elapsed:?} vs concatenated {concat_elapsed:?})"
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn a_new_outer_value_cancels_the_in_flight_inner_flow() {
    let cx = TaskContext::detached();
    let out = flow(|emitter| async move {
        for i in 1..=3u64 {
            emitter.emit(i).await;
            sleep(Duration::from_millis(50)).await;
        }
        Ok(())
    })
    .flat_map_latest(|i| two_part(i, Duration::from_millis(200)))
    .to_vec(&cx)
    .await
    .expect("flow completes");

    assert_eq!(
        out,
        vec!["1: first", "2: first", "3: first", "3: second"],
        "only the last inner flow may run to completion"
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn collect_latest_restarts_the_handler_on_a_new_value() {
    let cx = TaskContext::detached();
    let started = Arc::new(Mutex::new(Vec::new()));
    let finished = Arc::new(Mutex::new(Vec::new()));
    let started_cl = Arc::clone(&started);
    let finished_cl = Arc::clone(&finished);

    flow(|emitter| async move {
        for i in 1..=3u64 {
            emitter.emit(i).await;
            sleep(Duration::from_millis(30)).await;
        }
        Ok(())
    })
    .collect_latest(&cx, move |value| {
        let started = Arc::clone(&started_cl);
        let finished = Arc::clone(&finished_cl);
        async move {
            started.lock().unwrap().push(value);
            sleep(Duration::from_millis(120)).await;
            finished.lock().unwrap().push(value);
        }
    })
    .await
    .expect("flow completes");

    assert_eq!(
        started.lock().unwrap().clone(),
        vec![1, 2, 3],
        "every value must start a handler run"
    );
    assert_eq!(
        finished.lock().unwrap().clone(),
        vec![3],
        "handlers overtaken by a newer value must be cancelled before finishing"
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn catch_only_intercepts_upstream_failures() {
    let cx = TaskContext::detached();

    // Upstream failure: the fallback takes over.
    let recovered = flow(|emitter| async move {
        emitter.emit(1).await;
        fail::<()>("source broke")
    })
    .catch(|_error| flow_of(vec![99]))
    .to_vec(&cx)
    .await;
    assert_eq!(recovered, Ok(vec![1, 99]));

    // Downstream failure: composed after the catch, so it must pass through.
    let out = flow_of(vec![1, 2, 3])
        .catch(|_error| flow_of(vec![0]))
        .transform(|n, emitter| async move {
            if n == 2 {
                return fail("downstream stage broke");
            }
            emitter.emit(n).await;
            Ok(())
        })
        .to_vec(&cx)
        .await;
    assert!(
        matches!(out, Err(TaskError::Failed(_))),
        "a downstream failure must bypass the upstream catch, got {out:?}"
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn on_completion_reports_the_terminating_failure() {
    let cx = TaskContext::detached();
    let cause = Arc::new(Mutex::new(None));
    let cause_cl = Arc::clone(&cause);

    let out = flow(|emitter| async move {
        emitter.emit(1).await;
        fail::<()>("generator broke")
    })
    .on_completion(move |c| {
        *cause_cl.lock().unwrap() = c.map(|error| error.to_string());
    })
    .to_vec(&cx)
    .await;

    assert!(
        matches!(out, Err(TaskError::Failed(_))),
        "on_completion must not suppress propagation"
    );
    assert_eq!(
        cause.lock().unwrap().as_deref(),
        Some("task failed: generator broke")
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn a_cancelled_collector_stops_between_items() {
    let cx = TaskContext::detached().child();
    let token = cx.token().clone();

    let out = paced(Duration::from_millis(30))
        .collect(&cx, move |value| {
            if value == 3 {
                token.cancel();
            }
            async {}
        })
        .await;
    assert_eq!(
        out,
        Err(TaskError::Cancelled),
        "the terminal operator must honor the caller's cancellation"
    );
}
