//! Cooperative cancellation: suspension points and explicit checkpoints
//! are where it lands; a loop that never yields is not interrupted.

use std::time::{Duration, Instant};

use taskscope::{Outcome, TaskConfig, TaskError, run, timeout, timeout_or_none};

fn main() {
    let started = Instant::now();
    let stamp = move || started.elapsed().as_millis();

    let outcome: Outcome<()> = run(TaskConfig::new().named("cancel"), |scope, cx| async move {
        // A sleeper observes cancellation at its suspension point.
        let sleeper = scope.launch(|cx| async move {
            println!("[{:>4} ms] sleeper: waiting ten seconds", stamp());
            cx.sleep(Duration::from_secs(10)).await?;
            println!("[{:>4} ms] sleeper: never printed", stamp());
            Ok(())
        })?;
        cx.sleep(Duration::from_millis(200)).await?;
        sleeper.cancel();
        println!("[{:>4} ms] sleeper ended with {:?}", stamp(), sleeper.await);

        // A compute loop stays alive until it polls its own liveness.
        let cruncher = scope.launch(|cx| async move {
            let mut spins = 0u64;
            while !cx.is_cancelled() {
                spins += 1;
            }
            println!("[{:>4} ms] cruncher: stopped itself after {spins} spins", stamp());
            Ok(spins)
        })?;
        cx.sleep(Duration::from_millis(300)).await?;
        cruncher.cancel();
        println!("[{:>4} ms] cruncher ended with {:?}", stamp(), cruncher.await);

        // Deadlines are cancellation with a timer attached.
        let timed: Outcome<&str> = timeout(&cx, Duration::from_millis(150), |sub| async move {
            sub.sleep(Duration::from_secs(1)).await?;
            Ok("finished in time")
        })
        .await;
        println!("[{:>4} ms] strict deadline: {timed:?}", stamp());

        let soft = timeout_or_none(&cx, Duration::from_millis(150), |sub| async move {
            sub.sleep(Duration::from_secs(1)).await?;
            Ok("finished in time")
        })
        .await?;
        println!("[{:>4} ms] soft deadline: {soft:?}", stamp());

        // A shielded section finishes its cleanup before the pending
        // request is honored.
        let guarded = scope.launch(|cx| async move {
            let interrupted = cx.sleep(Duration::from_secs(10)).await;
            if interrupted == Err(TaskError::Cancelled) {
                cx.shielded(|inner| async move {
                    println!("[{:>4} ms] guarded: releasing resources", stamp());
                    let _ = inner.sleep(Duration::from_millis(100)).await;
                    println!("[{:>4} ms] guarded: cleanup complete", stamp());
                })
                .await;
            }
            cx.checkpoint()
        })?;
        cx.sleep(Duration::from_millis(100)).await?;
        guarded.cancel();
        println!("[{:>4} ms] guarded ended with {:?}", stamp(), guarded.await);

        Ok(())
    });

    println!("[{:>4} ms] root joined: {outcome:?}", stamp());
}
