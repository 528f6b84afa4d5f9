//! Supervision modes: a failure either takes the whole sibling set down
//! or stays contained to its own handler.

use std::time::{Duration, Instant};

use taskscope::{Outcome, Supervision, TaskConfig, fail, run};

fn main() {
    let started = Instant::now();
    let stamp = move || started.elapsed().as_millis();

    let outcome: Outcome<()> = run(TaskConfig::new().named("supervise"), |scope, _cx| async move {
        // Propagating (the default): one failure cancels the siblings and
        // resurfaces at the nested join.
        let propagated = scope
            .enter(TaskConfig::new().named("propagating"), |inner| async move {
                let _ = inner.launch(|cx| async move {
                    cx.sleep(Duration::from_millis(100)).await?;
                    println!("[{:>4} ms] flaky child gives up", stamp());
                    fail::<()>("flaky child broke")
                })?;
                let steady = inner.launch(|cx| async move {
                    cx.sleep(Duration::from_secs(5)).await?;
                    println!("[{:>4} ms] steady child done (never printed)", stamp());
                    Ok(())
                })?;
                println!("[{:>4} ms] steady sibling ended with {:?}", stamp(), steady.await);
                Ok(())
            })
            .await;
        println!("[{:>4} ms] propagating scope joined: {propagated:?}", stamp());

        // Isolating: the failure goes to the local handler, the sibling
        // keeps running, and the join stays clean.
        let isolated = scope
            .enter(
                TaskConfig::new().named("isolating").supervised(Supervision::Isolating),
                |inner| async move {
                    let _ = inner.launch_supervised(
                        |cx| async move {
                            cx.sleep(Duration::from_millis(100)).await?;
                            fail::<()>("contained breakage")
                        },
                        move |error| {
                            println!("[{:>4} ms] handler observed: {error}", stamp());
                        },
                    )?;
                    let steady = inner.launch(|cx| async move {
                        cx.sleep(Duration::from_millis(300)).await?;
                        println!("[{:>4} ms] steady child completes normally", stamp());
                        Ok("steady result")
                    })?;
                    println!("[{:>4} ms] steady sibling ended with {:?}", stamp(), steady.await);
                    Ok(())
                },
            )
            .await;
        println!("[{:>4} ms] isolating scope joined: {isolated:?}", stamp());

        Ok(())
    });

    println!("[{:>4} ms] root joined: {outcome:?}", stamp());
}
