//! Structured scopes: tasks are owned, and a scope only finishes once
//! every child has.

use std::time::{Duration, Instant};

use taskscope::{Outcome, TaskConfig, run};

fn main() {
    let started = Instant::now();
    let stamp = move || started.elapsed().as_millis();

    let outcome: Outcome<()> = run(TaskConfig::new().named("scopes"), |scope, _cx| async move {
        println!("[{:>4} ms] root scope '{}' is up", stamp(), scope.name());

        // Children finish in their own time; join waits for all of them.
        for i in 1..=3u64 {
            let _ = scope.launch_with(
                TaskConfig::new().named(format!("worker-{i}")),
                move |cx| async move {
                    cx.sleep(Duration::from_millis(80 * i)).await?;
                    println!("[{:>4} ms] worker-{i} done", stamp());
                    Ok(())
                },
            )?;
        }

        // A nested scope joins its own children before handing back a value.
        let combined = scope
            .enter(TaskConfig::new().named("nested"), |inner| async move {
                let left = inner.launch(|cx| async move {
                    cx.sleep(Duration::from_millis(120)).await?;
                    Ok(20)
                })?;
                let right = inner.launch(|cx| async move {
                    cx.sleep(Duration::from_millis(60)).await?;
                    Ok(22)
                })?;
                Ok(left.await? + right.await?)
            })
            .await?;
        println!("[{:>4} ms] nested scope combined: {combined}", stamp());

        // An awaited handle yields the child's own outcome.
        let greeting = scope.launch(|cx| async move {
            cx.sleep(Duration::from_millis(50)).await?;
            Ok("hello from a child task")
        })?;
        println!("[{:>4} ms] {}", stamp(), greeting.await?);

        Ok(())
    });

    println!("[{:>4} ms] root joined: {outcome:?}", stamp());
}
