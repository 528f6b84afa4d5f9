//! Dispatchers: where a task's code actually runs, and how to switch
//! context mid-task without losing the call stack.

use std::time::{Duration, Instant};

use taskscope::{Dispatcher, Outcome, TaskConfig, relocate, run};

fn thread_name() -> String {
    std::thread::current().name().unwrap_or("<unnamed>").to_string()
}

fn main() {
    let started = Instant::now();
    let stamp = move || started.elapsed().as_millis();

    let outcome: Outcome<()> = run(TaskConfig::new().named("dispatch"), |scope, cx| async move {
        println!("[{:>4} ms] root runs on '{}'", stamp(), thread_name());

        let compute = scope.launch_with(TaskConfig::new().on(Dispatcher::Compute), |cx| async move {
            println!("[{:>4} ms] compute task on '{}'", stamp(), thread_name());
            cx.sleep(Duration::from_millis(50)).await?;
            println!("[{:>4} ms] compute task resumed on '{}'", stamp(), thread_name());
            Ok(())
        })?;

        let blocking = scope.launch_with(TaskConfig::new().on(Dispatcher::Blocking), |_cx| async move {
            println!("[{:>4} ms] blocking task on '{}'", stamp(), thread_name());
            // Free to hold its thread; the blocking pool is sized for it.
            std::thread::sleep(Duration::from_millis(80));
            println!("[{:>4} ms] blocking task finished on '{}'", stamp(), thread_name());
            Ok(())
        })?;

        // Caller dispatch: the first poll happens right here, before
        // launch even returns; after a suspension it resumes on a worker.
        let inline = scope.launch_with(TaskConfig::new().on(Dispatcher::Caller), |cx| async move {
            println!("[{:>4} ms] caller-dispatched start on '{}'", stamp(), thread_name());
            cx.sleep(Duration::from_millis(30)).await?;
            println!("[{:>4} ms] caller-dispatched resumed on '{}'", stamp(), thread_name());
            Ok(())
        })?;

        // A pinned dispatcher serializes everything on one named thread.
        let pinned = Dispatcher::pinned("clockwork");
        for i in 1..=3u64 {
            let _ = scope.launch_with(TaskConfig::new().on(pinned.clone()), move |_cx| async move {
                println!("[{:>4} ms] pinned job {i} on '{}'", stamp(), thread_name());
                Ok(())
            })?;
        }

        compute.await?;
        blocking.await?;
        inline.await?;

        // Relocation: hop to another context, come back with the result.
        let answer = relocate(&cx, Dispatcher::Blocking, |_sub| async move {
            println!("[{:>4} ms] relocated block on '{}'", stamp(), thread_name());
            std::thread::sleep(Duration::from_millis(60));
            Ok(6 * 7)
        })
        .await?;
        println!("[{:>4} ms] relocation answered {answer} back on '{}'", stamp(), thread_name());

        Ok(())
    });

    println!("[{:>4} ms] root joined: {outcome:?}", stamp());
}
