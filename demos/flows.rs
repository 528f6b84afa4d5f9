//! Cold flows: lazily built pipelines that only run when collected.

use std::time::{Duration, Instant};

use taskscope::{Flow, Outcome, TaskConfig, fail, flow, flow_of, run, sleep};

/// Ten values, one every 100 ms. Nothing runs until a collector asks.
fn numbers() -> Flow<u64> {
    flow(|emitter| async move {
        for i in 1..=10u64 {
            sleep(Duration::from_millis(100)).await;
            emitter.emit(i).await;
        }
        Ok(())
    })
}

fn main() {
    let started = Instant::now();
    let stamp = move || started.elapsed().as_millis();

    let outcome: Outcome<()> = run(TaskConfig::new().named("flows"), |_scope, cx| async move {
        // Staged operators compose without evaluating the source.
        let squares = numbers().filter(|n| n % 2 == 0).map(|n| n * n).take(3);
        println!("[{:>4} ms] pipeline built, nothing has run yet", stamp());
        println!("[{:>4} ms] even squares: {:?}", stamp(), squares.to_vec(&cx).await?);

        // An unbuffered collector pays producer delay plus consumer delay
        // per item; a buffer lets the producer run ahead.
        let plain = Instant::now();
        numbers()
            .take(5)
            .collect(&cx, |n| {
                println!("[{:>4} ms] unbuffered got {n}", stamp());
                sleep(Duration::from_millis(200))
            })
            .await?;
        println!("[{:>4} ms] unbuffered run took {:?}", stamp(), plain.elapsed());

        let buffered = Instant::now();
        numbers()
            .take(5)
            .buffer(8)
            .collect(&cx, |n| {
                println!("[{:>4} ms] buffered got {n}", stamp());
                sleep(Duration::from_millis(200))
            })
            .await?;
        println!("[{:>4} ms] buffered run took {:?}", stamp(), buffered.elapsed());

        // Conflation keeps only the latest value for a slow consumer.
        numbers()
            .conflate()
            .collect(&cx, |n| {
                println!("[{:>4} ms] conflated consumer handling {n}", stamp());
                sleep(Duration::from_millis(350))
            })
            .await?;

        // Flattening modes differ in how inner flows overlap.
        let letters = |i: u64| {
            flow(move |emitter| async move {
                emitter.emit(format!("{i}: first")).await;
                sleep(Duration::from_millis(300)).await;
                emitter.emit(format!("{i}: second")).await;
                Ok(())
            })
        };
        let concat = Instant::now();
        let out = flow_of(vec![1u64, 2, 3]).flat_map_concat(letters).to_vec(&cx).await?;
        println!("[{:>4} ms] concat {out:?} in {:?}", stamp(), concat.elapsed());

        let merge = Instant::now();
        let out = flow_of(vec![1u64, 2, 3]).flat_map_merge(16, letters).to_vec(&cx).await?;
        println!("[{:>4} ms] merge  {out:?} in {:?}", stamp(), merge.elapsed());

        // A failing source, rescued upstream and observed at completion.
        let rescued = flow(|emitter| async move {
            emitter.emit(1).await;
            emitter.emit(2).await;
            fail::<()>("source ran dry")
        })
        .catch(move |error| {
            println!("[{:>4} ms] catch saw '{error}', switching to fallback", stamp());
            flow_of(vec![0])
        })
        .on_completion(move |cause| {
            println!("[{:>4} ms] flow completed, cause: {cause:?}", stamp());
        })
        .to_vec(&cx)
        .await?;
        println!("[{:>4} ms] rescued values: {rescued:?}", stamp());

        Ok(())
    });

    println!("[{:>4} ms] root joined: {outcome:?}", stamp());
}
