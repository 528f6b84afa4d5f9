//! Channels: producer/consumer pipelines, fan-out, fan-in, overflow
//! policies, select, and a prime sieve built from filter stages.

use std::time::{Duration, Instant};

use taskscope::{Capacity, Overflow, Outcome, RecvError, TaskConfig, channel, fail, run, select};

fn main() {
    let started = Instant::now();
    let stamp = move || started.elapsed().as_millis();

    let outcome: Outcome<()> = run(TaskConfig::new().named("channels"), |scope, cx| async move {
        // A bounded channel decouples producer and consumer rates up to
        // its capacity, then the producer waits.
        let (tx, rx) = channel(Capacity::Bounded(3), Overflow::Suspend);
        let _ = scope.launch(move |cx| async move {
            for i in 1..=6u64 {
                if tx.send(&cx, i).await.is_err() {
                    return fail("consumer went away");
                }
                println!("[{:>4} ms] producer sent {i}", stamp());
            }
            Ok(())
        })?;
        while let Ok(item) = rx.recv(&cx).await {
            println!("[{:>4} ms] consumer got {item}", stamp());
            cx.sleep(Duration::from_millis(100)).await?;
        }

        // Fan-out: competing consumers each take some of the work.
        let (tx, rx) = channel(Capacity::Rendezvous, Overflow::Suspend);
        for worker in 1..=3u64 {
            let rx = rx.clone();
            let _ = scope.launch(move |cx| async move {
                loop {
                    match rx.recv(&cx).await {
                        Ok(job) => println!("[{:>4} ms] worker {worker} took job {job}", stamp()),
                        Err(_) => return Ok(()),
                    }
                }
            })?;
        }
        drop(rx);
        for job in 1..=9u64 {
            if tx.send(&cx, job).await.is_err() {
                return fail("workers went away");
            }
        }
        tx.close();

        // Overflow policies never block; they evict instead.
        let (tx, rx) = channel(Capacity::Bounded(2), Overflow::DropOldest);
        for i in 1..=5u64 {
            let _ = tx.send(&cx, i).await;
        }
        tx.close();
        let mut kept = Vec::new();
        while let Ok(item) = rx.recv(&cx).await {
            kept.push(item);
        }
        println!("[{:>4} ms] drop-oldest kept {kept:?}", stamp());

        // Select: whichever channel produces first wins, fairly.
        let (tx_fast, rx_fast) = channel(Capacity::Unbounded, Overflow::Suspend);
        let (tx_slow, rx_slow) = channel(Capacity::Unbounded, Overflow::Suspend);
        let _ = scope.launch(move |cx| async move {
            for i in 0..4u64 {
                cx.sleep(Duration::from_millis(100)).await?;
                let _ = tx_fast.send(&cx, format!("fast #{i}")).await;
            }
            Ok(())
        })?;
        let _ = scope.launch(move |cx| async move {
            for i in 0..2u64 {
                cx.sleep(Duration::from_millis(250)).await?;
                let _ = tx_slow.send(&cx, format!("slow #{i}")).await;
            }
            Ok(())
        })?;
        for _ in 0..6 {
            match select(&cx, &[&rx_fast, &rx_slow]).await {
                Ok((_, message)) => println!("[{:>4} ms] select won: {message}", stamp()),
                Err(RecvError::Closed) => break,
                Err(other) => return fail(format!("select hit {other:?}")),
            }
        }

        // The classic sieve: each discovered prime becomes a filter stage.
        let (tx, first) = channel(Capacity::Rendezvous, Overflow::Suspend);
        let _ = scope.launch(move |cx| async move {
            let mut n = 2u64;
            loop {
                if tx.send(&cx, n).await.is_err() {
                    return Ok(());
                }
                n += 1;
            }
        })?;
        let mut head = first;
        for _ in 0..10 {
            let prime = match head.recv(&cx).await {
                Ok(p) => p,
                Err(_) => break,
            };
            println!("[{:>4} ms] prime: {prime}", stamp());
            let (next_tx, next_rx) = channel(Capacity::Rendezvous, Overflow::Suspend);
            let upstream = head;
            let _ = scope.launch(move |cx| async move {
                loop {
                    match upstream.recv(&cx).await {
                        Ok(n) if n % prime != 0 => {
                            if next_tx.send(&cx, n).await.is_err() {
                                return Ok(());
                            }
                        }
                        Ok(_) => {}
                        Err(_) => return Ok(()),
                    }
                }
            })?;
            head = next_rx;
        }
        // The sieve stages spin forever otherwise; the scope tears them down.
        scope.cancel();
        Ok(())
    });

    println!("[{:>4} ms] root joined: {outcome:?}", stamp());
}
