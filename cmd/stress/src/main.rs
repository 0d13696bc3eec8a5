//! Stress test - many coroutines contending on one mutex
//!
//! Spawns coroutines on random cores from a coroutine, each taking a
//! shared mutex repeatedly and yielding while holding it. Checks the final
//! count and prints runtime statistics.
//!
//! Usage: stress [coroutines] [increments]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use strand::{sleep, yield_now, Handle, Mutex, Runtime, RuntimeConfig, SchedError};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("STRAND_LOG").unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let coroutines: usize = args.next().and_then(|s| s.parse().ok()).unwrap_or(10_000);
    let increments: usize = args.next().and_then(|s| s.parse().ok()).unwrap_or(10);

    let config = RuntimeConfig::from_env();
    info!(workers = config.workers, coroutines, increments, "starting stress run");

    let rt = match Runtime::new(config) {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "cannot start runtime");
            std::process::exit(1);
        }
    };

    let counter = match Mutex::new(rt.handle(), 0usize) {
        Ok(m) => Arc::new(m),
        Err(e) => {
            error!(error = %e, "cannot create mutex");
            std::process::exit(1);
        }
    };
    let completed = Arc::new(AtomicUsize::new(0));

    let start = Instant::now();
    let (c, d) = (Arc::clone(&counter), Arc::clone(&completed));
    let spawned = rt.block_on(move || spawn_all(coroutines, increments, c, d)).and_then(|r| r);
    let spawned = match spawned {
        Ok(n) => n,
        Err(e) => {
            error!(error = %e, "spawner failed");
            std::process::exit(1);
        }
    };
    let spawn_time = start.elapsed();

    while completed.load(Ordering::Acquire) < spawned {
        if start.elapsed() > Duration::from_secs(60) {
            warn!(done = completed.load(Ordering::Acquire), spawned, "timed out");
            break;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    let total_time = start.elapsed();

    let count = match counter.lock() {
        Ok(guard) => *guard,
        Err(e) => {
            error!(error = %e, "cannot take final lock");
            std::process::exit(1);
        }
    };
    let expected = spawned * increments;
    let stats = rt.handle().stats();

    println!("\n=== Results ===");
    println!("Coroutines:      {}", spawned);
    println!("Counter:         {} (expected {})", count, expected);
    println!("Spawn time:      {:?}", spawn_time);
    println!("Total time:      {:?}", total_time);
    println!(
        "Lock rate:       {:.0} acquisitions/sec",
        expected as f64 / total_time.as_secs_f64()
    );
    println!("Stats:           {:?}", stats);

    rt.shutdown();
    if count != expected {
        error!(count, expected, "mutex lost updates");
        std::process::exit(1);
    }
}

/// Spawn `n` workers, backing off while the target core is busy
fn spawn_all(
    n: usize,
    increments: usize,
    counter: Arc<Mutex<usize>>,
    completed: Arc<AtomicUsize>,
) -> Result<usize, SchedError> {
    let handle = Handle::current();
    let mut busy = 0u64;

    for _ in 0..n {
        loop {
            let (counter, completed) = (Arc::clone(&counter), Arc::clone(&completed));
            let task = move || {
                for _ in 0..increments {
                    match counter.lock() {
                        Ok(mut guard) => {
                            let v = *guard;
                            yield_now();
                            *guard = v + 1;
                        }
                        Err(e) => warn!(error = %e, "lock failed"),
                    }
                }
                completed.fetch_add(1, Ordering::Release);
            };
            match handle.schedule(task, 0) {
                Ok(()) => break,
                Err(SchedError::Busy) => {
                    busy += 1;
                    sleep(Duration::from_millis(1));
                }
                Err(e) => return Err(e),
            }
        }
    }

    info!(spawned = n, busy_retries = busy, "all coroutines spawned");
    Ok(n)
}
