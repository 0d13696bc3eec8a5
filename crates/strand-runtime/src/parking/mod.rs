//! Core parking
//!
//! Idle cores block here until the readiness thread reports a satisfied
//! waiter or their nearest deadline passes. Wakeups are broadcast: every
//! parked core wakes and re-scans its own waiter list.
//!
//! Lost wakeups are prevented with an epoch word. A core reads `epoch()`
//! *before* scanning its waiters and passes that value to `park`, which
//! returns at once if any `unpark_all` happened in between.

use std::time::Duration;

pub trait CoreParking: Send + Sync {
    /// Current wake epoch
    fn epoch(&self) -> u32;

    /// Block until the epoch moves past `seen` or `timeout` elapses.
    ///
    /// Returns true if woken by `unpark_all`. Callers re-check their work
    /// regardless of the result.
    fn park(&self, seen: u32, timeout: Option<Duration>) -> bool;

    /// Advance the epoch and wake every parked core
    fn unpark_all(&self);

    /// Number of currently parked cores (hint, may be stale)
    fn parked_count(&self) -> usize;
}

cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        mod futex_linux;
        pub use futex_linux::FutexParking as PlatformParking;
    } else {
        mod fallback;
        pub use fallback::FallbackParking as PlatformParking;
    }
}

/// Create the platform's parking primitive
pub fn new_parking() -> Box<dyn CoreParking> {
    Box::new(PlatformParking::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_park_timeout() {
        let parking = new_parking();
        let seen = parking.epoch();
        let start = Instant::now();
        assert!(!parking.park(seen, Some(Duration::from_millis(50))));
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[test]
    fn test_stale_epoch_returns_immediately() {
        let parking = new_parking();
        let seen = parking.epoch();
        parking.unpark_all();

        let start = Instant::now();
        assert!(parking.park(seen, Some(Duration::from_secs(10))));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_unpark_all_wakes_every_core() {
        let parking = Arc::new(PlatformParking::new());
        let seen = parking.epoch();

        let sleepers: Vec<_> = (0..3)
            .map(|_| {
                let parking = Arc::clone(&parking);
                thread::spawn(move || parking.park(seen, Some(Duration::from_secs(10))))
            })
            .collect();

        thread::sleep(Duration::from_millis(50));
        parking.unpark_all();

        for s in sleepers {
            assert!(s.join().unwrap());
        }
    }
}
