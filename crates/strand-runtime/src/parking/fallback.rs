//! Condvar-based core parking for platforms without futex

use super::CoreParking;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

pub struct FallbackParking {
    epoch: AtomicU32,
    lock: Mutex<()>,
    condvar: Condvar,
    parked: AtomicUsize,
}

impl FallbackParking {
    pub fn new() -> Self {
        Self {
            epoch: AtomicU32::new(0),
            lock: Mutex::new(()),
            condvar: Condvar::new(),
            parked: AtomicUsize::new(0),
        }
    }
}

impl Default for FallbackParking {
    fn default() -> Self {
        Self::new()
    }
}

impl CoreParking for FallbackParking {
    #[inline]
    fn epoch(&self) -> u32 {
        self.epoch.load(Ordering::Acquire)
    }

    fn park(&self, seen: u32, timeout: Option<Duration>) -> bool {
        let give_up = timeout.map(|t| Instant::now() + t);
        let mut guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        self.parked.fetch_add(1, Ordering::SeqCst);

        while self.epoch.load(Ordering::Acquire) == seen {
            match give_up {
                Some(at) => {
                    let now = Instant::now();
                    if now >= at {
                        break;
                    }
                    guard = self
                        .condvar
                        .wait_timeout(guard, at - now)
                        .map(|(g, _)| g)
                        .unwrap_or_else(|e| e.into_inner().0);
                }
                None => {
                    guard = self.condvar.wait(guard).unwrap_or_else(|e| e.into_inner());
                }
            }
        }

        self.parked.fetch_sub(1, Ordering::SeqCst);
        drop(guard);
        self.epoch.load(Ordering::Acquire) != seen
    }

    fn unpark_all(&self) {
        {
            let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
            self.epoch.fetch_add(1, Ordering::AcqRel);
        }
        self.condvar.notify_all();
    }

    fn parked_count(&self) -> usize {
        self.parked.load(Ordering::Relaxed)
    }
}
