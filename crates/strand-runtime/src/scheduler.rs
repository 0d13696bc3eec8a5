//! Suspension points available to coroutines
//!
//! Everything here degrades gracefully on a plain thread: sleeping and
//! yielding fall back to the OS equivalents, so library code can call
//! them without knowing where it runs.

use std::os::fd::RawFd;
use std::time::Duration;

use strand_core::{
    CoroutineState, Deadline, Interest, SchedError, SchedResult, TaskRef, Waiter, WaiterKey,
};
use tracing::debug;

use crate::poller::WaiterRef;
use crate::tls;
use crate::worker::Core;

/// True inside a coroutine, false on any native thread (including the
/// worker's own scheduling loop)
#[inline]
pub fn is_in_coroutine() -> bool {
    tls::with_core(|core| core.current().is_some()).unwrap_or(false)
}

/// The running coroutine and its core, if any
#[inline]
pub fn current_task() -> Option<TaskRef> {
    tls::with_core(|core| core.current_task()).flatten()
}

/// Run `f` with the current core, but only from inside a coroutine
#[inline]
pub(crate) fn with_coroutine<R>(f: impl FnOnce(&Core) -> R) -> Option<R> {
    tls::with_core(|core| core.current().map(|_| f(core))).flatten()
}

/// Give every other ready coroutine on this core a turn
pub fn yield_now() {
    if with_coroutine(|core| core.switch_out(CoroutineState::Ready)).is_none() {
        std::thread::yield_now();
    }
}

/// Suspend the calling coroutine for `duration` (blocks a plain thread)
pub fn sleep(duration: Duration) {
    if !is_in_coroutine() {
        std::thread::sleep(duration);
        return;
    }
    sleep_until(Deadline::after(Some(duration)));
}

/// Microsecond variant of [`sleep`]
pub fn sleep_us(usec: u64) {
    sleep(Duration::from_micros(usec));
}

fn sleep_until(deadline: Deadline) {
    let done = with_coroutine(|core| match new_waiter(core, Interest::NONE) {
        Ok(key) => {
            wait_on(core, &[key], deadline);
            remove_waiter(core, key);
            true
        }
        Err(e) => {
            debug!(error = %e, "sleep without a waiter slot, yielding until deadline");
            false
        }
    });

    if done == Some(false) {
        while !deadline.expired(strand_core::now_ms()) {
            yield_now();
        }
    }
}

/// Add a waiter owned by the running coroutine to this core's list
pub(crate) fn new_waiter(core: &Core, interest: Interest) -> SchedResult<WaiterKey> {
    let owner = core.current().ok_or(SchedError::NotInCoroutine)?;
    core.local().waiters.lock().insert(Waiter::new(owner, interest))
}

pub(crate) fn remove_waiter(core: &Core, key: WaiterKey) {
    core.local().waiters.lock().remove(key);
}

/// Arm `keys` and suspend until one of them fires or `deadline` passes.
///
/// Returns the union of what the waiters observed; empty means the
/// deadline passed. Nothing is retried on the caller's behalf.
pub(crate) fn wait_on(core: &Core, keys: &[WaiterKey], deadline: Deadline) -> Interest {
    let waiters = &core.local().waiters;

    let satisfied = {
        let mut list = waiters.lock();
        keys.iter().fold(false, |any, key| list.arm(*key, deadline) | any)
    };
    if !satisfied {
        core.switch_out(CoroutineState::Suspended);
    }

    let mut list = waiters.lock();
    keys.iter().fold(Interest::NONE, |seen, key| seen | list.disarm(*key))
}

/// Suspend until `fd` reports `interest` (or error/hangup) or `deadline` passes.
///
/// Registers `fd` with the poller for the duration of the wait unless it is
/// already registered (sockets keep a registration for their lifetime).
pub(crate) fn wait_fd(
    core: &Core,
    fd: RawFd,
    interest: Interest,
    deadline: Deadline,
) -> SchedResult<Interest> {
    let shared = core.shared();
    let owned = shared.poller.try_register(fd, crate::poller::Kind::Socket);

    let key = match new_waiter(core, interest) {
        Ok(key) => key,
        Err(e) => {
            if owned {
                shared.poller.unregister(fd);
            }
            return Err(e);
        }
    };
    let waiter = WaiterRef { core: core.index(), key };
    shared.poller.add_waiter(&shared.cores, fd, waiter);

    let seen = wait_on(core, &[key], deadline);

    shared.poller.remove_waiter(fd, waiter);
    remove_waiter(core, key);
    if owned {
        shared.poller.unregister(fd);
    }
    Ok(seen)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use crate::runtime::Runtime;
    use std::sync::{Arc, Mutex};
    use std::time::Instant;

    fn runtime(workers: usize) -> Runtime {
        Runtime::new(RuntimeConfig::new().workers(workers)).unwrap()
    }

    #[test]
    fn test_is_in_coroutine() {
        assert!(!is_in_coroutine());
        assert!(current_task().is_none());

        let rt = runtime(1);
        let (inside, task) = rt.block_on(|| (is_in_coroutine(), current_task())).unwrap();
        assert!(inside);
        assert_eq!(task.map(|t| t.core), Some(0));
    }

    #[test]
    fn test_yield_interleaves_in_queue_order() {
        let rt = runtime(1);
        let log = Arc::new(Mutex::new(Vec::new()));

        let log2 = Arc::clone(&log);
        rt.block_on(move || {
            let handle = crate::runtime::Handle::current();
            let (tx, rx) = std::sync::mpsc::channel();
            for name in ["a", "b"] {
                let log = Arc::clone(&log2);
                let tx = tx.clone();
                handle
                    .spawn_on(0, move || {
                        for i in 0..3 {
                            log.lock().unwrap().push(format!("{name}{i}"));
                            yield_now();
                        }
                        tx.send(()).unwrap();
                    }, 0)
                    .unwrap();
            }
            // Let both finish without blocking this core
            let mut done = 0;
            while done < 2 {
                match rx.try_recv() {
                    Ok(()) => done += 1,
                    Err(_) => yield_now(),
                }
            }
        })
        .unwrap();

        let log = log.lock().unwrap().clone();
        assert_eq!(log, vec!["a0", "b0", "a1", "b1", "a2", "b2"]);
    }

    #[test]
    fn test_sleep_suspends_for_duration() {
        let rt = runtime(1);
        let elapsed = rt
            .block_on(|| {
                let start = Instant::now();
                sleep(Duration::from_millis(30));
                start.elapsed()
            })
            .unwrap();
        assert!(elapsed >= Duration::from_millis(29), "{elapsed:?}");
        assert!(elapsed < Duration::from_secs(2), "{elapsed:?}");
    }

    #[test]
    fn test_sleepers_do_not_block_core() {
        let rt = runtime(1);
        let elapsed = rt
            .block_on(|| {
                let handle = crate::runtime::Handle::current();
                let (tx, rx) = std::sync::mpsc::channel();
                let start = Instant::now();
                for _ in 0..10 {
                    let tx = tx.clone();
                    handle
                        .spawn_on(0, move || {
                            sleep(Duration::from_millis(50));
                            tx.send(()).unwrap();
                        }, 0)
                        .unwrap();
                }
                let mut done = 0;
                while done < 10 {
                    match rx.try_recv() {
                        Ok(()) => done += 1,
                        Err(_) => sleep_us(1000),
                    }
                }
                start.elapsed()
            })
            .unwrap();
        // Ten 50ms sleeps on one core overlap instead of adding up
        assert!(elapsed < Duration::from_millis(400), "{elapsed:?}");
    }

    #[test]
    fn test_plain_thread_fallbacks() {
        let start = Instant::now();
        sleep(Duration::from_millis(5));
        yield_now();
        assert!(start.elapsed() >= Duration::from_millis(5));
    }
}
