//! Multi-waiter broadcast event
//!
//! One eventfd, registered with the poller for the event's lifetime.
//! Coroutines that will wait repeatedly register with
//! [`Event::add_waiter`]; a `set` that lands while such a coroutine is
//! busy is remembered by its waiter and makes the next `wait` return at
//! once. Registrations are counted per coroutine, so independent owners
//! in one coroutine each pair their own add with a remove. Unregistered callers get a temporary waiter per `wait` and only
//! see sets that happen while they are suspended.

use std::collections::HashMap;
use std::os::fd::AsRawFd;
use std::time::Duration;

use strand_core::{Deadline, Interest, SchedError, SchedResult, SpinLock, TaskRef, WaiterKey};

use crate::eventfd::EventFd;
use crate::poller::{Kind, WaiterRef};
use crate::runtime::Handle;
use crate::scheduler::{new_waiter, remove_waiter, wait_on, with_coroutine};
use crate::worker::Core;

/// One coroutine's waiter and how many times it was registered
#[derive(Clone, Copy, Debug)]
struct Registration {
    key: WaiterKey,
    count: usize,
}

pub struct Event {
    handle: Handle,
    fd: EventFd,
    waiters: SpinLock<HashMap<TaskRef, Registration>>,
}

impl Event {
    pub fn new(handle: &Handle) -> SchedResult<Self> {
        let fd = EventFd::new()?;
        handle.shared().poller.register(fd.as_raw_fd(), Kind::Synthetic);
        Ok(Self {
            handle: handle.clone(),
            fd,
            waiters: SpinLock::new(HashMap::new()),
        })
    }

    /// Register the calling coroutine.
    ///
    /// Repeated calls share one waiter; each must be matched by a
    /// [`remove_waiter`](Self::remove_waiter) before it is released.
    pub fn add_waiter(&self) -> SchedResult<()> {
        with_coroutine(|core| {
            let task = core.current_task().ok_or(SchedError::NotInCoroutine)?;
            if let Some(reg) = self.waiters.lock().get_mut(&task) {
                reg.count += 1;
                return Ok(());
            }
            let key = self.attach(core)?;
            self.waiters.lock().insert(task, Registration { key, count: 1 });
            Ok(())
        })
        .unwrap_or(Err(SchedError::NotInCoroutine))
    }

    /// Deregister the calling coroutine
    pub fn remove_waiter(&self) {
        if let Some(task) = with_coroutine(|core| core.current_task()).flatten() {
            self.remove_waiter_of(task);
        }
    }

    /// Drop one registration of `task`, from any thread.
    ///
    /// For owners of a registration whose coroutine may already be gone,
    /// such as a consumer handle dropped on another thread. The waiter is
    /// released with the last registration.
    pub fn remove_waiter_of(&self, task: TaskRef) {
        let key = {
            let mut waiters = self.waiters.lock();
            let Some(reg) = waiters.get_mut(&task) else {
                return;
            };
            reg.count -= 1;
            if reg.count > 0 {
                return;
            }
            let key = reg.key;
            waiters.remove(&task);
            key
        };
        self.release(task, key);
    }

    fn release(&self, task: TaskRef, key: WaiterKey) {
        let shared = self.handle.shared();
        shared.poller.remove_waiter(self.fd.as_raw_fd(), WaiterRef { core: task.core, key });
        if let Some(core) = shared.cores.get(task.core) {
            core.waiters.lock().remove(key);
        }
    }

    /// Wake every waiter. Never blocks; sets before a wake coalesce.
    pub fn set(&self) -> SchedResult<()> {
        self.fd.notify()
    }

    /// Suspend until the event is set or `timeout` passes.
    ///
    /// Returns `Ok(true)` if it fired and `Ok(false)` on timeout.
    pub fn wait(&self, timeout: Option<Duration>) -> SchedResult<bool> {
        let deadline = Deadline::after(timeout);
        with_coroutine(|core| {
            let task = core.current_task().ok_or(SchedError::NotInCoroutine)?;
            let registered = self.waiters.lock().get(&task).map(|reg| reg.key);

            let seen = match registered {
                Some(key) => wait_on(core, &[key], deadline),
                None => {
                    let key = self.attach(core)?;
                    let seen = wait_on(core, &[key], deadline);
                    self.detach(core, key);
                    seen
                }
            };
            Ok(!seen.is_empty())
        })
        .unwrap_or(Err(SchedError::NotInCoroutine))
    }

    pub fn waiter_count(&self) -> usize {
        self.waiters.lock().len()
    }

    fn attach(&self, core: &Core) -> SchedResult<WaiterKey> {
        let shared = core.shared();
        let key = new_waiter(core, Interest::READABLE)?;
        shared
            .poller
            .add_waiter(&shared.cores, self.fd.as_raw_fd(), WaiterRef { core: core.index(), key });
        Ok(key)
    }

    fn detach(&self, core: &Core, key: WaiterKey) {
        core.shared()
            .poller
            .remove_waiter(self.fd.as_raw_fd(), WaiterRef { core: core.index(), key });
        remove_waiter(core, key);
    }
}

impl Drop for Event {
    fn drop(&mut self) {
        let regs: Vec<(TaskRef, Registration)> = self.waiters.lock().drain().collect();
        for (task, reg) in regs {
            self.release(task, reg.key);
        }
        self.handle.shared().poller.unregister(self.fd.as_raw_fd());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use crate::runtime::Runtime;
    use crate::scheduler::sleep;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{mpsc, Arc};
    use std::time::Instant;

    #[test]
    fn test_wait_times_out() {
        let rt = Runtime::new(RuntimeConfig::new().workers(1)).unwrap();
        let ev = Arc::new(Event::new(rt.handle()).unwrap());
        let (fired, elapsed) = rt
            .block_on(move || {
                let start = Instant::now();
                let fired = ev.wait(Some(Duration::from_millis(40))).unwrap();
                (fired, start.elapsed())
            })
            .unwrap();
        assert!(!fired);
        assert!(elapsed >= Duration::from_millis(39), "{elapsed:?}");
        assert!(elapsed < Duration::from_secs(2), "{elapsed:?}");
    }

    #[test]
    fn test_set_wakes_all_waiters() {
        let rt = Runtime::new(RuntimeConfig::new().workers(2)).unwrap();
        let ev = Arc::new(Event::new(rt.handle()).unwrap());
        let ready = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = mpsc::channel();

        for i in 0..4 {
            let (ev, ready, tx) = (Arc::clone(&ev), Arc::clone(&ready), tx.clone());
            rt.handle()
                .spawn_on(i % 2, move || {
                    ev.add_waiter().unwrap();
                    ready.fetch_add(1, Ordering::SeqCst);
                    let fired = ev.wait(Some(Duration::from_secs(10))).unwrap();
                    ev.remove_waiter();
                    tx.send(fired).unwrap();
                }, 0)
                .unwrap();
        }
        while ready.load(Ordering::SeqCst) < 4 {
            std::thread::sleep(Duration::from_millis(1));
        }
        ev.set().unwrap();
        for _ in 0..4 {
            assert!(rx.recv_timeout(Duration::from_secs(5)).unwrap());
        }
        assert_eq!(ev.waiter_count(), 0);
    }

    #[test]
    fn test_set_while_busy_is_remembered() {
        let rt = Runtime::new(RuntimeConfig::new().workers(1)).unwrap();
        let ev = Arc::new(Event::new(rt.handle()).unwrap());
        let ev2 = Arc::clone(&ev);
        let fired = rt
            .block_on(move || {
                ev2.add_waiter().unwrap();
                ev2.set().unwrap();
                ev2.set().unwrap();
                // Give the readiness thread time to deliver
                sleep(Duration::from_millis(20));
                let first = ev2.wait(Some(Duration::from_millis(500))).unwrap();
                // Both sets coalesced into the one wake
                let second = ev2.wait(Some(Duration::from_millis(20))).unwrap();
                ev2.remove_waiter();
                (first, second)
            })
            .unwrap();
        assert_eq!(fired, (true, false));
    }

    #[test]
    fn test_registrations_are_counted() {
        let rt = Runtime::new(RuntimeConfig::new().workers(1)).unwrap();
        let ev = Arc::new(Event::new(rt.handle()).unwrap());
        let ev2 = Arc::clone(&ev);
        let (count_after_one_remove, fired) = rt
            .block_on(move || {
                ev2.add_waiter().unwrap();
                ev2.add_waiter().unwrap();
                ev2.remove_waiter();
                let count = ev2.waiter_count();
                // The remaining registration still remembers a set
                ev2.set().unwrap();
                sleep(Duration::from_millis(20));
                let fired = ev2.wait(Some(Duration::from_millis(500))).unwrap();
                ev2.remove_waiter();
                (count, fired)
            })
            .unwrap();
        assert_eq!(count_after_one_remove, 1);
        assert!(fired);
        assert_eq!(ev.waiter_count(), 0);
    }

    #[test]
    fn test_wait_outside_coroutine() {
        let rt = Runtime::new(RuntimeConfig::new().workers(1)).unwrap();
        let ev = Event::new(rt.handle()).unwrap();
        assert_eq!(ev.wait(None), Err(SchedError::NotInCoroutine));
        assert_eq!(ev.add_waiter(), Err(SchedError::NotInCoroutine));
    }
}
