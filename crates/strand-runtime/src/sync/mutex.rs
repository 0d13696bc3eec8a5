//! Mutex that suspends coroutines instead of blocking their worker
//!
//! A contended coroutine attaches a waiter to the mutex's eventfd and
//! suspends. Unlock clears the owner and signals the eventfd when anyone
//! is waiting; every waiter wakes and retries, so there is no fairness.
//! Plain threads spin-yield instead.

use std::cell::UnsafeCell;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::os::fd::AsRawFd;
use std::thread::ThreadId;

use strand_core::{Deadline, Interest, SchedResult, SpinLock, TaskRef, WaiterKey};
use tracing::warn;

use crate::eventfd::EventFd;
use crate::poller::{Kind, WaiterRef};
use crate::runtime::Handle;
use crate::scheduler::{current_task, new_waiter, remove_waiter, wait_on, with_coroutine};
use crate::worker::Core;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Owner {
    Task(TaskRef),
    Thread(ThreadId),
}

impl Owner {
    fn current() -> Owner {
        match current_task() {
            Some(task) => Owner::Task(task),
            None => Owner::Thread(std::thread::current().id()),
        }
    }
}

struct LockState {
    owner: Option<Owner>,
    /// Coroutines with a waiter attached to `signal`
    waiting: usize,
}

pub struct Mutex<T> {
    handle: Handle,
    state: SpinLock<LockState>,
    signal: EventFd,
    data: UnsafeCell<T>,
}

// Safety: `data` is only reached through a guard, and guards are handed
// out to one owner at a time under `state`
unsafe impl<T: Send> Send for Mutex<T> {}
unsafe impl<T: Send> Sync for Mutex<T> {}

impl<T> Mutex<T> {
    pub fn new(handle: &Handle, value: T) -> SchedResult<Self> {
        let signal = EventFd::new()?;
        handle.shared().poller.register(signal.as_raw_fd(), Kind::Synthetic);
        Ok(Self {
            handle: handle.clone(),
            state: SpinLock::new(LockState { owner: None, waiting: 0 }),
            signal,
            data: UnsafeCell::new(value),
        })
    }

    /// Acquire the mutex, suspending the calling coroutine while it is held
    pub fn lock(&self) -> SchedResult<MutexGuard<'_, T>> {
        let owner = Owner::current();
        match with_coroutine(|core| self.lock_in_coroutine(core, owner)) {
            Some(result) => result?,
            None => {
                while !self.try_acquire(owner) {
                    std::thread::yield_now();
                }
            }
        }
        Ok(MutexGuard { mutex: self })
    }

    pub fn try_lock(&self) -> Option<MutexGuard<'_, T>> {
        self.try_acquire(Owner::current()).then(|| MutexGuard { mutex: self })
    }

    pub fn is_locked(&self) -> bool {
        self.state.lock().owner.is_some()
    }

    fn try_acquire(&self, owner: Owner) -> bool {
        let mut state = self.state.lock();
        if state.owner.is_none() {
            state.owner = Some(owner);
            true
        } else {
            false
        }
    }

    fn lock_in_coroutine(&self, core: &Core, owner: Owner) -> SchedResult<()> {
        let shared = core.shared();
        let fd = self.signal.as_raw_fd();
        let mut attached: Option<WaiterKey> = None;

        loop {
            let mut state = self.state.lock();
            if state.owner.is_none() {
                state.owner = Some(owner);
                if attached.is_some() {
                    state.waiting -= 1;
                }
                break;
            }

            match attached {
                Some(key) => {
                    drop(state);
                    wait_on(core, &[key], Deadline::NONE);
                }
                None => {
                    // Count ourselves first so an unlock from here on signals;
                    // ownership is re-checked once the waiter is attached
                    state.waiting += 1;
                    drop(state);
                    let key = match new_waiter(core, Interest::READABLE) {
                        Ok(key) => key,
                        Err(e) => {
                            self.state.lock().waiting -= 1;
                            return Err(e);
                        }
                    };
                    shared.poller.add_waiter(&shared.cores, fd, WaiterRef { core: core.index(), key });
                    attached = Some(key);
                }
            }
        }

        if let Some(key) = attached {
            shared.poller.remove_waiter(fd, WaiterRef { core: core.index(), key });
            remove_waiter(core, key);
        }
        Ok(())
    }

    fn unlock(&self) {
        let notify = {
            let mut state = self.state.lock();
            state.owner = None;
            state.waiting > 0
        };
        if notify {
            if let Err(e) = self.signal.notify() {
                warn!(error = %e, "mutex wake signal failed");
            }
        }
    }

    /// Mutable access without locking; `&mut self` proves exclusivity
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }
}

impl<T> Drop for Mutex<T> {
    fn drop(&mut self) {
        self.handle.shared().poller.unregister(self.signal.as_raw_fd());
    }
}

impl<T> fmt::Debug for Mutex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Mutex")
            .field("owner", &state.owner)
            .field("waiting", &state.waiting)
            .finish_non_exhaustive()
    }
}

/// Unlocks on drop
pub struct MutexGuard<'a, T> {
    mutex: &'a Mutex<T>,
}

impl<T> Deref for MutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // Safety: the guard is proof of ownership
        unsafe { &*self.mutex.data.get() }
    }
}

impl<T> DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // Safety: the guard is proof of ownership
        unsafe { &mut *self.mutex.data.get() }
    }
}

impl<T> Drop for MutexGuard<'_, T> {
    fn drop(&mut self) {
        self.mutex.unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use crate::runtime::Runtime;
    use crate::scheduler::{sleep, yield_now};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{mpsc, Arc};
    use std::time::Duration;

    #[test]
    fn test_try_lock_and_guard_release() {
        let rt = Runtime::new(RuntimeConfig::new().workers(1)).unwrap();
        let m = Mutex::new(rt.handle(), 5).unwrap();
        {
            let mut g = m.try_lock().unwrap();
            *g += 1;
            assert!(m.is_locked());
            assert!(m.try_lock().is_none());
        }
        assert!(!m.is_locked());
        assert_eq!(*m.lock().unwrap(), 6);
    }

    #[test]
    fn test_increments_across_cores() {
        const K: usize = 8;
        const M: usize = 200;

        let rt = Runtime::new(RuntimeConfig::new().workers(4)).unwrap();
        let counter = Arc::new(Mutex::new(rt.handle(), 0usize).unwrap());
        let (tx, rx) = mpsc::channel();

        for i in 0..K {
            let counter = Arc::clone(&counter);
            let tx = tx.clone();
            rt.handle()
                .spawn_on(i % 4, move || {
                    for _ in 0..M {
                        let mut g = counter.lock().unwrap();
                        let v = *g;
                        // Suspend while holding the lock to force contention
                        yield_now();
                        *g = v + 1;
                    }
                    tx.send(()).unwrap();
                }, 0)
                .unwrap();
        }
        for _ in 0..K {
            rx.recv_timeout(Duration::from_secs(30)).unwrap();
        }
        assert_eq!(*counter.lock().unwrap(), K * M);
    }

    #[test]
    fn test_contended_coroutine_suspends() {
        let rt = Runtime::new(RuntimeConfig::new().workers(1)).unwrap();
        let m = Arc::new(Mutex::new(rt.handle(), ()).unwrap());
        let progress = Arc::new(AtomicUsize::new(0));

        let (m2, p2) = (Arc::clone(&m), Arc::clone(&progress));
        rt.block_on(move || {
            let guard = m2.lock().unwrap();
            let (m3, p3) = (Arc::clone(&m2), Arc::clone(&p2));
            let (tx, rx) = mpsc::channel();
            crate::runtime::Handle::current()
                .spawn_on(0, move || {
                    let _g = m3.lock().unwrap();
                    p3.store(2, Ordering::SeqCst);
                    tx.send(()).unwrap();
                }, 0)
                .unwrap();

            // The contender is parked on the mutex, not spinning the core
            sleep(Duration::from_millis(20));
            p2.store(1, Ordering::SeqCst);
            drop(guard);
            while rx.try_recv().is_err() {
                sleep(Duration::from_millis(1));
            }
        })
        .unwrap();
        assert_eq!(progress.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_plain_threads_contend() {
        let rt = Runtime::new(RuntimeConfig::new().workers(1)).unwrap();
        let m = Arc::new(Mutex::new(rt.handle(), 0u32).unwrap());
        let threads: Vec<_> = (0..4)
            .map(|_| {
                let m = Arc::clone(&m);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        *m.lock().unwrap() += 1;
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        assert_eq!(*m.lock().unwrap(), 4000);
    }
}
