//! Runtime object and handles
//!
//! A [`Runtime`] owns the worker threads and the readiness thread. It is
//! created explicitly, passed around as a cloneable [`Handle`], and shut
//! down explicitly (or on drop). There is no process-wide scheduler.

use std::os::fd::{AsRawFd, RawFd};
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_queue::ArrayQueue;
use rand::Rng;
use strand_core::{Interest, SchedError, SchedResult, SpinLock, WaiterList};
use tracing::{info, warn};

use crate::config::RuntimeConfig;
use crate::dispatch::{self, Action, Outgoing, Request};
use crate::eventfd::EventFd;
use crate::parking::{new_parking, CoreParking};
use crate::poller::{poller_loop, Kind, Poller};
use crate::tls;
use crate::worker::worker_main;

/// State of one core that other threads may touch
pub(crate) struct CoreShared {
    /// Shared with the readiness thread, which ORs events into it
    pub(crate) waiters: SpinLock<WaiterList>,
    pub(crate) inbox: ArrayQueue<Request>,
    pub(crate) doorbell: EventFd,
    /// Requests originating on this core
    pub(crate) outgoing: Outgoing,
}

impl CoreShared {
    fn new(config: &RuntimeConfig) -> SchedResult<Self> {
        Ok(Self {
            waiters: SpinLock::new(WaiterList::with_capacity(config.waiter_capacity)),
            inbox: ArrayQueue::new(config.dispatch_capacity),
            doorbell: EventFd::new()?,
            outgoing: Outgoing::for_core()?,
        })
    }
}

#[derive(Default)]
pub(crate) struct StatsCounters {
    pub(crate) spawned: AtomicU64,
    pub(crate) completed: AtomicU64,
    pub(crate) panicked: AtomicU64,
    pub(crate) busy_rejections: AtomicU64,
    pub(crate) dispatched: AtomicU64,
}

/// Snapshot of runtime counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    /// Coroutines created (request listeners included)
    pub spawned: u64,
    pub completed: u64,
    /// Coroutines whose closure panicked
    pub panicked: u64,
    /// Spawns refused because a ready queue or inbox was full
    pub busy_rejections: u64,
    /// Requests sent through a core's inbox
    pub dispatched: u64,
}

pub(crate) struct RuntimeShared {
    pub(crate) config: RuntimeConfig,
    pub(crate) cores: Box<[CoreShared]>,
    pub(crate) poller: Poller,
    pub(crate) parking: Box<dyn CoreParking>,
    /// Requests originating on plain threads
    pub(crate) thread_outgoing: Outgoing,
    pub(crate) stats: StatsCounters,
    stopping: AtomicBool,
}

impl RuntimeShared {
    #[inline]
    pub(crate) fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::Acquire)
    }
}

/// Cheap cloneable reference to a running [`Runtime`]
#[derive(Clone)]
pub struct Handle {
    shared: Arc<RuntimeShared>,
}

impl std::fmt::Debug for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handle").field("workers", &self.workers()).finish()
    }
}

impl Handle {
    /// Handle of the runtime running the calling coroutine.
    ///
    /// # Panics
    ///
    /// Panics when called from outside a worker thread.
    pub fn current() -> Handle {
        match Self::try_current() {
            Some(handle) => handle,
            None => panic!("Handle::current() called outside a strand worker thread"),
        }
    }

    pub fn try_current() -> Option<Handle> {
        tls::with_core(|core| Handle { shared: Arc::clone(core.shared()) })
    }

    #[inline]
    pub(crate) fn shared(&self) -> &Arc<RuntimeShared> {
        &self.shared
    }

    pub fn workers(&self) -> usize {
        self.shared.cores.len()
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.shared.config
    }

    /// False once shutdown has begun
    pub fn is_running(&self) -> bool {
        !self.shared.is_stopping()
    }

    /// Spawn `f` as a coroutine on a core picked uniformly at random.
    ///
    /// `stack_hint` of 0 uses the configured stack size. Returns `Busy`
    /// when the target core has no room; nothing is queued in that case.
    pub fn schedule<F>(&self, f: F, stack_hint: usize) -> SchedResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.spawn_on(self.random_core(), f, stack_hint)
    }

    /// Spawn `f` as a coroutine on a specific core
    pub fn spawn_on<F>(&self, core: usize, f: F, stack_hint: usize) -> SchedResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        dispatch::dispatch(&self.shared, core, Action::Spawn { task: Box::new(f), stack_hint })
    }

    /// Spawn a coroutine on a random core that waits for `fd` to report
    /// `interest` and then calls `callback(fd, observed)`.
    ///
    /// Error and hangup are always reported. The descriptor must stay open
    /// until the callback runs.
    pub fn schedule_io<F>(&self, fd: RawFd, interest: Interest, callback: F, stack_hint: usize) -> SchedResult<()>
    where
        F: FnOnce(RawFd, Interest) + Send + 'static,
    {
        let action = Action::Watch { fd, interest, callback: Box::new(callback), stack_hint };
        dispatch::dispatch(&self.shared, self.random_core(), action)
    }

    fn random_core(&self) -> usize {
        rand::thread_rng().gen_range(0..self.shared.cores.len())
    }

    pub fn stats(&self) -> Stats {
        let s = &self.shared.stats;
        Stats {
            spawned: s.spawned.load(Ordering::Relaxed),
            completed: s.completed.load(Ordering::Relaxed),
            panicked: s.panicked.load(Ordering::Relaxed),
            busy_rejections: s.busy_rejections.load(Ordering::Relaxed),
            dispatched: s.dispatched.load(Ordering::Relaxed),
        }
    }
}

/// The scheduler: N worker threads plus one readiness thread
pub struct Runtime {
    handle: Handle,
    workers: Vec<JoinHandle<()>>,
    poller: Option<JoinHandle<()>>,
}

impl Runtime {
    /// Start a runtime with `config.workers` cores
    pub fn new(config: RuntimeConfig) -> SchedResult<Runtime> {
        config.validate()?;

        let cores = (0..config.workers)
            .map(|_| CoreShared::new(&config))
            .collect::<SchedResult<Vec<_>>>()?
            .into_boxed_slice();

        let shared = Arc::new(RuntimeShared {
            poller: Poller::new()?,
            parking: new_parking(),
            thread_outgoing: Outgoing::for_threads(),
            stats: StatsCounters::default(),
            stopping: AtomicBool::new(false),
            cores,
            config,
        });

        for core in shared.cores.iter() {
            shared.poller.register(core.doorbell.as_raw_fd(), Kind::Synthetic);
            if let Some(fd) = core.outgoing.signal_fd() {
                shared.poller.register(fd, Kind::Synthetic);
            }
        }

        let mut runtime = Runtime {
            handle: Handle { shared: Arc::clone(&shared) },
            workers: Vec::with_capacity(shared.cores.len()),
            poller: None,
        };

        // On error, dropping `runtime` stops whatever already started
        let poller_shared = Arc::clone(&shared);
        runtime.poller = Some(
            thread::Builder::new()
                .name("strand-poller".into())
                .spawn(move || poller_loop(&poller_shared))?,
        );

        for index in 0..shared.cores.len() {
            let worker_shared = Arc::clone(&shared);
            runtime.workers.push(
                thread::Builder::new()
                    .name(format!("strand-core-{}", index))
                    .spawn(move || worker_main(index, worker_shared))?,
            );
        }

        info!(workers = shared.cores.len(), "runtime started");
        Ok(runtime)
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Run `f` in a coroutine on some core and wait for its result.
    ///
    /// A panic inside `f` is re-raised on the caller. Must be called from a
    /// plain thread: blocking a worker would stall every coroutine on it.
    pub fn block_on<F, R>(&self, f: F) -> SchedResult<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        assert!(!tls::on_worker(), "Runtime::block_on called from a worker thread");

        let (tx, rx) = std::sync::mpsc::sync_channel(1);
        self.handle.schedule(
            move || {
                let result = catch_unwind(AssertUnwindSafe(f));
                let _ = tx.send(result);
            },
            0,
        )?;

        match rx.recv() {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(payload)) => resume_unwind(payload),
            // The coroutine was dropped unrun: the runtime stopped
            Err(_) => Err(SchedError::NotInitialized),
        }
    }

    /// Stop all cores and the readiness thread, then join them.
    ///
    /// Suspended coroutines are not resumed; their stacks are released.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if self.workers.is_empty() && self.poller.is_none() {
            return;
        }
        let shared = &self.handle.shared;
        shared.stopping.store(true, Ordering::Release);

        for core in shared.cores.iter() {
            let _ = core.doorbell.notify();
        }
        shared.parking.unpark_all();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                warn!("worker thread panicked");
            }
        }

        shared.poller.stop();
        if let Some(poller) = self.poller.take() {
            if poller.join().is_err() {
                warn!("poller thread panicked");
            }
        }

        let stats = self.handle.stats();
        info!(spawned = stats.spawned, completed = stats.completed, "runtime stopped");
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.stop();
    }
}
