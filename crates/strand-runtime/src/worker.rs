//! Scheduler cores
//!
//! One core per worker thread. A core owns its coroutines outright: they
//! live in a thread-confined slab, run only on this thread and are never
//! touched by anyone else, so the slab and ready queue need no locking.
//! The only state shared with other threads is the core's waiter list,
//! inbox and doorbell (see [`CoreShared`](crate::runtime::CoreShared)).
//!
//! The loop is: resume every coroutine that was ready at the start of
//! the pass, scan the waiter list for satisfied or expired waiters, and
//! park until the nearest deadline if nothing became ready.

use std::cell::{Cell, RefCell, UnsafeCell};
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use strand_core::{
    invariant_violation, now_ms, CoroutineId, CoroutineState, SchedError, SchedResult, Slab,
    TaskRef,
};
use tracing::{debug, trace, warn};

use crate::arch::{self, Context};
use crate::dispatch;
use crate::memory::Stack;
use crate::runtime::{CoreShared, RuntimeShared};
use crate::tls;

/// Work handed to a new coroutine
pub(crate) type Task = Box<dyn FnOnce() + Send + 'static>;

struct Coroutine {
    context: UnsafeCell<Context>,
    state: Cell<CoroutineState>,
    entry: Cell<Option<Task>>,
    stack: Stack,
}

pub(crate) struct Core {
    index: usize,
    shared: Arc<RuntimeShared>,
    /// Boxed so a coroutine's context keeps its address while the slab grows
    tasks: RefCell<Slab<Box<Coroutine>>>,
    ready: RefCell<VecDeque<CoroutineId>>,
    /// Registers of the native thread while a coroutine runs
    main: UnsafeCell<Context>,
    current: Cell<Option<CoroutineId>>,
}

impl Core {
    fn new(index: usize, shared: Arc<RuntimeShared>) -> Self {
        let capacity = shared.config.ready_queue_capacity;
        Self {
            index,
            shared,
            tasks: RefCell::new(Slab::with_capacity(capacity)),
            ready: RefCell::new(VecDeque::with_capacity(capacity)),
            main: UnsafeCell::new(Context::default()),
            current: Cell::new(None),
        }
    }

    #[inline]
    pub(crate) fn index(&self) -> usize {
        self.index
    }

    #[inline]
    pub(crate) fn shared(&self) -> &Arc<RuntimeShared> {
        &self.shared
    }

    #[inline]
    pub(crate) fn local(&self) -> &CoreShared {
        &self.shared.cores[self.index]
    }

    /// Coroutine currently running on this core
    #[inline]
    pub(crate) fn current(&self) -> Option<CoroutineId> {
        self.current.get()
    }

    #[inline]
    pub(crate) fn current_task(&self) -> Option<TaskRef> {
        self.current.get().map(|id| TaskRef::new(self.index, id))
    }

    /// Create a coroutine on this core and queue it.
    ///
    /// The slab is sized to the ready-queue capacity, so once it is full
    /// the spawn is rejected with `Busy` and a queued coroutine can never
    /// be refused a slot later.
    pub(crate) fn spawn(&self, task: Task, stack_hint: usize) -> SchedResult<CoroutineId> {
        let stats = &self.shared.stats;

        if self.tasks.borrow().is_full() {
            stats.busy_rejections.fetch_add(1, Ordering::Relaxed);
            return Err(SchedError::Busy);
        }

        let size = if stack_hint == 0 { self.shared.config.stack_size } else { stack_hint };
        let stack = Stack::new(size)?;

        let co = Box::new(Coroutine {
            context: UnsafeCell::new(Context::default()),
            state: Cell::new(CoroutineState::Ready),
            entry: Cell::new(Some(task)),
            stack,
        });
        // Safety: nothing else references the new context yet
        unsafe {
            (*co.context.get()).prepare(co.stack.top(), coroutine_entry, self as *const Core as usize);
        }

        let key = self.tasks.borrow_mut().insert(co).map_err(|_| {
            stats.busy_rejections.fetch_add(1, Ordering::Relaxed);
            SchedError::Busy
        })?;
        let id = CoroutineId::from_key(key);
        self.ready.borrow_mut().push_back(id);

        stats.spawned.fetch_add(1, Ordering::Relaxed);
        trace!(core = self.index, %id, "spawned");
        Ok(id)
    }

    /// Move a suspended coroutine back to the ready queue
    fn make_ready(&self, id: CoroutineId) {
        let tasks = self.tasks.borrow();
        if let Some(co) = tasks.get(id.key()) {
            if co.state.get() == CoroutineState::Suspended {
                co.state.set(CoroutineState::Ready);
                self.ready.borrow_mut().push_back(id);
            }
        }
    }

    /// Switch from the core loop into a coroutine and deal with how it came back
    fn resume(&self, id: CoroutineId) {
        let ctx = {
            let tasks = self.tasks.borrow();
            let Some(co) = tasks.get(id.key()) else {
                return;
            };
            if !co.state.get().is_runnable() {
                warn!(core = self.index, %id, state = ?co.state.get(), "queued coroutine not runnable");
                return;
            }
            co.state.set(CoroutineState::Running);
            co.context.get() as *const Context
        };

        self.current.set(Some(id));
        // Safety: ctx points into a boxed coroutine that stays in the slab
        // until it reports Done below
        unsafe { arch::switch(self.main.get(), ctx) };
        self.current.set(None);

        let state = self.tasks.borrow().get(id.key()).map(|co| co.state.get());
        match state {
            Some(CoroutineState::Ready) => self.ready.borrow_mut().push_back(id),
            Some(CoroutineState::Suspended) => {}
            Some(CoroutineState::Done) => {
                // Unmaps the stack
                let co = self.tasks.borrow_mut().remove(id.key());
                drop(co);
                self.shared.stats.completed.fetch_add(1, Ordering::Relaxed);
                trace!(core = self.index, %id, "finished");
            }
            Some(CoroutineState::Running) => {
                warn!(core = self.index, %id, "coroutine switched out while running");
                self.ready.borrow_mut().push_back(id);
            }
            None => {}
        }
    }

    /// Leave the running coroutine in `state` and return to the core loop.
    ///
    /// Returns when the core resumes this coroutine again.
    pub(crate) fn switch_out(&self, state: CoroutineState) {
        let Some(id) = self.current.get() else {
            invariant_violation("switch_out called outside a coroutine");
        };
        let ctx = {
            let tasks = self.tasks.borrow();
            let Some(co) = tasks.get(id.key()) else {
                invariant_violation("running coroutine missing from its core");
            };
            co.state.set(state);
            co.context.get()
        };
        // Safety: the main context was saved by resume() on this thread
        unsafe { arch::switch(ctx, self.main.get()) };
    }

    fn run(&self) {
        let shared = &self.shared;
        let mut fired = Vec::new();

        loop {
            // Only what was ready at the start of the pass; requeued
            // coroutines wait for the next one
            let pass = self.ready.borrow().len();
            for _ in 0..pass {
                let next = self.ready.borrow_mut().pop_front();
                match next {
                    Some(id) => self.resume(id),
                    None => break,
                }
            }

            // Read the epoch before scanning so a wake in between is not lost
            let seen = shared.parking.epoch();
            let nearest = self.local().waiters.lock().scan(now_ms(), &mut fired);
            for id in fired.drain(..) {
                self.make_ready(id);
            }

            if shared.is_stopping() {
                break;
            }
            if !self.ready.borrow().is_empty() {
                continue;
            }

            shared.parking.park(seen, nearest.remaining(now_ms()));
        }
    }
}

extern "C" fn coroutine_entry(core: usize) -> ! {
    // Safety: spawn() passed the address of the Core that owns this coroutine
    let core = unsafe { &*(core as *const Core) };

    let task = core.current.get().and_then(|id| {
        core.tasks.borrow().get(id.key()).and_then(|co| co.entry.take())
    });

    if let Some(task) = task {
        if let Err(payload) = catch_unwind(AssertUnwindSafe(task)) {
            core.shared.stats.panicked.fetch_add(1, Ordering::Relaxed);
            warn!(core = core.index, "coroutine panicked: {}", panic_message(&*payload));
        }
    }

    core.switch_out(CoroutineState::Done);
    invariant_violation("finished coroutine was resumed")
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "<non-string panic>"
    }
}

/// Body of a worker thread
pub(crate) fn worker_main(index: usize, shared: Arc<RuntimeShared>) {
    let core = Core::new(index, shared);
    tls::set_core(&core);
    debug!(core = index, "core started");

    if let Err(e) = core.spawn(Box::new(dispatch::request_listener), 0) {
        tracing::error!(core = index, error = %e, "cannot start request listener");
        invariant_violation("request listener spawn failed");
    }

    core.run();

    tls::set_core(std::ptr::null());
    let leftover = core.tasks.borrow().len();
    if leftover > 1 {
        debug!(core = index, leftover, "stopping with unfinished coroutines");
    }
    debug!(core = index, "core stopped");
}
