//! Cross-core dispatcher
//!
//! Work is moved between cores by message passing, never by migrating a
//! coroutine. Each core has a bounded inbox, an eventfd doorbell and a
//! request-listener coroutine that performs requests locally and replies
//! with a status.
//!
//! Every originating endpoint (one per core, plus one shared by all plain
//! threads) allows a single request in flight. Concurrent callers on the
//! same endpoint take turns by spin-yielding rather than blocking the OS
//! thread. Replies carry the request's sequence number; a mismatch means
//! the channel is corrupt and the process aborts, since the protocol has
//! no way to resynchronize.

use std::os::fd::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use strand_core::{invariant_violation, Deadline, Interest, SchedError, SchedResult, SpinLock};
use tracing::{trace, warn};

use crate::eventfd::EventFd;
use crate::poller::WaiterRef;
use crate::runtime::RuntimeShared;
use crate::scheduler::{self, new_waiter, remove_waiter, wait_fd, wait_on, with_coroutine};
use crate::tls;
use crate::worker::{Core, Task};

/// Callback run by an I/O watch coroutine once its descriptor is ready
pub(crate) type IoCallback = Box<dyn FnOnce(RawFd, Interest) + Send + 'static>;

pub(crate) enum Action {
    Spawn {
        task: Task,
        stack_hint: usize,
    },
    Watch {
        fd: RawFd,
        interest: Interest,
        callback: IoCallback,
        stack_hint: usize,
    },
}

/// Where the reply goes
pub(crate) enum Origin {
    Core(usize),
    Thread(std::thread::Thread),
}

pub(crate) struct Request {
    seq: u64,
    origin: Origin,
    action: Action,
}

struct Reply {
    seq: u64,
    status: SchedResult<()>,
}

/// Reply slot of an endpoint
#[derive(Default)]
struct Slot {
    reply: Option<Reply>,
    /// Request whose caller stopped waiting; its reply is dropped on arrival
    abandoned: u64,
}

/// One originating endpoint of the request channel
pub(crate) struct Outgoing {
    busy: AtomicBool,
    seq: AtomicU64,
    reply: SpinLock<Slot>,
    /// Reply signal for coroutine callers; plain threads are unparked instead
    signal: Option<EventFd>,
}

impl Outgoing {
    pub(crate) fn for_core() -> SchedResult<Self> {
        Ok(Self::with_signal(Some(EventFd::new()?)))
    }

    pub(crate) fn for_threads() -> Self {
        Self::with_signal(None)
    }

    fn with_signal(signal: Option<EventFd>) -> Self {
        Self {
            busy: AtomicBool::new(false),
            seq: AtomicU64::new(0),
            reply: SpinLock::new(Slot::default()),
            signal,
        }
    }

    pub(crate) fn signal_fd(&self) -> Option<RawFd> {
        self.signal.as_ref().map(|s| s.as_raw_fd())
    }

    /// Take the endpoint, yielding between attempts
    fn acquire(&self, in_coroutine: bool) -> BusyGuard<'_> {
        while self
            .busy
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            if in_coroutine {
                scheduler::yield_now();
            } else {
                std::thread::yield_now();
            }
        }
        BusyGuard(&self.busy)
    }

    fn post(&self, reply: Reply) {
        let mut slot = self.reply.lock();
        if reply.seq == slot.abandoned {
            trace!(seq = reply.seq, "reply to abandoned request dropped");
            return;
        }
        if slot.reply.is_some() {
            invariant_violation("dispatch reply slot already full");
        }
        slot.reply = Some(reply);
    }

    fn take(&self, seq: u64) -> Option<SchedResult<()>> {
        let reply = self.reply.lock().reply.take()?;
        if reply.seq != seq {
            tracing::error!(expected = seq, got = reply.seq, "dispatch reply out of sequence");
            invariant_violation("dispatch reply out of sequence");
        }
        Some(reply.status)
    }

    /// Stop waiting for `seq`, whether or not its reply has been posted yet
    fn abandon(&self, seq: u64) {
        let mut slot = self.reply.lock();
        slot.abandoned = seq;
        if slot.reply.as_ref().is_some_and(|r| r.seq == seq) {
            slot.reply = None;
        }
    }
}

struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Perform `action` on core `target`.
///
/// Runs locally when the caller is a coroutine already on `target`;
/// otherwise the request goes through the target's inbox and the caller
/// waits for the reply (suspending if it is a coroutine).
pub(crate) fn dispatch(shared: &Arc<RuntimeShared>, target: usize, action: Action) -> SchedResult<()> {
    if target >= shared.cores.len() {
        return Err(SchedError::NoSuchCore(target));
    }
    if shared.is_stopping() {
        return Err(SchedError::NotInitialized);
    }

    // Some(core index) when called from a coroutine of this runtime
    let here = with_coroutine(|core| Arc::ptr_eq(core.shared(), shared).then(|| core.index())).flatten();

    match here {
        Some(index) if index == target => {
            let mut action = Some(action);
            with_coroutine(|core| perform(core, action.take()))
                .unwrap_or(Err(SchedError::NotInCoroutine))
        }
        Some(index) => with_coroutine(|core| send_from_core(core, shared, index, target, action))
            .unwrap_or(Err(SchedError::NotInCoroutine)),
        None => send_from_thread(shared, target, action),
    }
}

fn enqueue(shared: &RuntimeShared, target: usize, request: Request) -> SchedResult<()> {
    let core = &shared.cores[target];
    if core.inbox.push(request).is_err() {
        shared.stats.busy_rejections.fetch_add(1, Ordering::Relaxed);
        return Err(SchedError::Busy);
    }
    shared.stats.dispatched.fetch_add(1, Ordering::Relaxed);
    core.doorbell.notify()
}

fn send_from_core(
    core: &Core,
    shared: &Arc<RuntimeShared>,
    origin: usize,
    target: usize,
    action: Action,
) -> SchedResult<()> {
    let out = &shared.cores[origin].outgoing;
    let Some(signal) = out.signal_fd() else {
        invariant_violation("core endpoint without a reply signal");
    };

    let _busy = out.acquire(true);
    let seq = out.seq.fetch_add(1, Ordering::Relaxed) + 1;

    // Attach before sending so the reply signal cannot be missed
    let key = new_waiter(core, Interest::READABLE)?;
    let waiter = WaiterRef { core: origin, key };
    shared.poller.add_waiter(&shared.cores, signal, waiter);

    let result = enqueue(shared, target, Request { seq, origin: Origin::Core(origin), action })
        .and_then(|()| loop {
            if let Some(status) = out.take(seq) {
                break status;
            }
            wait_on(core, &[key], Deadline::NONE);
        });

    shared.poller.remove_waiter(signal, waiter);
    remove_waiter(core, key);
    trace!(origin, target, seq, ok = result.is_ok(), "dispatched from core");
    result
}

fn send_from_thread(shared: &Arc<RuntimeShared>, target: usize, action: Action) -> SchedResult<()> {
    let out = &shared.thread_outgoing;
    let _busy = out.acquire(false);
    let seq = out.seq.fetch_add(1, Ordering::Relaxed) + 1;

    let origin = Origin::Thread(std::thread::current());
    enqueue(shared, target, Request { seq, origin, action })?;

    loop {
        if let Some(status) = out.take(seq) {
            trace!(target, seq, ok = status.is_ok(), "dispatched from thread");
            return status;
        }
        if shared.is_stopping() {
            // The request may still sit in the inbox and be answered later
            out.abandon(seq);
            return Err(SchedError::NotInitialized);
        }
        std::thread::park_timeout(Duration::from_millis(10));
    }
}

/// Carry out an action on the calling core
fn perform(core: &Core, action: Option<Action>) -> SchedResult<()> {
    match action {
        Some(Action::Spawn { task, stack_hint }) => core.spawn(task, stack_hint).map(|_| ()),
        Some(Action::Watch { fd, interest, callback, stack_hint }) => core
            .spawn(Box::new(move || watch_io(fd, interest, callback)), stack_hint)
            .map(|_| ()),
        None => Ok(()),
    }
}

/// Body of an I/O watch coroutine
fn watch_io(fd: RawFd, interest: Interest, callback: IoCallback) {
    let seen = with_coroutine(|core| wait_fd(core, fd, interest, Deadline::NONE));
    match seen {
        Some(Ok(events)) => callback(fd, events),
        Some(Err(e)) => warn!(fd, error = %e, "I/O watch could not wait"),
        None => invariant_violation("I/O watch running outside a coroutine"),
    }
}

/// Body of each core's request-listener coroutine
pub(crate) fn request_listener() {
    if tls::with_core(listen).is_none() {
        invariant_violation("request listener started off a worker thread");
    }
}

fn listen(core: &Core) {
    let shared = Arc::clone(core.shared());
    let local = core.local();

    let key = match new_waiter(core, Interest::READABLE) {
        Ok(key) => key,
        Err(_) => invariant_violation("no waiter slot for the request listener"),
    };
    let waiter = WaiterRef { core: core.index(), key };
    shared.poller.add_waiter(&shared.cores, local.doorbell.as_raw_fd(), waiter);

    loop {
        while let Some(request) = local.inbox.pop() {
            let status = perform(core, Some(request.action));
            let reply = Reply { seq: request.seq, status };
            match request.origin {
                Origin::Core(origin) => {
                    let out = &shared.cores[origin].outgoing;
                    out.post(reply);
                    if let Some(signal) = &out.signal {
                        if let Err(e) = signal.notify() {
                            warn!(origin, error = %e, "reply signal failed");
                        }
                    }
                }
                Origin::Thread(thread) => {
                    shared.thread_outgoing.post(reply);
                    thread.unpark();
                }
            }
        }

        if shared.is_stopping() {
            break;
        }
        wait_on(core, &[key], Deadline::NONE);
    }

    shared.poller.remove_waiter(local.doorbell.as_raw_fd(), waiter);
    remove_waiter(core, key);
}
