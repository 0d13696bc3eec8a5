//! Readiness event manager
//!
//! One epoll instance per runtime, driven by one dedicated thread. Each
//! registered descriptor keeps the list of waiters that share it; when
//! epoll reports the descriptor ready, the observed bits are ORed into
//! every waiter and, if any armed waiter became satisfied, all parked
//! cores are woken so each can re-scan its own waiter list.
//!
//! Two kinds of descriptors are registered:
//!
//! - **Synthetic** eventfds (mutex, event, dispatch channels) are
//!   level-triggered and drained here, so one readiness report covers any
//!   number of coalesced writes.
//! - **Sockets** are edge-triggered. An edge no waiter wanted is retained
//!   and handed to the next waiter added for it, which closes the window
//!   between a would-block syscall and the waiter being registered.
//!
//! `epoll_ctl(ADD)` and `epoll_wait` failures are invariant violations:
//! correct callers never trigger them, so the process aborts.

use std::collections::HashMap;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::sync::{Mutex, MutexGuard, PoisonError};

use strand_core::{invariant_violation, Interest, SchedError, SchedResult, WaiterKey};
use tracing::{debug, trace};

use crate::eventfd::EventFd;
use crate::runtime::{CoreShared, RuntimeShared};

/// How a descriptor is watched
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Kind {
    /// Runtime-owned eventfd; drained by the readiness thread
    Synthetic,
    /// Caller's socket (or any pollable fd); edge-triggered
    Socket,
}

/// A waiter living in some core's waiter list
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct WaiterRef {
    pub core: usize,
    pub key: WaiterKey,
}

struct Registration {
    kind: Kind,
    /// Socket edges that no waiter has consumed yet
    retained: Interest,
    waiters: Vec<WaiterRef>,
}

pub(crate) struct Poller {
    epfd: OwnedFd,
    stop: EventFd,
    registrations: Mutex<HashMap<RawFd, Registration>>,
}

impl Poller {
    pub(crate) fn new() -> SchedResult<Self> {
        let fd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if fd < 0 {
            return Err(SchedError::last_os_error());
        }
        // Safety: freshly created descriptor, owned from here on
        let epfd = unsafe { OwnedFd::from_raw_fd(fd) };
        let stop = EventFd::new()?;

        let poller = Self {
            epfd,
            stop,
            registrations: Mutex::new(HashMap::new()),
        };
        poller.ctl(libc::EPOLL_CTL_ADD, poller.stop.as_raw_fd(), libc::EPOLLIN as u32)?;
        Ok(poller)
    }

    fn ctl(&self, op: libc::c_int, fd: RawFd, events: u32) -> SchedResult<()> {
        let mut ev = libc::epoll_event { events, u64: fd as u64 };
        let ret = unsafe { libc::epoll_ctl(self.epfd.as_raw_fd(), op, fd, &mut ev) };
        if ret < 0 {
            return Err(SchedError::last_os_error());
        }
        Ok(())
    }

    #[inline]
    fn registrations(&self) -> MutexGuard<'_, HashMap<RawFd, Registration>> {
        self.registrations.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start watching `fd`. Aborts if the kernel refuses.
    pub(crate) fn register(&self, fd: RawFd, kind: Kind) {
        if !self.try_register(fd, kind) {
            invariant_violation("descriptor registered twice with the poller");
        }
    }

    /// Start watching `fd` unless it is already registered.
    ///
    /// Returns true if this call added the registration (and the caller
    /// therefore owns its removal).
    pub(crate) fn try_register(&self, fd: RawFd, kind: Kind) -> bool {
        let mut regs = self.registrations();
        if regs.contains_key(&fd) {
            return false;
        }

        let events = match kind {
            Kind::Synthetic => libc::EPOLLIN as u32,
            Kind::Socket => {
                (libc::EPOLLIN | libc::EPOLLOUT | libc::EPOLLRDHUP | libc::EPOLLET) as u32
            }
        };
        if let Err(e) = self.ctl(libc::EPOLL_CTL_ADD, fd, events) {
            tracing::error!(fd, error = %e, "epoll_ctl(ADD) failed");
            invariant_violation("epoll registration failed");
        }

        regs.insert(fd, Registration { kind, retained: Interest::NONE, waiters: Vec::new() });
        trace!(fd, ?kind, "registered");
        true
    }

    /// Stop watching `fd`. Waiters still attached simply stop receiving events.
    pub(crate) fn unregister(&self, fd: RawFd) {
        let mut regs = self.registrations();
        if let Some(reg) = regs.remove(&fd) {
            if !reg.waiters.is_empty() {
                debug!(fd, waiters = reg.waiters.len(), "unregistered with waiters attached");
            }
            // The fd may already be closed by its owner; nothing to report
            let _ = self.ctl(libc::EPOLL_CTL_DEL, fd, 0);
        }
    }

    /// Attach a waiter to `fd`, handing it any retained edge it cares about
    pub(crate) fn add_waiter(&self, cores: &[CoreShared], fd: RawFd, waiter: WaiterRef) {
        let mut regs = self.registrations();
        let Some(reg) = regs.get_mut(&fd) else {
            invariant_violation("waiter added for an unregistered descriptor");
        };

        if !reg.retained.is_empty() {
            let mut list = cores[waiter.core].waiters.lock();
            if let Some(interest) = list.get(waiter.key).map(|w| w.interest) {
                let give = interest.matching(reg.retained);
                list.deliver(waiter.key, give);
                // Error and hangup are sticky conditions, keep reporting them
                reg.retained &= !(give & !Interest::ALWAYS);
            }
        }
        reg.waiters.push(waiter);
    }

    pub(crate) fn remove_waiter(&self, fd: RawFd, waiter: WaiterRef) {
        let mut regs = self.registrations();
        if let Some(reg) = regs.get_mut(&fd) {
            reg.waiters.retain(|w| *w != waiter);
        }
    }

    /// Wake the readiness thread so it notices shutdown
    pub(crate) fn stop(&self) {
        if let Err(e) = self.stop.notify() {
            tracing::warn!(error = %e, "failed to signal poller stop");
        }
    }
}

/// Translate epoll bits to an interest mask
fn interest_from_epoll(events: u32) -> Interest {
    let mut interest = Interest::from_bits(events & 0x1f);
    if events & libc::EPOLLRDHUP as u32 != 0 {
        // Peer closed its write side: recv will return 0. Sending may still
        // block, so this is a readable edge and not a sticky hangup.
        interest |= Interest::READABLE;
    }
    interest
}

/// OR `observed` into every waiter of `reg`; true if one became runnable
fn deliver(cores: &[CoreShared], reg: &mut Registration, observed: Interest) -> bool {
    let mut wanted = Interest::NONE;
    let mut wake = false;

    for w in &reg.waiters {
        let mut list = cores[w.core].waiters.lock();
        if let Some(waiter) = list.get(w.key) {
            wanted |= waiter.interest;
        }
        wake |= list.deliver(w.key, observed);
    }

    if reg.kind == Kind::Socket {
        reg.retained |= observed & !wanted;
        reg.retained |= observed & Interest::ALWAYS;
    }
    wake
}

/// Body of the readiness thread
pub(crate) fn poller_loop(shared: &RuntimeShared) {
    let poller = &shared.poller;
    let batch = shared.config.event_batch.max(1);
    let mut events = vec![libc::epoll_event { events: 0, u64: 0 }; batch];
    let stop_fd = poller.stop.as_raw_fd();

    debug!(batch, "poller started");

    loop {
        let n = unsafe {
            libc::epoll_wait(poller.epfd.as_raw_fd(), events.as_mut_ptr(), batch as libc::c_int, -1)
        };
        if n < 0 {
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EINTR) {
                continue;
            }
            tracing::error!(error = %err, "epoll_wait failed");
            invariant_violation("epoll_wait failed");
        }

        let mut wake = false;
        {
            let mut regs = poller.registrations();
            for ev in &events[..n as usize] {
                let fd = ev.u64 as RawFd;
                let bits = ev.events;

                if fd == stop_fd {
                    poller.stop.drain();
                    continue;
                }
                let Some(reg) = regs.get_mut(&fd) else {
                    continue;
                };
                if reg.kind == Kind::Synthetic {
                    drain_raw(fd);
                }
                wake |= deliver(&shared.cores, reg, interest_from_epoll(bits));
            }
        }

        if wake {
            shared.parking.unpark_all();
        }
        if shared.is_stopping() {
            break;
        }
    }

    debug!("poller stopped");
}

/// Reset a registered eventfd's counter
fn drain_raw(fd: RawFd) {
    let mut val: u64 = 0;
    unsafe {
        libc::read(fd, &mut val as *mut u64 as *mut libc::c_void, std::mem::size_of::<u64>());
    }
}
