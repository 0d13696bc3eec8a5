//! `poll(2)` that suspends coroutines
//!
//! A zero-timeout `poll` runs first; if nothing is ready, a coroutine
//! attaches one waiter per descriptor and suspends until any of them fires
//! or the deadline passes, then re-polls to fill in `revents`. Plain
//! threads call the real `poll` with the remaining timeout.
//!
//! Descriptors must be pollable by epoll. Regular files are always ready
//! and are answered by the first zero-timeout pass.

use std::os::fd::RawFd;
use std::time::Duration;

use nix::errno::Errno;
use strand_core::{now_ms, Deadline, Interest, WaiterKey};

use crate::net::errno_from;
use crate::poller::{Kind, WaiterRef};
use crate::scheduler::{new_waiter, remove_waiter, sleep, wait_on, with_coroutine};
use crate::worker::Core;

/// One entry of a poll set; layout-compatible with `struct pollfd`
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PollFd {
    pub fd: RawFd,
    pub events: i16,
    pub revents: i16,
}

impl PollFd {
    pub fn new(fd: RawFd, events: i16) -> Self {
        Self { fd, events, revents: 0 }
    }
}

/// Wait until some descriptor in `fds` is ready; returns how many are.
///
/// `None` waits forever. Returns 0 on timeout.
pub fn poll(fds: &mut [PollFd], timeout: Option<Duration>) -> nix::Result<usize> {
    let n = raw_poll(fds, 0)?;
    if n > 0 || timeout == Some(Duration::ZERO) {
        return Ok(n);
    }

    let deadline = Deadline::after(timeout);
    if fds.iter().all(|p| p.fd < 0) {
        // Nothing to watch: a timed poll is a sleep, an untimed one returns
        if let Some(d) = timeout {
            sleep(d);
        }
        return Ok(0);
    }

    match with_coroutine(|core| poll_in_coroutine(core, fds, deadline)) {
        Some(result) => result,
        None => loop {
            let ms = match deadline.remaining(now_ms()) {
                None => -1,
                Some(d) => d.as_millis().min(i32::MAX as u128) as libc::c_int,
            };
            match raw_poll(fds, ms) {
                Err(Errno::EINTR) => continue,
                other => break other,
            }
        },
    }
}

fn raw_poll(fds: &mut [PollFd], timeout_ms: libc::c_int) -> nix::Result<usize> {
    // Safety: PollFd is repr(C) with the same layout as libc::pollfd
    let n = unsafe {
        libc::poll(fds.as_mut_ptr() as *mut libc::pollfd, fds.len() as libc::nfds_t, timeout_ms)
    };
    Errno::result(n).map(|n| n as usize)
}

fn poll_in_coroutine(core: &Core, fds: &mut [PollFd], deadline: Deadline) -> nix::Result<usize> {
    let shared = core.shared();
    let mut owned: Vec<RawFd> = Vec::new();
    let mut attached: Vec<(RawFd, WaiterKey)> = Vec::with_capacity(fds.len());

    let mut result = Ok(0);
    for pfd in fds.iter().filter(|p| p.fd >= 0) {
        if shared.poller.try_register(pfd.fd, Kind::Socket) {
            owned.push(pfd.fd);
        }
        match new_waiter(core, Interest::from_bits(pfd.events as u16 as u32)) {
            Ok(key) => {
                shared.poller.add_waiter(&shared.cores, pfd.fd, WaiterRef { core: core.index(), key });
                attached.push((pfd.fd, key));
            }
            Err(e) => {
                result = Err(errno_from(e));
                break;
            }
        }
    }

    if result.is_ok() {
        let keys: Vec<WaiterKey> = attached.iter().map(|(_, key)| *key).collect();
        result = loop {
            let seen = wait_on(core, &keys, deadline);
            match raw_poll(fds, 0) {
                // Edge reported but already consumed elsewhere
                Ok(0) if !seen.is_empty() && !deadline.expired(now_ms()) => continue,
                Err(Errno::EINTR) => continue,
                other => break other,
            }
        };
    }

    for (fd, key) in attached {
        shared.poller.remove_waiter(fd, WaiterRef { core: core.index(), key });
        remove_waiter(core, key);
    }
    for fd in owned {
        shared.poller.unregister(fd);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use crate::runtime::Runtime;
    use nix::sys::socket::{send, socketpair, MsgFlags, AddressFamily, SockFlag, SockType};
    use std::os::fd::AsRawFd;
    use std::time::Instant;

    #[test]
    fn test_poll_wakes_on_readable() {
        let rt = Runtime::new(RuntimeConfig::new().workers(2)).unwrap();
        let (a, b) = socketpair(
            AddressFamily::Unix,
            SockType::Stream,
            None,
            SockFlag::SOCK_NONBLOCK | SockFlag::SOCK_CLOEXEC,
        )
        .unwrap();

        rt.handle()
            .spawn_on(1, move || {
                sleep(Duration::from_millis(20));
                send(b.as_raw_fd(), b"!", MsgFlags::empty()).unwrap();
                sleep(Duration::from_millis(200));
            }, 0)
            .unwrap();

        let fd = a.as_raw_fd();
        let (n, revents) = rt
            .block_on(move || {
                let mut fds = [PollFd::new(fd, libc::POLLIN)];
                let n = poll(&mut fds, Some(Duration::from_secs(5))).unwrap();
                (n, fds[0].revents)
            })
            .unwrap();
        assert_eq!(n, 1);
        assert!(revents & libc::POLLIN != 0);
        drop(a);
    }

    #[test]
    fn test_poll_timeout_returns_zero() {
        let rt = Runtime::new(RuntimeConfig::new().workers(1)).unwrap();
        let (a, _b) =
            socketpair(AddressFamily::Unix, SockType::Stream, None, SockFlag::SOCK_CLOEXEC).unwrap();
        let fd = a.as_raw_fd();
        let (n, elapsed) = rt
            .block_on(move || {
                let start = Instant::now();
                let mut fds = [PollFd::new(fd, libc::POLLIN)];
                (poll(&mut fds, Some(Duration::from_millis(30))).unwrap(), start.elapsed())
            })
            .unwrap();
        assert_eq!(n, 0);
        assert!(elapsed >= Duration::from_millis(29), "{elapsed:?}");
        drop(a);
    }

    #[test]
    fn test_poll_ready_without_waiting() {
        let (a, _b) =
            socketpair(AddressFamily::Unix, SockType::Stream, None, SockFlag::SOCK_CLOEXEC).unwrap();
        let mut fds = [PollFd::new(a.as_raw_fd(), libc::POLLOUT)];
        assert_eq!(poll(&mut fds, None), Ok(1));
        assert!(fds[0].revents & libc::POLLOUT != 0);
    }
}
