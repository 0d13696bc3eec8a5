//! Non-blocking socket wrapper
//!
//! A [`Socket`] owns a descriptor switched to non-blocking mode and kept
//! registered with the poller (edge-triggered, read and write) for its
//! whole life. `send`/`recv` try the syscall first; on would-block a
//! coroutine suspends on the matching readiness, a plain thread falls
//! back to `poll(2)`, and the syscall is retried. A timeout surfaces as
//! `EAGAIN`.

use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd};
use std::time::Duration;

use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::sys::socket::{self, MsgFlags};
use strand_core::{now_ms, Deadline, Interest, SchedError};
use tracing::trace;

use crate::poller::Kind;
use crate::runtime::Handle;
use crate::scheduler::{wait_fd, with_coroutine};

pub struct Socket {
    handle: Handle,
    fd: OwnedFd,
    recv_timeout: Option<Duration>,
    send_timeout: Option<Duration>,
}

impl Socket {
    /// Take ownership of `fd` and register it with the runtime
    pub fn new(handle: &Handle, fd: OwnedFd) -> nix::Result<Socket> {
        let raw = fd.as_raw_fd();
        let flags = OFlag::from_bits_truncate(fcntl(raw, FcntlArg::F_GETFL)?);
        fcntl(raw, FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK))?;

        handle.shared().poller.register(raw, Kind::Socket);
        Ok(Socket {
            handle: handle.clone(),
            fd,
            recv_timeout: None,
            send_timeout: None,
        })
    }

    /// `None` waits forever
    pub fn set_recv_timeout(&mut self, timeout: Option<Duration>) {
        self.recv_timeout = timeout;
    }

    pub fn set_send_timeout(&mut self, timeout: Option<Duration>) {
        self.send_timeout = timeout;
    }

    pub fn recv_timeout(&self) -> Option<Duration> {
        self.recv_timeout
    }

    pub fn send_timeout(&self) -> Option<Duration> {
        self.send_timeout
    }

    /// Send once, waiting for buffer space if needed.
    ///
    /// Never raises SIGPIPE; a closed peer reports `EPIPE`.
    pub fn send(&self, buf: &[u8], flags: MsgFlags) -> nix::Result<usize> {
        let flags = flags | MsgFlags::MSG_NOSIGNAL;
        let fd = self.fd.as_raw_fd();
        self.retry(Interest::WRITABLE, self.send_timeout, || socket::send(fd, buf, flags))
    }

    /// Receive once, waiting for data if needed. `Ok(0)` means the peer closed.
    pub fn recv(&self, buf: &mut [u8], flags: MsgFlags) -> nix::Result<usize> {
        let fd = self.fd.as_raw_fd();
        self.retry(Interest::READABLE, self.recv_timeout, || socket::recv(fd, buf, flags))
    }

    /// Send the whole buffer; the send timeout applies to each wait
    pub fn send_all(&self, mut buf: &[u8]) -> nix::Result<()> {
        while !buf.is_empty() {
            let n = self.send(buf, MsgFlags::empty())?;
            buf = &buf[n..];
        }
        Ok(())
    }

    fn retry<F>(&self, interest: Interest, timeout: Option<Duration>, mut op: F) -> nix::Result<usize>
    where
        F: FnMut() -> nix::Result<usize>,
    {
        // Computed once so retries after spurious wakes do not extend it
        let deadline = Deadline::after(timeout);
        loop {
            match op() {
                Err(Errno::EINTR) => continue,
                Err(Errno::EAGAIN) => {
                    if deadline.expired(now_ms()) {
                        return Err(Errno::EAGAIN);
                    }
                    if !self.wait(interest, deadline)? {
                        trace!(fd = self.fd.as_raw_fd(), ?interest, "socket wait timed out");
                        return Err(Errno::EAGAIN);
                    }
                }
                other => return other,
            }
        }
    }

    /// True when the descriptor may be ready, false on timeout
    fn wait(&self, interest: Interest, deadline: Deadline) -> nix::Result<bool> {
        let fd = self.fd.as_raw_fd();
        match with_coroutine(|core| wait_fd(core, fd, interest, deadline)) {
            Some(Ok(seen)) => Ok(!seen.is_empty()),
            Some(Err(e)) => Err(errno_from(e)),
            None => poll_one(fd, interest, deadline),
        }
    }
}

/// Blocking wait for a plain thread
fn poll_one(fd: RawFd, interest: Interest, deadline: Deadline) -> nix::Result<bool> {
    let mut pfd = libc::pollfd { fd, events: interest.bits() as libc::c_short, revents: 0 };
    loop {
        let timeout = match deadline.remaining(now_ms()) {
            None => -1,
            Some(d) => d.as_millis().min(i32::MAX as u128) as libc::c_int,
        };
        let n = unsafe { libc::poll(&mut pfd, 1, timeout) };
        match Errno::result(n) {
            Ok(n) => return Ok(n > 0),
            Err(Errno::EINTR) => continue,
            Err(e) => return Err(e),
        }
    }
}

/// Map a scheduler error onto the errno space of socket calls
pub(crate) fn errno_from(e: SchedError) -> Errno {
    match e {
        SchedError::Os(raw) => Errno::from_raw(raw),
        SchedError::WaiterListFull | SchedError::Busy => Errno::ENOBUFS,
        SchedError::NotInitialized => Errno::ESHUTDOWN,
        _ => Errno::EINVAL,
    }
}

impl AsRawFd for Socket {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl AsFd for Socket {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

impl std::fmt::Debug for Socket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Socket").field("fd", &self.fd.as_raw_fd()).finish()
    }
}

impl Drop for Socket {
    fn drop(&mut self) {
        // Unregister before the OwnedFd closes the descriptor
        self.handle.shared().poller.unregister(self.fd.as_raw_fd());
    }
}
