//! Synthetic signal descriptors
//!
//! Every wake channel in the runtime (dispatch doorbells, reply signals,
//! mutex and event channels, the poller's stop signal) is an eventfd.
//! Writes coalesce through the eventfd counter, so several `notify` calls
//! before a drain produce one readiness edge.

use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use strand_core::{SchedError, SchedResult};

pub(crate) struct EventFd {
    fd: OwnedFd,
}

impl EventFd {
    pub(crate) fn new() -> SchedResult<Self> {
        let fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        if fd < 0 {
            return Err(SchedError::last_os_error());
        }
        // Safety: eventfd just returned this descriptor and nothing else owns it
        Ok(Self { fd: unsafe { OwnedFd::from_raw_fd(fd) } })
    }

    /// Add one to the counter.
    ///
    /// EAGAIN means the counter is saturated, so a signal is already
    /// pending and this one can be dropped.
    pub(crate) fn notify(&self) -> SchedResult<()> {
        let val: u64 = 1;
        let ret = unsafe {
            libc::write(
                self.fd.as_raw_fd(),
                &val as *const u64 as *const libc::c_void,
                std::mem::size_of::<u64>(),
            )
        };
        if ret < 0 {
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EAGAIN) {
                return Ok(());
            }
            return Err(err.into());
        }
        Ok(())
    }

    /// Reset the counter to zero, returning what it held
    pub(crate) fn drain(&self) -> u64 {
        let mut val: u64 = 0;
        let ret = unsafe {
            libc::read(
                self.fd.as_raw_fd(),
                &mut val as *mut u64 as *mut libc::c_void,
                std::mem::size_of::<u64>(),
            )
        };
        if ret < 0 { 0 } else { val }
    }
}

impl AsRawFd for EventFd {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notify_coalesces() {
        let efd = EventFd::new().unwrap();
        assert_eq!(efd.drain(), 0);
        efd.notify().unwrap();
        efd.notify().unwrap();
        efd.notify().unwrap();
        assert_eq!(efd.drain(), 3);
        assert_eq!(efd.drain(), 0);
    }
}
