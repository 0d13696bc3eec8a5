//! Unix stack mapping using mmap

use super::{stack_size_for, Stack};
use strand_core::constants::GUARD_SIZE;
use strand_core::{SchedError, SchedResult};

impl Stack {
    /// Map a stack of at least `hint` bytes plus a guard page.
    ///
    /// Pages are reserved lazily (`MAP_NORESERVE`) so large hints only cost
    /// address space until touched.
    pub fn new(hint: usize) -> SchedResult<Stack> {
        let size = stack_size_for(hint);
        let len = size + GUARD_SIZE;

        let base = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_NORESERVE,
                -1,
                0,
            )
        };
        if base == libc::MAP_FAILED {
            return Err(SchedError::last_os_error());
        }

        // Guard page at the low end; overflow faults here
        let ret = unsafe { libc::mprotect(base, GUARD_SIZE, libc::PROT_NONE) };
        if ret != 0 {
            let err = SchedError::last_os_error();
            unsafe { libc::munmap(base, len) };
            return Err(err);
        }

        Ok(Stack { base: base as *mut u8, len })
    }
}

impl Drop for Stack {
    fn drop(&mut self) {
        let ret = unsafe { libc::munmap(self.base as *mut libc::c_void, self.len) };
        if ret != 0 {
            tracing::warn!("munmap of coroutine stack failed: {}", std::io::Error::last_os_error());
        }
    }
}
