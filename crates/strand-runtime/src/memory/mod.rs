//! Coroutine stack memory
//!
//! Platform-specific implementations map and unmap the stack region.

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        mod unix;
    }
}

use strand_core::constants::{GUARD_SIZE, MIN_STACK_SIZE};

/// Round a stack-size hint up to whole pages, never below the minimum
pub(crate) fn stack_size_for(hint: usize) -> usize {
    let size = hint.max(MIN_STACK_SIZE);
    (size + GUARD_SIZE - 1) & !(GUARD_SIZE - 1)
}

/// An owned coroutine stack with a guard page below it.
///
/// The guard page stays inaccessible, so overflowing the stack faults
/// instead of corrupting a neighbouring allocation. Unmapped on drop.
pub struct Stack {
    /// Base of the whole mapping (guard page included)
    base: *mut u8,
    /// Mapping length in bytes (guard page included)
    len: usize,
}

// Safety: the mapping is owned exclusively by this value
unsafe impl Send for Stack {}

impl Stack {
    /// Highest address of the usable stack (stacks grow down)
    #[inline]
    pub fn top(&self) -> *mut u8 {
        // Safety: base + len is one past the end of our mapping
        unsafe { self.base.add(self.len) }
    }

    /// Usable bytes, excluding the guard page
    #[inline]
    pub fn size(&self) -> usize {
        self.len - GUARD_SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stack_size_rounding() {
        assert_eq!(stack_size_for(0), MIN_STACK_SIZE);
        assert_eq!(stack_size_for(MIN_STACK_SIZE + 1), MIN_STACK_SIZE + GUARD_SIZE);
        assert_eq!(stack_size_for(256 * 1024), 256 * 1024);
    }

    #[test]
    fn test_stack_is_writable_to_top() {
        let stack = Stack::new(MIN_STACK_SIZE).unwrap();
        assert_eq!(stack.size(), MIN_STACK_SIZE);
        unsafe {
            let last = stack.top().sub(1);
            last.write(0xAB);
            assert_eq!(last.read(), 0xAB);
        }
    }
}
