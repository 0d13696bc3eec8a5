//! Error types for scheduler operations

use thiserror::Error;

/// Errors reported synchronously by scheduler operations.
///
/// Timeouts are not errors: waits report them through their return value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SchedError {
    /// Target core's ready queue is at capacity
    #[error("target core is busy (ready queue full)")]
    Busy,

    /// The core's waiter list is at capacity
    #[error("waiter list is full")]
    WaiterListFull,

    /// Operation may only suspend inside a coroutine
    #[error("not running inside a coroutine")]
    NotInCoroutine,

    /// Runtime has shut down or was never started
    #[error("runtime not initialized")]
    NotInitialized,

    /// Explicit target core does not exist
    #[error("no such core: {0}")]
    NoSuchCore(usize),

    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),

    /// Underlying system call failed (raw errno)
    #[error("os error {0}")]
    Os(i32),
}

impl SchedError {
    /// Build from the calling thread's errno
    pub fn last_os_error() -> Self {
        SchedError::Os(std::io::Error::last_os_error().raw_os_error().unwrap_or(0))
    }
}

impl From<std::io::Error> for SchedError {
    fn from(e: std::io::Error) -> Self {
        SchedError::Os(e.raw_os_error().unwrap_or(0))
    }
}

/// Result type for scheduler operations
pub type SchedResult<T> = Result<T, SchedError>;

/// Report a broken internal invariant and terminate the process.
///
/// Reserved for conditions the runtime cannot recover from: a desynced
/// dispatch channel, or an epoll call that correct usage guarantees will
/// succeed. Unwinding is not attempted because other threads may hold
/// references into the broken state.
#[cold]
#[inline(never)]
pub fn invariant_violation(what: &str) -> ! {
    tracing::error!(target: "strand", "invariant violation: {}", what);
    eprintln!("strand: invariant violation: {}", what);
    std::process::abort()
}
