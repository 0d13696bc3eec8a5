//! # strand-core
//!
//! Core types for the strand coroutine scheduler.
//!
//! This crate is platform-agnostic and contains no OS-specific code.
//! Context switching, stacks, epoll and sockets live in `strand-runtime`.
//!
//! ## Modules
//!
//! - `id` - Coroutine and owner identifiers
//! - `state` - Coroutine state enum
//! - `slab` - Bounded generational arena
//! - `waiter` - Waiter records and the index-linked waiter list
//! - `interest` - Readiness interest masks
//! - `clock` - Monotonic millisecond clock and deadlines
//! - `spinlock` - Internal spinlock primitive
//! - `error` - Error types and the fatal invariant hook
//! - `env` - Environment variable utilities

pub mod id;
pub mod state;
pub mod slab;
pub mod waiter;
pub mod interest;
pub mod clock;
pub mod spinlock;
pub mod error;
pub mod env;

// Re-exports for convenience
pub use id::{CoroutineId, TaskRef};
pub use state::CoroutineState;
pub use slab::{Slab, SlabKey};
pub use waiter::{Waiter, WaiterKey, WaiterList};
pub use interest::Interest;
pub use clock::{now_ms, Deadline};
pub use spinlock::{SpinLock, SpinLockGuard};
pub use error::{invariant_violation, SchedError, SchedResult};
pub use env::{env_get, env_get_bool, env_get_opt};

/// Constants shared by the runtime crates
pub mod constants {
    /// Maximum worker (core) threads
    pub const MAX_WORKERS: usize = 64;

    /// Smallest stack a coroutine may request (64 KB)
    pub const MIN_STACK_SIZE: usize = 64 * 1024;

    /// Guard page size below each coroutine stack
    pub const GUARD_SIZE: usize = 4096;

    /// Cache line size for alignment
    pub const CACHE_LINE_SIZE: usize = 64;
}
