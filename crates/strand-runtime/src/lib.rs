//! # strand-runtime
//!
//! Platform-specific runtime for the strand coroutine scheduler.
//!
//! This crate provides:
//! - Context switching (architecture-specific assembly)
//! - Coroutine stacks (mmap with a guard page)
//! - Scheduler cores, one per worker thread
//! - The epoll readiness thread and core parking
//! - Cross-core dispatch of spawns and I/O watches
//! - Coroutine-aware mutex, event, socket wrapper and `poll`

mod arch;
pub mod config;
mod dispatch;
mod eventfd;
mod memory;
mod net;
mod parking;
mod poll;
mod poller;
mod runtime;
mod scheduler;
pub mod sync;
mod tls;
mod worker;

// Re-exports
pub use config::RuntimeConfig;
pub use net::Socket;
pub use poll::{poll, PollFd};
pub use runtime::{Handle, Runtime, Stats};
pub use scheduler::{current_task, is_in_coroutine, sleep, sleep_us, yield_now};
pub use sync::{Event, Mutex, MutexGuard};

pub use nix::sys::socket::MsgFlags;
