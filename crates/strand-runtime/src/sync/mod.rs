//! Coroutine-aware synchronization primitives
//!
//! Both primitives signal through a private eventfd registered with the
//! runtime's poller, so a waiter on any core is woken by the readiness
//! thread like any other I/O wait.

mod event;
mod mutex;

pub use event::Event;
pub use mutex::{Mutex, MutexGuard};
