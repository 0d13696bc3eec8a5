//! Library defaults for [`RuntimeConfig`](super::RuntimeConfig)

/// Scheduler cores (OS worker threads)
pub const WORKERS: usize = 4;

/// Live coroutines per core; spawns beyond this report busy
pub const READY_QUEUE_CAPACITY: usize = 4096;

/// Pending waiters per core
pub const WAITER_CAPACITY: usize = 16384;

/// Default coroutine stack when the caller passes no hint
pub const STACK_SIZE: usize = 256 * 1024;

/// Events fetched per epoll_wait call on the readiness thread
pub const EVENT_BATCH: usize = 1024;

/// Queued cross-core requests per target core
pub const DISPATCH_CAPACITY: usize = 64;
