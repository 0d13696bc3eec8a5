//! Runtime configuration
//!
//! Compile-time defaults with environment overrides.
//!
//! ```rust,ignore
//! use strand_runtime::config::RuntimeConfig;
//!
//! // Defaults with env overrides
//! let config = RuntimeConfig::from_env();
//!
//! // Or customize programmatically
//! let config = RuntimeConfig::new().workers(2).stack_size(128 * 1024);
//! ```

pub mod defaults;

use strand_core::constants::{MAX_WORKERS, MIN_STACK_SIZE};
use strand_core::env::env_get;
use strand_core::{SchedError, SchedResult};

/// Runtime configuration with builder methods
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Number of scheduler cores
    pub workers: usize,
    /// Per-core bound on live coroutines
    pub ready_queue_capacity: usize,
    /// Per-core bound on pending waiters
    pub waiter_capacity: usize,
    /// Stack size used when a spawn passes a zero hint
    pub stack_size: usize,
    /// epoll_wait batch size
    pub event_batch: usize,
    /// Per-core inbox size for cross-core requests
    pub dispatch_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl RuntimeConfig {
    /// Library defaults with environment overrides.
    ///
    /// Environment variables (all optional):
    /// - `STRAND_WORKERS`
    /// - `STRAND_READY_QUEUE_CAPACITY`
    /// - `STRAND_WAITER_CAPACITY`
    /// - `STRAND_STACK_SIZE`
    /// - `STRAND_EVENT_BATCH`
    /// - `STRAND_DISPATCH_CAPACITY`
    pub fn from_env() -> Self {
        Self {
            workers: env_get("STRAND_WORKERS", defaults::WORKERS),
            ready_queue_capacity: env_get(
                "STRAND_READY_QUEUE_CAPACITY",
                defaults::READY_QUEUE_CAPACITY,
            ),
            waiter_capacity: env_get("STRAND_WAITER_CAPACITY", defaults::WAITER_CAPACITY),
            stack_size: env_get("STRAND_STACK_SIZE", defaults::STACK_SIZE),
            event_batch: env_get("STRAND_EVENT_BATCH", defaults::EVENT_BATCH),
            dispatch_capacity: env_get("STRAND_DISPATCH_CAPACITY", defaults::DISPATCH_CAPACITY),
        }
    }

    /// Library defaults only (no env override)
    pub fn new() -> Self {
        Self {
            workers: defaults::WORKERS,
            ready_queue_capacity: defaults::READY_QUEUE_CAPACITY,
            waiter_capacity: defaults::WAITER_CAPACITY,
            stack_size: defaults::STACK_SIZE,
            event_batch: defaults::EVENT_BATCH,
            dispatch_capacity: defaults::DISPATCH_CAPACITY,
        }
    }

    pub fn workers(mut self, n: usize) -> Self {
        self.workers = n;
        self
    }

    pub fn ready_queue_capacity(mut self, cap: usize) -> Self {
        self.ready_queue_capacity = cap;
        self
    }

    pub fn waiter_capacity(mut self, cap: usize) -> Self {
        self.waiter_capacity = cap;
        self
    }

    pub fn stack_size(mut self, size: usize) -> Self {
        self.stack_size = size;
        self
    }

    pub fn event_batch(mut self, n: usize) -> Self {
        self.event_batch = n;
        self
    }

    pub fn dispatch_capacity(mut self, cap: usize) -> Self {
        self.dispatch_capacity = cap;
        self
    }

    pub fn validate(&self) -> SchedResult<()> {
        if self.workers == 0 {
            return Err(SchedError::InvalidConfig("workers must be > 0"));
        }
        if self.workers > MAX_WORKERS {
            return Err(SchedError::InvalidConfig("workers must be <= 64"));
        }
        // The request listener occupies one slot on every core
        if self.ready_queue_capacity < 2 {
            return Err(SchedError::InvalidConfig("ready_queue_capacity must be >= 2"));
        }
        if self.waiter_capacity < 2 {
            return Err(SchedError::InvalidConfig("waiter_capacity must be >= 2"));
        }
        if self.stack_size < MIN_STACK_SIZE {
            return Err(SchedError::InvalidConfig("stack_size must be >= 64KB"));
        }
        if self.event_batch == 0 {
            return Err(SchedError::InvalidConfig("event_batch must be > 0"));
        }
        if self.dispatch_capacity == 0 {
            return Err(SchedError::InvalidConfig("dispatch_capacity must be > 0"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        assert!(RuntimeConfig::new().validate().is_ok());
        assert!(RuntimeConfig::from_env().workers >= 1);
    }

    #[test]
    fn test_builder() {
        let config = RuntimeConfig::new().workers(2).ready_queue_capacity(8).stack_size(128 * 1024);
        assert_eq!(config.workers, 2);
        assert_eq!(config.ready_queue_capacity, 8);
        assert_eq!(config.stack_size, 128 * 1024);
    }

    #[test]
    fn test_validation() {
        assert_eq!(
            RuntimeConfig::new().workers(0).validate(),
            Err(SchedError::InvalidConfig("workers must be > 0"))
        );
        assert!(RuntimeConfig::new().workers(1000).validate().is_err());
        assert!(RuntimeConfig::new().ready_queue_capacity(1).validate().is_err());
        assert!(RuntimeConfig::new().stack_size(4096).validate().is_err());
    }
}
