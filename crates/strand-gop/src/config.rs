//! Buffer configuration

use std::time::Duration;

use strand_core::env_get;

pub mod defaults {
    /// Ring capacity in units
    pub const CAPACITY: usize = 512;

    /// Poll interval of a listener waiting for data, in milliseconds
    pub const WAIT_TIMEOUT_MS: u64 = 1000;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GopConfig {
    pub capacity: usize,
    /// Packet mode: after a rotation, drop non-key video until a keyframe
    pub wait_keyframe: bool,
    /// Upper bound on one wait inside `GopListener::get`; `None` waits
    /// for the next signal
    pub wait_timeout: Option<Duration>,
}

impl Default for GopConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl GopConfig {
    /// Defaults with `STRAND_GOP_CAPACITY` and `STRAND_GOP_WAIT_MS` overrides
    pub fn from_env() -> Self {
        Self {
            capacity: env_get("STRAND_GOP_CAPACITY", defaults::CAPACITY),
            wait_keyframe: true,
            wait_timeout: Some(Duration::from_millis(env_get(
                "STRAND_GOP_WAIT_MS",
                defaults::WAIT_TIMEOUT_MS,
            ))),
        }
    }

    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            wait_keyframe: true,
            wait_timeout: Some(Duration::from_millis(defaults::WAIT_TIMEOUT_MS)),
        }
    }

    pub fn wait_keyframe(mut self, on: bool) -> Self {
        self.wait_keyframe = on;
        self
    }

    pub fn wait_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.wait_timeout = timeout;
        self
    }
}
