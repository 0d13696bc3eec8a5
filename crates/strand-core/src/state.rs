//! Coroutine state

/// State of a coroutine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CoroutineState {
    /// In the ready queue, waiting for its core's drain pass
    Ready = 0,

    /// Currently executing on its core
    Running = 1,

    /// Parked on one or more waiters (I/O, sleep, mutex, event)
    Suspended = 2,

    /// Entry closure returned; stack is released by the core
    Done = 3,
}

impl CoroutineState {
    /// Check if this state allows the coroutine to be resumed
    #[inline]
    pub const fn is_runnable(&self) -> bool {
        matches!(self, CoroutineState::Ready)
    }

    #[inline]
    pub const fn is_done(&self) -> bool {
        matches!(self, CoroutineState::Done)
    }
}
