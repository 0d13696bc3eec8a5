//! Error types for GOP operations

use std::fmt;

use strand_core::SchedError;
use thiserror::Error;

/// Why a stream ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EofReason {
    /// Input reached its natural end
    EndOfStream,
    /// Producer was stopped on purpose
    Cancelled,
    /// Producer failed with a codec or I/O error code
    Failed(i32),
}

impl fmt::Display for EofReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EofReason::EndOfStream => write!(f, "end of stream"),
            EofReason::Cancelled => write!(f, "cancelled"),
            EofReason::Failed(code) => write!(f, "failed ({})", code),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum GopError {
    /// Terminal: the producer signalled end of stream
    #[error("eof: {0}")]
    Eof(EofReason),

    /// Terminal: the listener or its buffer was shut down
    #[error("listener finished")]
    Exit,

    #[error(transparent)]
    Sched(#[from] SchedError),
}

impl GopError {
    /// True for errors that every later call will repeat
    pub fn is_terminal(&self) -> bool {
        matches!(self, GopError::Eof(_) | GopError::Exit)
    }
}

pub type GopResult<T> = Result<T, GopError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(GopError::Eof(EofReason::Failed(-5)).to_string(), "eof: failed (-5)");
        assert_eq!(
            GopError::from(SchedError::NotInCoroutine).to_string(),
            "not running inside a coroutine"
        );
        assert!(GopError::Exit.is_terminal());
        assert!(!GopError::Sched(SchedError::Busy).is_terminal());
    }
}
