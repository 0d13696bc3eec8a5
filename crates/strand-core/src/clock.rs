//! Monotonic millisecond clock and deadlines

use std::sync::OnceLock;
use std::time::{Duration, Instant};

static START_INSTANT: OnceLock<Instant> = OnceLock::new();

/// Milliseconds since the first call in this process (monotonic)
#[inline]
pub fn now_ms() -> i64 {
    START_INSTANT.get_or_init(Instant::now).elapsed().as_millis() as i64
}

/// Absolute deadline on the [`now_ms`] clock.
///
/// `-1` means "no deadline". `0` is never produced: it is reserved as an
/// invalid sentinel, so deadlines that would land on 0 are clamped to 1.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct Deadline(i64);

impl Deadline {
    pub const NONE: Deadline = Deadline(-1);

    /// Deadline at absolute time `ms`
    #[inline]
    pub fn at(ms: i64) -> Self {
        Deadline(ms.max(1))
    }

    /// Deadline `timeout` from now; `None` means wait forever
    pub fn after(timeout: Option<Duration>) -> Self {
        match timeout {
            None => Deadline::NONE,
            Some(d) => {
                // Round sub-millisecond waits up so they still suspend
                let mut ms = d.as_millis() as i64;
                if d.as_nanos() % 1_000_000 != 0 {
                    ms += 1;
                }
                Deadline::at(now_ms().saturating_add(ms))
            }
        }
    }

    #[inline]
    pub const fn is_none(self) -> bool {
        self.0 < 0
    }

    #[inline]
    pub const fn as_ms(self) -> i64 {
        self.0
    }

    #[inline]
    pub fn expired(self, now: i64) -> bool {
        !self.is_none() && self.0 <= now
    }

    /// The earlier of two deadlines (NONE is later than anything)
    #[inline]
    pub fn min(self, other: Deadline) -> Deadline {
        match (self.is_none(), other.is_none()) {
            (true, _) => other,
            (_, true) => self,
            _ => Deadline(self.0.min(other.0)),
        }
    }

    /// Time left until the deadline, `None` if there is no deadline
    pub fn remaining(self, now: i64) -> Option<Duration> {
        if self.is_none() {
            None
        } else {
            Some(Duration::from_millis((self.0 - now).max(0) as u64))
        }
    }
}

impl Default for Deadline {
    fn default() -> Self {
        Deadline::NONE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deadline_never_zero() {
        assert_eq!(Deadline::at(0).as_ms(), 1);
        assert_eq!(Deadline::at(-5).as_ms(), 1);
        assert_eq!(Deadline::at(42).as_ms(), 42);
    }

    #[test]
    fn test_deadline_min_and_expiry() {
        let a = Deadline::at(10);
        let b = Deadline::at(20);
        assert_eq!(a.min(b), a);
        assert_eq!(Deadline::NONE.min(b), b);
        assert!(Deadline::NONE.min(Deadline::NONE).is_none());
        assert!(a.expired(10));
        assert!(!b.expired(10));
        assert!(!Deadline::NONE.expired(i64::MAX));
    }

    #[test]
    fn test_sub_millisecond_rounds_up() {
        let now = now_ms();
        let d = Deadline::after(Some(Duration::from_micros(300)));
        assert!(d.as_ms() >= now + 1);
        assert!(Deadline::after(None).is_none());
    }

    #[test]
    fn test_remaining() {
        assert_eq!(Deadline::at(100).remaining(40), Some(Duration::from_millis(60)));
        assert_eq!(Deadline::at(100).remaining(140), Some(Duration::ZERO));
        assert_eq!(Deadline::NONE.remaining(0), None);
    }
}
