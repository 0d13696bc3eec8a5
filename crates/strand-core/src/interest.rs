//! Readiness interest masks
//!
//! The bit values follow `poll(2)` so a mask can be handed to the kernel
//! unchanged on Linux; the runtime still converts explicitly at the epoll
//! boundary.

use core::fmt;
use core::ops::{BitAnd, BitAndAssign, BitOr, BitOrAssign, Not};

/// Set of readiness conditions a waiter cares about (or has observed)
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct Interest(u32);

impl Interest {
    pub const NONE: Interest = Interest(0);
    pub const READABLE: Interest = Interest(0x001);
    pub const PRIORITY: Interest = Interest(0x002);
    pub const WRITABLE: Interest = Interest(0x004);
    pub const ERROR: Interest = Interest(0x008);
    pub const HANGUP: Interest = Interest(0x010);

    /// Conditions always reported to a waiter regardless of its interest
    pub const ALWAYS: Interest = Interest(Self::ERROR.0 | Self::HANGUP.0);

    #[inline]
    pub const fn from_bits(bits: u32) -> Self {
        Interest(bits & 0x01f)
    }

    #[inline]
    pub const fn bits(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub const fn contains(self, other: Interest) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    pub const fn intersects(self, other: Interest) -> bool {
        self.0 & other.0 != 0
    }

    /// Bits of `observed` that a waiter with this interest should see
    #[inline]
    pub const fn matching(self, observed: Interest) -> Interest {
        Interest(observed.0 & (self.0 | Self::ALWAYS.0))
    }
}

impl BitOr for Interest {
    type Output = Interest;
    #[inline]
    fn bitor(self, rhs: Interest) -> Interest {
        Interest(self.0 | rhs.0)
    }
}

impl BitOrAssign for Interest {
    #[inline]
    fn bitor_assign(&mut self, rhs: Interest) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for Interest {
    type Output = Interest;
    #[inline]
    fn bitand(self, rhs: Interest) -> Interest {
        Interest(self.0 & rhs.0)
    }
}

impl BitAndAssign for Interest {
    #[inline]
    fn bitand_assign(&mut self, rhs: Interest) {
        self.0 &= rhs.0;
    }
}

impl Not for Interest {
    type Output = Interest;
    #[inline]
    fn not(self) -> Interest {
        Interest(!self.0 & 0x01f)
    }
}

impl fmt::Debug for Interest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if self.intersects(Interest::READABLE) { parts.push("R"); }
        if self.intersects(Interest::PRIORITY) { parts.push("P"); }
        if self.intersects(Interest::WRITABLE) { parts.push("W"); }
        if self.intersects(Interest::ERROR) { parts.push("ERR"); }
        if self.intersects(Interest::HANGUP) { parts.push("HUP"); }
        if parts.is_empty() {
            write!(f, "Interest(-)")
        } else {
            write!(f, "Interest({})", parts.join("|"))
        }
    }
}
