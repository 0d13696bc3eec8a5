//! Coroutine identifier types

use core::fmt;

use crate::slab::SlabKey;

/// Identifier of a coroutine within its owning core.
///
/// Wraps the slab key of the coroutine's slot, so a stale id (slot reused
/// by a later coroutine) never aliases the new occupant.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct CoroutineId(SlabKey);

impl CoroutineId {
    /// Wrap a slab key
    #[inline]
    pub const fn from_key(key: SlabKey) -> Self {
        CoroutineId(key)
    }

    /// The underlying slab key
    #[inline]
    pub const fn key(self) -> SlabKey {
        self.0
    }

    /// Pack into a single u64 (generation in the high half)
    #[inline]
    pub const fn as_u64(self) -> u64 {
        ((self.0.generation() as u64) << 32) | self.0.index() as u64
    }
}

impl fmt::Debug for CoroutineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CoroutineId({}v{})", self.0.index(), self.0.generation())
    }
}

impl fmt::Display for CoroutineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.0.index(), self.0.generation())
    }
}

/// A coroutine named together with the core that owns it.
///
/// Coroutines never migrate, so this pair identifies a task for its whole
/// life. Used as the owner identity of mutexes and event registrations.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct TaskRef {
    pub core: usize,
    pub id: CoroutineId,
}

impl TaskRef {
    #[inline]
    pub const fn new(core: usize, id: CoroutineId) -> Self {
        Self { core, id }
    }
}

impl fmt::Display for TaskRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "core{}/{}", self.core, self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coroutine_id_packing() {
        let id = CoroutineId::from_key(SlabKey::new(7, 3));
        assert_eq!(id.as_u64(), (3u64 << 32) | 7);
        assert_eq!(id.key().index(), 7);
        assert_eq!(format!("{}", id), "7.3");
    }

    #[test]
    fn test_task_ref_identity() {
        let a = TaskRef::new(0, CoroutineId::from_key(SlabKey::new(1, 0)));
        let b = TaskRef::new(1, CoroutineId::from_key(SlabKey::new(1, 0)));
        assert_ne!(a, b);
        assert_eq!(format!("{}", a), "core0/1.0");
    }
}
