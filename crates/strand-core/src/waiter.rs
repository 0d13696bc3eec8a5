//! Waiter records and the per-core waiter list
//!
//! A [`Waiter`] is the bookkeeping for one pending suspended operation:
//! which coroutine owns it, what it is interested in, what has been
//! observed so far and when it gives up.
//!
//! [`WaiterList`] stores waiters in a bounded slab and threads them on an
//! index-linked doubly-linked list. Links are slot indices rather than
//! pointers, so removal during a concurrent scan can never dangle. The list
//! itself is not synchronized; the runtime wraps each core's list in a
//! [`SpinLock`](crate::SpinLock) shared with the readiness thread.

use crate::clock::Deadline;
use crate::error::{SchedError, SchedResult};
use crate::id::CoroutineId;
use crate::interest::Interest;
use crate::slab::{Slab, SlabKey};

/// Key of a waiter inside its core's [`WaiterList`]
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[repr(transparent)]
pub struct WaiterKey(SlabKey);

impl WaiterKey {
    #[inline]
    pub const fn slab_key(self) -> SlabKey {
        self.0
    }
}

/// One pending suspended operation
#[derive(Clone, Debug)]
pub struct Waiter {
    pub owner: CoroutineId,
    pub interest: Interest,
    /// Events ORed in by the readiness thread since the last reset
    pub observed: Interest,
    pub deadline: Deadline,
    /// Only armed waiters can wake their owner
    pub armed: bool,
}

impl Waiter {
    pub fn new(owner: CoroutineId, interest: Interest) -> Self {
        Self {
            owner,
            interest,
            observed: Interest::NONE,
            deadline: Deadline::NONE,
            armed: false,
        }
    }

    /// Observed events this waiter cares about
    #[inline]
    pub fn satisfied(&self) -> Interest {
        self.interest.matching(self.observed)
    }
}

struct Node {
    waiter: Waiter,
    prev: Option<u32>,
    next: Option<u32>,
}

/// Bounded, index-linked list of waiters belonging to one core
pub struct WaiterList {
    nodes: Slab<Node>,
    head: Option<u32>,
    tail: Option<u32>,
}

impl WaiterList {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            nodes: Slab::with_capacity(capacity),
            head: None,
            tail: None,
        }
    }

    /// Link a new waiter at the tail
    pub fn insert(&mut self, waiter: Waiter) -> SchedResult<WaiterKey> {
        let node = Node { waiter, prev: self.tail, next: None };
        let key = self.nodes.insert(node).map_err(|_| SchedError::WaiterListFull)?;
        let index = key.index();

        match self.tail {
            Some(tail) => {
                if let Some((_, node)) = self.nodes.get_mut_by_index(tail) {
                    node.next = Some(index);
                }
            }
            None => self.head = Some(index),
        }
        self.tail = Some(index);

        Ok(WaiterKey(key))
    }

    /// Unlink and return a waiter; stale keys return `None`
    pub fn remove(&mut self, key: WaiterKey) -> Option<Waiter> {
        let node = self.nodes.remove(key.0)?;

        match node.prev {
            Some(prev) => {
                if let Some((_, p)) = self.nodes.get_mut_by_index(prev) {
                    p.next = node.next;
                }
            }
            None => self.head = node.next,
        }
        match node.next {
            Some(next) => {
                if let Some((_, n)) = self.nodes.get_mut_by_index(next) {
                    n.prev = node.prev;
                }
            }
            None => self.tail = node.prev,
        }

        Some(node.waiter)
    }

    #[inline]
    pub fn get(&self, key: WaiterKey) -> Option<&Waiter> {
        self.nodes.get(key.0).map(|n| &n.waiter)
    }

    #[inline]
    pub fn get_mut(&mut self, key: WaiterKey) -> Option<&mut Waiter> {
        self.nodes.get_mut(key.0).map(|n| &mut n.waiter)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.nodes.capacity()
    }

    /// OR `events` into a waiter.
    ///
    /// Returns true when the waiter is armed and now satisfied, meaning its
    /// owner should be woken.
    pub fn deliver(&mut self, key: WaiterKey, events: Interest) -> bool {
        match self.get_mut(key) {
            Some(w) => {
                w.observed |= events;
                w.armed && !w.satisfied().is_empty()
            }
            None => false,
        }
    }

    /// Arm a waiter with a deadline.
    ///
    /// Returns true if events it cares about were already observed, in which
    /// case the owner should not suspend at all.
    pub fn arm(&mut self, key: WaiterKey, deadline: Deadline) -> bool {
        match self.get_mut(key) {
            Some(w) => {
                w.armed = true;
                w.deadline = deadline;
                !w.satisfied().is_empty()
            }
            None => false,
        }
    }

    /// Disarm a waiter and take what it observed (empty means timed out)
    pub fn disarm(&mut self, key: WaiterKey) -> Interest {
        match self.get_mut(key) {
            Some(w) => {
                let seen = w.satisfied();
                w.armed = false;
                w.deadline = Deadline::NONE;
                w.observed = Interest::NONE;
                seen
            }
            None => Interest::NONE,
        }
    }

    /// Collect owners of armed waiters that are satisfied or expired.
    ///
    /// Fired waiters are disarmed so later scans skip them; their observed
    /// bits stay put for the owner to read. Owners may repeat when a
    /// coroutine waits on several waiters at once. Returns the nearest
    /// deadline among the waiters still armed.
    pub fn scan(&mut self, now: i64, fired: &mut Vec<CoroutineId>) -> Deadline {
        let mut nearest = Deadline::NONE;
        let mut cursor = self.head;

        while let Some(index) = cursor {
            let Some((_, node)) = self.nodes.get_mut_by_index(index) else {
                break;
            };
            cursor = node.next;

            let w = &mut node.waiter;
            if !w.armed {
                continue;
            }
            if !w.satisfied().is_empty() || w.deadline.expired(now) {
                w.armed = false;
                fired.push(w.owner);
            } else {
                nearest = nearest.min(w.deadline);
            }
        }

        nearest
    }

    /// Iterate waiters in link order
    pub fn iter(&self) -> impl Iterator<Item = (WaiterKey, &Waiter)> + '_ {
        let mut cursor = self.head;
        core::iter::from_fn(move || {
            let index = cursor?;
            let (key, node) = self.nodes.get_by_index(index)?;
            cursor = node.next;
            Some((WaiterKey(key), &node.waiter))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owner(i: u32) -> CoroutineId {
        CoroutineId::from_key(SlabKey::new(i, 0))
    }

    #[test]
    fn test_bounded_insert() {
        let mut list = WaiterList::with_capacity(2);
        list.insert(Waiter::new(owner(0), Interest::READABLE)).unwrap();
        list.insert(Waiter::new(owner(1), Interest::READABLE)).unwrap();
        let err = list.insert(Waiter::new(owner(2), Interest::READABLE)).unwrap_err();
        assert_eq!(err, SchedError::WaiterListFull);
    }

    #[test]
    fn test_unlink_middle_keeps_order() {
        let mut list = WaiterList::with_capacity(8);
        let keys: Vec<_> = (0..4)
            .map(|i| list.insert(Waiter::new(owner(i), Interest::READABLE)).unwrap())
            .collect();
        list.remove(keys[1]).unwrap();
        list.remove(keys[3]).unwrap();

        let owners: Vec<_> = list.iter().map(|(_, w)| w.owner).collect();
        assert_eq!(owners, vec![owner(0), owner(2)]);

        // Slot reuse links at the tail
        list.insert(Waiter::new(owner(9), Interest::READABLE)).unwrap();
        let owners: Vec<_> = list.iter().map(|(_, w)| w.owner).collect();
        assert_eq!(owners, vec![owner(0), owner(2), owner(9)]);
        assert!(list.remove(keys[1]).is_none());
    }

    #[test]
    fn test_deliver_wakes_only_armed_matching() {
        let mut list = WaiterList::with_capacity(4);
        let k = list.insert(Waiter::new(owner(0), Interest::READABLE)).unwrap();

        // Unarmed: accumulates but does not wake
        assert!(!list.deliver(k, Interest::READABLE));
        // Arming sees the earlier event
        assert!(list.arm(k, Deadline::NONE));
        assert_eq!(list.disarm(k), Interest::READABLE);

        assert!(!list.arm(k, Deadline::NONE));
        assert!(!list.deliver(k, Interest::WRITABLE));
        assert!(list.deliver(k, Interest::HANGUP));
    }

    #[test]
    fn test_scan_fires_expired_and_reports_nearest() {
        let mut list = WaiterList::with_capacity(4);
        let a = list.insert(Waiter::new(owner(0), Interest::READABLE)).unwrap();
        let b = list.insert(Waiter::new(owner(1), Interest::READABLE)).unwrap();
        let c = list.insert(Waiter::new(owner(2), Interest::READABLE)).unwrap();
        list.arm(a, Deadline::at(100));
        list.arm(b, Deadline::at(300));
        list.arm(c, Deadline::at(200));

        let mut fired = Vec::new();
        let next = list.scan(150, &mut fired);
        assert_eq!(fired, vec![owner(0)]);
        assert_eq!(next, Deadline::at(200));

        // Timed out waiter reports nothing observed
        assert!(list.disarm(a).is_empty());

        fired.clear();
        list.deliver(b, Interest::READABLE);
        let next = list.scan(150, &mut fired);
        assert_eq!(fired, vec![owner(1)]);
        assert_eq!(next, Deadline::at(200));
        assert_eq!(list.disarm(b), Interest::READABLE);
    }
}
