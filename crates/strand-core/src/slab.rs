//! Bounded generational arena
//!
//! Replaces raw back-pointers with `(index, generation)` keys. A slot
//! bumps its generation when freed, so a key held past removal simply
//! misses instead of aliasing the next occupant.
//!
//! Freed indices are reused LIFO for cache-friendly reuse of recently
//! freed slots. Capacity is fixed at construction: `insert` on a full
//! slab hands the value back instead of growing.

use core::fmt;

/// Key into a [`Slab`]
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlabKey {
    index: u32,
    generation: u32,
}

impl SlabKey {
    #[inline]
    pub const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    #[inline]
    pub const fn index(self) -> u32 {
        self.index
    }

    #[inline]
    pub const fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Debug for SlabKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SlabKey({}v{})", self.index, self.generation)
    }
}

enum Entry<T> {
    Occupied { generation: u32, value: T },
    Vacant { generation: u32 },
}

/// Fixed-capacity arena addressed by [`SlabKey`]
pub struct Slab<T> {
    entries: Vec<Entry<T>>,
    /// LIFO stack of vacant indices
    free: Vec<u32>,
    len: usize,
    capacity: usize,
}

impl<T> Slab<T> {
    /// Create a slab that holds at most `capacity` values
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity.min(4096)),
            free: Vec::new(),
            len: 0,
            capacity,
        }
    }

    /// Insert a value, returning its key, or the value back if full
    pub fn insert(&mut self, value: T) -> Result<SlabKey, T> {
        if self.len >= self.capacity {
            return Err(value);
        }

        let key = match self.free.pop() {
            Some(index) => {
                let entry = &mut self.entries[index as usize];
                let generation = match entry {
                    Entry::Vacant { generation } => *generation,
                    Entry::Occupied { .. } => unreachable!("free list holds an occupied slot"),
                };
                *entry = Entry::Occupied { generation, value };
                SlabKey::new(index, generation)
            }
            None => {
                let index = self.entries.len() as u32;
                self.entries.push(Entry::Occupied { generation: 0, value });
                SlabKey::new(index, 0)
            }
        };

        self.len += 1;
        Ok(key)
    }

    /// Remove the value at `key`; stale keys return `None`
    pub fn remove(&mut self, key: SlabKey) -> Option<T> {
        let entry = self.entries.get_mut(key.index as usize)?;
        match entry {
            Entry::Occupied { generation, .. } if *generation == key.generation => {
                let next = Entry::Vacant { generation: generation.wrapping_add(1) };
                let old = core::mem::replace(entry, next);
                self.free.push(key.index);
                self.len -= 1;
                match old {
                    Entry::Occupied { value, .. } => Some(value),
                    Entry::Vacant { .. } => None,
                }
            }
            _ => None,
        }
    }

    #[inline]
    pub fn get(&self, key: SlabKey) -> Option<&T> {
        match self.entries.get(key.index as usize)? {
            Entry::Occupied { generation, value } if *generation == key.generation => Some(value),
            _ => None,
        }
    }

    #[inline]
    pub fn get_mut(&mut self, key: SlabKey) -> Option<&mut T> {
        match self.entries.get_mut(key.index as usize)? {
            Entry::Occupied { generation, value } if *generation == key.generation => Some(value),
            _ => None,
        }
    }

    /// Look up by bare index (the caller tracks liveness itself)
    #[inline]
    pub(crate) fn get_by_index(&self, index: u32) -> Option<(SlabKey, &T)> {
        match self.entries.get(index as usize)? {
            Entry::Occupied { generation, value } => Some((SlabKey::new(index, *generation), value)),
            Entry::Vacant { .. } => None,
        }
    }

    #[inline]
    pub(crate) fn get_mut_by_index(&mut self, index: u32) -> Option<(SlabKey, &mut T)> {
        match self.entries.get_mut(index as usize)? {
            Entry::Occupied { generation, value } => Some((SlabKey::new(index, *generation), value)),
            Entry::Vacant { .. } => None,
        }
    }

    #[inline]
    pub fn contains(&self, key: SlabKey) -> bool {
        self.get(key).is_some()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.len >= self.capacity
    }

    /// Remove every value, returning them in index order
    pub fn drain(&mut self) -> Vec<T> {
        let mut out = Vec::with_capacity(self.len);
        for index in 0..self.entries.len() {
            let entry = &mut self.entries[index];
            if let Entry::Occupied { generation, .. } = entry {
                let next = Entry::Vacant { generation: generation.wrapping_add(1) };
                if let Entry::Occupied { value, .. } = core::mem::replace(entry, next) {
                    out.push(value);
                }
                self.free.push(index as u32);
            }
        }
        self.len = 0;
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_get_remove() {
        let mut slab = Slab::with_capacity(4);
        let a = slab.insert("a").unwrap();
        let b = slab.insert("b").unwrap();
        assert_eq!(slab.len(), 2);
        assert_eq!(slab.get(a), Some(&"a"));
        assert_eq!(slab.remove(b), Some("b"));
        assert_eq!(slab.get(b), None);
        assert_eq!(slab.len(), 1);
    }

    #[test]
    fn test_bounded_capacity() {
        let mut slab = Slab::with_capacity(2);
        slab.insert(1).unwrap();
        slab.insert(2).unwrap();
        assert!(slab.is_full());
        assert_eq!(slab.insert(3), Err(3));
    }

    #[test]
    fn test_stale_key_misses_after_reuse() {
        let mut slab = Slab::with_capacity(1);
        let first = slab.insert(10).unwrap();
        slab.remove(first);
        let second = slab.insert(20).unwrap();

        // Same slot, new generation
        assert_eq!(first.index(), second.index());
        assert_ne!(first.generation(), second.generation());
        assert_eq!(slab.get(first), None);
        assert_eq!(slab.remove(first), None);
        assert_eq!(slab.get(second), Some(&20));
    }

    #[test]
    fn test_drain_empties_slab() {
        let mut slab = Slab::with_capacity(8);
        let keys: Vec<_> = (0..5).map(|i| slab.insert(i).unwrap()).collect();
        slab.remove(keys[2]);
        assert_eq!(slab.drain(), vec![0, 1, 3, 4]);
        assert!(slab.is_empty());
        assert!(!slab.contains(keys[0]));
    }
}
