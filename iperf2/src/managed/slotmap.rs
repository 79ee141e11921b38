use alloc::vec::Vec;
use core::fmt;

/// A slotmap with a capacity fixed at construction.
///
/// A slotmap provides a `Vec`-like interface where each entry is associated with a stable
/// index-like key. Lookup with the key will detect if an entry has been removed but does not
/// require any lifetime relation.
///
/// ## Usage
///
/// ```
/// # use iperf2::managed::SlotMap;
/// let mut map = SlotMap::with_capacity(4);
/// let index = map.insert(42).unwrap();
/// assert_eq!(map.get(index).cloned(), Some(42));
/// assert_eq!(map.remove(index), Some(42));
/// assert_eq!(map.get(index), None);
/// ```
pub struct SlotMap<T> {
    entries: Vec<Entry<T>>,
    capacity: usize,
    generation: Generation,
    free_top: Option<usize>,
    len: usize,
}

/// An index into a slotmap.
///
/// The index remains valid until the entry is removed. If accessing the slotmap with the index
/// again after the entry was removed will fail, even if the index where the element was previously
/// stored has been reused for another element.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Key {
    idx: usize,
    generation: Generation,
}

/// The generation counter.
///
/// Has strictly positive values.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
struct Generation(u32);

enum Entry<T> {
    Occupied {
        generation: Generation,
        value: T,
    },
    Free {
        next: Option<usize>,
    },
}

impl<T> SlotMap<T> {
    /// Create an empty map that holds at most `capacity` elements.
    ///
    /// No storage is allocated until the first insertion.
    pub fn with_capacity(capacity: usize) -> Self {
        SlotMap {
            entries: Vec::new(),
            capacity,
            generation: Generation::default(),
            free_top: None,
            len: 0,
        }
    }

    /// Retrieve a value by index.
    pub fn get(&self, index: Key) -> Option<&T> {
        match self.entries.get(index.idx)? {
            Entry::Occupied { generation, value } if *generation == index.generation => Some(value),
            _ => None,
        }
    }

    /// Retrieve a mutable value by index.
    pub fn get_mut(&mut self, index: Key) -> Option<&mut T> {
        match self.entries.get_mut(index.idx)? {
            Entry::Occupied { generation, value } if *generation == index.generation => Some(value),
            _ => None,
        }
    }

    /// Insert a new value, returning its key.
    ///
    /// Fails when all slots are occupied.
    pub fn insert(&mut self, value: T) -> Option<Key> {
        let idx = match self.free_top {
            Some(idx) => idx,
            None if self.entries.len() < self.capacity => {
                self.entries.push(Entry::Free { next: None });
                self.entries.len() - 1
            },
            None => return None,
        };

        let next = match self.entries[idx] {
            Entry::Free { next } => next,
            Entry::Occupied { .. } => unreachable!("free list points to an occupied slot"),
        };

        let key = Key {
            idx,
            generation: self.generation,
        };

        self.entries[idx] = Entry::Occupied {
            generation: self.generation,
            value,
        };
        self.free_top = next;
        self.generation.advance();
        self.len += 1;
        Some(key)
    }

    /// Remove an element.
    ///
    /// Returns `None` if the provided index did not refer to a live element.
    pub fn remove(&mut self, index: Key) -> Option<T> {
        self.get(index)?;

        let freed = Entry::Free { next: self.free_top };
        let old = core::mem::replace(&mut self.entries[index.idx], freed);
        self.free_top = Some(index.idx);
        self.len -= 1;

        match old {
            Entry::Occupied { value, .. } => Some(value),
            Entry::Free { .. } => None,
        }
    }

    /// The number of live elements.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if no element is live.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The maximum number of live elements.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Generation {
    pub fn advance(&mut self) {
        self.0 = self.0.checked_add(1).unwrap_or(1);
    }
}

impl Default for Generation {
    fn default() -> Self {
        Generation(1)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "#{}.{}", self.idx, self.generation.0)
    }
}
