//! Slot-indexed tables keyed by small integer ids
//!
//! Pending operations, copy jobs and directory jobs all live in an
//! [`IdTable`]. Ids are dense indices; a removed entry's index is reused by
//! the next insert, so an id is only meaningful while its entry is alive.

use std::marker::PhantomData;

/// A typed index into an [`IdTable`]
pub trait TableId: Copy + Eq + std::fmt::Debug {
    fn from_index(index: u32) -> Self;
    fn index(self) -> u32;
}

macro_rules! table_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u32);

        impl TableId for $name {
            fn from_index(index: u32) -> Self {
                Self(index)
            }

            fn index(self) -> u32 {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

table_id!(
    /// Completion tag: index of a pending-operation record
    OpId
);
table_id!(
    /// Index of a live copy job
    JobId
);
table_id!(
    /// Index of a live directory job
    DirId
);

/// Dense table with free-index reuse
#[derive(Debug)]
pub struct IdTable<K, V> {
    entries: Vec<Option<V>>,
    free: Vec<u32>,
    len: usize,
    _key: PhantomData<K>,
}

impl<K: TableId, V> Default for IdTable<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: TableId, V> IdTable<K, V> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            free: Vec::new(),
            len: 0,
            _key: PhantomData,
        }
    }

    /// Store `value` and return its id
    pub fn insert(&mut self, value: V) -> K {
        self.len += 1;
        if let Some(index) = self.free.pop() {
            self.entries[index as usize] = Some(value);
            return K::from_index(index);
        }
        let index = self.entries.len() as u32;
        self.entries.push(Some(value));
        K::from_index(index)
    }

    #[must_use]
    pub fn get(&self, id: K) -> Option<&V> {
        self.entries.get(id.index() as usize)?.as_ref()
    }

    pub fn get_mut(&mut self, id: K) -> Option<&mut V> {
        self.entries.get_mut(id.index() as usize)?.as_mut()
    }

    /// Take the entry out, freeing its id
    pub fn remove(&mut self, id: K) -> Option<V> {
        let value = self.entries.get_mut(id.index() as usize)?.take()?;
        self.free.push(id.index());
        self.len -= 1;
        Some(value)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}
