//! Typed handles into the control-flow node arena.

use std::marker::PhantomData;
use std::ops::{Index, IndexMut};

/// A `u32` slot number wrapped in its own type.
pub trait EntityRef: Copy + Eq + std::hash::Hash + std::fmt::Debug {
    fn from_slot(slot: u32) -> Self;
    fn slot(self) -> u32;
}

/// Declare a handle type for an [`Arena`].
#[macro_export]
macro_rules! define_entity {
    ($name:ident) => {
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
        pub struct $name(u32);

        impl $crate::entity::EntityRef for $name {
            fn from_slot(slot: u32) -> Self {
                Self(slot)
            }
            fn slot(self) -> u32 {
                self.0
            }
        }
    };
}

/// Append-only storage. Folding a region into a composite rewires handles
/// and never frees a slot, so a handle stays valid for the arena's lifetime.
#[derive(Debug, Clone)]
pub struct Arena<K: EntityRef, V> {
    slots: Vec<V>,
    _key: PhantomData<K>,
}

impl<K: EntityRef, V> Default for Arena<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: EntityRef, V> Arena<K, V> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            _key: PhantomData,
        }
    }

    pub fn push(&mut self, value: V) -> K {
        let key = K::from_slot(self.slots.len() as u32);
        self.slots.push(value);
        key
    }

    pub fn get(&self, key: K) -> Option<&V> {
        self.slots.get(key.slot() as usize)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl<K: EntityRef, V> Index<K> for Arena<K, V> {
    type Output = V;
    fn index(&self, key: K) -> &V {
        &self.slots[key.slot() as usize]
    }
}

impl<K: EntityRef, V> IndexMut<K> for Arena<K, V> {
    fn index_mut(&mut self, key: K) -> &mut V {
        &mut self.slots[key.slot() as usize]
    }
}
