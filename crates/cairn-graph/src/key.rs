//! Generational keys and their allocator.
//!
//! A key is a 64-bit handle that packs a *generation* counter in the high 32
//! bits and a slot *index* in the low 32 bits. The generation is bumped every
//! time a slot is recycled, so a key held past its field's (or owner's)
//! lifetime is detected as stale instead of aliasing whatever reuses the slot.

use std::collections::VecDeque;
use std::fmt;
use std::marker::PhantomData;

use serde::{Deserialize, Serialize};

/// A handle type that can be produced by a [`KeyAllocator`].
pub trait SlotKey: Copy + Eq {
    /// Construct from a slot index and generation.
    fn new(index: u32, generation: u32) -> Self;
    /// The slot index.
    fn index(self) -> u32;
    /// The slot generation.
    fn generation(self) -> u32;
}

// ---------------------------------------------------------------------------
// FieldKey
// ---------------------------------------------------------------------------

/// Identity of one field tracked by the dependency graph.
///
/// Layout: `[generation: u32 | index: u32]`
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FieldKey(u64);

impl FieldKey {
    /// Raw `u64` representation.
    #[inline]
    pub fn to_raw(self) -> u64 {
        self.0
    }

    /// Reconstruct from a raw `u64`.
    #[inline]
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

impl SlotKey for FieldKey {
    #[inline]
    fn new(index: u32, generation: u32) -> Self {
        Self((generation as u64) << 32 | index as u64)
    }

    #[inline]
    fn index(self) -> u32 {
        self.0 as u32
    }

    #[inline]
    fn generation(self) -> u32 {
        (self.0 >> 32) as u32
    }
}

impl fmt::Debug for FieldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FieldKey({}v{})", self.index(), self.generation())
    }
}

impl fmt::Display for FieldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index(), self.generation())
    }
}

// ---------------------------------------------------------------------------
// KeyAllocator
// ---------------------------------------------------------------------------

/// Allocates and recycles generational keys.
///
/// Free slots are reused in FIFO order so generations spread across slots
/// instead of churning a single hot index.
#[derive(Debug, Clone)]
pub struct KeyAllocator<K> {
    generations: Vec<u32>,
    alive: Vec<bool>,
    free_indices: VecDeque<u32>,
    _key: PhantomData<K>,
}

impl<K: SlotKey> KeyAllocator<K> {
    /// Create an empty allocator.
    pub fn new() -> Self {
        Self {
            generations: Vec::new(),
            alive: Vec::new(),
            free_indices: VecDeque::new(),
            _key: PhantomData,
        }
    }

    /// Allocate a fresh key, recycling a freed slot when one is available.
    pub fn allocate(&mut self) -> K {
        if let Some(index) = self.free_indices.pop_front() {
            // Generation was already bumped on release.
            self.alive[index as usize] = true;
            K::new(index, self.generations[index as usize])
        } else {
            let index = self.generations.len() as u32;
            self.generations.push(0);
            self.alive.push(true);
            K::new(index, 0)
        }
    }

    /// Release `key`, making every outstanding copy of it stale.
    ///
    /// Returns `false` if the key was already released or stale.
    pub fn release(&mut self, key: K) -> bool {
        if !self.is_alive(key) {
            return false;
        }
        let idx = key.index() as usize;
        self.alive[idx] = false;
        self.generations[idx] = self.generations[idx].wrapping_add(1);
        self.free_indices.push_back(key.index());
        true
    }

    /// `true` if `key` refers to a live slot with a matching generation.
    pub fn is_alive(&self, key: K) -> bool {
        let idx = key.index() as usize;
        idx < self.generations.len()
            && self.alive[idx]
            && self.generations[idx] == key.generation()
    }

    /// Number of live keys.
    pub fn alive_count(&self) -> usize {
        self.alive.iter().filter(|&&a| a).count()
    }

    /// Upper bound on slot indices handed out so far.
    pub fn capacity(&self) -> usize {
        self.generations.len()
    }
}

impl<K: SlotKey> Default for KeyAllocator<K> {
    fn default() -> Self {
        Self::new()
    }
}

/// Allocator for [`FieldKey`]s.
pub type FieldKeyAllocator = KeyAllocator<FieldKey>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_unique_keys() {
        let mut alloc = FieldKeyAllocator::new();
        let keys: Vec<FieldKey> = (0..64).map(|_| alloc.allocate()).collect();
        let mut indices: Vec<u32> = keys.iter().map(|k| k.index()).collect();
        indices.sort();
        indices.dedup();
        assert_eq!(indices.len(), 64);
        assert_eq!(alloc.alive_count(), 64);
    }

    #[test]
    fn recycled_slot_gets_new_generation() {
        let mut alloc = FieldKeyAllocator::new();
        let k0 = alloc.allocate();
        assert!(alloc.release(k0));
        let k1 = alloc.allocate();
        assert_eq!(k1.index(), k0.index());
        assert_eq!(k1.generation(), 1);
        assert!(!alloc.is_alive(k0), "stale key must not be alive after recycle");
        assert!(alloc.is_alive(k1));
    }

    #[test]
    fn double_release_returns_false() {
        let mut alloc = FieldKeyAllocator::new();
        let k = alloc.allocate();
        assert!(alloc.release(k));
        assert!(!alloc.release(k));
    }

    #[test]
    fn key_packs_index_and_generation() {
        let key = FieldKey::new(42, 7);
        assert_eq!(key.index(), 42);
        assert_eq!(key.generation(), 7);
        assert_eq!(FieldKey::from_raw(key.to_raw()), key);
        assert_eq!(format!("{key:?}"), "FieldKey(42v7)");
    }
}
