//! Entity identity and slot lifecycle
//!
//! Every simulated object is addressed by an [`EntityId`]: a slot index plus
//! the generation the slot had when it was allocated. References between
//! entities (parent, owner, team, children, AI targets) are plain copies of
//! these ids and never own their target. Freeing a slot bumps its generation,
//! so every outstanding copy stops resolving instead of silently pointing at
//! whatever entity reuses the slot next.

use std::fmt;

use bitvec::prelude::*;
use serde::{Deserialize, Serialize};

/// Generational entity reference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId {
    /// Slot index in the registry
    pub id: u32,
    /// Slot generation at allocation time
    pub generation: u32,
}

impl EntityId {
    #[inline]
    pub const fn new(id: u32, generation: u32) -> Self {
        Self { id, generation }
    }

    #[inline]
    pub fn index(self) -> usize {
        self.id as usize
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}v{}", self.id, self.generation)
    }
}

/// Errors raised by the registry
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// Every slot is live. This is a sizing bug, not a runtime condition.
    #[error("entity id space exhausted ({capacity} slots)")]
    Exhausted { capacity: usize },
}

/// Owns all entity slots
///
/// Allocation always takes the lowest free slot so ids stay dense and
/// iteration order stays stable across replays.
#[derive(Debug, Clone)]
pub struct EntityRegistry {
    /// Liveness bit per slot
    live: BitVec,
    /// Current generation per slot (bumped on free)
    generations: Vec<u32>,
    live_count: usize,
}

impl EntityRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            live: bitvec![0; capacity],
            generations: vec![0; capacity],
            live_count: 0,
        }
    }

    /// Allocate the lowest free slot
    pub fn allocate(&mut self) -> Result<EntityId, RegistryError> {
        let slot = self.live.first_zero().ok_or(RegistryError::Exhausted {
            capacity: self.capacity(),
        })?;
        self.live.set(slot, true);
        self.live_count += 1;
        Ok(EntityId::new(slot as u32, self.generations[slot]))
    }

    /// True iff the slot is live and still carries the same generation
    #[inline]
    pub fn exists(&self, entity: EntityId) -> bool {
        let slot = entity.index();
        slot < self.live.len() && self.live[slot] && self.generations[slot] == entity.generation
    }

    /// Release a slot. Freeing an already-dead reference is a no-op and
    /// returns false, since several systems may ask for the same removal.
    pub fn free(&mut self, entity: EntityId) -> bool {
        if !self.exists(entity) {
            return false;
        }
        let slot = entity.index();
        self.live.set(slot, false);
        self.generations[slot] = self.generations[slot].wrapping_add(1);
        self.live_count -= 1;
        true
    }

    /// Resolve the live entity currently occupying a slot
    pub fn live_at(&self, slot: usize) -> Option<EntityId> {
        (slot < self.live.len() && self.live[slot])
            .then(|| EntityId::new(slot as u32, self.generations[slot]))
    }

    /// Iterate live entities in ascending id order
    pub fn iter_live(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.live
            .iter_ones()
            .map(move |slot| EntityId::new(slot as u32, self.generations[slot]))
    }

    /// Call `f` for each live entity in ascending id order
    pub fn for_each_live<F: FnMut(EntityId)>(&self, f: F) {
        self.iter_live().for_each(f);
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.live_count
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.live_count == 0
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.live.len()
    }
}
