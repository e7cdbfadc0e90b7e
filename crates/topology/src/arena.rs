//! Fixed-capacity slot arena with generation-checked handles
//!
//! Slots never move, so a slot index doubles as a stable identifier (router
//! id, child index). Every removal bumps the slot generation, which turns
//! any handle taken before the removal into a stale one. A slot can also be
//! retired until a deadline, during which it stays empty but cannot be
//! handed out again.

use meshlink_core::Timestamp;
use serde::{Deserialize, Serialize};

/// Handle to an occupied slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SlotHandle {
    index: u16,
    generation: u32,
}

impl SlotHandle {
    /// Slot position, stable for the life of the arena
    pub fn index(&self) -> u16 {
        self.index
    }

    /// Occupancy the handle was issued for
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

/// Occupancy of a slot at a given time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlotStatus {
    Free,
    Allocated,
    /// Empty but held back from reuse until the given time
    ReclaimDelay { until: Timestamp },
}

#[derive(Debug)]
struct Slot<T> {
    entry: Option<T>,
    generation: u32,
    reclaim_until: Option<Timestamp>,
}

impl<T> Slot<T> {
    fn is_free(&self, now: Timestamp) -> bool {
        self.entry.is_none() && self.reclaim_until.map_or(true, |until| now >= until)
    }
}

/// Slots of `T` whose count is fixed at construction
#[derive(Debug)]
pub struct Arena<T> {
    slots: Vec<Slot<T>>,
}

impl<T> Arena<T> {
    /// Create `capacity` empty slots
    pub fn with_capacity(capacity: usize) -> Self {
        let slots = (0..capacity)
            .map(|_| Slot {
                entry: None,
                generation: 0,
                reclaim_until: None,
            })
            .collect();
        Self { slots }
    }

    /// Total slots, occupied or not
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of occupied slots
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.entry.is_some()).count()
    }

    /// Whether no slot is occupied
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Occupancy of slot `index`; `None` past the end
    pub fn status(&self, index: u16, now: Timestamp) -> Option<SlotStatus> {
        let slot = self.slots.get(index as usize)?;
        Some(match (&slot.entry, slot.reclaim_until) {
            (Some(_), _) => SlotStatus::Allocated,
            (None, Some(until)) if now < until => SlotStatus::ReclaimDelay { until },
            (None, _) => SlotStatus::Free,
        })
    }

    /// Place an entry in the lowest free slot. `make` receives the slot index.
    pub fn insert_with(
        &mut self,
        now: Timestamp,
        make: impl FnOnce(u16) -> T,
    ) -> Option<SlotHandle> {
        let index = self.slots.iter().position(|s| s.is_free(now))?;
        self.occupy(index, make)
    }

    /// Place an entry in a specific slot if it is free.
    pub fn insert_at(
        &mut self,
        index: u16,
        now: Timestamp,
        make: impl FnOnce(u16) -> T,
    ) -> Option<SlotHandle> {
        let slot = self.slots.get(index as usize)?;
        if !slot.is_free(now) {
            return None;
        }
        self.occupy(index as usize, make)
    }

    fn occupy(&mut self, index: usize, make: impl FnOnce(u16) -> T) -> Option<SlotHandle> {
        let slot = self.slots.get_mut(index)?;
        slot.entry = Some(make(index as u16));
        slot.reclaim_until = None;
        Some(SlotHandle {
            index: index as u16,
            generation: slot.generation,
        })
    }

    fn slot(&self, handle: SlotHandle) -> Option<&Slot<T>> {
        self.slots
            .get(handle.index as usize)
            .filter(|s| s.generation == handle.generation)
    }

    /// Entry behind `handle` unless the slot was emptied since
    pub fn get(&self, handle: SlotHandle) -> Option<&T> {
        self.slot(handle)?.entry.as_ref()
    }

    pub fn get_mut(&mut self, handle: SlotHandle) -> Option<&mut T> {
        self.slots
            .get_mut(handle.index as usize)
            .filter(|s| s.generation == handle.generation)?
            .entry
            .as_mut()
    }

    /// Empty the slot immediately.
    pub fn remove(&mut self, handle: SlotHandle) -> Option<T> {
        self.retire(handle, None)
    }

    /// Empty the slot, holding it back from reuse until `until` when given.
    pub fn retire(&mut self, handle: SlotHandle, until: Option<Timestamp>) -> Option<T> {
        let slot = self
            .slots
            .get_mut(handle.index as usize)
            .filter(|s| s.generation == handle.generation)?;
        let entry = slot.entry.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        slot.reclaim_until = until;
        Some(entry)
    }

    /// Clear reclaim delays that have elapsed; returns how many slots became free.
    pub fn sweep(&mut self, now: Timestamp) -> usize {
        let mut freed = 0;
        for slot in &mut self.slots {
            if matches!(slot.reclaim_until, Some(until) if now >= until) {
                slot.reclaim_until = None;
                freed += 1;
            }
        }
        freed
    }

    /// Occupied slots in index order
    pub fn iter(&self) -> impl Iterator<Item = (SlotHandle, &T)> + '_ {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.entry.as_ref().map(|entry| {
                (
                    SlotHandle {
                        index: index as u16,
                        generation: slot.generation,
                    },
                    entry,
                )
            })
        })
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (SlotHandle, &mut T)> + '_ {
        self.slots.iter_mut().enumerate().filter_map(|(index, slot)| {
            let generation = slot.generation;
            slot.entry.as_mut().map(|entry| {
                (
                    SlotHandle {
                        index: index as u16,
                        generation,
                    },
                    entry,
                )
            })
        })
    }
}
