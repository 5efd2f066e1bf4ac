//! Deferred-cleanup registry.
//!
//! Each arena owns one [`Registry`]: a growable slot table in which every
//! slot is either *active* (holding a cleanup and linked into a doubly
//! linked list, most recent first) or *free* (singly linked for reuse).
//! Links are slot indices, so the whole structure lives in one `Vec`.
//!
//! A [`SlotId`] carries the slot's generation. Releasing a slot bumps the
//! generation, which turns every outstanding id for it into a detectable
//! stale id rather than a handle to whatever reuses the slot.

use std::fmt;
use std::mem;

use crate::arena::Arena;
use crate::error::{Error, Result};

/// Handle to a registered deferred cleanup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId {
    index: u32,
    generation: u32,
}

impl SlotId {
    /// Position of the slot in its arena's table.
    #[must_use]
    pub const fn index(self) -> usize {
        self.index as usize
    }
}

/// Work an arena performs when a slot fires.
pub(crate) enum Cleanup<'a> {
    /// Caller-supplied finalizer.
    Call(Box<dyn FnOnce() + 'a>),
    /// A child arena owned through this slot.
    Child(Box<Arena<'a>>),
}

impl fmt::Debug for Cleanup<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cleanup::Call(_) => f.write_str("Call(..)"),
            Cleanup::Child(child) => f.debug_tuple("Child").field(child).finish(),
        }
    }
}

#[derive(Debug)]
enum SlotState<T> {
    Active {
        item: T,
        prev: Option<u32>,
        next: Option<u32>,
    },
    Free {
        next: Option<u32>,
    },
}

#[derive(Debug)]
struct Slot<T> {
    generation: u32,
    state: SlotState<T>,
}

/// Slot table threading an active list and a free list.
#[derive(Debug)]
pub(crate) struct Registry<T> {
    slots: Vec<Slot<T>>,
    active_head: Option<u32>,
    free_head: Option<u32>,
    active: usize,
    /// Most slots the table may hold.
    limit: u32,
}

impl<T> Registry<T> {
    pub(crate) const fn new() -> Self {
        Registry {
            slots: Vec::new(),
            active_head: None,
            free_head: None,
            active: 0,
            limit: u32::MAX,
        }
    }

    /// A registry that refuses to grow past `limit` slots.
    #[cfg(test)]
    pub(crate) fn with_limit(limit: u32) -> Self {
        Registry {
            limit,
            ..Self::new()
        }
    }

    /// Number of active slots.
    pub(crate) fn len(&self) -> usize {
        self.active
    }

    /// Activates a slot holding `item` at the head of the active list.
    ///
    /// On failure nothing has changed and `item` is dropped.
    pub(crate) fn register(&mut self, item: T) -> Result<SlotId> {
        let index = match self.free_head {
            Some(index) => index,
            None => {
                let index = u32::try_from(self.slots.len())
                    .ok()
                    .filter(|&index| index < self.limit)
                    .ok_or(Error::SlotTableFull)?;
                self.slots.try_reserve(1).map_err(|_| Error::OutOfMemory {
                    size: mem::size_of::<Slot<T>>(),
                })?;
                self.slots.push(Slot {
                    generation: 0,
                    state: SlotState::Free { next: None },
                });
                self.free_head = Some(index);
                index
            }
        };

        let head = self.active_head;
        let slot = &mut self.slots[index as usize];
        let SlotState::Free { next: next_free } = slot.state else {
            unreachable!("free list holds active slot {index}");
        };
        slot.state = SlotState::Active {
            item,
            prev: None,
            next: head,
        };
        let generation = slot.generation;

        self.free_head = next_free;
        if let Some(head) = head {
            self.set_prev(head, Some(index));
        }
        self.active_head = Some(index);
        self.active += 1;
        Ok(SlotId { index, generation })
    }

    /// Swaps the item of an active slot without moving it in the list.
    pub(crate) fn replace(&mut self, id: SlotId, item: T) -> T {
        mem::replace(self.get_mut(id), item)
    }

    /// Unlinks an active slot, moves it to the free list and returns its
    /// item.
    pub(crate) fn cancel(&mut self, id: SlotId) -> T {
        let index = self.validate(id);
        self.release(index)
    }

    /// Unlinks the head of the active list (the most recent registration).
    pub(crate) fn pop_front(&mut self) -> Option<T> {
        self.active_head.map(|index| self.release(index))
    }

    pub(crate) fn get(&self, id: SlotId) -> &T {
        let index = self.validate(id);
        match &self.slots[index as usize].state {
            SlotState::Active { item, .. } => item,
            SlotState::Free { .. } => unreachable!(),
        }
    }

    pub(crate) fn get_mut(&mut self, id: SlotId) -> &mut T {
        let index = self.validate(id);
        match &mut self.slots[index as usize].state {
            SlotState::Active { item, .. } => item,
            SlotState::Free { .. } => unreachable!(),
        }
    }

    /// Returns `true` if `id` names a live slot of this registry.
    pub(crate) fn contains(&self, id: SlotId) -> bool {
        self.slots.get(id.index as usize).is_some_and(|slot| {
            slot.generation == id.generation
                && matches!(slot.state, SlotState::Active { .. })
        })
    }

    /// Active items from head to tail.
    pub(crate) fn iter(&self) -> impl Iterator<Item = &T> {
        let mut cursor = self.active_head;
        std::iter::from_fn(move || {
            let index = cursor?;
            match &self.slots[index as usize].state {
                SlotState::Active { item, next, .. } => {
                    cursor = *next;
                    Some(item)
                }
                SlotState::Free { .. } => unreachable!("active list reached free slot {index}"),
            }
        })
    }

    fn validate(&self, id: SlotId) -> u32 {
        assert!(
            self.contains(id),
            "deferred cleanup slot {} (generation {}) is not active in this arena",
            id.index,
            id.generation
        );
        id.index
    }

    fn release(&mut self, index: u32) -> T {
        let free_head = self.free_head;
        let slot = &mut self.slots[index as usize];
        let state = mem::replace(&mut slot.state, SlotState::Free { next: free_head });
        slot.generation = slot.generation.wrapping_add(1);
        let SlotState::Active { item, prev, next } = state else {
            unreachable!("released free slot {index}");
        };

        match prev {
            Some(prev) => self.set_next(prev, next),
            None => self.active_head = next,
        }
        if let Some(next) = next {
            self.set_prev(next, prev);
        }
        self.free_head = Some(index);
        self.active -= 1;
        item
    }

    fn set_prev(&mut self, index: u32, value: Option<u32>) {
        match &mut self.slots[index as usize].state {
            SlotState::Active { prev, .. } => *prev = value,
            SlotState::Free { .. } => unreachable!("active list links free slot {index}"),
        }
    }

    fn set_next(&mut self, index: u32, value: Option<u32>) {
        match &mut self.slots[index as usize].state {
            SlotState::Active { next, .. } => *next = value,
            SlotState::Free { .. } => unreachable!("active list links free slot {index}"),
        }
    }

    /// Checks that the active and free lists partition the table.
    #[cfg(test)]
    pub(crate) fn is_partitioned(&self) -> bool {
        let mut seen = vec![false; self.slots.len()];
        let mut expected_prev = None;
        let mut cursor = self.active_head;
        let mut active = 0;
        while let Some(index) = cursor {
            let i = index as usize;
            let SlotState::Active { prev, next, .. } = &self.slots[i].state else {
                return false;
            };
            if seen[i] || *prev != expected_prev {
                return false;
            }
            seen[i] = true;
            active += 1;
            expected_prev = Some(index);
            cursor = *next;
        }
        let mut cursor = self.free_head;
        while let Some(index) = cursor {
            let i = index as usize;
            let SlotState::Free { next } = &self.slots[i].state else {
                return false;
            };
            if seen[i] {
                return false;
            }
            seen[i] = true;
            cursor = *next;
        }
        active == self.active && seen.iter().all(|&s| s)
    }
}
