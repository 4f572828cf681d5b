//! Generation-checked slot arena.
//!
//! Removed slots go on a free list and are reused; every reuse bumps the
//! slot generation so a stale handle can never reach the new occupant.

/// Handle to an occupied slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotHandle {
    index: u32,
    generation: u32,
}

impl SlotHandle {
    pub(crate) fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Slot index.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Generation of the slot when the handle was issued.
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

#[derive(Debug)]
struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

#[derive(Debug)]
pub(crate) struct SlotArena<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    len: usize,
}

impl<T> SlotArena<T> {
    pub(crate) fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            len: 0,
        }
    }

    /// Creates an arena holding `value` under an already issued handle.
    pub(crate) fn seeded(handle: SlotHandle, value: T) -> Self {
        let mut arena = Self::new();
        for index in 0..handle.index {
            arena.slots.push(Slot {
                generation: 0,
                value: None,
            });
            arena.free.push(index);
        }
        arena.slots.push(Slot {
            generation: handle.generation,
            value: Some(value),
        });
        arena.len = 1;
        arena
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn insert(&mut self, value: T) -> SlotHandle {
        self.len += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.value = Some(value);
            return SlotHandle::new(index, slot.generation);
        }

        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            value: Some(value),
        });
        SlotHandle::new(index, 0)
    }

    /// Removes the value behind `handle`; stale handles return `None`.
    pub(crate) fn remove(&mut self, handle: SlotHandle) -> Option<T> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);
        self.len -= 1;
        Some(value)
    }

    #[cfg(test)]
    pub(crate) fn get(&self, handle: SlotHandle) -> Option<&T> {
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.value.as_ref())
    }

    pub(crate) fn values(&self) -> impl Iterator<Item = &T> + '_ {
        self.slots.iter().filter_map(|slot| slot.value.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_remove_reuse() {
        let mut arena = SlotArena::new();
        let a = arena.insert("a");
        let b = arena.insert("b");
        assert_eq!(arena.len(), 2);

        assert_eq!(arena.remove(a), Some("a"));
        assert_eq!(arena.remove(a), None);

        let c = arena.insert("c");
        assert_eq!(c.index(), a.index());
        assert_ne!(c.generation(), a.generation());
        assert_eq!(arena.get(a), None);
        assert_eq!(arena.get(c), Some(&"c"));
        assert_eq!(arena.get(b), Some(&"b"));

        let mut values: Vec<_> = arena.values().copied().collect();
        values.sort_unstable();
        assert_eq!(values, vec!["b", "c"]);
    }

    #[test]
    fn test_seeded_keeps_handle_valid() {
        let handle = SlotHandle::new(0, 7);
        let mut arena = SlotArena::seeded(handle, 1);
        let other = arena.insert(2);
        assert_eq!(other.index(), 1);
        assert_eq!(arena.remove(handle), Some(1));
        assert_eq!(arena.get(other), Some(&2));
    }
}
