//! Generational slot storage for live connections.
//!
//! Continuations only ever capture a [`ConnectionId`]. Removing an entry bumps
//! its slot's generation, so an id kept past the connection's close can never
//! resolve to whatever reuses the slot.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId {
    index: u32,
    generation: u32,
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.index, self.generation)
    }
}

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

pub(crate) struct Slab<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    len: usize,
}

impl<T> Slab<T> {
    pub(crate) fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            len: 0,
        }
    }

    pub(crate) fn insert(&mut self, value: T) -> ConnectionId {
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    value: None,
                });
                (self.slots.len() - 1) as u32
            }
        };

        let slot = &mut self.slots[index as usize];
        slot.value = Some(value);
        self.len += 1;

        ConnectionId {
            index,
            generation: slot.generation,
        }
    }

    pub(crate) fn get_mut(&mut self, id: ConnectionId) -> Option<&mut T> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.value.as_mut())
    }

    pub(crate) fn remove(&mut self, id: ConnectionId) -> Option<T> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }

        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        self.len -= 1;

        Some(value)
    }

    /// Removes every entry, returning them with their ids.
    pub(crate) fn drain(&mut self) -> Vec<(ConnectionId, T)> {
        let ids: Vec<ConnectionId> = self
            .slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.value.is_some())
            .map(|(index, slot)| ConnectionId {
                index: index as u32,
                generation: slot.generation,
            })
            .collect();

        ids.into_iter()
            .filter_map(|id| self.remove(id).map(|value| (id, value)))
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }
}
