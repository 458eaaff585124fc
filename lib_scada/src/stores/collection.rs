//! # Entity Collection
//!
//! The ordered, id-keyed container behind both stores. Logical order is
//! "most recently inserted first": snapshot order for loaded records, and new
//! records pushed by the event stream land at the front.
//!
//! Records are kept in a `Vec` in *reverse* logical order, so a front insert is
//! a `push` and the slot of an existing record never moves. That keeps the
//! id → slot index valid across inserts and makes both lookup and upsert O(1).

use std::collections::HashMap;

use crate::models::{Entity, EntityId};

/// What an upsert did to the collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    /// The id already existed; the record was replaced at its position.
    Replaced,
    /// The id was new; the record was inserted at the front.
    Inserted,
}

/// Ordered collection of entities with unique ids.
#[derive(Debug, Clone)]
pub struct EntityCollection<T> {
    /// Records in reverse logical order.
    slots: Vec<T>,
    /// id -> index into `slots`.
    index: HashMap<EntityId, usize>,
}

impl<T> Default for EntityCollection<T> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            index: HashMap::new(),
        }
    }
}

impl<T: Entity> EntityCollection<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the whole collection with `items`, keeping their order.
    ///
    /// A duplicate id inside the snapshot keeps the position of its first
    /// occurrence and the content of its last.
    pub fn replace_all(&mut self, items: Vec<T>) {
        let mut ordered: Vec<T> = Vec::with_capacity(items.len());
        let mut seen: HashMap<EntityId, usize> = HashMap::with_capacity(items.len());
        for item in items {
            match seen.get(&item.id()) {
                Some(&pos) => {
                    log::debug!("Snapshot contains id {} twice; keeping the later record.", item.id());
                    ordered[pos] = item;
                }
                None => {
                    seen.insert(item.id(), ordered.len());
                    ordered.push(item);
                }
            }
        }

        ordered.reverse();
        self.index = ordered
            .iter()
            .enumerate()
            .map(|(slot, item)| (item.id(), slot))
            .collect();
        self.slots = ordered;
    }

    /// Replaces the record with the same id in place, or inserts it at the front.
    pub fn upsert(&mut self, item: T) -> Upsert {
        match self.index.get(&item.id()) {
            Some(&slot) => {
                self.slots[slot] = item;
                Upsert::Replaced
            }
            None => {
                self.index.insert(item.id(), self.slots.len());
                self.slots.push(item);
                Upsert::Inserted
            }
        }
    }

    pub fn get(&self, id: EntityId) -> Option<&T> {
        self.index.get(&id).map(|&slot| &self.slots[slot])
    }

    pub fn get_mut(&mut self, id: EntityId) -> Option<&mut T> {
        match self.index.get(&id) {
            Some(&slot) => Some(&mut self.slots[slot]),
            None => None,
        }
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.index.contains_key(&id)
    }

    /// Logical position (0 = front) of the record with `id`.
    pub fn position(&self, id: EntityId) -> Option<usize> {
        self.index.get(&id).map(|&slot| self.slots.len() - 1 - slot)
    }

    /// Iterates in logical order, front first.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + ExactSizeIterator + '_ {
        self.slots.iter().rev()
    }

    /// Clones the records in logical order.
    pub fn to_vec(&self) -> Vec<T> {
        self.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
