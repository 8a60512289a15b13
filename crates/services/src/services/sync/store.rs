use std::{cmp::Ordering, collections::HashMap};

use db::models::entity::{Entity, EntityId};

#[derive(Debug, Clone)]
struct Slot {
    entity: Entity,
    position: u64,
}

/// In-memory mirror of one remote collection, keyed by entity id.
///
/// `list()` returns entities in first-insertion order; overwriting an entity
/// keeps its position so rows do not jump around while being edited.
#[derive(Debug, Default, Clone)]
pub struct LocalEntityStore {
    slots: HashMap<EntityId, Slot>,
    next_position: u64,
}

impl LocalEntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<&Entity> {
        self.slots.get(id).map(|slot| &slot.entity)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.slots.contains_key(id)
    }

    pub fn list(&self) -> Vec<Entity> {
        let mut slots: Vec<&Slot> = self.slots.values().collect();
        slots.sort_by_key(|slot| slot.position);
        slots.into_iter().map(|slot| slot.entity.clone()).collect()
    }

    pub fn list_by<F>(&self, mut compare: F) -> Vec<Entity>
    where
        F: FnMut(&Entity, &Entity) -> Ordering,
    {
        let mut entities = self.list();
        // stable, so ties keep insertion order
        entities.sort_by(|a, b| compare(a, b));
        entities
    }

    /// Insert or overwrite, returning the replaced entity.
    pub fn upsert(&mut self, entity: Entity) -> Option<Entity> {
        match self.slots.get_mut(&entity.id) {
            Some(slot) => Some(std::mem::replace(&mut slot.entity, entity)),
            None => {
                let position = self.next_position;
                self.next_position += 1;
                self.slots
                    .insert(entity.id.clone(), Slot { entity, position });
                None
            }
        }
    }

    pub fn remove(&mut self, id: &str) -> Option<Entity> {
        self.slots.remove(id).map(|slot| slot.entity)
    }

    pub fn ids(&self) -> Vec<EntityId> {
        self.slots.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn clear(&mut self) {
        self.slots.clear();
    }
}
