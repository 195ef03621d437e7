//! Identity heap: one live entity per (role, primary key).
//!
//! The heap is an arena. Entities are addressed by [`EntityId`] handles and
//! refer to each other through those handles, so cyclic graphs never own
//! each other. Each slot optionally carries an [`EntityState`]; a slot
//! without state is a new entity created by the caller that has not been
//! persisted yet.
//!
//! There is no per-entity eviction. Replacing (or [`Heap::clean`]ing) the
//! heap is the only way to force rows to be re-fetched as fresh instances.
//!
//! # Example
//!
//! ```ignore
//! let mut heap = Heap::new();
//! let user = heap.create(Entity::new("user").with("email", "hello@world.com"));
//! assert!(!heap.has(user));
//! ```

use rowgraph_core::{Entity, EntityId, Error, Key, RelationValue, Result, Role, Value};
use std::collections::{BTreeMap, HashMap};

/// Persistence status of a tracked entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Registered for insert but never written.
    New,
    /// Loaded from or written to the database.
    Managed,
    /// Deleted by a committed transaction.
    Deleted,
}

/// Last-known persisted state of an entity.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityState {
    pub status: Status,
    /// Primary key, `None` until assigned.
    pub key: Option<Key>,
    /// Column values as last written or loaded.
    pub snapshot: BTreeMap<String, Value>,
    /// Known relation state: previous reference or membership per relation.
    pub relations: BTreeMap<String, RelationValue>,
    /// Pending column values, written by the next run and then
    /// materialized on the entity.
    pub overrides: BTreeMap<String, Value>,
}

impl EntityState {
    /// State of a freshly loaded row.
    pub fn managed(key: Key, snapshot: BTreeMap<String, Value>) -> Self {
        Self {
            status: Status::Managed,
            key: Some(key),
            snapshot,
            relations: BTreeMap::new(),
            overrides: BTreeMap::new(),
        }
    }

    /// State of an entity pending key assignment.
    pub fn new_entity() -> Self {
        Self {
            status: Status::New,
            key: None,
            snapshot: BTreeMap::new(),
            relations: BTreeMap::new(),
            overrides: BTreeMap::new(),
        }
    }

    pub fn is_persisted(&self) -> bool {
        self.status == Status::Managed
    }
}

struct Slot {
    entity: Entity,
    state: Option<EntityState>,
}

/// Session-scoped identity map and entity arena.
#[derive(Default)]
pub struct Heap {
    slots: Vec<Slot>,
    index: HashMap<Role, HashMap<Key, EntityId>>,
}

impl std::fmt::Debug for Heap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Heap")
            .field("entities", &self.slots.len())
            .field("tracked", &self.index.values().map(HashMap::len).sum::<usize>())
            .finish()
    }
}

impl Heap {
    /// Create a new empty heap.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a caller-built entity without state.
    pub fn create(&mut self, entity: Entity) -> EntityId {
        let id = EntityId::new(self.slots.len());
        self.slots.push(Slot {
            entity,
            state: None,
        });
        id
    }

    /// Entity registered under `(role, key)`.
    pub fn get(&self, role: &str, key: &Key) -> Option<EntityId> {
        self.index.get(role)?.get(key).copied()
    }

    /// Register a loaded entity.
    ///
    /// If `(role, state.key)` is already registered the existing handle is
    /// returned and `entity` is dropped.
    pub fn put(&mut self, entity: Entity, state: EntityState) -> EntityId {
        if let Some(key) = &state.key {
            if let Some(existing) = self.get(entity.role().as_str(), key) {
                return existing;
            }
        }
        let id = self.create(entity);
        self.install(id, state);
        id
    }

    /// Does the entity carry persistence state?
    pub fn has(&self, id: EntityId) -> bool {
        self.slots
            .get(id.index())
            .is_some_and(|slot| slot.state.is_some())
    }

    pub fn state_of(&self, id: EntityId) -> Option<&EntityState> {
        self.slots.get(id.index())?.state.as_ref()
    }

    pub fn state_of_mut(&mut self, id: EntityId) -> Option<&mut EntityState> {
        self.slots.get_mut(id.index())?.state.as_mut()
    }

    /// Attach (or replace) the state of an entity, indexing it when keyed.
    pub fn attach(&mut self, id: EntityId, state: EntityState) {
        if id.index() < self.slots.len() {
            self.install(id, state);
        }
    }

    fn install(&mut self, id: EntityId, state: EntityState) {
        if let Some(key) = &state.key {
            if key.is_complete() {
                let role = self.slots[id.index()].entity.role().clone();
                self.index.entry(role).or_default().insert(key.clone(), id);
            }
        }
        self.slots[id.index()].state = Some(state);
    }

    /// Queue `value` for `column` of `id` without touching the entity.
    ///
    /// The next run writes it and copies it onto the entity afterwards. An
    /// entity without state is tracked as new from here on.
    pub fn register(&mut self, id: EntityId, column: impl Into<String>, value: Value) {
        if let Some(slot) = self.slots.get_mut(id.index()) {
            slot.state
                .get_or_insert_with(EntityState::new_entity)
                .overrides
                .insert(column.into(), value);
        }
    }

    /// Put back the overrides `id` had before a run registered its own;
    /// `None` means the entity had no state at all.
    pub(crate) fn restore_overrides(
        &mut self,
        id: EntityId,
        previous: Option<BTreeMap<String, Value>>,
    ) {
        let Some(slot) = self.slots.get_mut(id.index()) else {
            return;
        };
        match previous {
            None => slot.state = None,
            Some(overrides) => {
                if let Some(state) = slot.state.as_mut() {
                    state.overrides = overrides;
                }
            }
        }
    }

    pub fn entity(&self, id: EntityId) -> Option<&Entity> {
        self.slots.get(id.index()).map(|slot| &slot.entity)
    }

    pub fn entity_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        self.slots.get_mut(id.index()).map(|slot| &mut slot.entity)
    }

    /// Entity lookup for engine code paths, which only hold handles of this heap.
    pub(crate) fn require(&self, id: EntityId) -> Result<&Entity> {
        self.entity(id)
            .ok_or_else(|| Error::Custom(format!("entity {} is not part of this heap", id)))
    }

    pub(crate) fn require_mut(&mut self, id: EntityId) -> Result<&mut Entity> {
        self.entity_mut(id)
            .ok_or_else(|| Error::Custom(format!("entity {} is not part of this heap", id)))
    }

    /// Number of entities in the arena.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Drop every entity. Handles issued before are invalid afterwards.
    pub fn clean(&mut self) {
        self.slots.clear();
        self.index.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loaded(heap: &mut Heap, id: i64, email: &str) -> EntityId {
        let entity = Entity::new("user").with("id", id).with("email", email);
        let snapshot = entity.fields().clone();
        heap.put(entity, EntityState::managed(Key::from(id), snapshot))
    }

    #[test]
    fn test_put_returns_existing_instance() {
        let mut heap = Heap::new();
        let first = loaded(&mut heap, 1, "a");
        let second = loaded(&mut heap, 1, "b");
        assert_eq!(first, second);
        assert_eq!(heap.len(), 1);
        // The first instance wins.
        assert_eq!(
            heap.entity(first).unwrap().get("email"),
            Some(&Value::from("a"))
        );
    }

    #[test]
    fn test_get_ignores_integer_width() {
        let mut heap = Heap::new();
        let id = loaded(&mut heap, 7, "a");
        assert_eq!(heap.get("user", &Key::from(7i32)), Some(id));
        assert_eq!(heap.get("post", &Key::from(7i64)), None);
    }

    #[test]
    fn test_create_then_attach() {
        let mut heap = Heap::new();
        let id = heap.create(Entity::new("user").with("email", "new"));
        assert!(!heap.has(id));
        assert!(heap.state_of(id).is_none());

        heap.attach(id, EntityState::new_entity());
        assert!(heap.has(id));
        assert_eq!(heap.state_of(id).unwrap().status, Status::New);
        assert!(heap.get("user", &Key::from(1i64)).is_none());

        let mut state = EntityState::managed(Key::from(1i64), BTreeMap::new());
        state.relations.insert("comments".into(), RelationValue::Many(vec![]));
        heap.attach(id, state);
        assert_eq!(heap.get("user", &Key::from(1i64)), Some(id));
    }

    #[test]
    fn test_register_tracks_new_entities_and_restores() {
        let mut heap = Heap::new();
        let id = heap.create(Entity::new("user"));
        heap.register(id, "email", Value::from("a@x"));
        let state = heap.state_of(id).unwrap();
        assert_eq!(state.status, Status::New);
        assert_eq!(state.overrides.get("email"), Some(&Value::from("a@x")));
        assert!(heap.entity(id).unwrap().get("email").is_none());

        heap.restore_overrides(id, None);
        assert!(heap.state_of(id).is_none());

        let loaded = loaded(&mut heap, 3, "b");
        heap.register(loaded, "email", Value::from("c"));
        heap.restore_overrides(loaded, Some(BTreeMap::new()));
        assert!(heap.state_of(loaded).unwrap().overrides.is_empty());
        assert_eq!(heap.state_of(loaded).unwrap().status, Status::Managed);
    }

    #[test]
    fn test_incomplete_key_is_not_indexed() {
        let mut heap = Heap::new();
        let state = EntityState::managed(Key::new(vec![Value::Null]), BTreeMap::new());
        let id = heap.put(Entity::new("user"), state);
        assert!(heap.has(id));
        assert!(heap.get("user", &Key::new(vec![Value::Null])).is_none());
    }

    #[test]
    fn test_clean_drops_everything() {
        let mut heap = Heap::new();
        loaded(&mut heap, 1, "a");
        heap.clean();
        assert!(heap.is_empty());
        assert!(heap.get("user", &Key::from(1i64)).is_none());
    }
}
