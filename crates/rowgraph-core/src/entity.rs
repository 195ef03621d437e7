//! Entities: schema-less field maps with relation slots.
//!
//! Entities live in an arena owned by the session's heap and refer to each
//! other by [`EntityId`]. A relation slot that is absent means "not loaded",
//! which is distinct from an empty list or `One(None)`.

use crate::schema::Role;
use crate::value::Value;
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::collections::BTreeMap;
use std::fmt;

/// Handle of an entity inside a heap arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId(usize);

impl EntityId {
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Current value of a relation slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelationValue {
    One(Option<EntityId>),
    Many(Vec<EntityId>),
}

impl RelationValue {
    /// Referenced entities in order.
    pub fn ids(&self) -> Vec<EntityId> {
        match self {
            RelationValue::One(id) => id.iter().copied().collect(),
            RelationValue::Many(ids) => ids.clone(),
        }
    }

    pub fn contains(&self, id: EntityId) -> bool {
        match self {
            RelationValue::One(one) => *one == Some(id),
            RelationValue::Many(ids) => ids.contains(&id),
        }
    }
}

/// A plain in-memory object.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    role: Role,
    fields: BTreeMap<String, Value>,
    relations: BTreeMap<String, RelationValue>,
}

impl Entity {
    pub fn new(role: impl Into<Role>) -> Self {
        Self {
            role: role.into(),
            fields: BTreeMap::new(),
            relations: BTreeMap::new(),
        }
    }

    /// Builder-style field assignment.
    #[must_use]
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }

    pub fn role(&self) -> &Role {
        &self.role
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(field.into(), value.into());
    }

    pub fn fields(&self) -> &BTreeMap<String, Value> {
        &self.fields
    }

    pub fn relation(&self, name: &str) -> Option<&RelationValue> {
        self.relations.get(name)
    }

    pub fn relations(&self) -> &BTreeMap<String, RelationValue> {
        &self.relations
    }

    /// Point a single-valued relation at `target` (or clear it).
    pub fn set_one(&mut self, name: impl Into<String>, target: Option<EntityId>) {
        self.relations.insert(name.into(), RelationValue::One(target));
    }

    /// Replace a multi-valued relation.
    pub fn set_many(&mut self, name: impl Into<String>, targets: Vec<EntityId>) {
        self.relations.insert(name.into(), RelationValue::Many(targets));
    }

    /// Append to a multi-valued relation, creating it when unloaded.
    pub fn push(&mut self, name: &str, target: EntityId) {
        match self.relations.get_mut(name) {
            Some(RelationValue::Many(ids)) => ids.push(target),
            _ => {
                self.relations
                    .insert(name.to_string(), RelationValue::Many(vec![target]));
            }
        }
    }

    /// Remove `target` from a relation; returns whether it was present.
    pub fn remove_related(&mut self, name: &str, target: EntityId) -> bool {
        match self.relations.get_mut(name) {
            Some(RelationValue::Many(ids)) => {
                let before = ids.len();
                ids.retain(|id| *id != target);
                before != ids.len()
            }
            Some(RelationValue::One(one)) if *one == Some(target) => {
                *one = None;
                true
            }
            _ => false,
        }
    }

    /// Mark a relation as not loaded.
    pub fn unset_relation(&mut self, name: &str) -> Option<RelationValue> {
        self.relations.remove(name)
    }

    /// Replace all relation slots at once.
    pub fn replace_relations(&mut self, relations: BTreeMap<String, RelationValue>) {
        self.relations = relations;
    }
}

/// Nested relation data in a [`Record`].
#[derive(Debug, Clone, PartialEq)]
pub enum Nested {
    One(Option<Box<Record>>),
    Many(Vec<Record>),
}

/// Plain data tree produced by a data fetch, without identity tracking.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Record {
    pub fields: BTreeMap<String, Value>,
    pub relations: BTreeMap<String, Nested>,
}

impl Record {
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn one(&self, relation: &str) -> Option<&Record> {
        match self.relations.get(relation) {
            Some(Nested::One(Some(r))) => Some(r),
            _ => None,
        }
    }

    pub fn many(&self, relation: &str) -> &[Record] {
        match self.relations.get(relation) {
            Some(Nested::Many(rs)) => rs,
            _ => &[],
        }
    }

    /// Render as a JSON object with relations nested under their names.
    pub fn to_json(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        for (k, v) in &self.fields {
            map.insert(k.clone(), v.to_json());
        }
        for (k, nested) in &self.relations {
            let value = match nested {
                Nested::One(Some(r)) => r.to_json(),
                Nested::One(None) => serde_json::Value::Null,
                Nested::Many(rs) => serde_json::Value::Array(rs.iter().map(Record::to_json).collect()),
            };
            map.insert(k.clone(), value);
        }
        serde_json::Value::Object(map)
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len() + self.relations.len()))?;
        for (k, v) in &self.fields {
            map.serialize_entry(k, &v.to_json())?;
        }
        for (k, nested) in &self.relations {
            map.serialize_entry(k, nested)?;
        }
        map.end()
    }
}

impl Serialize for Nested {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Nested::One(one) => one.serialize(serializer),
            Nested::Many(many) => many.serialize(serializer),
        }
    }
}
