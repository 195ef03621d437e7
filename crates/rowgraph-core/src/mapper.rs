//! Conversion between rows and entities.

use crate::entity::Entity;
use crate::error::Result;
use crate::row::Row;
use crate::schema::{GeneratedField, SchemaEntry};
use crate::value::{Key, Value};
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// Per-role conversion hooks.
///
/// The engine calls `hydrate` for every fetched row it turns into an entity
/// and `extract` when it needs the persisted column values of an entity.
pub trait Mapper: Send + Sync {
    /// Build an entity from an unqualified row.
    fn hydrate(&self, entry: &SchemaEntry, row: &Row) -> Result<Entity>;

    /// Column values of `entity` for every schema column.
    fn extract(&self, entry: &SchemaEntry, entity: &Entity) -> Result<BTreeMap<String, Value>>;

    /// Client-side primary key for a new entity, if the role generates one.
    fn next_primary_key(&self, _entry: &SchemaEntry) -> Option<Key> {
        None
    }

    /// Application-generated value for an `OnInsert`/`OnUpdate` column.
    fn generate(&self, _entry: &SchemaEntry, _column: &str, _entity: &Entity) -> Option<Value> {
        None
    }
}

/// Default mapper: copies schema columns, applies typecasts and stamps
/// generated columns with the current time.
#[derive(Debug, Clone, Copy, Default)]
pub struct EntityMapper;

impl Mapper for EntityMapper {
    fn hydrate(&self, entry: &SchemaEntry, row: &Row) -> Result<Entity> {
        let mut entity = Entity::new(entry.role.clone());
        for column in &entry.columns {
            if let Some(raw) = row.get_by_name(column) {
                let value = match entry.typecast.get(column) {
                    Some(cast) => cast.apply(column, raw.clone())?,
                    None => raw.clone(),
                };
                entity.set(column.as_str(), value);
            }
        }
        Ok(entity)
    }

    fn extract(&self, entry: &SchemaEntry, entity: &Entity) -> Result<BTreeMap<String, Value>> {
        let mut out = BTreeMap::new();
        for column in &entry.columns {
            let raw = entity.get(column).cloned().unwrap_or(Value::Null);
            let value = match entry.typecast.get(column) {
                Some(cast) => cast.apply(column, raw)?,
                None => raw,
            };
            out.insert(column.clone(), value);
        }
        Ok(out)
    }

    fn generate(&self, entry: &SchemaEntry, column: &str, _entity: &Entity) -> Option<Value> {
        match entry.generated_field(column) {
            GeneratedField::OnInsert | GeneratedField::OnUpdate | GeneratedField::OnInsertAndUpdate => {
                let micros = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map(|d| i64::try_from(d.as_micros()).unwrap_or(i64::MAX))
                    .unwrap_or(0);
                Some(Value::Timestamp(micros))
            }
            GeneratedField::Client | GeneratedField::Database => None,
        }
    }
}
