//! Snapshot-based change detection.
//!
//! An entity's persisted form is the column map its mapper extracts plus the
//! prefixed columns of its loaded embedded relations. The same map is stored
//! as the snapshot on load and compared against on persist, so an unmodified
//! entity never produces a write.

use crate::Orm;
use crate::identity_map::Heap;
use crate::relation::Resolver;
use rowgraph_core::{EntityId, RelationValue, Result, Value};
use std::collections::BTreeMap;

/// Current column values of `id`, embedded columns included.
pub fn current_values(orm: &Orm, heap: &Heap, id: EntityId) -> Result<BTreeMap<String, Value>> {
    let entity = heap.require(id)?;
    let role = entity.role().as_str();
    let entry = orm.entry(role)?;
    let mut values = orm.mapper(role).extract(entry, entity)?;

    for resolver in orm.resolvers_of(role) {
        let Resolver::Embedded(embedded) = resolver else {
            continue;
        };
        match entity.relation(embedded.name()) {
            Some(RelationValue::One(Some(eid))) => {
                let inner = heap.require(*eid)?;
                let target = &embedded.link.target;
                let extracted = orm.mapper(target.role.as_str()).extract(target, inner)?;
                for (column, value) in extracted {
                    values.insert(embedded.column(&column), value);
                }
            }
            Some(RelationValue::One(None)) => {
                for column in &embedded.link.target.columns {
                    values.insert(embedded.column(column), Value::Null);
                }
            }
            _ => {}
        }
    }
    Ok(values)
}

/// Columns whose value differs from the snapshot.
///
/// Integer width is ignored; a column absent from the snapshot counts as NULL.
pub fn changed_columns(
    snapshot: &BTreeMap<String, Value>,
    values: &BTreeMap<String, Value>,
) -> Vec<String> {
    values
        .iter()
        .filter(|(column, value)| {
            let before = snapshot.get(*column).unwrap_or(&Value::Null);
            !before.same_as(value)
        })
        .map(|(column, _)| column.clone())
        .collect()
}
