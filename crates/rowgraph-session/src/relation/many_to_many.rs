//! Many-to-many through a pivot table.
//!
//! Membership is fetched with one query per batch of owner keys, joining
//! the target to the pivot. Persisting diffs the current member list against
//! the last known one and writes pivot rows only for the difference.

use super::{FetchMode, RelationLink, in_condition, qualified_key, qualify};
use crate::flush::{PivotKind, PivotOp, Slot};
use crate::unit_of_work::Plan;
use rowgraph_core::{
    EntityId, Join, Key, PivotTable, RelationDefinition, Result, Row, Select, TableRef,
};

#[derive(Debug, Clone)]
pub struct ManyToManyResolver {
    pub link: RelationLink,
    pub pivot: PivotTable,
    /// Database holding the pivot table.
    pub pivot_database: String,
}

impl ManyToManyResolver {
    pub(super) fn new(link: RelationLink, def: &RelationDefinition) -> Result<Self> {
        link.require_columns(&link.owner, &link.inner_key)?;
        link.require_columns(&link.target, &link.outer_key)?;
        let Some(pivot) = def.through.clone() else {
            return Err(rowgraph_core::Error::InvalidSchema(format!(
                "many-to-many relation '{}.{}' has no pivot table",
                link.owner.role, link.name
            )));
        };
        let pivot_database = pivot
            .database
            .clone()
            .unwrap_or_else(|| link.owner.database.clone());
        Ok(Self {
            link,
            pivot,
            pivot_database,
        })
    }

    /// Alias of the pivot table inside a fetch query.
    pub fn pivot_alias(alias: &str) -> String {
        format!("{alias}_pivot")
    }

    /// Always a separate query; the pivot and target must share a database.
    pub(super) fn fetch_mode(&self) -> Result<FetchMode> {
        if self.pivot_database != self.link.target.database {
            return Err(self
                .link
                .cross_database(&self.pivot_database, &self.link.target.database));
        }
        Ok(FetchMode::Separate)
    }

    pub(super) fn separate(&self, alias: &str, keys: &[Key]) -> Select {
        let pivot_alias = Self::pivot_alias(alias);
        let mut join = Join::inner(TableRef::new(self.pivot.table.as_str(), pivot_alias.as_str()));
        for (pivot_col, target_col) in self.pivot.outer_key.iter().zip(&self.link.outer_key) {
            join = join.on(qualify(&pivot_alias, pivot_col), qualify(alias, target_col));
        }
        let select = Select::new(TableRef::new(self.link.target.table.as_str(), alias))
            .join(join)
            .columns(&pivot_alias, &self.pivot.inner_key)
            .filter(in_condition(
                self.pivot
                    .inner_key
                    .iter()
                    .map(|c| qualify(&pivot_alias, c))
                    .collect(),
                keys,
            ));
        match self.link.target.scope_for(alias) {
            Some(scope) => select.filter(scope),
            None => select,
        }
    }

    pub(super) fn child_key(&self, row: &Row, alias: &str) -> Option<Key> {
        qualified_key(row, &Self::pivot_alias(alias), &self.pivot.inner_key)
    }

    fn insert_op(&self, plan: &Plan<'_>, owner: EntityId, member: EntityId) -> PivotOp {
        let mut columns = Vec::new();
        for (pivot_col, inner) in self.pivot.inner_key.iter().zip(&self.link.inner_key) {
            columns.push((pivot_col.clone(), plan.reference(owner, inner, false)));
        }
        for (pivot_col, outer) in self.pivot.outer_key.iter().zip(&self.link.outer_key) {
            columns.push((pivot_col.clone(), plan.reference(member, outer, false)));
        }
        PivotOp {
            kind: PivotKind::Insert,
            database: self.pivot_database.clone(),
            table: self.pivot.table.clone(),
            columns,
            precedes: Vec::new(),
        }
    }

    fn owner_filter(&self, plan: &Plan<'_>, owner: EntityId) -> Vec<(String, Slot)> {
        self.pivot
            .inner_key
            .iter()
            .zip(&self.link.inner_key)
            .map(|(pivot_col, inner)| (pivot_col.clone(), plan.reference(owner, inner, false)))
            .collect()
    }

    pub(super) fn queue(&self, plan: &mut Plan<'_>, owner: EntityId) -> Result<()> {
        let entity = plan.entity(owner)?;
        let Some(current) = entity.relation(&self.link.name) else {
            return Ok(());
        };
        let current = current.ids();
        let known = plan
            .known(owner, &self.link.name)
            .map(|k| k.ids())
            .unwrap_or_default();

        for &member in &current {
            if known.contains(&member) || plan.is_deleted(member) {
                continue;
            }
            let op = self.insert_op(plan, owner, member);
            plan.pivot(op);
        }

        for &member in &known {
            let deleted = plan.is_deleted(member);
            if current.contains(&member) && !deleted {
                continue;
            }
            let mut columns = self.owner_filter(plan, owner);
            for (pivot_col, outer) in self.pivot.outer_key.iter().zip(&self.link.outer_key) {
                columns.push((pivot_col.clone(), plan.reference(member, outer, false)));
            }
            plan.pivot(PivotOp {
                kind: PivotKind::Delete,
                database: self.pivot_database.clone(),
                table: self.pivot.table.clone(),
                columns,
                precedes: if deleted { vec![member] } else { Vec::new() },
            });
        }
        Ok(())
    }

    /// Drop every pivot row of a deleted owner before the owner itself.
    pub(super) fn queue_delete(&self, plan: &mut Plan<'_>, owner: EntityId) -> Result<()> {
        let entity = plan.entity(owner)?;
        let mut precedes = vec![owner];
        for value in [entity.relation(&self.link.name), plan.known(owner, &self.link.name)]
            .into_iter()
            .flatten()
        {
            for member in value.ids() {
                if plan.is_deleted(member) && !precedes.contains(&member) {
                    precedes.push(member);
                }
            }
        }
        let columns = self.owner_filter(plan, owner);
        plan.pivot(PivotOp {
            kind: PivotKind::Delete,
            database: self.pivot_database.clone(),
            table: self.pivot.table.clone(),
            columns,
            precedes,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::Resolver;
    use super::*;
    use crate::config::OrmConfig;
    use rowgraph_core::{Error, Schema, SchemaEntry, Value};

    fn schema(pivot: PivotTable) -> Schema {
        Schema::new([
            SchemaEntry::new("user", "user")
                .columns(["id", "email"])
                .relation(RelationDefinition::many_to_many("tags", "tag", pivot)),
            SchemaEntry::new("tag", "tag").columns(["id", "name"]),
        ])
        .unwrap()
    }

    fn resolver(schema: &Schema) -> Resolver {
        let owner = schema.entry("user").unwrap();
        let def = schema.relation("user", "tags").unwrap();
        Resolver::compile(schema, owner, def).unwrap()
    }

    #[test]
    fn test_separate_joins_pivot() {
        let schema = schema(PivotTable::new("user_tag"));
        let resolver = resolver(&schema);
        assert_eq!(
            resolver.fetch_mode(None, &OrmConfig::default()).unwrap(),
            FetchMode::Separate
        );
        let select = resolver.separate("user_tags", &[Key::from(1i64)]).unwrap();
        assert_eq!(select.joins.len(), 1);
        assert_eq!(
            select.joins[0].on,
            vec![("user_tags_pivot.tag_id".to_string(), "user_tags.id".to_string())]
        );
        assert_eq!(
            select.filter.unwrap().to_string(),
            "(user_tags_pivot.user_id) IN ((?))"
        );

        let row = Row::from_pairs([
            ("user_tags.id", Value::BigInt(5)),
            ("user_tags_pivot.user_id", Value::BigInt(1)),
        ]);
        assert_eq!(resolver.child_key(&row, "user_tags"), Some(Key::from(1i64)));
    }

    #[test]
    fn test_pivot_in_other_database_is_rejected() {
        let schema = schema(PivotTable::new("user_tag").database("secondary"));
        let err = resolver(&schema)
            .fetch_mode(None, &OrmConfig::default())
            .unwrap_err();
        match err {
            Error::CrossDatabaseRelation { from, to, .. } => {
                assert_eq!(from, "secondary");
                assert_eq!(to, "default");
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
