//! has-one / has-many and their morphed variants.
//!
//! The target table carries the key pointing back at the owner. Morphed
//! variants add a discriminator column holding the owner's role, so one
//! child table can serve several parent roles.

use super::{RelationLink, qualified_key, qualify};
use crate::unit_of_work::{Plan, Unlink};
use rowgraph_core::{
    Condition, EntityId, Join, Key, RelationDefinition, Result, Row, Select, Value,
};

/// Resolver for relations whose key lives on the target side.
#[derive(Debug, Clone)]
pub struct HasResolver {
    pub link: RelationLink,
    /// Discriminator column on the target (morphed kinds only).
    pub morph_key: Option<String>,
}

impl HasResolver {
    pub(super) fn new(link: RelationLink, def: &RelationDefinition) -> Result<Self> {
        link.require_columns(&link.owner, &link.inner_key)?;
        link.require_columns(&link.target, &link.outer_key)?;
        let morph_key = if link.kind.is_morphed() {
            def.morph_key.clone()
        } else {
            None
        };
        if let Some(morph) = &morph_key {
            link.require_columns(&link.target, [morph])?;
        }
        Ok(Self { link, morph_key })
    }

    /// Discriminator value routing child rows to this owner role.
    fn discriminator(&self) -> Value {
        Value::Text(self.link.owner.role.to_string())
    }

    pub(super) fn join(&self, parent_alias: &str, alias: &str) -> Join {
        let join = self.link.keyed_join(parent_alias, alias);
        match &self.morph_key {
            Some(morph) => join.condition(Condition::Eq(qualify(alias, morph), self.discriminator())),
            None => join,
        }
    }

    pub(super) fn separate(&self, alias: &str, keys: &[Key]) -> Select {
        let select = self.link.keyed_select(alias, keys);
        match &self.morph_key {
            Some(morph) => select.filter(Condition::Eq(qualify(alias, morph), self.discriminator())),
            None => select,
        }
    }

    pub(super) fn parent_key(&self, parent: &Row) -> Option<Key> {
        let key = parent.key(&self.link.inner_key).filter(Key::is_complete)?;
        Some(match &self.morph_key {
            Some(_) => key.with(self.discriminator()),
            None => key,
        })
    }

    pub(super) fn child_key(&self, row: &Row, alias: &str) -> Option<Key> {
        let key = qualified_key(row, alias, &self.link.outer_key)?;
        match &self.morph_key {
            Some(morph) => Some(key.with(row.get_by_name(&qualify(alias, morph))?.clone())),
            None => Some(key),
        }
    }

    /// Columns written on the child to unlink it.
    fn link_columns(&self) -> Vec<String> {
        let mut columns = self.link.outer_key.clone();
        columns.extend(self.morph_key.iter().cloned());
        columns
    }

    /// Point every current child at `owner` and schedule removed children
    /// for unlinking.
    pub(super) fn queue(&self, plan: &mut Plan<'_>, owner: EntityId) -> Result<()> {
        let entity = plan.entity(owner)?;
        let Some(current) = entity.relation(&self.link.name) else {
            return Ok(());
        };
        let current = current.ids();

        for &child in &current {
            if plan.is_deleted(child) {
                continue;
            }
            for (inner, outer) in self.link.inner_key.iter().zip(&self.link.outer_key) {
                let slot = plan.reference(owner, inner, false);
                plan.claim(child, outer, slot)?;
            }
            if let Some(morph) = &self.morph_key {
                plan.claim(child, morph, self.discriminator().into())?;
            }
        }

        if let Some(known) = plan.known(owner, &self.link.name) {
            for child in known.ids() {
                if !current.contains(&child) {
                    plan.unlink(Unlink {
                        child,
                        columns: self.link_columns(),
                        nullable: self.link.nullable,
                    });
                }
            }
        }
        Ok(())
    }

    /// Children of a deleted owner are deleted first (cascade) or released.
    pub(super) fn queue_delete(&self, plan: &mut Plan<'_>, owner: EntityId) -> Result<()> {
        let mut children: Vec<EntityId> = Vec::new();
        let entity = plan.entity(owner)?;
        for value in [entity.relation(&self.link.name), plan.known(owner, &self.link.name)]
            .into_iter()
            .flatten()
        {
            for id in value.ids() {
                if !children.contains(&id) {
                    children.push(id);
                }
            }
        }

        for child in children {
            if plan.is_deleted(child) {
                plan.delete_after(child, owner);
            } else if self.link.nullable {
                for column in self.link_columns() {
                    plan.claim(child, &column, Value::Null.into())?;
                }
                plan.delete_after(child, owner);
            }
        }
        Ok(())
    }
}
