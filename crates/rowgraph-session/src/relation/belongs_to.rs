//! belongs-to and refers-to.
//!
//! The owner row carries the key of the target. A belongs-to target must be
//! written before its owner; a refers-to link is nullable, so a cycle
//! through it can be broken by writing the owner first and setting the key
//! with a follow-up update.

use super::RelationLink;
use crate::unit_of_work::Plan;
use rowgraph_core::{EntityId, RelationKind, RelationValue, Result, Value};

/// Resolver for relations whose key lives on the owner side.
#[derive(Debug, Clone)]
pub struct BelongsToResolver {
    pub link: RelationLink,
}

impl BelongsToResolver {
    pub(super) fn new(link: RelationLink) -> Result<Self> {
        link.require_columns(&link.owner, &link.inner_key)?;
        link.require_columns(&link.target, &link.outer_key)?;
        Ok(Self { link })
    }

    /// Can the link be written after both rows exist?
    pub fn is_weak(&self) -> bool {
        self.link.kind == RelationKind::RefersTo
    }

    pub(super) fn queue(&self, plan: &mut Plan<'_>, owner: EntityId) -> Result<()> {
        let entity = plan.entity(owner)?;
        let Some(RelationValue::One(current)) = entity.relation(&self.link.name) else {
            return Ok(());
        };
        let current = *current;

        match current {
            Some(target) if plan.is_deleted(target) => {
                self.release(plan, owner)?;
                plan.delete_after(owner, target);
            }
            Some(target) => {
                for (inner, outer) in self.link.inner_key.iter().zip(&self.link.outer_key) {
                    let slot = plan.reference(target, outer, self.is_weak());
                    plan.claim(owner, inner, slot)?;
                }
            }
            None => self.release(plan, owner)?,
        }

        if let Some(RelationValue::One(Some(previous))) = plan.known(owner, &self.link.name) {
            if Some(*previous) != current && plan.is_deleted(*previous) {
                plan.delete_after(owner, *previous);
            }
        }
        Ok(())
    }

    fn release(&self, plan: &mut Plan<'_>, owner: EntityId) -> Result<()> {
        for inner in &self.link.inner_key {
            plan.claim(owner, inner, Value::Null.into())?;
        }
        Ok(())
    }
}
