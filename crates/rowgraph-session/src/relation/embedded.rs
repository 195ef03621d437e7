//! Embedded relations: target columns stored in the owner's row.

use super::RelationLink;
use rowgraph_core::{Error, RelationDefinition, Result, Row, Value};

/// Resolver for an embeddable target mapped onto prefixed owner columns.
#[derive(Debug, Clone)]
pub struct EmbeddedResolver {
    pub link: RelationLink,
    pub prefix: String,
}

impl EmbeddedResolver {
    pub(super) fn new(link: RelationLink, def: &RelationDefinition) -> Result<Self> {
        if !link.target.embeddable {
            return Err(Error::InvalidSchema(format!(
                "embedded relation '{}.{}' targets non-embeddable role '{}'",
                link.owner.role, link.name, link.target.role
            )));
        }
        Ok(Self {
            prefix: def.prefix.clone(),
            link,
        })
    }

    pub fn name(&self) -> &str {
        &self.link.name
    }

    /// Owner column holding the embedded `column`.
    pub fn column(&self, column: &str) -> String {
        format!("{}{}", self.prefix, column)
    }

    /// Owner columns of every embedded column, in schema order.
    pub fn owner_columns(&self) -> Vec<String> {
        self.link
            .target
            .columns
            .iter()
            .map(|c| self.column(c))
            .collect()
    }

    /// Slice the embedded columns out of an (unqualified) owner row.
    pub(crate) fn extract_row(&self, owner: &Row) -> Row {
        Row::from_pairs(self.link.target.columns.iter().map(|c| {
            (
                c.clone(),
                owner.get_by_name(&self.column(c)).cloned().unwrap_or(Value::Null),
            )
        }))
    }
}
