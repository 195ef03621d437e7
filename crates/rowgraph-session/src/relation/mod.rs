//! Relation resolvers, one per relation kind.
//!
//! Resolvers are compiled once when the [`Orm`](crate::Orm) is built. Each
//! one knows how to
//!
//! - fetch related rows (a join into the parent query or a separate query
//!   keyed by the parent keys already fetched),
//! - match fetched rows to their owners by link key,
//! - queue the persistence work of the relation during a transaction run.

mod belongs_to;
mod embedded;
mod has;
mod many_to_many;

pub use belongs_to::BelongsToResolver;
pub use embedded::EmbeddedResolver;
pub use has::HasResolver;
pub use many_to_many::ManyToManyResolver;

use crate::config::OrmConfig;
use crate::unit_of_work::Plan;
use rowgraph_core::{
    Condition, EntityId, Error, FetchMethod, Join, Key, RelationDefinition, RelationKind, Result,
    Row, Schema, SchemaEntry, Select, TableRef, Value,
};
use std::sync::Arc;

/// How a loader node obtains its rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    /// LEFT JOIN into the parent's query.
    Join,
    /// Own query keyed by the parent keys.
    Separate,
    /// Columns live in the parent's row.
    Inline,
}

/// Data shared by every resolver kind.
#[derive(Debug, Clone)]
pub struct RelationLink {
    pub name: String,
    pub kind: RelationKind,
    pub owner: Arc<SchemaEntry>,
    pub target: Arc<SchemaEntry>,
    pub inner_key: Vec<String>,
    pub outer_key: Vec<String>,
    pub cascade: bool,
    pub nullable: bool,
    pub method: Option<FetchMethod>,
}

impl RelationLink {
    fn new(owner: &Arc<SchemaEntry>, target: &Arc<SchemaEntry>, def: &RelationDefinition) -> Self {
        Self {
            name: def.name.clone(),
            kind: def.kind,
            owner: Arc::clone(owner),
            target: Arc::clone(target),
            inner_key: def.inner_key.clone(),
            outer_key: def.outer_key.clone(),
            cascade: def.cascade,
            nullable: def.nullable,
            method: def.method,
        }
    }

    fn mismatch(&self, role: &SchemaEntry, key: &str) -> Error {
        Error::SchemaMismatch {
            role: role.role.to_string(),
            key: key.to_string(),
            relation: self.name.clone(),
        }
    }

    /// Every column in `keys` must be declared by `entry`.
    fn require_columns<'k>(
        &self,
        entry: &SchemaEntry,
        keys: impl IntoIterator<Item = &'k String>,
    ) -> Result<()> {
        for key in keys {
            if !entry.has_column(key) {
                return Err(self.mismatch(entry, key));
            }
        }
        Ok(())
    }

    fn same_database(&self) -> bool {
        self.owner.database == self.target.database
    }

    fn cross_database(&self, from: &str, to: &str) -> Error {
        Error::CrossDatabaseRelation {
            role: self.owner.role.to_string(),
            relation: self.name.clone(),
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// Join or separate query for keyed (non-pivot) relations.
    fn keyed_mode(&self, forced: Option<FetchMethod>, config: &OrmConfig) -> Result<FetchMode> {
        match forced.or(self.method) {
            Some(FetchMethod::Join) if !self.same_database() => {
                Err(self.cross_database(&self.owner.database, &self.target.database))
            }
            Some(FetchMethod::Join) => Ok(FetchMode::Join),
            Some(FetchMethod::Separate) => Ok(FetchMode::Separate),
            None => {
                let single = !self.kind.is_many() && !self.kind.is_morphed();
                if single && self.same_database() && config.join_single_valued {
                    Ok(FetchMode::Join)
                } else {
                    Ok(FetchMode::Separate)
                }
            }
        }
    }

    /// LEFT JOIN of the target on `outer = inner`, restricted by the
    /// target's scope.
    fn keyed_join(&self, parent_alias: &str, alias: &str) -> Join {
        let mut join = Join::left(TableRef::new(self.target.table.as_str(), alias));
        for (inner, outer) in self.inner_key.iter().zip(&self.outer_key) {
            join = join.on(qualify(alias, outer), qualify(parent_alias, inner));
        }
        match self.target.scope_for(alias) {
            Some(scope) => join.condition(scope),
            None => join,
        }
    }

    /// Select of the target filtered by `outer IN keys` and its scope.
    fn keyed_select(&self, alias: &str, keys: &[Key]) -> Select {
        let select = Select::new(TableRef::new(self.target.table.as_str(), alias)).filter(
            in_condition(self.outer_key.iter().map(|c| qualify(alias, c)).collect(), keys),
        );
        match self.target.scope_for(alias) {
            Some(scope) => select.filter(scope),
            None => select,
        }
    }
}

/// Compiled relation strategy.
#[derive(Debug, Clone)]
pub enum Resolver {
    /// has-one, has-many and their morphed variants.
    Has(HasResolver),
    /// belongs-to and refers-to.
    BelongsTo(BelongsToResolver),
    ManyToMany(ManyToManyResolver),
    Embedded(EmbeddedResolver),
}

impl Resolver {
    /// Compile the relation `def` declared on `owner`.
    pub fn compile(schema: &Schema, owner: &Arc<SchemaEntry>, def: &RelationDefinition) -> Result<Self> {
        let target = schema.entry(def.target.as_str())?;
        let link = RelationLink::new(owner, target, def);
        let resolver = match def.kind {
            RelationKind::HasOne
            | RelationKind::HasMany
            | RelationKind::MorphedHasOne
            | RelationKind::MorphedHasMany => Resolver::Has(HasResolver::new(link, def)?),
            RelationKind::BelongsTo | RelationKind::RefersTo => {
                Resolver::BelongsTo(BelongsToResolver::new(link)?)
            }
            RelationKind::ManyToMany => Resolver::ManyToMany(ManyToManyResolver::new(link, def)?),
            RelationKind::Embedded => Resolver::Embedded(EmbeddedResolver::new(link, def)?),
        };
        tracing::trace!(
            role = %owner.role,
            relation = %def.name,
            kind = def.kind.as_str(),
            "Resolver compiled"
        );
        Ok(resolver)
    }

    pub fn link(&self) -> &RelationLink {
        match self {
            Resolver::Has(r) => &r.link,
            Resolver::BelongsTo(r) => &r.link,
            Resolver::ManyToMany(r) => &r.link,
            Resolver::Embedded(r) => &r.link,
        }
    }

    pub fn name(&self) -> &str {
        &self.link().name
    }

    pub fn kind(&self) -> RelationKind {
        self.link().kind
    }

    /// Decide how the relation is fetched, honoring a per-load override.
    pub fn fetch_mode(&self, forced: Option<FetchMethod>, config: &OrmConfig) -> Result<FetchMode> {
        match self {
            Resolver::Has(r) => r.link.keyed_mode(forced, config),
            Resolver::BelongsTo(r) => r.link.keyed_mode(forced, config),
            Resolver::ManyToMany(r) => r.fetch_mode(),
            Resolver::Embedded(_) => Ok(FetchMode::Inline),
        }
    }

    /// Join clause attaching the target under `alias` to `parent_alias`.
    pub(crate) fn join(&self, parent_alias: &str, alias: &str) -> Option<Join> {
        match self {
            Resolver::Has(r) => Some(r.join(parent_alias, alias)),
            Resolver::BelongsTo(r) => Some(r.link.keyed_join(parent_alias, alias)),
            Resolver::ManyToMany(_) | Resolver::Embedded(_) => None,
        }
    }

    /// Base select of a separate query for the given parent link keys.
    pub(crate) fn separate(&self, alias: &str, keys: &[Key]) -> Option<Select> {
        match self {
            Resolver::Has(r) => Some(r.separate(alias, keys)),
            Resolver::BelongsTo(r) => Some(r.link.keyed_select(alias, keys)),
            Resolver::ManyToMany(r) => Some(r.separate(alias, keys)),
            Resolver::Embedded(_) => None,
        }
    }

    /// Database the related rows are read from.
    pub(crate) fn database(&self) -> &str {
        &self.link().target.database
    }

    /// Link key of an (unqualified) parent row.
    pub(crate) fn parent_key(&self, parent: &Row) -> Option<Key> {
        match self {
            Resolver::Has(r) => r.parent_key(parent),
            _ => complete(parent.key(&self.link().inner_key)),
        }
    }

    /// Link key of a fetched (qualified) child row.
    pub(crate) fn child_key(&self, row: &Row, alias: &str) -> Option<Key> {
        match self {
            Resolver::Has(r) => r.child_key(row, alias),
            Resolver::ManyToMany(r) => r.child_key(row, alias),
            _ => qualified_key(row, alias, &self.link().outer_key),
        }
    }

    /// Queue link claims and pivot writes for a persisted owner.
    pub(crate) fn queue(&self, plan: &mut Plan<'_>, owner: EntityId) -> Result<()> {
        match self {
            Resolver::Has(r) => r.queue(plan, owner),
            Resolver::BelongsTo(r) => r.queue(plan, owner),
            Resolver::ManyToMany(r) => r.queue(plan, owner),
            Resolver::Embedded(_) => Ok(()),
        }
    }

    /// Queue the consequences of deleting `owner`.
    pub(crate) fn queue_delete(&self, plan: &mut Plan<'_>, owner: EntityId) -> Result<()> {
        match self {
            Resolver::Has(r) => r.queue_delete(plan, owner),
            Resolver::ManyToMany(r) => r.queue_delete(plan, owner),
            Resolver::BelongsTo(_) | Resolver::Embedded(_) => Ok(()),
        }
    }
}

/// `alias.column`
pub(crate) fn qualify(alias: &str, column: &str) -> String {
    format!("{alias}.{column}")
}

fn complete(key: Option<Key>) -> Option<Key> {
    key.filter(Key::is_complete)
}

/// Key from the `alias.column` values of a joined row.
pub(crate) fn qualified_key(row: &Row, alias: &str, columns: &[String]) -> Option<Key> {
    let values = columns
        .iter()
        .map(|c| row.get_by_name(&qualify(alias, c)).cloned())
        .collect::<Option<Vec<Value>>>()?;
    complete(Some(Key::new(values)))
}

/// `IN` predicate over one or more columns.
pub(crate) fn in_condition(columns: Vec<String>, keys: &[Key]) -> Condition {
    let width = columns.len();
    Condition::In {
        columns,
        values: keys
            .iter()
            .map(|k| k.values().iter().take(width).cloned().collect())
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowgraph_core::{PivotTable, SchemaEntry};

    fn schema() -> Schema {
        Schema::new([
            SchemaEntry::new("user", "user")
                .columns(["id", "email"])
                .relation(RelationDefinition::has_one("profile", "profile"))
                .relation(RelationDefinition::has_many("comments", "comment"))
                .relation(RelationDefinition::many_to_many(
                    "tags",
                    "tag",
                    PivotTable::new("user_tag"),
                )),
            SchemaEntry::new("profile", "profile").columns(["id", "user_id", "image"]),
            SchemaEntry::new("comment", "comment")
                .database("secondary")
                .columns(["id", "user_id", "message"]),
            SchemaEntry::new("tag", "tag").columns(["id", "name"]),
        ])
        .unwrap()
    }

    fn compile(schema: &Schema, role: &str, name: &str) -> Result<Resolver> {
        let owner = schema.entry(role)?;
        let def = schema.relation(role, name)?;
        Resolver::compile(schema, owner, def)
    }

    #[test]
    fn test_single_valued_joins_by_default() {
        let schema = schema();
        let config = OrmConfig::default();
        let profile = compile(&schema, "user", "profile").unwrap();
        assert_eq!(profile.fetch_mode(None, &config).unwrap(), FetchMode::Join);
        assert_eq!(
            profile
                .fetch_mode(None, &config.clone().join_single_valued(false))
                .unwrap(),
            FetchMode::Separate
        );
    }

    #[test]
    fn test_cross_database_join_is_rejected() {
        let schema = schema();
        let comments = compile(&schema, "user", "comments").unwrap();
        let config = OrmConfig::default();
        assert_eq!(comments.fetch_mode(None, &config).unwrap(), FetchMode::Separate);
        let err = comments
            .fetch_mode(Some(FetchMethod::Join), &config)
            .unwrap_err();
        assert!(matches!(err, Error::CrossDatabaseRelation { .. }));
    }

    #[test]
    fn test_missing_key_column_is_schema_mismatch() {
        let schema = Schema::new([
            SchemaEntry::new("user", "user")
                .columns(["id"])
                .relation(RelationDefinition::has_many("comments", "comment").outer_key("owner_id")),
            SchemaEntry::new("comment", "comment").columns(["id", "user_id"]),
        ])
        .unwrap();
        match compile(&schema, "user", "comments") {
            Err(Error::SchemaMismatch { role, key, relation }) => {
                assert_eq!(role, "comment");
                assert_eq!(key, "owner_id");
                assert_eq!(relation, "comments");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_keyed_join_and_separate_select() {
        let schema = schema();
        let profile = compile(&schema, "user", "profile").unwrap();
        let join = profile.join("user", "user_profile").unwrap();
        assert_eq!(
            join.on,
            vec![("user_profile.user_id".to_string(), "user.id".to_string())]
        );

        let select = profile
            .separate("user_profile", &[Key::from(1i64), Key::from(2i64)])
            .unwrap();
        assert_eq!(
            select.filter.unwrap().to_string(),
            "(user_profile.user_id) IN ((?), (?))"
        );
    }

    #[test]
    fn test_target_scope_restricts_join_and_separate_select() {
        let schema = Schema::new([
            SchemaEntry::new("user", "user")
                .columns(["id"])
                .relation(RelationDefinition::has_one("profile", "profile")),
            SchemaEntry::new("profile", "profile")
                .columns(["id", "user_id", "visible"])
                .scope(Condition::eq("visible", true)),
        ])
        .unwrap();
        let profile = compile(&schema, "user", "profile").unwrap();

        let join = profile.join("user", "user_profile").unwrap();
        assert_eq!(join.conditions, vec![Condition::eq("user_profile.visible", true)]);

        let select = profile.separate("user_profile", &[Key::from(1i64)]).unwrap();
        assert_eq!(
            select.filter.unwrap(),
            Condition::And(vec![
                in_condition(vec!["user_profile.user_id".into()], &[Key::from(1i64)]),
                Condition::eq("user_profile.visible", true),
            ])
        );
    }

    #[test]
    fn test_link_keys() {
        let schema = schema();
        let comments = compile(&schema, "user", "comments").unwrap();
        let parent = Row::from_pairs([("id", Value::BigInt(3))]);
        assert_eq!(comments.parent_key(&parent), Some(Key::from(3i64)));

        let child = Row::from_pairs([
            ("c.id", Value::BigInt(10)),
            ("c.user_id", Value::Int(3)),
        ]);
        assert_eq!(comments.child_key(&child, "c"), Some(Key::from(3i64)));

        let orphan = Row::from_pairs([("c.id", Value::BigInt(11)), ("c.user_id", Value::Null)]);
        assert_eq!(comments.child_key(&orphan, "c"), None);
    }
}
