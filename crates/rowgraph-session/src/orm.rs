//! The ORM context shared by selectors and transactions.

use crate::config::OrmConfig;
use crate::relation::Resolver;
use rowgraph_core::{
    Connection, EntityMapper, Error, Mapper, Result, Role, Schema, SchemaEntry, Sources,
};
use std::collections::HashMap;
use std::sync::Arc;

/// Schema, compiled resolvers, mappers and connections.
///
/// Built once and shared; selectors and transactions borrow it.
pub struct Orm {
    schema: Schema,
    sources: Sources,
    config: OrmConfig,
    resolvers: HashMap<Role, Vec<Resolver>>,
    mappers: HashMap<Role, Arc<dyn Mapper>>,
    default_mapper: EntityMapper,
}

impl std::fmt::Debug for Orm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orm")
            .field("roles", &self.schema.len())
            .field("sources", &self.sources)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Orm {
    /// Compile every relation of `schema`.
    ///
    /// Fails with `SchemaMismatch` when a relation key is not a column of its
    /// role, and with `InvalidSchema` for structurally invalid relations.
    pub fn new(schema: Schema, sources: Sources) -> Result<Self> {
        let mut resolvers = HashMap::new();
        for role in schema.roles() {
            let entry = schema.entry(role.as_str())?;
            let compiled = entry
                .relations
                .iter()
                .map(|def| Resolver::compile(&schema, entry, def))
                .collect::<Result<Vec<_>>>()?;
            resolvers.insert(role.clone(), compiled);
        }
        tracing::debug!(
            roles = schema.len(),
            relations = resolvers.values().map(Vec::len).sum::<usize>(),
            "ORM initialized"
        );
        Ok(Self {
            schema,
            sources,
            config: OrmConfig::default(),
            resolvers,
            mappers: HashMap::new(),
            default_mapper: EntityMapper,
        })
    }

    #[must_use]
    pub fn with_config(mut self, config: OrmConfig) -> Self {
        self.config = config;
        self
    }

    /// Use `mapper` for `role` instead of [`EntityMapper`].
    #[must_use]
    pub fn with_mapper(mut self, role: impl Into<Role>, mapper: Arc<dyn Mapper>) -> Self {
        self.mappers.insert(role.into(), mapper);
        self
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn config(&self) -> &OrmConfig {
        &self.config
    }

    pub fn sources(&self) -> &Sources {
        &self.sources
    }

    pub fn entry(&self, role: &str) -> Result<&Arc<SchemaEntry>> {
        self.schema.entry(role)
    }

    /// Connection of a schema database.
    pub fn source(&self, database: &str) -> Result<&Arc<dyn Connection>> {
        self.sources.get(database)
    }

    /// Resolvers of `role` in declaration order.
    pub fn resolvers_of(&self, role: &str) -> &[Resolver] {
        self.resolvers.get(role).map_or(&[], Vec::as_slice)
    }

    /// Resolver of relation `name` on `role`.
    pub fn resolver(&self, role: &str, name: &str) -> Result<&Resolver> {
        self.entry(role)?;
        self.resolvers_of(role)
            .iter()
            .find(|r| r.name() == name)
            .ok_or_else(|| Error::UnknownRelation {
                role: role.to_string(),
                relation: name.to_string(),
            })
    }

    pub fn mapper(&self, role: &str) -> &dyn Mapper {
        match self.mappers.get(role) {
            Some(mapper) => mapper.as_ref(),
            None => &self.default_mapper,
        }
    }
}
