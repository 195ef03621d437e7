//! Query builder for a root role with eager-loaded relations.
//!
//! ```ignore
//! let users = Selector::new(&orm, "user")?
//!     .load("comments.post")?
//!     .where_eq("active", true)
//!     .order_by("id", OrderDirection::Asc)
//!     .fetch_all(&mut heap)?;
//! ```

use crate::Orm;
use crate::identity_map::Heap;
use crate::loader::{Loader, Node};
use crate::relation::in_condition;
use rowgraph_core::{
    Condition, Connection, EntityId, Error, FetchMethod, Key, OrderBy, OrderDirection, Record,
    Result, Select, TableRef, Value,
};
use std::collections::{HashMap, HashSet};

/// Per-path options of an eager load.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Order of the related rows; the target primary key when empty.
    pub order_by: Vec<OrderBy>,
    /// Override the relation's fetch method.
    pub method: Option<FetchMethod>,
}

impl LoadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Order related rows by `column` of the target.
    #[must_use]
    pub fn order_by(mut self, column: impl Into<String>, direction: OrderDirection) -> Self {
        self.order_by.push(OrderBy {
            column: column.into(),
            direction,
        });
        self
    }

    #[must_use]
    pub fn method(mut self, method: FetchMethod) -> Self {
        self.method = Some(method);
        self
    }
}

/// Fetches root entities of one role together with their relations.
#[derive(Debug)]
pub struct Selector<'o> {
    orm: &'o Orm,
    root: Node<'o>,
    filter: Option<Condition>,
    order_by: Vec<OrderBy>,
    limit: Option<u64>,
}

impl<'o> Selector<'o> {
    pub fn new(orm: &'o Orm, role: &str) -> Result<Self> {
        Ok(Self {
            orm,
            root: Node::root(orm, role)?,
            filter: None,
            order_by: Vec::new(),
            limit: None,
        })
    }

    /// Eager-load a dot-separated relation path.
    ///
    /// Paths sharing a prefix share loader nodes; loading a path twice is a
    /// no-op.
    pub fn load(&mut self, path: &str) -> Result<&mut Self> {
        self.load_with(path, LoadOptions::default())
    }

    /// Eager-load a path, applying `options` to its last segment.
    pub fn load_with(&mut self, path: &str, options: LoadOptions) -> Result<&mut Self> {
        let segments: Vec<&str> = path.split('.').collect();
        let mut node = &mut self.root;
        for (i, segment) in segments.iter().enumerate() {
            let last = i + 1 == segments.len();
            let forced = if last { options.method } else { None };
            node = node.child_mut(self.orm, segment, forced)?;
        }
        if !options.order_by.is_empty() {
            let alias = node.alias.clone();
            node.order_by = options
                .order_by
                .iter()
                .map(|o| OrderBy {
                    column: qualify(&alias, &o.column),
                    direction: o.direction,
                })
                .collect();
        }
        Ok(self)
    }

    /// Constrain the root query. Unqualified columns refer to the root table.
    pub fn filter(&mut self, condition: Condition) -> &mut Self {
        let condition = condition.qualified(&self.root.alias);
        self.filter = Some(match self.filter.take() {
            Some(existing) => existing.and(condition),
            None => condition,
        });
        self
    }

    pub fn where_eq(&mut self, column: &str, value: impl Into<Value>) -> &mut Self {
        self.filter(Condition::eq(column, value))
    }

    /// Constrain the root to the row with primary key `key`.
    ///
    /// The key must have one value per primary key column.
    pub fn where_pk(&mut self, key: impl Into<Key>) -> Result<&mut Self> {
        let key = key.into();
        let columns = &self.root.entry.primary_key;
        if key.values().len() != columns.len() {
            return Err(Error::Custom(format!(
                "role '{}' has a {}-column primary key, got {} value(s)",
                self.root.entry.role,
                columns.len(),
                key.values().len()
            )));
        }
        let condition = Condition::all_eq(columns.iter().cloned().zip(key.into_values()));
        Ok(self.filter(condition))
    }

    /// Order root entities; relations keep their own order.
    pub fn order_by(&mut self, column: &str, direction: OrderDirection) -> &mut Self {
        self.order_by.push(OrderBy {
            column: qualify(&self.root.alias, column),
            direction,
        });
        self
    }

    pub fn limit(&mut self, limit: u64) -> &mut Self {
        self.limit = Some(limit);
        self
    }

    /// Root table with the role scope and the caller's filters.
    fn base_query(&self) -> Select {
        let mut select = Select::new(TableRef::new(
            self.root.entry.table.as_str(),
            self.root.alias.as_str(),
        ));
        if let Some(scope) = self.root.entry.scope_for(&self.root.alias) {
            select = select.filter(scope);
        }
        if let Some(filter) = &self.filter {
            select = select.filter(filter.clone());
        }
        select
    }

    fn ordered(&self, mut select: Select) -> Select {
        for order in &self.order_by {
            select = select.order_by(order.clone());
        }
        select
    }

    /// Keys of the first `limit` roots, in root order.
    fn limited_keys(&self, connection: &dyn Connection, limit: u64) -> Result<Vec<Key>> {
        let columns = &self.root.entry.primary_key;
        let select = self
            .ordered(self.base_query().columns(&self.root.alias, columns))
            .limit(limit);
        tracing::trace!(query = %select, "Root key fetch");
        Ok(connection
            .select(&select)?
            .iter()
            .filter_map(|row| row.project(&self.root.alias).key(columns))
            .collect())
    }

    /// Run the root query and every separate query below it.
    ///
    /// A limit counts roots. When a joined to-many relation would multiply
    /// the root rows, the limited root keys are fetched first.
    fn gather(&self) -> Result<(Loader<'o>, Vec<usize>)> {
        let connection = self.orm.source(&self.root.entry.database)?;
        let mut loader = Loader::new(self.orm);

        if tracing::enabled!(tracing::Level::DEBUG) {
            let mut tree = String::new();
            self.root.describe(0, &mut tree);
            tracing::debug!(role = %self.root.entry.role, tree = %tree, "Loader tree");
        }

        let mut keys = None;
        let mut select = self.ordered(self.root.extend_select(self.base_query()));
        match self.limit {
            Some(limit) if self.root.joins_many() => {
                let limited = self.limited_keys(connection.as_ref(), limit)?;
                if limited.is_empty() {
                    return Ok((loader, Vec::new()));
                }
                let columns = self
                    .root
                    .entry
                    .primary_key
                    .iter()
                    .map(|c| qualify(&self.root.alias, c))
                    .collect();
                select = select.filter(in_condition(columns, &limited));
                keys = Some(limited);
            }
            Some(limit) => select = select.limit(limit),
            None => {}
        }
        tracing::trace!(query = %select, "Root fetch");

        let rows = connection.select(&select)?;
        let mut roots = Vec::new();
        let mut seen = HashSet::new();
        for row in &rows {
            if let Some(index) = loader.absorb(&self.root, row) {
                if seen.insert(index) {
                    roots.push(index);
                }
            }
        }
        if let Some(keys) = keys {
            let position: HashMap<&Key, usize> = keys.iter().zip(0..).collect();
            let columns = &self.root.entry.primary_key;
            roots.sort_by_key(|&index| {
                loader
                    .key(index, columns)
                    .and_then(|key| position.get(&key).copied())
                    .unwrap_or(usize::MAX)
            });
        }
        loader.load_children(&self.root, &roots)?;
        tracing::debug!(roots = roots.len(), items = loader.len(), "Rows assembled");
        Ok((loader, roots))
    }

    /// Root entities in query order, relations populated.
    #[tracing::instrument(level = "debug", skip(self, heap), fields(role = %self.root.entry.role))]
    pub fn fetch_all(&self, heap: &mut Heap) -> Result<Vec<EntityId>> {
        let (loader, roots) = self.gather()?;
        let mut memo = HashMap::new();
        roots
            .into_iter()
            .map(|index| loader.materialize(heap, index, &mut memo))
            .collect()
    }

    /// First root entity, if any.
    pub fn fetch_one(&self, heap: &mut Heap) -> Result<Option<EntityId>> {
        Ok(self.fetch_all(heap)?.into_iter().next())
    }

    /// Plain nested records, without identity tracking.
    #[tracing::instrument(level = "debug", skip(self), fields(role = %self.root.entry.role))]
    pub fn fetch_data(&self) -> Result<Vec<Record>> {
        let (loader, roots) = self.gather()?;
        roots.into_iter().map(|index| loader.record(index)).collect()
    }

    /// Number of root rows matching the constraints.
    pub fn count(&self) -> Result<usize> {
        let connection = self.orm.source(&self.root.entry.database)?;
        let select = self
            .base_query()
            .columns(&self.root.alias, &self.root.entry.primary_key);
        Ok(connection.select(&select)?.len())
    }
}

/// `alias.column` unless `column` is already qualified.
fn qualify(alias: &str, column: &str) -> String {
    if column.contains('.') {
        column.to_string()
    } else {
        format!("{alias}.{column}")
    }
}
