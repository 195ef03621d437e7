//! Loader tree and row assembly.
//!
//! A [`Node`] per eager-loaded relation, rooted at the selector's role.
//! Join nodes add their table to the parent's query; separate nodes run one
//! query per batch of parent keys; inline nodes (embedded relations) read
//! prefixed columns of the parent row.
//!
//! Rows are first folded into an arena of [`Item`]s deduplicated by
//! `(alias, primary key)`, so a parent repeated by a join is assembled once.
//! Items are then either materialized into the heap (one entity per
//! role and key) or turned into plain [`Record`]s.

use crate::Orm;
use crate::change_tracker::current_values;
use crate::identity_map::{EntityState, Heap};
use crate::relation::{FetchMode, Resolver};
use rowgraph_core::{
    Connection, EntityId, Error, FetchMethod, Key, Nested, OrderBy, OrderDirection, Record,
    RelationValue, Result, Row, SchemaEntry, Select,
};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

/// One eager-loaded relation (or the root).
#[derive(Debug, Clone)]
pub(crate) struct Node<'o> {
    /// Relation name, empty for the root.
    pub name: String,
    pub resolver: Option<&'o Resolver>,
    pub entry: &'o Arc<SchemaEntry>,
    pub alias: String,
    pub mode: FetchMode,
    /// Order of the related rows; the target key when empty.
    pub order_by: Vec<OrderBy>,
    pub children: Vec<Node<'o>>,
}

impl<'o> Node<'o> {
    pub fn root(orm: &'o Orm, role: &str) -> Result<Self> {
        let entry = orm.entry(role)?;
        let mut node = Self {
            name: String::new(),
            resolver: None,
            entry,
            alias: entry.role.to_string(),
            mode: FetchMode::Join,
            order_by: Vec::new(),
            children: Vec::new(),
        };
        node.add_inline(orm);
        Ok(node)
    }

    fn child(orm: &'o Orm, parent: &Self, resolver: &'o Resolver, mode: FetchMode) -> Self {
        let mut node = Self {
            name: resolver.name().to_string(),
            resolver: Some(resolver),
            entry: &resolver.link().target,
            alias: format!("{}_{}", parent.alias, resolver.name()),
            mode,
            order_by: Vec::new(),
            children: Vec::new(),
        };
        node.add_inline(orm);
        node
    }

    /// Embedded relations are always part of the owner's row.
    fn add_inline(&mut self, orm: &'o Orm) {
        for resolver in orm.resolvers_of(self.entry.role.as_str()) {
            if matches!(resolver, Resolver::Embedded(_)) {
                let child = Node::child(orm, self, resolver, FetchMode::Inline);
                self.children.push(child);
            }
        }
    }

    /// Find or create the child for relation `name`.
    pub fn child_mut(
        &mut self,
        orm: &'o Orm,
        name: &str,
        forced: Option<FetchMethod>,
    ) -> Result<&mut Node<'o>> {
        let resolver = orm.resolver(self.entry.role.as_str(), name)?;
        let mode = resolver.fetch_mode(forced, orm.config())?;
        let index = match self.children.iter().position(|c| c.name == name) {
            Some(index) => {
                if forced.is_some() && self.children[index].mode != FetchMode::Inline {
                    self.children[index].mode = mode;
                }
                index
            }
            None => {
                let child = Node::child(orm, self, resolver, mode);
                self.children.push(child);
                self.children.len() - 1
            }
        };
        Ok(&mut self.children[index])
    }

    /// Columns read from this node's table, embedded columns included.
    pub fn columns(&self) -> Vec<String> {
        let mut columns = self.entry.columns.clone();
        for child in &self.children {
            if let Some(Resolver::Embedded(embedded)) = child.resolver {
                for column in embedded.owner_columns() {
                    if !columns.contains(&column) {
                        columns.push(column);
                    }
                }
            }
        }
        columns
    }

    /// Add this node's columns and every join child below it to `select`.
    pub fn extend_select(&self, select: Select) -> Select {
        let columns = self.columns();
        let mut select = select.columns(&self.alias, &columns);
        for child in &self.children {
            if child.mode != FetchMode::Join {
                continue;
            }
            if let Some(join) = child.resolver.and_then(|r| r.join(&self.alias, &child.alias)) {
                select = child.extend_select(select.join(join));
            }
        }
        select
    }

    fn is_many(&self) -> bool {
        self.resolver.is_some_and(|r| r.kind().is_many())
    }

    /// Does a joined to-many relation repeat this node's rows?
    pub fn joins_many(&self) -> bool {
        self.children
            .iter()
            .any(|c| c.mode == FetchMode::Join && (c.is_many() || c.joins_many()))
    }

    /// Unqualified order of this node's rows.
    fn row_order(&self) -> Vec<(String, OrderDirection)> {
        if self.order_by.is_empty() {
            return self
                .entry
                .primary_key
                .iter()
                .map(|c| (c.clone(), OrderDirection::Asc))
                .collect();
        }
        let prefix = format!("{}.", self.alias);
        self.order_by
            .iter()
            .map(|o| {
                let column = o.column.strip_prefix(&prefix).unwrap_or(&o.column);
                (column.to_string(), o.direction)
            })
            .collect()
    }

    /// Indented outline used in debug logs.
    pub fn describe(&self, depth: usize, out: &mut String) {
        if depth > 0 {
            out.push_str(&format!(
                "{}{} ({:?}) as {}\n",
                "  ".repeat(depth - 1),
                self.name,
                self.mode,
                self.alias
            ));
        }
        for child in &self.children {
            child.describe(depth + 1, out);
        }
    }
}

/// Relation of an item to items of a child node.
#[derive(Debug, Clone, PartialEq)]
enum Link {
    One(Option<usize>),
    Many(Vec<usize>),
}

/// A fetched row of one node, unqualified.
#[derive(Debug)]
struct Item<'o> {
    entry: &'o Arc<SchemaEntry>,
    row: Row,
    relations: BTreeMap<String, Link>,
}

/// Rows of one fetch, assembled per node.
pub(crate) struct Loader<'o> {
    orm: &'o Orm,
    items: Vec<Item<'o>>,
    index: HashMap<(String, Key), usize>,
}

impl<'o> Loader<'o> {
    pub fn new(orm: &'o Orm) -> Self {
        Self {
            orm,
            items: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Fold one (qualified) row of `node`'s query into items.
    ///
    /// Returns `None` when the node's columns are all NULL (unmatched join).
    pub fn absorb(&mut self, node: &Node<'o>, row: &Row) -> Option<usize> {
        let own = row.project(&node.alias);
        let key = own.key(&node.entry.primary_key).filter(Key::is_complete)?;
        let slot = (node.alias.clone(), key);
        let index = match self.index.get(&slot) {
            Some(&index) => index,
            None => {
                let index = self.push(node.entry, own);
                self.index.insert(slot, index);
                for child in &node.children {
                    if let Some(Resolver::Embedded(embedded)) = child.resolver {
                        let inner = embedded.extract_row(&self.items[index].row);
                        let inner_index = self.push(child.entry, inner);
                        self.items[index]
                            .relations
                            .insert(child.name.clone(), Link::One(Some(inner_index)));
                    }
                }
                index
            }
        };

        for child in &node.children {
            if child.mode != FetchMode::Join {
                continue;
            }
            let target = self.absorb(child, row);
            self.attach(index, child, target);
        }
        Some(index)
    }

    fn push(&mut self, entry: &'o Arc<SchemaEntry>, row: Row) -> usize {
        self.items.push(Item {
            entry,
            row,
            relations: BTreeMap::new(),
        });
        self.items.len() - 1
    }

    /// Record `target` under `child.name` of `parent`; `None` only marks
    /// the relation as loaded.
    fn attach(&mut self, parent: usize, child: &Node<'o>, target: Option<usize>) {
        let many = child.is_many();
        let relations = &mut self.items[parent].relations;
        let link = relations.entry(child.name.clone()).or_insert_with(|| {
            if many {
                Link::Many(Vec::new())
            } else {
                Link::One(None)
            }
        });
        match (link, target) {
            (Link::Many(ids), Some(target)) => {
                if !ids.contains(&target) {
                    ids.push(target);
                }
            }
            (Link::One(one), Some(target)) => {
                if one.is_none() {
                    *one = Some(target);
                }
            }
            (_, None) => {}
        }
    }

    /// Items of `child` linked from `parents`, without duplicates.
    fn children_of(&self, parents: &[usize], child: &Node<'o>) -> Vec<usize> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for &parent in parents {
            let ids = match self.items[parent].relations.get(&child.name) {
                Some(Link::One(Some(id))) => vec![*id],
                Some(Link::Many(ids)) => ids.clone(),
                _ => Vec::new(),
            };
            for id in ids {
                if seen.insert(id) {
                    out.push(id);
                }
            }
        }
        out
    }

    /// Run the separate queries below `node` for the given parent items.
    pub fn load_children(&mut self, node: &Node<'o>, parents: &[usize]) -> Result<()> {
        for child in &node.children {
            match child.mode {
                FetchMode::Inline => {}
                FetchMode::Join => {
                    if child.is_many() {
                        self.sort_joined(parents, child);
                    }
                    let items = self.children_of(parents, child);
                    self.load_children(child, &items)?;
                }
                FetchMode::Separate => {
                    let items = self.load_separate(child, parents)?;
                    self.load_children(child, &items)?;
                }
            }
        }
        Ok(())
    }

    /// Joined rows arrive in parent order; put each parent's list in the
    /// relation's order.
    fn sort_joined(&mut self, parents: &[usize], child: &Node<'o>) {
        let order = child.row_order();
        for &parent in parents {
            let mut ids = match self.items[parent].relations.get_mut(&child.name) {
                Some(Link::Many(ids)) => std::mem::take(ids),
                _ => continue,
            };
            ids.sort_by(|&a, &b| self.compare(a, b, &order));
            if let Some(Link::Many(slot)) = self.items[parent].relations.get_mut(&child.name) {
                *slot = ids;
            }
        }
    }

    fn compare(&self, a: usize, b: usize, order: &[(String, OrderDirection)]) -> Ordering {
        let (a, b) = (&self.items[a].row, &self.items[b].row);
        for (column, direction) in order {
            let ordering = match (a.get_by_name(column), b.get_by_name(column)) {
                (Some(x), Some(y)) => x.compare(y).unwrap_or(Ordering::Equal),
                _ => Ordering::Equal,
            };
            let ordering = match direction {
                OrderDirection::Asc => ordering,
                OrderDirection::Desc => ordering.reverse(),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }

    /// Primary key of an item.
    pub fn key(&self, index: usize, columns: &[String]) -> Option<Key> {
        self.items.get(index)?.row.key(columns)
    }

    fn load_separate(&mut self, child: &Node<'o>, parents: &[usize]) -> Result<Vec<usize>> {
        let Some(resolver) = child.resolver else {
            return Ok(Vec::new());
        };

        let mut keys: Vec<Key> = Vec::new();
        let mut seen_keys: HashSet<Key> = HashSet::new();
        for &parent in parents {
            self.attach(parent, child, None);
            if let Some(key) = resolver.parent_key(&self.items[parent].row) {
                if seen_keys.insert(key.clone()) {
                    keys.push(key);
                }
            }
        }
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let connection = self.orm.source(resolver.database())?;
        let mut buckets: HashMap<Key, Vec<usize>> = HashMap::new();
        let mut fetched = Vec::new();
        let mut seen_items = HashSet::new();
        for chunk in keys.chunks(self.orm.config().in_batch_size.max(1)) {
            let select = resolver.separate(&child.alias, chunk).ok_or_else(|| {
                Error::Custom(format!("relation '{}' cannot be fetched separately", child.name))
            })?;
            let mut select = child.extend_select(select);
            if child.order_by.is_empty() {
                for column in &child.entry.primary_key {
                    select = select.order_by(OrderBy::asc(format!("{}.{}", child.alias, column)));
                }
            } else {
                for order in &child.order_by {
                    select = select.order_by(order.clone());
                }
            }

            tracing::trace!(relation = %child.name, keys = chunk.len(), query = %select, "Separate fetch");
            let rows = connection.select(&select)?;
            for row in &rows {
                let Some(link_key) = resolver.child_key(row, &child.alias) else {
                    continue;
                };
                let Some(item) = self.absorb(child, row) else {
                    continue;
                };
                let bucket = buckets.entry(link_key).or_default();
                if !bucket.contains(&item) {
                    bucket.push(item);
                }
                if seen_items.insert(item) {
                    fetched.push(item);
                }
            }
        }

        for &parent in parents {
            let Some(key) = resolver.parent_key(&self.items[parent].row) else {
                continue;
            };
            if let Some(bucket) = buckets.get(&key) {
                for &item in bucket {
                    self.attach(parent, child, Some(item));
                }
            }
        }
        Ok(fetched)
    }

    /// Register `index` (and everything linked below it) in the heap.
    ///
    /// Entities already in the heap keep their field values; their loaded
    /// relations are replaced and become the known relation state.
    pub fn materialize(
        &self,
        heap: &mut Heap,
        index: usize,
        memo: &mut HashMap<usize, EntityId>,
    ) -> Result<EntityId> {
        if let Some(&id) = memo.get(&index) {
            return Ok(id);
        }
        let item = &self.items[index];
        let entry = item.entry;
        let mapper = self.orm.mapper(entry.role.as_str());

        let (id, key, fresh) = if entry.embeddable {
            (heap.create(mapper.hydrate(entry, &item.row)?), None, true)
        } else {
            let key = item
                .row
                .key(&entry.primary_key)
                .ok_or_else(|| Error::Custom(format!("row of '{}' lacks its key", entry.role)))?;
            match heap.get(entry.role.as_str(), &key) {
                Some(id) => (id, Some(key), false),
                None => {
                    let id = heap.create(mapper.hydrate(entry, &item.row)?);
                    heap.attach(id, EntityState::managed(key.clone(), BTreeMap::new()));
                    (id, Some(key), true)
                }
            }
        };
        memo.insert(index, id);

        let embedded: Vec<&str> = self
            .orm
            .resolvers_of(entry.role.as_str())
            .iter()
            .filter(|r| matches!(r, Resolver::Embedded(_)))
            .map(Resolver::name)
            .collect();

        let mut relations = BTreeMap::new();
        for (name, link) in &item.relations {
            let keep_existing = !fresh
                && embedded.contains(&name.as_str())
                && heap.entity(id).is_some_and(|e| e.relation(name).is_some());
            if keep_existing {
                continue;
            }
            let value = match link {
                Link::One(target) => RelationValue::One(
                    target
                        .map(|t| self.materialize(heap, t, memo))
                        .transpose()?,
                ),
                Link::Many(targets) => RelationValue::Many(
                    targets
                        .iter()
                        .map(|&t| self.materialize(heap, t, memo))
                        .collect::<Result<Vec<_>>>()?,
                ),
            };
            relations.insert(name.clone(), value);
        }

        let entity = heap.require_mut(id)?;
        for (name, value) in &relations {
            match value {
                RelationValue::One(target) => entity.set_one(name.as_str(), *target),
                RelationValue::Many(targets) => entity.set_many(name.as_str(), targets.clone()),
            }
        }

        if key.is_some() {
            let snapshot = if fresh {
                Some(current_values(self.orm, heap, id)?)
            } else {
                None
            };
            if let Some(state) = heap.state_of_mut(id) {
                if let Some(snapshot) = snapshot {
                    state.snapshot = snapshot;
                }
                state.relations.extend(relations);
            }
        }
        Ok(id)
    }

    /// Plain record of `index` with nested relations.
    pub fn record(&self, index: usize) -> Result<Record> {
        let item = &self.items[index];
        let entity = self
            .orm
            .mapper(item.entry.role.as_str())
            .hydrate(item.entry, &item.row)?;
        let mut record = Record {
            fields: entity.fields().clone(),
            relations: BTreeMap::new(),
        };
        for (name, link) in &item.relations {
            let nested = match link {
                Link::One(target) => Nested::One(
                    target
                        .map(|t| self.record(t).map(Box::new))
                        .transpose()?,
                ),
                Link::Many(targets) => Nested::Many(
                    targets
                        .iter()
                        .map(|&t| self.record(t))
                        .collect::<Result<Vec<_>>>()?,
                ),
            };
            record.relations.insert(name.clone(), nested);
        }
        Ok(record)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }
}
