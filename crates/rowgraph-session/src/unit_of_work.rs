//! Unit of work: turn a mutated entity graph into one transactional set of writes.
//!
//! A [`Transaction`] collects root entities to persist or delete. `run`
//! then goes through the following phases:
//!
//! 1. Collect: deletes first (cascading through has-* relations), then every
//!    entity reachable from the persist roots through loaded cascade
//!    relations.
//! 2. Prepare: one [`Tuple`] per persisted entity holding its current column
//!    values, generated keys and generated fields.
//! 3. Queue: every resolver claims the link columns it owns and queues its
//!    unlinks, pivot writes and delete ordering.
//! 4. Diff: new entities become inserts, changed ones updates, deleted ones
//!    deletes. Unchanged entities produce nothing.
//! 5. Execute the command graph, then sync the heap.
//!
//! # Example
//!
//! ```ignore
//! let mut tx = Transaction::new(&orm);
//! tx.persist(user).delete(old_comment);
//! let summary = tx.run(&mut heap)?;
//! ```

use crate::Orm;
use crate::change_tracker::{changed_columns, current_values};
use crate::flush::{
    Command, CommandGraph, CommandKind, Commit, Deferred, Execution, PivotKind, PivotOp,
    RunSummary, Slot,
};
use crate::identity_map::{EntityState, Heap, Status};
use crate::relation::Resolver;
use rowgraph_core::{
    Entity, EntityId, Error, GeneratedField, Key, RelationValue, Result, Value,
};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

/// Working record of one entity during a run.
#[derive(Debug, Clone)]
pub(crate) struct Tuple {
    pub is_new: bool,
    /// Column values to persist.
    pub values: BTreeMap<String, Value>,
    /// Columns whose value comes from another command.
    pub deferred: BTreeMap<String, Deferred>,
    /// Values generated during this run, registered as overrides while the
    /// run executes.
    pub generated: BTreeMap<String, Value>,
}

/// A child dropped from a has-* relation.
#[derive(Debug, Clone)]
pub(crate) struct Unlink {
    pub child: EntityId,
    /// Link columns on the child, first one is the key column.
    pub columns: Vec<String>,
    pub nullable: bool,
}

/// Everything a run decides before any statement executes.
pub(crate) struct Plan<'a> {
    orm: &'a Orm,
    heap: &'a Heap,
    order: Vec<EntityId>,
    tuples: HashMap<EntityId, Tuple>,
    dropped: HashSet<EntityId>,
    deleted: Vec<EntityId>,
    deleted_set: HashSet<EntityId>,
    claimed: HashSet<(EntityId, String)>,
    unlinks: Vec<Unlink>,
    pivots: Vec<PivotOp>,
    after: Vec<(EntityId, EntityId)>,
}

impl<'a> Plan<'a> {
    fn new(orm: &'a Orm, heap: &'a Heap) -> Self {
        Self {
            orm,
            heap,
            order: Vec::new(),
            tuples: HashMap::new(),
            dropped: HashSet::new(),
            deleted: Vec::new(),
            deleted_set: HashSet::new(),
            claimed: HashSet::new(),
            unlinks: Vec::new(),
            pivots: Vec::new(),
            after: Vec::new(),
        }
    }

    pub fn entity(&self, id: EntityId) -> Result<&'a Entity> {
        self.heap.require(id)
    }

    /// Relation state recorded by the last load or commit.
    pub fn known(&self, id: EntityId, relation: &str) -> Option<&'a RelationValue> {
        self.heap.state_of(id)?.relations.get(relation)
    }

    /// Deleted in this run or by an earlier one.
    pub fn is_deleted(&self, id: EntityId) -> bool {
        self.deleted_set.contains(&id)
            || self
                .heap
                .state_of(id)
                .is_some_and(|s| s.status == Status::Deleted)
    }

    fn is_inserted(&self, id: EntityId) -> bool {
        self.tuples.get(&id).is_some_and(|t| t.is_new)
    }

    /// Value of `column` on `id` as it will be after the run.
    ///
    /// Rows inserted in this run are always deferred, so their writes order
    /// before every command referencing them.
    pub fn reference(&self, id: EntityId, column: &str, weak: bool) -> Slot {
        if let Some(tuple) = self.tuples.get(&id) {
            if let Some(deferred) = tuple.deferred.get(column) {
                return Slot::Deferred(deferred.clone());
            }
        }
        if self.is_inserted(id) {
            return Slot::Deferred(Deferred {
                entity: id,
                column: column.to_string(),
                weak,
            });
        }
        let value = match self.tuples.get(&id) {
            Some(tuple) => tuple.values.get(column).cloned(),
            None => self
                .heap
                .state_of(id)
                .and_then(|s| s.snapshot.get(column).cloned())
                .or_else(|| self.heap.entity(id).and_then(|e| e.get(column).cloned())),
        };
        Slot::Value(value.unwrap_or(Value::Null))
    }

    /// Set a link column of `id`. Deleted entities are left alone.
    pub fn claim(&mut self, id: EntityId, column: &str, slot: Slot) -> Result<()> {
        if self.is_deleted(id) {
            return Ok(());
        }
        self.claimed.insert((id, column.to_string()));
        let tuple = self.ensure_tuple(id)?;
        match slot {
            Slot::Value(value) => {
                tuple.deferred.remove(column);
                tuple.values.insert(column.to_string(), value);
            }
            Slot::Deferred(deferred) => {
                tuple.deferred.insert(column.to_string(), deferred);
            }
        }
        Ok(())
    }

    pub fn unlink(&mut self, unlink: Unlink) {
        self.unlinks.push(unlink);
    }

    pub fn pivot(&mut self, op: PivotOp) {
        self.pivots.push(op);
    }

    /// The write of `writer` must run before the delete of `deleted`.
    pub fn delete_after(&mut self, writer: EntityId, deleted: EntityId) {
        self.after.push((writer, deleted));
    }

    /// Schedule a persisted entity for deletion, cascading through has-*.
    fn mark_deleted(&mut self, id: EntityId) -> Result<()> {
        let orm = self.orm;
        let mut stack = vec![id];
        while let Some(id) = stack.pop() {
            if self.deleted_set.contains(&id)
                || !self.heap.state_of(id).is_some_and(EntityState::is_persisted)
            {
                continue;
            }
            self.deleted_set.insert(id);
            self.deleted.push(id);

            let entity = self.entity(id)?;
            for resolver in orm.resolvers_of(entity.role().as_str()) {
                let Resolver::Has(has) = resolver else {
                    continue;
                };
                if !has.link.cascade {
                    continue;
                }
                let name = &has.link.name;
                for value in [entity.relation(name), self.known(id, name)]
                    .into_iter()
                    .flatten()
                {
                    stack.extend(value.ids());
                }
            }
        }
        Ok(())
    }

    fn collect(&mut self, persist: &[EntityId], delete: &[EntityId]) -> Result<Vec<EntityId>> {
        for &id in delete {
            self.entity(id)?;
            self.dropped.insert(id);
            self.mark_deleted(id)?;
        }

        let orm = self.orm;
        let mut collected = Vec::new();
        let mut seen: HashSet<EntityId> = HashSet::new();
        let mut queue: VecDeque<EntityId> = persist.iter().copied().collect();
        while let Some(id) = queue.pop_front() {
            if !seen.insert(id) || self.dropped.contains(&id) || self.is_deleted(id) {
                continue;
            }
            let entity = self.entity(id)?;
            collected.push(id);
            for resolver in orm.resolvers_of(entity.role().as_str()) {
                if matches!(resolver, Resolver::Embedded(_)) || !resolver.link().cascade {
                    continue;
                }
                if let Some(value) = entity.relation(resolver.name()) {
                    queue.extend(value.ids());
                }
            }
        }
        Ok(collected)
    }

    fn ensure_tuple(&mut self, id: EntityId) -> Result<&mut Tuple> {
        if !self.tuples.contains_key(&id) {
            let tuple = self.prepare(id)?;
            self.order.push(id);
            self.tuples.insert(id, tuple);
        }
        self.tuples
            .get_mut(&id)
            .ok_or_else(|| Error::Custom(format!("entity {id} has no tuple")))
    }

    /// Current values plus keys and fields generated for this run.
    fn prepare(&self, id: EntityId) -> Result<Tuple> {
        let entity = self.entity(id)?;
        let role = entity.role().as_str();
        let entry = self.orm.entry(role)?;
        let mapper = self.orm.mapper(role);
        let state = self.heap.state_of(id);
        let is_new = !state.is_some_and(EntityState::is_persisted);

        let mut values = current_values(self.orm, self.heap, id)?;
        if let Some(state) = state {
            values.extend(state.overrides.clone());
        }

        let mut generated = BTreeMap::new();
        if is_new {
            let unset = |values: &BTreeMap<String, Value>, column: &str| {
                values.get(column).is_none_or(Value::is_null)
            };
            if entry.primary_key.iter().all(|c| unset(&values, c)) {
                if let Some(key) = mapper.next_primary_key(entry) {
                    for (column, value) in entry.primary_key.iter().zip(key.into_values()) {
                        values.insert(column.clone(), value.clone());
                        generated.insert(column.clone(), value);
                    }
                }
            }
            for column in &entry.columns {
                if entry.generated_field(column).on_insert() && unset(&values, column) {
                    if let Some(value) = mapper.generate(entry, column, entity) {
                        values.insert(column.clone(), value.clone());
                        generated.insert(column.clone(), value);
                    }
                }
            }
        }

        Ok(Tuple {
            is_new,
            values,
            deferred: BTreeMap::new(),
            generated,
        })
    }

    /// Let every resolver claim its columns, then settle unlinks and deletes.
    fn queue(&mut self, collected: &[EntityId]) -> Result<()> {
        for &id in collected {
            self.ensure_tuple(id)?;
        }

        let orm = self.orm;
        let mut index = 0;
        while index < self.order.len() {
            let id = self.order[index];
            let role = self.entity(id)?.role().clone();
            for resolver in orm.resolvers_of(role.as_str()) {
                resolver.queue(self, id)?;
            }
            index += 1;
        }

        for unlink in std::mem::take(&mut self.unlinks) {
            if self.is_deleted(unlink.child) {
                continue;
            }
            let moved = unlink
                .columns
                .first()
                .is_some_and(|c| self.claimed.contains(&(unlink.child, c.clone())));
            if moved {
                continue;
            }
            if unlink.nullable {
                for column in &unlink.columns {
                    self.claim(unlink.child, column, Value::Null.into())?;
                }
            } else {
                self.mark_deleted(unlink.child)?;
            }
        }

        let mut index = 0;
        while index < self.deleted.len() {
            let id = self.deleted[index];
            let role = self.entity(id)?.role().clone();
            for resolver in orm.resolvers_of(role.as_str()) {
                resolver.queue_delete(self, id)?;
            }
            index += 1;
        }
        Ok(())
    }

    /// Diff every tuple into commands and wire the graph.
    fn build(&mut self) -> Result<CommandGraph> {
        let mut graph = CommandGraph::new();

        for index in 0..self.order.len() {
            let id = self.order[index];
            if self.deleted_set.contains(&id) {
                continue;
            }
            if let Some(command) = self.diff(id)? {
                graph.push(command);
            }
        }

        for &id in &self.deleted {
            let entity = self.entity(id)?;
            let entry = self.orm.entry(entity.role().as_str())?;
            let mut command = Command::new(
                CommandKind::Delete,
                entry.database.as_str(),
                entry.table.as_str(),
                entry.role.as_str(),
            )
            .entity(id);
            command.filter = self.locate(id, &entry.primary_key)?;
            graph.push(command);
        }

        for op in &self.pivots {
            let kind = match op.kind {
                PivotKind::Insert => CommandKind::Insert,
                PivotKind::Delete => CommandKind::Delete,
            };
            let mut command = Command::new(kind, op.database.as_str(), op.table.as_str(), op.table.as_str());
            match op.kind {
                PivotKind::Insert => command.values = op.columns.iter().cloned().collect(),
                PivotKind::Delete => command.filter = op.columns.clone(),
            }
            let index = graph.push(command);
            for &entity in &op.precedes {
                if let Some(target) = graph.write_of(entity) {
                    graph.edge(index, target);
                }
            }
        }

        for &(writer, deleted) in &self.after {
            if let (Some(from), Some(to)) = (graph.write_of(writer), graph.write_of(deleted)) {
                if from != to {
                    graph.edge(from, to);
                }
            }
        }

        graph.link();
        Ok(graph)
    }

    /// Equality filter on the persisted key of `id`.
    fn locate(&self, id: EntityId, primary_key: &[String]) -> Result<Vec<(String, Slot)>> {
        let key = self
            .heap
            .state_of(id)
            .and_then(|s| s.key.clone())
            .filter(Key::is_complete)
            .ok_or_else(|| Error::Custom(format!("entity {id} has no persisted key")))?;
        Ok(primary_key
            .iter()
            .cloned()
            .zip(key.into_values().into_iter().map(Slot::Value))
            .collect())
    }

    fn diff(&mut self, id: EntityId) -> Result<Option<Command>> {
        let entity = self.entity(id)?;
        let role = entity.role().as_str();
        let entry = self.orm.entry(role)?;
        let mapper = self.orm.mapper(role);
        let Some(tuple) = self.tuples.get(&id) else {
            return Ok(None);
        };

        let mut command = if tuple.is_new {
            let mut command = Command::new(
                CommandKind::Insert,
                entry.database.as_str(),
                entry.table.as_str(),
                role,
            )
            .entity(id);
            for (column, value) in &tuple.values {
                if tuple.deferred.contains_key(column) {
                    continue;
                }
                let generated = entry.generated_field(column) == GeneratedField::Database
                    || entry.primary_key.contains(column);
                if value.is_null() && generated {
                    command.returning.push(column.clone());
                } else {
                    command.values.insert(column.clone(), Slot::Value(value.clone()));
                }
            }
            command.locator = entry
                .primary_key
                .iter()
                .map(|column| {
                    let slot = Slot::Deferred(Deferred {
                        entity: id,
                        column: column.clone(),
                        weak: false,
                    });
                    (column.clone(), slot)
                })
                .collect();
            command
        } else {
            let snapshot = self
                .heap
                .state_of(id)
                .map(|s| &s.snapshot)
                .ok_or_else(|| Error::Custom(format!("entity {id} lost its state")))?;
            let mut command = Command::new(
                CommandKind::Update,
                entry.database.as_str(),
                entry.table.as_str(),
                role,
            )
            .entity(id);
            for column in changed_columns(snapshot, &tuple.values) {
                if tuple.deferred.contains_key(&column) {
                    continue;
                }
                if let Some(value) = tuple.values.get(&column) {
                    command.values.insert(column, Slot::Value(value.clone()));
                }
            }
            command.filter = self.locate(id, &entry.primary_key)?;
            command.locator = command.filter.clone();
            command
        };

        for (column, deferred) in &tuple.deferred {
            command
                .values
                .insert(column.clone(), Slot::Deferred(deferred.clone()));
        }

        if command.kind == CommandKind::Update {
            if command.values.is_empty() {
                return Ok(None);
            }
            let mut stamped = Vec::new();
            for column in &entry.columns {
                if entry.generated_field(column).on_update() && !command.values.contains_key(column) {
                    if let Some(value) = mapper.generate(entry, column, entity) {
                        stamped.push((column.clone(), value));
                    }
                }
            }
            if let Some(tuple) = self.tuples.get_mut(&id) {
                for (column, value) in stamped {
                    command.values.insert(column.clone(), Slot::Value(value.clone()));
                    tuple.values.insert(column.clone(), value.clone());
                    tuple.generated.insert(column, value);
                }
            }
        }

        tracing::trace!(
            role = role,
            entity = %id,
            kind = ?command.kind,
            columns = command.values.len(),
            "Command queued"
        );
        Ok(Some(command))
    }

    fn finish(self) -> Outcome {
        let mut tuples = self.tuples;
        let persisted = self
            .order
            .into_iter()
            .filter(|id| !self.deleted_set.contains(id))
            .filter_map(|id| tuples.remove(&id).map(|t| (id, t)))
            .collect();
        Outcome {
            persisted,
            deleted: self.deleted,
        }
    }
}

/// Heap changes applied after a successful commit.
struct Outcome {
    persisted: Vec<(EntityId, Tuple)>,
    deleted: Vec<EntityId>,
}

/// Overrides an entity carried before [`Outcome::register`].
type Previous = Vec<(EntityId, Option<BTreeMap<String, Value>>)>;

impl Outcome {
    /// Register generated values as pending overrides of their entities.
    fn register(&self, heap: &mut Heap) -> Previous {
        let mut previous = Vec::new();
        for (id, tuple) in &self.persisted {
            if tuple.generated.is_empty() {
                continue;
            }
            previous.push((*id, heap.state_of(*id).map(|s| s.overrides.clone())));
            for (column, value) in &tuple.generated {
                heap.register(*id, column.as_str(), value.clone());
            }
        }
        previous
    }

    /// Keep only the work stored in `databases`.
    fn within(mut self, orm: &Orm, heap: &Heap, databases: &[String]) -> Result<Self> {
        let stored = |id: EntityId| -> Result<bool> {
            let role = heap.require(id)?.role();
            let database = &orm.entry(role.as_str())?.database;
            Ok(databases.contains(database))
        };
        let mut persisted = Vec::new();
        for (id, tuple) in self.persisted {
            if stored(id)? {
                persisted.push((id, tuple));
            }
        }
        let mut deleted = Vec::new();
        for id in self.deleted {
            if stored(id)? {
                deleted.push(id);
            }
        }
        self.persisted = persisted;
        self.deleted = deleted;
        Ok(self)
    }

    fn contains(&self, id: EntityId) -> bool {
        self.persisted.iter().any(|(p, _)| *p == id)
    }

    /// Materialize overrides and written values, then store new snapshots.
    fn apply(
        self,
        orm: &Orm,
        heap: &mut Heap,
        mut written: HashMap<EntityId, BTreeMap<String, Value>>,
    ) -> Result<()> {
        for (id, tuple) in self.persisted {
            let mut snapshot = tuple.values;
            if let Some(state) = heap.state_of(id) {
                snapshot.extend(state.overrides.clone());
            }
            if let Some(row) = written.remove(&id) {
                snapshot.extend(row);
            }

            let entity = heap.require_mut(id)?;
            let entry = orm.entry(entity.role().as_str())?;
            for column in &entry.columns {
                if let Some(value) = snapshot.get(column) {
                    entity.set(column.as_str(), value.clone());
                }
            }
            let key = Key::new(
                entry
                    .primary_key
                    .iter()
                    .map(|c| snapshot.get(c).cloned().unwrap_or(Value::Null))
                    .collect(),
            );
            let relations = entity.relations().clone();
            heap.attach(
                id,
                EntityState {
                    status: Status::Managed,
                    key: Some(key),
                    snapshot,
                    relations,
                    overrides: BTreeMap::new(),
                },
            );
        }

        for id in self.deleted {
            if let Some(state) = heap.state_of_mut(id) {
                state.status = Status::Deleted;
            }
        }
        Ok(())
    }
}

/// A set of persist and delete requests executed in one transaction per
/// database.
#[derive(Debug)]
pub struct Transaction<'o> {
    orm: &'o Orm,
    persist: Vec<EntityId>,
    delete: Vec<EntityId>,
}

impl<'o> Transaction<'o> {
    pub fn new(orm: &'o Orm) -> Self {
        Self {
            orm,
            persist: Vec::new(),
            delete: Vec::new(),
        }
    }

    /// Store `id` and everything reachable through loaded cascade relations.
    pub fn persist(&mut self, id: EntityId) -> &mut Self {
        if !self.persist.contains(&id) {
            self.persist.push(id);
        }
        self
    }

    /// Delete `id`; a delete wins over a persist of the same entity.
    pub fn delete(&mut self, id: EntityId) -> &mut Self {
        if !self.delete.contains(&id) {
            self.delete.push(id);
        }
        self
    }

    /// Execute all queued work in one transaction per database.
    ///
    /// On success the heap holds the written values as new snapshots. On any
    /// failure the heap is left untouched, except after
    /// [`Error::PartialCommit`]: entities stored in the committed databases
    /// then carry their written state, and the queued work is kept so a
    /// later run writes only what is still missing.
    #[tracing::instrument(
        level = "info",
        skip(self, heap),
        fields(persist = self.persist.len(), delete = self.delete.len())
    )]
    pub fn run(&mut self, heap: &mut Heap) -> Result<RunSummary> {
        let (graph, outcome) = {
            let mut plan = Plan::new(self.orm, heap);
            let collected = plan.collect(&self.persist, &self.delete)?;
            plan.queue(&collected)?;
            let graph = plan.build()?;
            (graph, plan.finish())
        };
        tracing::debug!(
            commands = graph.len(),
            persisted = outcome.persisted.len(),
            deleted = outcome.deleted.len(),
            "Command graph built"
        );

        let order = graph.order()?;
        let previous = outcome.register(heap);
        let commit = if graph.is_empty() {
            Ok(Commit::Complete(Execution::default()))
        } else {
            graph.execute(&order, self.orm.sources())
        };

        let execution = match commit {
            Ok(Commit::Complete(execution)) => execution,
            Ok(Commit::Partial {
                execution,
                committed,
                failed,
                source,
            }) => {
                let durable = outcome.within(self.orm, heap, &committed)?;
                for (id, overrides) in previous {
                    if !durable.contains(id) {
                        heap.restore_overrides(id, overrides);
                    }
                }
                durable.apply(self.orm, heap, execution.written)?;
                return Err(Error::PartialCommit {
                    committed,
                    failed,
                    source: Box::new(source),
                });
            }
            Err(err) => {
                for (id, overrides) in previous {
                    heap.restore_overrides(id, overrides);
                }
                return Err(err);
            }
        };

        outcome.apply(self.orm, heap, execution.written)?;
        self.persist.clear();
        self.delete.clear();

        let summary = execution.summary;
        tracing::info!(
            inserted = summary.inserted,
            updated = summary.updated,
            deleted = summary.deleted,
            "Transaction committed"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::OrmConfig;
    use rowgraph_core::{RelationDefinition, Schema, SchemaEntry, Sources};
    use rowgraph_memory::{MemoryConnection, Table};
    use std::sync::Arc;

    fn setup() -> (Orm, Arc<MemoryConnection>) {
        let schema = Schema::new([
            SchemaEntry::new("user", "user")
                .columns(["id", "email"])
                .relation(RelationDefinition::has_many("comments", "comment")),
            SchemaEntry::new("comment", "comment")
                .columns(["id", "user_id", "message"])
                .relation(RelationDefinition::belongs_to("user", "user")),
        ])
        .unwrap();
        let db = Arc::new(MemoryConnection::new());
        db.create_table(Table::new("user").serial("id").columns(["email"]));
        db.create_table(Table::new("comment").serial("id").columns(["user_id", "message"]));
        let sources = Sources::new().with("default", db.clone());
        let orm = Orm::new(schema, sources)
            .unwrap()
            .with_config(OrmConfig::default());
        (orm, db)
    }

    #[test]
    fn test_new_graph_inserts_parent_first() {
        let (orm, db) = setup();
        let mut heap = Heap::new();
        let user = heap.create(Entity::new("user").with("email", "a@b.c"));
        let comment = heap.create(Entity::new("comment").with("message", "hi"));
        heap.entity_mut(user).unwrap().push("comments", comment);

        let summary = Transaction::new(&orm).persist(user).run(&mut heap).unwrap();
        assert_eq!(summary.inserted, 2);

        let user_id = heap.entity(user).unwrap().get("id").cloned().unwrap();
        assert!(!user_id.is_null());
        assert!(heap.entity(comment).unwrap().get("user_id").unwrap().same_as(&user_id));
        assert_eq!(heap.state_of(comment).unwrap().status, Status::Managed);
        assert_eq!(db.rows("comment").len(), 1);

        db.reset_log();
        let again = Transaction::new(&orm).persist(user).run(&mut heap).unwrap();
        assert_eq!(again.total(), 0);
        assert_eq!(db.write_count(), 0);
    }

    #[test]
    fn test_delete_wins_over_persist() {
        let (orm, db) = setup();
        let mut heap = Heap::new();
        let user = heap.create(Entity::new("user").with("email", "a@b.c"));
        Transaction::new(&orm).persist(user).run(&mut heap).unwrap();

        let summary = Transaction::new(&orm)
            .persist(user)
            .delete(user)
            .run(&mut heap)
            .unwrap();
        assert_eq!(summary.deleted, 1);
        assert_eq!(heap.state_of(user).unwrap().status, Status::Deleted);
        assert!(db.rows("user").is_empty());
    }

    #[test]
    fn test_unknown_entity_is_an_error() {
        let (orm, _db) = setup();
        let mut heap = Heap::new();
        let err = Transaction::new(&orm)
            .persist(EntityId::new(42))
            .run(&mut heap)
            .unwrap_err();
        assert!(matches!(err, Error::Custom(_)));
    }
}
