//! Command graph for one transaction run.
//!
//! Every write of a run becomes a [`Command`]. Values a command needs from
//! another command (a generated key, a key of a row inserted in the same
//! run) are [`Deferred`] slots resolved just before the command executes.
//! Deferred slots also induce the dependency edges:
//!
//! - a strong slot adds `producer -> consumer`
//! - a weak slot (refers-to) adds the same edge unless it would close a
//!   cycle, in which case the column is written by a follow-up update that
//!   runs after both rows exist
//!
//! Commands execute in topological order, ties broken by registration
//! order, inside one transaction per involved database. Databases commit
//! one after another in name order, so a commit failing after another
//! database committed leaves a [`Commit::Partial`] result.

use rowgraph_core::{
    Condition, Connection, Delete, EntityId, Error, Insert, Result, Sources, Update, Value,
};
use serde::Serialize;
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap, HashMap};
use std::sync::Arc;

/// Column value known only once another entity's row is written.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Deferred {
    pub entity: EntityId,
    pub column: String,
    /// The consumer may be written first and patched afterwards.
    pub weak: bool,
}

/// A literal value or a promise of one.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Slot {
    Value(Value),
    Deferred(Deferred),
}

impl From<Value> for Slot {
    fn from(value: Value) -> Self {
        Slot::Value(value)
    }
}

impl Slot {
    fn deferred(&self) -> Option<&Deferred> {
        match self {
            Slot::Deferred(d) => Some(d),
            Slot::Value(_) => None,
        }
    }

    fn resolve(&self, written: &HashMap<EntityId, BTreeMap<String, Value>>) -> Result<Value> {
        match self {
            Slot::Value(v) => Ok(v.clone()),
            Slot::Deferred(d) => written
                .get(&d.entity)
                .and_then(|row| row.get(&d.column))
                .cloned()
                .ok_or_else(|| {
                    Error::Custom(format!(
                        "value of '{}' for entity {} was not produced by any command",
                        d.column, d.entity
                    ))
                }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PivotKind {
    Insert,
    Delete,
}

/// A pivot-table write queued by a many-to-many resolver.
#[derive(Debug, Clone)]
pub(crate) struct PivotOp {
    pub kind: PivotKind,
    pub database: String,
    pub table: String,
    /// Inserted values, or the equality filter of a delete.
    pub columns: Vec<(String, Slot)>,
    /// Entities whose delete must run after this write.
    pub precedes: Vec<EntityId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CommandKind {
    Insert,
    Update,
    Delete,
}

/// One statement of the run, not yet resolved.
#[derive(Debug, Clone)]
pub(crate) struct Command {
    pub kind: CommandKind,
    pub database: String,
    pub table: String,
    /// Role (or pivot table) reported in cycle errors.
    pub label: String,
    pub entity: Option<EntityId>,
    pub values: BTreeMap<String, Slot>,
    pub filter: Vec<(String, Slot)>,
    /// Address of the written row, used by follow-up updates.
    pub locator: Vec<(String, Slot)>,
    pub returning: Vec<String>,
}

impl Command {
    pub fn new(
        kind: CommandKind,
        database: impl Into<String>,
        table: impl Into<String>,
        label: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            database: database.into(),
            table: table.into(),
            label: label.into(),
            entity: None,
            values: BTreeMap::new(),
            filter: Vec::new(),
            locator: Vec::new(),
            returning: Vec::new(),
        }
    }

    #[must_use]
    pub fn entity(mut self, id: EntityId) -> Self {
        self.entity = Some(id);
        self
    }

    fn slots(&self) -> impl Iterator<Item = &Slot> {
        self.values
            .values()
            .chain(self.filter.iter().map(|(_, slot)| slot))
    }
}

/// Number of rows written by a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
}

impl RunSummary {
    /// Total statements executed.
    pub fn total(&self) -> usize {
        self.inserted + self.updated + self.deleted
    }
}

/// Result of a committed execution.
#[derive(Debug, Default)]
pub(crate) struct Execution {
    /// Values written per entity, including values read back from inserts.
    pub written: HashMap<EntityId, BTreeMap<String, Value>>,
    pub summary: RunSummary,
}

/// How the commit phase of an execution ended.
#[derive(Debug)]
pub(crate) enum Commit {
    /// Every involved database committed.
    Complete(Execution),
    /// `committed` are durable; `failed` and the databases after it rolled back.
    Partial {
        execution: Execution,
        committed: Vec<String>,
        failed: String,
        source: Error,
    },
}

/// Commands plus dependency edges.
#[derive(Debug, Default)]
pub(crate) struct CommandGraph {
    commands: Vec<Command>,
    edges: Vec<BTreeSet<usize>>,
    inserts: HashMap<EntityId, usize>,
    writes: HashMap<EntityId, usize>,
}

impl CommandGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, command: Command) -> usize {
        let index = self.commands.len();
        if let Some(id) = command.entity {
            self.writes.entry(id).or_insert(index);
            if command.kind == CommandKind::Insert {
                self.inserts.entry(id).or_insert(index);
            }
        }
        self.commands.push(command);
        self.edges.push(BTreeSet::new());
        index
    }

    /// `from` must execute before `to`.
    pub fn edge(&mut self, from: usize, to: usize) {
        self.edges[from].insert(to);
    }

    /// The command writing the row of `id`, if any.
    pub fn write_of(&self, id: EntityId) -> Option<usize> {
        self.writes.get(&id).copied()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Roll back `open` in reverse begin order; failures are only logged.
fn roll_back(open: &[(&str, &Arc<dyn Connection>)]) {
    for (database, connection) in open.iter().rev() {
        if let Err(err) = connection.rollback() {
            tracing::warn!(database, error = %err, "Rollback failed");
        }
    }
}

#[cfg(test)]
    fn command(&self, index: usize) -> &Command {
        &self.commands[index]
    }

    /// Add the edges induced by deferred slots.
    ///
    /// Strong slots are wired first so weak ones see the full graph when
    /// deciding whether to split.
    pub fn link(&mut self) {
        let count = self.commands.len();
        for index in 0..count {
            let producers: Vec<usize> = self.commands[index]
                .slots()
                .filter_map(Slot::deferred)
                .filter(|d| !d.weak)
                .filter_map(|d| self.inserts.get(&d.entity).copied())
                .collect();
            for producer in producers {
                self.edge(producer, index);
            }
        }

        for index in 0..count {
            let weak: Vec<(String, Deferred)> = self.commands[index]
                .values
                .iter()
                .filter_map(|(column, slot)| match slot {
                    Slot::Deferred(d) if d.weak => Some((column.clone(), d.clone())),
                    _ => None,
                })
                .collect();
            for (column, deferred) in weak {
                let Some(&producer) = self.inserts.get(&deferred.entity) else {
                    continue;
                };
                if self.reaches(index, producer) {
                    self.split(index, column, deferred, producer);
                } else {
                    self.edge(producer, index);
                }
            }
        }
    }

    /// Write `column` of command `index` with a follow-up update instead.
    fn split(&mut self, index: usize, column: String, deferred: Deferred, producer: usize) {
        let command = &mut self.commands[index];
        match command.kind {
            CommandKind::Insert => {
                command.values.insert(column.clone(), Slot::Value(Value::Null));
            }
            CommandKind::Update | CommandKind::Delete => {
                command.values.remove(&column);
            }
        }

        let mut follow = Command::new(
            CommandKind::Update,
            command.database.as_str(),
            command.table.as_str(),
            command.label.as_str(),
        );
        follow.entity = command.entity;
        follow.filter = command.locator.clone();
        follow.locator = command.locator.clone();
        tracing::debug!(
            label = %follow.label,
            column = %column,
            "Link split into follow-up update"
        );
        follow.values.insert(
            column,
            Slot::Deferred(Deferred {
                weak: false,
                ..deferred
            }),
        );

        let follow_index = self.push(follow);
        self.edge(index, follow_index);
        self.edge(producer, follow_index);
    }

    fn reaches(&self, from: usize, to: usize) -> bool {
        let mut seen = vec![false; self.commands.len()];
        let mut stack = vec![from];
        while let Some(node) = stack.pop() {
            if node == to {
                return true;
            }
            if std::mem::replace(&mut seen[node], true) {
                continue;
            }
            stack.extend(self.edges[node].iter().copied());
        }
        false
    }

    /// Topological order, lowest registration index first among ready commands.
    pub fn order(&self) -> Result<Vec<usize>> {
        let count = self.commands.len();
        let mut indegree = vec![0usize; count];
        for targets in &self.edges {
            for &target in targets {
                indegree[target] += 1;
            }
        }

        let mut ready: BinaryHeap<Reverse<usize>> = (0..count)
            .filter(|&i| indegree[i] == 0)
            .map(Reverse)
            .collect();
        let mut order = Vec::with_capacity(count);
        while let Some(Reverse(index)) = ready.pop() {
            order.push(index);
            for &target in &self.edges[index] {
                indegree[target] -= 1;
                if indegree[target] == 0 {
                    ready.push(Reverse(target));
                }
            }
        }

        if order.len() < count {
            let members: Vec<String> = (0..count)
                .filter(|&i| indegree[i] > 0)
                .map(|i| self.commands[i].label.clone())
                .collect();
            tracing::warn!(members = ?members, "Command cycle detected");
            return Err(Error::CommandCycle { members });
        }
        Ok(order)
    }

    /// Execute `order` inside one transaction per involved database.
    ///
    /// Every involved database is begun up front. A failing statement, or a
    /// failing first commit, rolls all of them back and surfaces as
    /// `TransactionFailed`.
    #[tracing::instrument(level = "debug", skip(self, order, sources), fields(commands = order.len()))]
    pub fn execute(&self, order: &[usize], sources: &Sources) -> Result<Commit> {
        let mut connections: BTreeMap<&str, &Arc<dyn Connection>> = BTreeMap::new();
        for command in &self.commands {
            if !connections.contains_key(command.database.as_str()) {
                connections.insert(command.database.as_str(), sources.get(&command.database)?);
            }
        }

        let mut open: Vec<(&str, &Arc<dyn Connection>)> = Vec::new();
        let execution = match self.apply(order, &connections, &mut open) {
            Ok(execution) => execution,
            Err(err) => {
                Self::roll_back(&open);
                tracing::warn!(error = %err, "Transaction rolled back");
                return Err(Error::transaction_failed(err));
            }
        };

        let mut committed: Vec<String> = Vec::new();
        for (index, &(database, connection)) in open.iter().enumerate() {
            if let Err(err) = connection.commit() {
                Self::roll_back(&open[index + 1..]);
                if committed.is_empty() {
                    tracing::warn!(database, error = %err, "Commit failed, transaction rolled back");
                    return Err(Error::transaction_failed(err));
                }
                tracing::error!(
                    database,
                    committed = ?committed,
                    error = %err,
                    "Commit failed after other databases committed"
                );
                return Ok(Commit::Partial {
                    execution,
                    committed,
                    failed: database.to_string(),
                    source: err,
                });
            }
            committed.push(database.to_string());
        }
        Ok(Commit::Complete(execution))
    }

    fn apply<'c>(
        &self,
        order: &[usize],
        connections: &BTreeMap<&'c str, &'c Arc<dyn Connection>>,
        open: &mut Vec<(&'c str, &'c Arc<dyn Connection>)>,
    ) -> Result<Execution> {
        for (&database, &connection) in connections {
            connection.begin()?;
            open.push((database, connection));
        }

        let mut execution = Execution::default();
        for &index in order {
            let command = &self.commands[index];
            let connection: &Arc<dyn Connection> = connections
                .get(command.database.as_str())
                .copied()
                .ok_or_else(|| Error::UnknownDatabase(command.database.clone()))?;
            self.run_command(command, connection, &mut execution)?;
        }
        Ok(execution)
    }

    fn run_command(
        &self,
        command: &Command,
        connection: &dyn Connection,
        execution: &mut Execution,
    ) -> Result<()> {
        let written = &execution.written;
        let values = command
            .values
            .iter()
            .map(|(column, slot)| Ok((column.clone(), slot.resolve(written)?)))
            .collect::<Result<BTreeMap<String, Value>>>()?;
        let filter = command
            .filter
            .iter()
            .map(|(column, slot)| Ok((column.clone(), slot.resolve(written)?)))
            .collect::<Result<Vec<(String, Value)>>>()?;

        match command.kind {
            CommandKind::Insert => {
                let insert = Insert {
                    table: command.table.clone(),
                    values,
                    returning: command.returning.clone(),
                };
                tracing::trace!(statement = %insert, "Executing command");
                let returned = connection.insert(&insert)?;
                if let Some(id) = command.entity {
                    let row = execution.written.entry(id).or_default();
                    row.extend(insert.values);
                    for (column, value) in returned.iter() {
                        row.insert(column.to_string(), value.clone());
                    }
                }
                execution.summary.inserted += 1;
            }
            CommandKind::Update => {
                if values.is_empty() {
                    return Ok(());
                }
                let update = Update {
                    table: command.table.clone(),
                    set: values,
                    filter: Condition::all_eq(filter),
                };
                tracing::trace!(statement = %update, "Executing command");
                connection.update(&update)?;
                if let Some(id) = command.entity {
                    execution.written.entry(id).or_default().extend(update.set);
                }
                execution.summary.updated += 1;
            }
            CommandKind::Delete => {
                let delete = Delete {
                    table: command.table.clone(),
                    filter: Condition::all_eq(filter),
                };
                tracing::trace!(statement = %delete, "Executing command");
                connection.delete(&delete)?;
                execution.summary.deleted += 1;
            }
        }
        Ok(())
    }
}
