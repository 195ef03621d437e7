//! In-memory connection implementation.
//!
//! All state lives behind one `Mutex`, so a connection can be shared between
//! the loader and a running transaction through an `Arc`.

#![allow(clippy::result_large_err)] // Error type is defined in rowgraph-core

use crate::query;
use crate::table::{Table, TableData};
use rowgraph_core::{
    Connection, Delete, Error, Insert, QueryErrorKind, Result, Row, Select, Statement, Update,
    Value,
};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// A failure to inject into upcoming writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// Every write to the named table fails.
    Table(String),
    /// The n-th write (1-based) after the fault is installed fails.
    NthWrite(usize),
    /// Writes succeed but the commit fails, discarding the transaction.
    Commit,
}

#[derive(Debug, Default)]
struct MemoryInner {
    tables: BTreeMap<String, TableData>,
    /// Table state at `begin`; `Some` while a transaction is open.
    snapshot: Option<BTreeMap<String, TableData>>,
    log: Vec<Statement>,
    fault: Option<Fault>,
    writes_since_fault: usize,
}

impl MemoryInner {
    fn table_mut(&mut self, name: &str) -> Result<&mut TableData> {
        self.tables.get_mut(name).ok_or_else(|| {
            Error::query(
                QueryErrorKind::NotFound,
                Some(name),
                format!("no such table: {name}"),
            )
        })
    }

    fn check_fault(&mut self, table: &str) -> Result<()> {
        let Some(fault) = &self.fault else {
            return Ok(());
        };
        self.writes_since_fault += 1;
        let fails = match fault {
            Fault::Table(name) => name == table,
            Fault::NthWrite(n) => *n == self.writes_since_fault,
            Fault::Commit => false,
        };
        if fails {
            tracing::debug!(table = %table, fault = ?fault, "Injected write failure");
            return Err(Error::query(
                QueryErrorKind::Database,
                Some(table),
                "injected failure",
            ));
        }
        Ok(())
    }
}

/// A database held in process memory.
#[derive(Debug)]
pub struct MemoryConnection {
    name: String,
    inner: Mutex<MemoryInner>,
}

impl Default for MemoryConnection {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryConnection {
    pub fn new() -> Self {
        Self::named("memory")
    }

    /// A connection whose log lines carry `name`.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: Mutex::new(MemoryInner::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn lock(&self) -> MutexGuard<'_, MemoryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create (or replace) a table.
    pub fn create_table(&self, table: Table) {
        tracing::debug!(db = %self.name, table = %table.name(), "Creating table");
        self.lock()
            .tables
            .insert(table.name().to_string(), TableData::new(table));
    }

    /// Insert a row outside the statement log, returning the stored row.
    pub fn insert_row<I, S>(&self, table: &str, pairs: I) -> Result<Row>
    where
        I: IntoIterator<Item = (S, Value)>,
        S: Into<String>,
    {
        let values: BTreeMap<String, Value> =
            pairs.into_iter().map(|(c, v)| (c.into(), v)).collect();
        let mut inner = self.lock();
        let data = inner.table_mut(table)?;
        let index = data.insert(&values)?;
        Ok(data.to_row(&data.rows[index]))
    }

    /// Current rows of `table` in insertion order; empty for unknown tables.
    pub fn rows(&self, table: &str) -> Vec<Row> {
        let inner = self.lock();
        inner
            .tables
            .get(table)
            .map(|data| data.rows.iter().map(|r| data.to_row(r)).collect())
            .unwrap_or_default()
    }

    /// Every statement executed since the last [`reset_log`](Self::reset_log).
    pub fn statements(&self) -> Vec<Statement> {
        self.lock().log.clone()
    }

    pub fn query_count(&self) -> usize {
        self.lock().log.iter().filter(|s| !s.is_write()).count()
    }

    pub fn write_count(&self) -> usize {
        self.lock().log.iter().filter(|s| s.is_write()).count()
    }

    pub fn reset_log(&self) {
        self.lock().log.clear();
    }

    /// Make upcoming writes fail according to `fault`.
    pub fn fail_on(&self, fault: Fault) {
        let mut inner = self.lock();
        inner.fault = Some(fault);
        inner.writes_since_fault = 0;
    }

    pub fn clear_fault(&self) {
        self.lock().fault = None;
    }

    pub fn in_transaction(&self) -> bool {
        self.lock().snapshot.is_some()
    }
}

impl Connection for MemoryConnection {
    fn select(&self, query: &Select) -> Result<Vec<Row>> {
        let mut inner = self.lock();
        tracing::trace!(db = %self.name, statement = %query, "select");
        inner.log.push(Statement::Select(query.clone()));
        query::run_select(&inner.tables, query)
    }

    fn insert(&self, insert: &Insert) -> Result<Row> {
        let mut inner = self.lock();
        tracing::trace!(db = %self.name, statement = %insert, "insert");
        inner.log.push(Statement::Insert(insert.clone()));
        inner.check_fault(&insert.table)?;
        let data = inner.table_mut(&insert.table)?;
        let index = data.insert(&insert.values)?;
        let stored = data.to_row(&data.rows[index]);
        let returned = insert
            .returning
            .iter()
            .map(|column| {
                stored
                    .get_by_name(column)
                    .map(|value| (column.clone(), value.clone()))
                    .ok_or_else(|| {
                        Error::query(
                            QueryErrorKind::NotFound,
                            Some(&insert.table),
                            format!("no such column: {column}"),
                        )
                    })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Row::from_pairs(returned))
    }

    fn update(&self, update: &Update) -> Result<u64> {
        let mut inner = self.lock();
        tracing::trace!(db = %self.name, statement = %update, "update");
        inner.log.push(Statement::Update(update.clone()));
        inner.check_fault(&update.table)?;
        inner
            .table_mut(&update.table)?
            .update(&update.set, &update.filter)
    }

    fn delete(&self, delete: &Delete) -> Result<u64> {
        let mut inner = self.lock();
        tracing::trace!(db = %self.name, statement = %delete, "delete");
        inner.log.push(Statement::Delete(delete.clone()));
        inner.check_fault(&delete.table)?;
        inner.table_mut(&delete.table)?.delete(&delete.filter)
    }

    fn begin(&self) -> Result<()> {
        let mut inner = self.lock();
        if inner.snapshot.is_some() {
            return Err(Error::query(
                QueryErrorKind::Transaction,
                None,
                "Already in a transaction",
            ));
        }
        inner.snapshot = Some(inner.tables.clone());
        tracing::debug!(db = %self.name, "BEGIN");
        Ok(())
    }

    fn commit(&self) -> Result<()> {
        let mut inner = self.lock();
        let Some(snapshot) = inner.snapshot.take() else {
            return Err(Error::query(
                QueryErrorKind::Transaction,
                None,
                "Not in a transaction",
            ));
        };
        if inner.fault == Some(Fault::Commit) {
            inner.tables = snapshot;
            tracing::debug!(db = %self.name, "Injected commit failure");
            return Err(Error::query(
                QueryErrorKind::Transaction,
                None,
                "injected commit failure",
            ));
        }
        tracing::debug!(db = %self.name, "COMMIT");
        Ok(())
    }

    fn rollback(&self) -> Result<()> {
        let mut inner = self.lock();
        let Some(snapshot) = inner.snapshot.take() else {
            return Err(Error::query(
                QueryErrorKind::Transaction,
                None,
                "Not in a transaction",
            ));
        };
        inner.tables = snapshot;
        tracing::debug!(db = %self.name, "ROLLBACK");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowgraph_core::{Condition, TableRef};

    fn db() -> MemoryConnection {
        let db = MemoryConnection::new();
        db.create_table(Table::new("user").serial("id").columns(["email"]));
        db
    }

    fn insert(email: &str) -> Insert {
        Insert {
            table: "user".into(),
            values: BTreeMap::from([("email".to_string(), Value::from(email))]),
            returning: vec!["id".into()],
        }
    }

    #[test]
    fn test_insert_returns_serial() {
        let db = db();
        let first = db.insert(&insert("a@x")).unwrap();
        let second = db.insert(&insert("b@x")).unwrap();
        assert_eq!(first.get_by_name("id"), Some(&Value::BigInt(1)));
        assert_eq!(second.get_by_name("id"), Some(&Value::BigInt(2)));
        assert_eq!(second.len(), 1);
        assert_eq!(db.rows("user").len(), 2);
    }

    #[test]
    fn test_rollback_restores_tables() {
        let db = db();
        db.insert_row("user", [("email", Value::from("kept"))]).unwrap();
        db.begin().unwrap();
        assert!(db.in_transaction());
        db.insert(&insert("dropped")).unwrap();
        db.delete(&Delete {
            table: "user".into(),
            filter: Condition::eq("email", "kept"),
        })
        .unwrap();
        db.rollback().unwrap();

        let rows = db.rows("user");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get_by_name("email"), Some(&Value::from("kept")));
        assert!(!db.in_transaction());
    }

    #[test]
    fn test_transaction_misuse() {
        let db = db();
        assert!(db.commit().is_err());
        assert!(db.rollback().is_err());
        db.begin().unwrap();
        assert!(db.begin().is_err());
        db.commit().unwrap();
    }

    #[test]
    fn test_log_counts_queries_and_writes() {
        let db = db();
        db.insert_row("user", [("email", Value::from("seeded"))]).unwrap();
        db.select(&Select::new(TableRef::new("user", "user"))).unwrap();
        db.insert(&insert("a@x")).unwrap();
        db.update(&Update {
            table: "user".into(),
            set: BTreeMap::from([("email".to_string(), Value::from("b@x"))]),
            filter: Condition::eq("id", 2i64),
        })
        .unwrap();
        assert_eq!(db.query_count(), 1);
        assert_eq!(db.write_count(), 2);
        assert!(matches!(db.statements()[0], Statement::Select(_)));
        db.reset_log();
        assert!(db.statements().is_empty());
    }

    #[test]
    fn test_nth_write_fault() {
        let db = db();
        db.fail_on(Fault::NthWrite(2));
        db.insert(&insert("a@x")).unwrap();
        let err = db.insert(&insert("b@x")).unwrap_err();
        assert!(err.to_string().contains("injected"));
        db.insert(&insert("c@x")).unwrap();
        db.clear_fault();
        assert_eq!(db.rows("user").len(), 2);
    }

    #[test]
    fn test_commit_fault_discards_the_transaction() {
        let db = db();
        db.insert(&insert("kept@x")).unwrap();
        db.fail_on(Fault::Commit);
        db.begin().unwrap();
        db.insert(&insert("lost@x")).unwrap();
        let err = db.commit().unwrap_err();
        assert!(matches!(err, Error::Query(ref q) if q.kind == QueryErrorKind::Transaction));
        assert!(!db.in_transaction());
        assert_eq!(db.rows("user").len(), 1);
    }

    #[test]
    fn test_table_fault_only_hits_that_table() {
        let db = db();
        db.create_table(Table::new("comment").serial("id").columns(["message"]));
        db.fail_on(Fault::Table("comment".into()));
        db.insert(&insert("a@x")).unwrap();
        let err = db
            .insert(&Insert {
                table: "comment".into(),
                values: BTreeMap::new(),
                returning: Vec::new(),
            })
            .unwrap_err();
        assert!(err.to_string().contains("comment"));
    }
}
