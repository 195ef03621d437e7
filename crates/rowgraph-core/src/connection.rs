//! Database connection trait and the registry of named connections.
//!
//! - [`Connection`] - executes structured statements and scopes transactions
//! - [`Sources`] - maps a schema database name to its connection

use crate::error::{Error, Result};
use crate::row::Row;
use crate::statement::{Delete, Insert, Select, Update};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// A database connection.
///
/// Methods take `&self`; drivers that keep state use interior mutability so
/// one connection can be shared between the loader and the transaction.
pub trait Connection: Send + Sync {
    /// Execute a query and return all rows, columns named `alias.column`.
    fn select(&self, query: &Select) -> Result<Vec<Row>>;

    /// Insert one row, returning the `returning` columns as a row.
    fn insert(&self, insert: &Insert) -> Result<Row>;

    /// Update matching rows, returning the number affected.
    fn update(&self, update: &Update) -> Result<u64>;

    /// Delete matching rows, returning the number affected.
    fn delete(&self, delete: &Delete) -> Result<u64>;

    /// Open a transaction.
    fn begin(&self) -> Result<()>;

    /// Commit the open transaction.
    fn commit(&self) -> Result<()>;

    /// Roll back the open transaction.
    fn rollback(&self) -> Result<()>;
}

impl<C: Connection + ?Sized> Connection for Arc<C> {
    fn select(&self, query: &Select) -> Result<Vec<Row>> {
        (**self).select(query)
    }

    fn insert(&self, insert: &Insert) -> Result<Row> {
        (**self).insert(insert)
    }

    fn update(&self, update: &Update) -> Result<u64> {
        (**self).update(update)
    }

    fn delete(&self, delete: &Delete) -> Result<u64> {
        (**self).delete(delete)
    }

    fn begin(&self) -> Result<()> {
        (**self).begin()
    }

    fn commit(&self) -> Result<()> {
        (**self).commit()
    }

    fn rollback(&self) -> Result<()> {
        (**self).rollback()
    }
}

/// Named connections, one per schema database.
#[derive(Clone, Default)]
pub struct Sources {
    connections: BTreeMap<String, Arc<dyn Connection>>,
}

impl Sources {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `connection` under `database`.
    #[must_use]
    pub fn with(mut self, database: impl Into<String>, connection: Arc<dyn Connection>) -> Self {
        self.insert(database, connection);
        self
    }

    pub fn insert(&mut self, database: impl Into<String>, connection: Arc<dyn Connection>) {
        self.connections.insert(database.into(), connection);
    }

    /// Connection for `database`, or `UnknownDatabase`.
    #[allow(clippy::result_large_err)]
    pub fn get(&self, database: &str) -> Result<&Arc<dyn Connection>> {
        self.connections
            .get(database)
            .ok_or_else(|| Error::UnknownDatabase(database.to_string()))
    }

    pub fn contains(&self, database: &str) -> bool {
        self.connections.contains_key(database)
    }

    /// Registered database names in sorted order.
    pub fn databases(&self) -> impl Iterator<Item = &str> {
        self.connections.keys().map(String::as_str)
    }
}

impl fmt::Debug for Sources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sources")
            .field("databases", &self.connections.keys().collect::<Vec<_>>())
            .finish()
    }
}
