//! rowgraph - identity-mapped entity graphs over relational databases.
//!
//! rowgraph loads rows into a per-session [`Heap`], wires them into an
//! entity graph through declared relations, and writes the graph back as
//! one ordered set of statements inside a transaction per database:
//!
//! - A [`Schema`] maps roles to tables and declares relations between them
//! - A [`Selector`] fetches root entities with eager-loaded relation paths
//! - A [`Transaction`] diffs the graph against the last persisted state and
//!   emits only the writes that changed
//!
//! # Quick Start
//!
//! ```ignore
//! use rowgraph::prelude::*;
//! use std::sync::Arc;
//!
//! let schema = Schema::new([
//!     SchemaEntry::new("user", "user")
//!         .columns(["id", "email"])
//!         .relation(RelationDefinition::has_many("comments", "comment")),
//!     SchemaEntry::new("comment", "comment").columns(["id", "user_id", "message"]),
//! ])?;
//!
//! let db = Arc::new(MemoryConnection::new());
//! db.create_table(Table::new("user").serial("id").columns(["email"]));
//! db.create_table(Table::new("comment").serial("id").columns(["user_id", "message"]));
//! let orm = Orm::new(schema, Sources::new().with("default", db))?;
//!
//! let mut heap = Heap::new();
//! let user = heap.create(Entity::new("user").with("email", "hello@world.com"));
//! let comment = heap.create(Entity::new("comment").with("message", "first"));
//! heap.entity_mut(user).unwrap().push("comments", comment);
//!
//! // Inserts the user, then the comment with the generated user id.
//! Transaction::new(&orm).persist(user).run(&mut heap)?;
//!
//! let mut fresh = Heap::new();
//! let users = Selector::new(&orm, "user")?
//!     .load("comments")?
//!     .fetch_all(&mut fresh)?;
//! ```
//!
//! # Crates
//!
//! - `rowgraph-core`: values, schema, statements, the `Connection` and
//!   `Mapper` traits
//! - `rowgraph-session`: heap, resolvers, selector and unit of work
//! - `rowgraph-memory`: in-memory driver used for tests and prototyping

pub use rowgraph_core::{
    ColumnRef, CompareOp, Condition, Connection, Delete, Entity, EntityId, EntityMapper, Error,
    FetchMethod, GeneratedField, Insert, IntoKeyColumns, Join, JoinType, Key, Mapper, Nested,
    OrderBy, OrderDirection, PivotTable, QueryError, QueryErrorKind, Record, RelationDefinition,
    RelationKind, RelationValue, Result, Role, Row, Schema, SchemaEntry, Select, Sources,
    Statement, TableRef, TypeError, Typecast, Update, Value,
};

pub use rowgraph_session::{
    EntityState, FetchMode, Heap, LoadOptions, Orm, OrmConfig, Resolver, RunSummary, Selector,
    Status, Transaction,
};

pub use rowgraph_memory::{Fault, MemoryConnection, Table};

/// Change detection helpers.
pub mod change_tracker {
    pub use rowgraph_session::change_tracker::{changed_columns, current_values};
}

/// Commonly used types.
pub mod prelude {
    pub use crate::{
        Condition, Entity, EntityId, Error, FetchMethod, GeneratedField, Heap, Key, LoadOptions,
        MemoryConnection, Orm, OrmConfig, OrderDirection, PivotTable, Record, RelationDefinition,
        RelationValue, Result, Schema, SchemaEntry, Selector, Sources, Status, Table, Transaction,
        Value,
    };
}
