//! In-memory driver for rowgraph.
//!
//! This crate provides a [`Connection`](rowgraph_core::Connection) that keeps
//! its tables in process memory and evaluates structured statements directly.
//! It is the driver the session layer is tested against.
//!
//! # Features
//!
//! - Inner and left joins with morph conditions
//! - Tuple `IN`, comparisons, `IS NULL` and boolean filters
//! - Serial columns and `RETURNING`
//! - NOT NULL constraints
//! - Snapshot transactions with rollback
//! - A statement log for counting queries and writes
//! - Fault injection for rollback tests
//!
//! # Example
//!
//! ```rust,ignore
//! use rowgraph_memory::{MemoryConnection, Table};
//!
//! let db = MemoryConnection::new();
//! db.create_table(Table::new("user").serial("id").columns(["email"]));
//! db.insert_row("user", [("email", Value::from("a@b.c"))])?;
//! assert_eq!(db.rows("user").len(), 1);
//! ```
//!
//! # Null Semantics
//!
//! Comparisons follow SQL: `NULL = NULL` is false, so joins and equality
//! filters never match on a NULL key. Use `Condition::IsNull` to test for
//! missing values.

pub mod connection;
mod eval;
mod query;
pub mod table;

pub use connection::{Fault, MemoryConnection};
pub use table::Table;
