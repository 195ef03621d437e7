//! Identity heap, relation loading and unit of work for rowgraph.
//!
//! `rowgraph-session` is the engine layer. It sits between the schema and
//! statement model of `rowgraph-core` and a [`Connection`](rowgraph_core::Connection)
//! implementation.
//!
//! # Role In The Architecture
//!
//! - **Identity heap**: one live entity per role and primary key ([`Heap`]).
//! - **Selector**: eager loading of relation paths without N+1 queries and
//!   without duplicating shared sub-objects ([`Selector`]).
//! - **Relation resolvers**: one strategy per relation kind ([`Resolver`]).
//! - **Unit of work**: diffing against heap snapshots and executing an
//!   ordered command graph inside one transaction per database
//!   ([`Transaction`]).
//!
//! # Design Philosophy
//!
//! - **Explicit context**: the heap is passed to every fetch and run; there
//!   is no global identity map.
//! - **Handles, not references**: entities refer to each other by
//!   [`EntityId`](rowgraph_core::EntityId), so cyclic graphs need no shared
//!   ownership.
//! - **No writes for unchanged data**: persisting an unmodified graph issues
//!   no statements.
//!
//! # Example
//!
//! ```ignore
//! let orm = Orm::new(schema, sources)?;
//! let mut heap = Heap::new();
//!
//! let users = Selector::new(&orm, "user")?.load("comments")?.fetch_all(&mut heap)?;
//! heap.entity_mut(users[0]).unwrap().set("email", "new@example.com");
//!
//! Transaction::new(&orm).persist(users[0]).run(&mut heap)?;
//! ```

#![allow(clippy::result_large_err)]

pub mod change_tracker;
pub mod config;
mod flush;
pub mod identity_map;
mod loader;
pub mod orm;
pub mod relation;
pub mod selector;
pub mod unit_of_work;

pub use config::OrmConfig;
pub use flush::RunSummary;
pub use identity_map::{EntityState, Heap, Status};
pub use orm::Orm;
pub use relation::{FetchMode, Resolver};
pub use selector::{LoadOptions, Selector};
pub use unit_of_work::Transaction;
