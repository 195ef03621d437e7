//! Core types and traits for rowgraph.
//!
//! This crate provides the data model shared by the session layer and drivers:
//!
//! - [`Value`] and [`Key`] for dynamically typed column values and identities
//! - [`Schema`] for the role → table mapping with relation metadata
//! - [`Entity`] for schema-less objects stored in a heap arena
//! - [`Connection`] for drivers executing structured [`statement`]s
//! - [`Mapper`] for row ↔ entity conversion

pub mod connection;
pub mod entity;
pub mod error;
pub mod mapper;
pub mod relation;
pub mod row;
pub mod schema;
pub mod statement;
pub mod value;

pub use connection::{Connection, Sources};
pub use entity::{Entity, EntityId, Nested, Record, RelationValue};
pub use error::{Error, QueryError, QueryErrorKind, Result, TypeError};
pub use mapper::{EntityMapper, Mapper};
pub use relation::{FetchMethod, IntoKeyColumns, PivotTable, RelationDefinition, RelationKind};
pub use row::{ColumnInfo, Row};
pub use schema::{GeneratedField, Role, Schema, SchemaEntry, Typecast};
pub use statement::{
    ColumnRef, CompareOp, Condition, Delete, Insert, Join, JoinType, OrderBy, OrderDirection,
    Select, Statement, TableRef, Update,
};
pub use value::{Key, Value};
