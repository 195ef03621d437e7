//! Error types for rowgraph operations.
//!
//! Configuration errors (`UnknownRole`, `UnknownRelation`,
//! `CrossDatabaseRelation`, `SchemaMismatch`, `InvalidSchema`) indicate a
//! programming error and are never recovered locally. `CommandCycle` is raised
//! before any statement runs. `TransactionFailed` is only produced after the
//! rollback has been issued. `PartialCommit` reports a run spanning several
//! databases where some committed before another failed to; the committed
//! part stays written.

use std::fmt;

/// The primary error type for all rowgraph operations.
#[derive(Debug)]
pub enum Error {
    /// No schema entry exists for the role.
    UnknownRole(String),
    /// A load path names a relation the role does not declare.
    UnknownRelation {
        /// Role the relation was looked up on.
        role: String,
        /// Relation name that was not found.
        relation: String,
    },
    /// A relation that must execute inside one database spans two.
    CrossDatabaseRelation {
        /// Owner role.
        role: String,
        /// Relation name.
        relation: String,
        /// Database of the owner (or pivot) side.
        from: String,
        /// Database of the target side.
        to: String,
    },
    /// A relation key is absent from the schema column list.
    SchemaMismatch {
        /// Role whose schema lacks the column.
        role: String,
        /// Missing key column.
        key: String,
        /// Relation being compiled.
        relation: String,
    },
    /// Structural schema problem (duplicate role, bad identifier, ...).
    InvalidSchema(String),
    /// Command graph contains a dependency cycle that cannot be split.
    CommandCycle {
        /// Roles (or pivot tables) of the commands left in the cycle.
        members: Vec<String>,
    },
    /// Statement execution failed; the transaction was rolled back.
    TransactionFailed {
        /// Underlying driver error.
        source: Box<Error>,
    },
    /// Commit failed on one database after others had committed.
    PartialCommit {
        /// Databases whose writes are durable.
        committed: Vec<String>,
        /// Database whose commit failed; it and every later one rolled back.
        failed: String,
        /// Driver error of the failed commit.
        source: Box<Error>,
    },
    /// No connection registered for a database name.
    UnknownDatabase(String),
    /// Query execution errors reported by a driver
    Query(QueryError),
    /// Type conversion errors
    Type(TypeError),
    /// Custom error with message
    Custom(String),
}

#[derive(Debug)]
pub struct QueryError {
    pub kind: QueryErrorKind,
    pub table: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryErrorKind {
    /// Constraint violation (unique, not null, ...)
    Constraint,
    /// Table or column not found
    NotFound,
    /// Transaction state misuse (commit without begin, ...)
    Transaction,
    /// Other database error
    Database,
}

#[derive(Debug)]
pub struct TypeError {
    pub expected: &'static str,
    pub actual: String,
    pub column: Option<String>,
}

impl Error {
    /// Is this a configuration-time error (schema or load path)?
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Error::UnknownRole(_)
                | Error::UnknownRelation { .. }
                | Error::CrossDatabaseRelation { .. }
                | Error::SchemaMismatch { .. }
                | Error::InvalidSchema(_)
                | Error::UnknownDatabase(_)
        )
    }

    /// Wrap a driver error raised while a transaction was open.
    pub fn transaction_failed(source: Error) -> Self {
        match source {
            already @ Error::TransactionFailed { .. } => already,
            other => Error::TransactionFailed {
                source: Box::new(other),
            },
        }
    }

    /// Shortcut for a driver-side query error.
    pub fn query(kind: QueryErrorKind, table: Option<&str>, message: impl Into<String>) -> Self {
        Error::Query(QueryError {
            kind,
            table: table.map(str::to_string),
            message: message.into(),
        })
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::UnknownRole(role) => write!(f, "Unknown role '{}'", role),
            Error::UnknownRelation { role, relation } => {
                write!(f, "Undefined relation '{}' on role '{}'", relation, role)
            }
            Error::CrossDatabaseRelation {
                role,
                relation,
                from,
                to,
            } => write!(
                f,
                "Relation '{}.{}' cannot join across databases '{}' and '{}'",
                role, relation, from, to
            ),
            Error::SchemaMismatch {
                role,
                key,
                relation,
            } => write!(
                f,
                "Relation '{}' references key '{}' missing from schema of role '{}'",
                relation, key, role
            ),
            Error::InvalidSchema(msg) => write!(f, "Invalid schema: {}", msg),
            Error::CommandCycle { members } => {
                write!(f, "Unresolvable command cycle: {}", members.join(" -> "))
            }
            Error::TransactionFailed { source } => {
                write!(f, "Transaction failed and was rolled back: {}", source)
            }
            Error::PartialCommit {
                committed,
                failed,
                source,
            } => write!(
                f,
                "Commit failed on '{}' after '{}' committed: {}",
                failed,
                committed.join("', '"),
                source
            ),
            Error::UnknownDatabase(name) => write!(f, "No connection for database '{}'", name),
            Error::Query(e) => write!(f, "{}", e),
            Error::Type(e) => write!(f, "{}", e),
            Error::Custom(msg) => write!(f, "{}", msg),
        }
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.table {
            Some(table) => write!(f, "Query error on '{}': {}", table, self.message),
            None => write!(f, "Query error: {}", self.message),
        }
    }
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(col) = &self.column {
            write!(
                f,
                "Type error in column '{}': expected {}, found {}",
                col, self.expected, self.actual
            )
        } else {
            write!(
                f,
                "Type error: expected {}, found {}",
                self.expected, self.actual
            )
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::TransactionFailed { source } | Error::PartialCommit { source, .. } => {
                Some(source.as_ref())
            }
            Error::Query(e) => Some(e),
            Error::Type(e) => Some(e),
            _ => None,
        }
    }
}

impl std::error::Error for QueryError {}

impl std::error::Error for TypeError {}

impl From<QueryError> for Error {
    fn from(err: QueryError) -> Self {
        Error::Query(err)
    }
}

impl From<TypeError> for Error {
    fn from(err: TypeError) -> Self {
        Error::Type(err)
    }
}

/// Result type alias for rowgraph operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_unknown_relation_names_role_and_relation() {
        let err = Error::UnknownRelation {
            role: "user".into(),
            relation: "friends".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("user"));
        assert!(msg.contains("friends"));
        assert!(err.is_configuration());
    }

    #[test]
    fn test_transaction_failed_exposes_source() {
        let err = Error::transaction_failed(Error::query(
            QueryErrorKind::Constraint,
            Some("comment"),
            "NOT NULL constraint failed",
        ));
        assert!(!err.is_configuration());
        let source = err.source().expect("source");
        assert!(source.to_string().contains("comment"));
    }

    #[test]
    fn test_transaction_failed_does_not_double_wrap() {
        let inner = Error::transaction_failed(Error::Custom("boom".into()));
        let outer = Error::transaction_failed(inner);
        match outer {
            Error::TransactionFailed { source } => {
                assert!(matches!(*source, Error::Custom(_)));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_partial_commit_names_both_sides() {
        let err = Error::PartialCommit {
            committed: vec!["default".into()],
            failed: "archive".into(),
            source: Box::new(Error::Custom("disk full".into())),
        };
        assert_eq!(
            err.to_string(),
            "Commit failed on 'archive' after 'default' committed: disk full"
        );
        assert!(err.source().is_some());
    }

    #[test]
    fn test_command_cycle_display() {
        let err = Error::CommandCycle {
            members: vec!["user".into(), "profile".into()],
        };
        assert_eq!(err.to_string(), "Unresolvable command cycle: user -> profile");
    }
}
