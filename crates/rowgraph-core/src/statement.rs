//! Structured statements handed to drivers.
//!
//! The engine never concatenates SQL. It builds these values and lets each
//! [`Connection`](crate::Connection) execute them; the `Display` impls render
//! an SQL-like form for logs only.

use crate::value::Value;
use std::collections::BTreeMap;
use std::fmt;

/// A table in the FROM or JOIN position.
#[derive(Debug, Clone, PartialEq)]
pub struct TableRef {
    pub table: String,
    pub alias: String,
}

impl TableRef {
    pub fn new(table: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            alias: alias.into(),
        }
    }
}

/// A selected column. Result rows name it `alias.column`.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnRef {
    pub alias: String,
    pub column: String,
}

impl ColumnRef {
    pub fn new(alias: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            column: column.into(),
        }
    }

    /// Qualified name (`alias.column`).
    pub fn qualified(&self) -> String {
        format!("{}.{}", self.alias, self.column)
    }
}

/// Types of joins the loader emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    Inner,
    Left,
}

impl JoinType {
    /// Get the SQL keyword for this join type.
    pub const fn as_str(&self) -> &'static str {
        match self {
            JoinType::Inner => "INNER JOIN",
            JoinType::Left => "LEFT JOIN",
        }
    }
}

/// A JOIN clause.
#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub join_type: JoinType,
    pub table: TableRef,
    /// Equality pairs of qualified columns: `(joined, existing)`.
    pub on: Vec<(String, String)>,
    /// Extra constant conditions (morph discriminators).
    pub conditions: Vec<Condition>,
}

impl Join {
    pub fn left(table: TableRef) -> Self {
        Self {
            join_type: JoinType::Left,
            table,
            on: Vec::new(),
            conditions: Vec::new(),
        }
    }

    pub fn inner(table: TableRef) -> Self {
        Self {
            join_type: JoinType::Inner,
            table,
            on: Vec::new(),
            conditions: Vec::new(),
        }
    }

    #[must_use]
    pub fn on(mut self, joined: impl Into<String>, existing: impl Into<String>) -> Self {
        self.on.push((joined.into(), existing.into()));
        self
    }

    #[must_use]
    pub fn condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }
}

/// Comparison operators for [`Condition::Compare`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    pub const fn as_str(&self) -> &'static str {
        match self {
            CompareOp::Ne => "<>",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
        }
    }
}

/// A WHERE predicate over (possibly qualified) columns.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Eq(String, Value),
    /// Tuple membership: `(c1, c2) IN ((v1, v2), ...)`.
    In {
        columns: Vec<String>,
        values: Vec<Vec<Value>>,
    },
    IsNull(String),
    Compare {
        column: String,
        op: CompareOp,
        value: Value,
    },
    And(Vec<Condition>),
    Or(Vec<Condition>),
}

impl Condition {
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Condition::Eq(column.into(), value.into())
    }

    pub fn is_null(column: impl Into<String>) -> Self {
        Condition::IsNull(column.into())
    }

    pub fn compare(column: impl Into<String>, op: CompareOp, value: impl Into<Value>) -> Self {
        Condition::Compare {
            column: column.into(),
            op,
            value: value.into(),
        }
    }

    /// Equality on every `(column, value)` pair.
    pub fn all_eq<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, Value)>,
        S: Into<String>,
    {
        let mut parts: Vec<Condition> = pairs
            .into_iter()
            .map(|(c, v)| Condition::Eq(c.into(), v))
            .collect();
        if parts.len() == 1 {
            parts.remove(0)
        } else {
            Condition::And(parts)
        }
    }

    /// Combine with another predicate using AND.
    #[must_use]
    pub fn and(self, other: Condition) -> Self {
        match self {
            Condition::And(mut parts) => {
                parts.push(other);
                Condition::And(parts)
            }
            first => Condition::And(vec![first, other]),
        }
    }

    /// Prefix every bare column with `alias`; qualified columns are kept.
    #[must_use]
    pub fn qualified(self, alias: &str) -> Self {
        let qualify = |column: String| {
            if column.contains('.') {
                column
            } else {
                format!("{alias}.{column}")
            }
        };
        match self {
            Condition::Eq(column, value) => Condition::Eq(qualify(column), value),
            Condition::In { columns, values } => Condition::In {
                columns: columns.into_iter().map(qualify).collect(),
                values,
            },
            Condition::IsNull(column) => Condition::IsNull(qualify(column)),
            Condition::Compare { column, op, value } => Condition::Compare {
                column: qualify(column),
                op,
                value,
            },
            Condition::And(parts) => {
                Condition::And(parts.into_iter().map(|p| p.qualified(alias)).collect())
            }
            Condition::Or(parts) => {
                Condition::Or(parts.into_iter().map(|p| p.qualified(alias)).collect())
            }
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::Eq(c, _) => write!(f, "{c} = ?"),
            Condition::In { columns, values } => {
                let tuple = vec!["?"; columns.len()].join(", ");
                let items = vec![format!("({tuple})"); values.len()].join(", ");
                write!(f, "({}) IN ({items})", columns.join(", "))
            }
            Condition::IsNull(c) => write!(f, "{c} IS NULL"),
            Condition::Compare { column, op, .. } => write!(f, "{column} {} ?", op.as_str()),
            Condition::And(parts) => write_joined(f, parts, " AND "),
            Condition::Or(parts) => write_joined(f, parts, " OR "),
        }
    }
}

fn write_joined(f: &mut fmt::Formatter<'_>, parts: &[Condition], sep: &str) -> fmt::Result {
    write!(f, "(")?;
    for (i, p) in parts.iter().enumerate() {
        if i > 0 {
            f.write_str(sep)?;
        }
        write!(f, "{p}")?;
    }
    write!(f, ")")
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrderDirection {
    #[default]
    Asc,
    Desc,
}

/// ORDER BY item over a qualified column.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub column: String,
    pub direction: OrderDirection,
}

impl OrderBy {
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            direction: OrderDirection::Asc,
        }
    }

    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            direction: OrderDirection::Desc,
        }
    }
}

/// A read statement.
#[derive(Debug, Clone, PartialEq)]
pub struct Select {
    pub from: TableRef,
    pub columns: Vec<ColumnRef>,
    pub joins: Vec<Join>,
    pub filter: Option<Condition>,
    pub order_by: Vec<OrderBy>,
    pub limit: Option<u64>,
}

impl Select {
    pub fn new(from: TableRef) -> Self {
        Self {
            from,
            columns: Vec::new(),
            joins: Vec::new(),
            filter: None,
            order_by: Vec::new(),
            limit: None,
        }
    }

    /// Select `columns` of `alias`.
    #[must_use]
    pub fn columns<'a>(mut self, alias: &str, columns: impl IntoIterator<Item = &'a String>) -> Self {
        self.columns
            .extend(columns.into_iter().map(|c| ColumnRef::new(alias, c.as_str())));
        self
    }

    #[must_use]
    pub fn join(mut self, join: Join) -> Self {
        self.joins.push(join);
        self
    }

    /// AND a predicate into the WHERE clause.
    #[must_use]
    pub fn filter(mut self, condition: Condition) -> Self {
        self.filter = Some(match self.filter.take() {
            Some(existing) => existing.and(condition),
            None => condition,
        });
        self
    }

    #[must_use]
    pub fn order_by(mut self, order: OrderBy) -> Self {
        self.order_by.push(order);
        self
    }

    #[must_use]
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }
}

impl fmt::Display for Select {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cols: Vec<String> = self.columns.iter().map(ColumnRef::qualified).collect();
        write!(
            f,
            "SELECT {} FROM {} AS {}",
            cols.join(", "),
            self.from.table,
            self.from.alias
        )?;
        for join in &self.joins {
            write!(
                f,
                " {} {} AS {} ON ",
                join.join_type.as_str(),
                join.table.table,
                join.table.alias
            )?;
            let mut parts: Vec<String> = join.on.iter().map(|(a, b)| format!("{a} = {b}")).collect();
            parts.extend(join.conditions.iter().map(ToString::to_string));
            f.write_str(&parts.join(" AND "))?;
        }
        if let Some(filter) = &self.filter {
            write!(f, " WHERE {filter}")?;
        }
        if !self.order_by.is_empty() {
            let items: Vec<String> = self
                .order_by
                .iter()
                .map(|o| match o.direction {
                    OrderDirection::Asc => format!("{} ASC", o.column),
                    OrderDirection::Desc => format!("{} DESC", o.column),
                })
                .collect();
            write!(f, " ORDER BY {}", items.join(", "))?;
        }
        if let Some(limit) = self.limit {
            write!(f, " LIMIT {limit}")?;
        }
        Ok(())
    }
}

/// INSERT of one row; `returning` lists columns the driver must read back.
#[derive(Debug, Clone, PartialEq)]
pub struct Insert {
    pub table: String,
    pub values: BTreeMap<String, Value>,
    pub returning: Vec<String>,
}

impl fmt::Display for Insert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cols: Vec<&str> = self.values.keys().map(String::as_str).collect();
        write!(
            f,
            "INSERT INTO {} ({}) VALUES ({})",
            self.table,
            cols.join(", "),
            vec!["?"; cols.len()].join(", ")
        )?;
        if !self.returning.is_empty() {
            write!(f, " RETURNING {}", self.returning.join(", "))?;
        }
        Ok(())
    }
}

/// UPDATE of the rows matching `filter`.
#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    pub table: String,
    pub set: BTreeMap<String, Value>,
    pub filter: Condition,
}

impl fmt::Display for Update {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sets: Vec<String> = self.set.keys().map(|c| format!("{c} = ?")).collect();
        write!(
            f,
            "UPDATE {} SET {} WHERE {}",
            self.table,
            sets.join(", "),
            self.filter
        )
    }
}

/// DELETE of the rows matching `filter`.
#[derive(Debug, Clone, PartialEq)]
pub struct Delete {
    pub table: String,
    pub filter: Condition,
}

impl fmt::Display for Delete {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DELETE FROM {} WHERE {}", self.table, self.filter)
    }
}

/// Any statement, as recorded by drivers that keep a log.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Select(Select),
    Insert(Insert),
    Update(Update),
    Delete(Delete),
}

impl Statement {
    /// Does the statement modify data?
    pub fn is_write(&self) -> bool {
        !matches!(self, Statement::Select(_))
    }

    /// Target table (FROM table for selects).
    pub fn table(&self) -> &str {
        match self {
            Statement::Select(s) => &s.from.table,
            Statement::Insert(s) => &s.table,
            Statement::Update(s) => &s.table,
            Statement::Delete(s) => &s.table,
        }
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Statement::Select(s) => s.fmt(f),
            Statement::Insert(s) => s.fmt(f),
            Statement::Update(s) => s.fmt(f),
            Statement::Delete(s) => s.fmt(f),
        }
    }
}
