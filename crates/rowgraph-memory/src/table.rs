//! Table definitions and row storage.

use crate::eval;
use rowgraph_core::{Condition, Error, QueryErrorKind, Result, Row, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Definition of an in-memory table.
#[derive(Debug, Clone)]
pub struct Table {
    name: String,
    columns: Vec<String>,
    serial: Option<String>,
    not_null: BTreeSet<String>,
}

impl Table {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            serial: None,
            not_null: BTreeSet::new(),
        }
    }

    /// Auto-incrementing integer column, assigned on insert when absent.
    #[must_use]
    pub fn serial(mut self, column: impl Into<String>) -> Self {
        let column = column.into();
        self = self.column(column.clone());
        self.serial = Some(column);
        self
    }

    #[must_use]
    pub fn column(mut self, column: impl Into<String>) -> Self {
        let column = column.into();
        if !self.columns.contains(&column) {
            self.columns.push(column);
        }
        self
    }

    #[must_use]
    pub fn columns<I, S>(self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        columns.into_iter().fold(self, Table::column)
    }

    /// Reject NULL in `column` on insert and update.
    #[must_use]
    pub fn not_null(mut self, column: impl Into<String>) -> Self {
        let column = column.into();
        self = self.column(column.clone());
        self.not_null.insert(column);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn column_names(&self) -> &[String] {
        &self.columns
    }

    fn index_of(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == column)
    }
}

/// Rows of one table plus its serial counter.
#[derive(Debug, Clone)]
pub(crate) struct TableData {
    pub(crate) table: Table,
    pub(crate) rows: Vec<Vec<Value>>,
    next_serial: i64,
}

impl TableData {
    pub(crate) fn new(table: Table) -> Self {
        Self {
            table,
            rows: Vec::new(),
            next_serial: 1,
        }
    }

    /// Columns of `row` named `alias.column`.
    pub(crate) fn qualify(&self, alias: &str, row: &[Value]) -> Vec<(String, Value)> {
        self.table
            .columns
            .iter()
            .zip(row)
            .map(|(c, v)| (format!("{alias}.{c}"), v.clone()))
            .collect()
    }

    /// NULL for every column of `alias`, the unmatched side of a left join.
    pub(crate) fn nulls(&self, alias: &str) -> Vec<(String, Value)> {
        self.table
            .columns
            .iter()
            .map(|c| (format!("{alias}.{c}"), Value::Null))
            .collect()
    }

    pub(crate) fn to_row(&self, row: &[Value]) -> Row {
        Row::new(self.table.columns.clone(), row.to_vec())
    }

    fn scope(&self, row: &[Value]) -> HashMap<String, Value> {
        self.table
            .columns
            .iter()
            .cloned()
            .zip(row.iter().cloned())
            .collect()
    }

    fn position(&self, column: &str) -> Result<usize> {
        self.table.index_of(column).ok_or_else(|| {
            Error::query(
                QueryErrorKind::NotFound,
                Some(&self.table.name),
                format!("table {} has no column named {column}", self.table.name),
            )
        })
    }

    fn check(&self, row: &[Value]) -> Result<()> {
        for column in &self.table.not_null {
            let index = self.position(column)?;
            if row[index].is_null() {
                return Err(Error::query(
                    QueryErrorKind::Constraint,
                    Some(&self.table.name),
                    format!("NOT NULL constraint failed: {}.{column}", self.table.name),
                ));
            }
        }
        Ok(())
    }

    fn matching(&self, filter: &Condition) -> Result<Vec<usize>> {
        let mut hits = Vec::new();
        for (i, row) in self.rows.iter().enumerate() {
            let scope = self.scope(row);
            if eval::evaluate(filter, &|c: &str| scope.get(c).cloned())? {
                hits.push(i);
            }
        }
        Ok(hits)
    }

    /// Insert a row and return its index.
    pub(crate) fn insert(&mut self, values: &BTreeMap<String, Value>) -> Result<usize> {
        let mut row = vec![Value::Null; self.table.columns.len()];
        for (column, value) in values {
            row[self.position(column)?] = value.clone();
        }

        let mut next_serial = self.next_serial;
        if let Some(serial) = &self.table.serial {
            let index = self.position(serial)?;
            match row[index].as_i64() {
                Some(given) => next_serial = next_serial.max(given + 1),
                None if row[index].is_null() => {
                    row[index] = Value::BigInt(next_serial);
                    next_serial += 1;
                }
                None => {
                    return Err(Error::query(
                        QueryErrorKind::Constraint,
                        Some(&self.table.name),
                        format!("datatype mismatch for {}.{serial}", self.table.name),
                    ));
                }
            }
        }

        self.check(&row)?;
        self.next_serial = next_serial;
        self.rows.push(row);
        Ok(self.rows.len() - 1)
    }

    /// Apply `set` to every row matching `filter`.
    pub(crate) fn update(
        &mut self,
        set: &BTreeMap<String, Value>,
        filter: &Condition,
    ) -> Result<u64> {
        let assignments = set
            .iter()
            .map(|(column, value)| Ok((self.position(column)?, value.clone())))
            .collect::<Result<Vec<_>>>()?;
        let hits = self.matching(filter)?;

        let mut updated = Vec::with_capacity(hits.len());
        for &i in &hits {
            let mut row = self.rows[i].clone();
            for (index, value) in &assignments {
                row[*index] = value.clone();
            }
            self.check(&row)?;
            updated.push((i, row));
        }
        for (i, row) in updated {
            self.rows[i] = row;
        }
        Ok(hits.len() as u64)
    }

    /// Remove every row matching `filter`.
    pub(crate) fn delete(&mut self, filter: &Condition) -> Result<u64> {
        let hits = self.matching(filter)?;
        let mut index = 0;
        self.rows.retain(|_| {
            let keep = !hits.contains(&index);
            index += 1;
            keep
        });
        Ok(hits.len() as u64)
    }
}
