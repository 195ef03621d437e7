//! Select execution: nested-loop joins, filtering, ordering, projection.

use crate::eval;
use crate::table::TableData;
use rowgraph_core::{
    ColumnInfo, Error, Join, JoinType, OrderDirection, QueryErrorKind, Result, Row, Select, Value,
};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

type Scope = HashMap<String, Value>;

#[allow(clippy::result_large_err)]
fn table<'t>(tables: &'t BTreeMap<String, TableData>, name: &str) -> Result<&'t TableData> {
    tables.get(name).ok_or_else(|| {
        Error::query(
            QueryErrorKind::NotFound,
            Some(name),
            format!("no such table: {name}"),
        )
    })
}

/// Resolve `column` in `scope`; bare names refer to the FROM alias.
fn lookup(scope: &Scope, from: &str, column: &str) -> Option<Value> {
    match scope.get(column) {
        Some(value) => Some(value.clone()),
        None if !column.contains('.') => scope.get(&format!("{from}.{column}")).cloned(),
        None => None,
    }
}

#[allow(clippy::result_large_err)]
fn joins(join: &Join, scope: &Scope, from: &str) -> Result<bool> {
    for (joined, existing) in &join.on {
        let left = lookup(scope, from, joined);
        let right = lookup(scope, from, existing);
        match (left, right) {
            (Some(a), Some(b)) if eval::equal(&a, &b) => {}
            (Some(_), Some(_)) => return Ok(false),
            (None, _) | (_, None) => {
                return Err(Error::query(
                    QueryErrorKind::NotFound,
                    Some(&join.table.table),
                    format!("no such column in join: {joined} = {existing}"),
                ));
            }
        }
    }
    for condition in &join.conditions {
        if !eval::evaluate(condition, &|c: &str| lookup(scope, from, c))? {
            return Ok(false);
        }
    }
    Ok(true)
}

#[allow(clippy::result_large_err)]
pub(crate) fn run_select(tables: &BTreeMap<String, TableData>, select: &Select) -> Result<Vec<Row>> {
    let from = &select.from.alias;
    let root = table(tables, &select.from.table)?;
    let mut aliases = vec![(from.as_str(), root)];
    let mut scopes: Vec<Scope> = root
        .rows
        .iter()
        .map(|row| root.qualify(from, row).into_iter().collect())
        .collect();

    for join in &select.joins {
        let joined = table(tables, &join.table.table)?;
        let alias = join.table.alias.as_str();
        let mut next = Vec::new();
        for scope in scopes {
            let mut matched = false;
            for row in &joined.rows {
                let mut candidate = scope.clone();
                candidate.extend(joined.qualify(alias, row));
                if joins(join, &candidate, from)? {
                    next.push(candidate);
                    matched = true;
                }
            }
            if !matched && join.join_type == JoinType::Left {
                let mut candidate = scope;
                candidate.extend(joined.nulls(alias));
                next.push(candidate);
            }
        }
        scopes = next;
        aliases.push((alias, joined));
    }

    if let Some(filter) = &select.filter {
        let mut kept = Vec::with_capacity(scopes.len());
        for scope in scopes {
            if eval::evaluate(filter, &|c: &str| lookup(&scope, from, c))? {
                kept.push(scope);
            }
        }
        scopes = kept;
    }

    if !select.order_by.is_empty() {
        let mut keyed = scopes
            .into_iter()
            .map(|scope| {
                let keys = select
                    .order_by
                    .iter()
                    .map(|o| require(&scope, from, &o.column))
                    .collect::<Result<Vec<_>>>()?;
                Ok((keys, scope))
            })
            .collect::<Result<Vec<_>>>()?;
        keyed.sort_by(|(a, _), (b, _)| {
            for ((x, y), order) in a.iter().zip(b).zip(&select.order_by) {
                let ordering = x.compare(y).unwrap_or(Ordering::Equal);
                let ordering = match order.direction {
                    OrderDirection::Asc => ordering,
                    OrderDirection::Desc => ordering.reverse(),
                };
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            Ordering::Equal
        });
        scopes = keyed.into_iter().map(|(_, scope)| scope).collect();
    }

    if let Some(limit) = select.limit {
        scopes.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
    }

    let names: Vec<String> = if select.columns.is_empty() {
        aliases
            .iter()
            .flat_map(|(alias, data)| {
                data.table
                    .column_names()
                    .iter()
                    .map(move |c| format!("{alias}.{c}"))
            })
            .collect()
    } else {
        select.columns.iter().map(|c| c.qualified()).collect()
    };
    let columns = Arc::new(ColumnInfo::new(names));
    scopes
        .iter()
        .map(|scope| {
            let values = columns
                .names()
                .iter()
                .map(|name| require(scope, from, name))
                .collect::<Result<Vec<_>>>()?;
            Ok(Row::with_columns(Arc::clone(&columns), values))
        })
        .collect()
}

#[allow(clippy::result_large_err)]
fn require(scope: &Scope, from: &str, column: &str) -> Result<Value> {
    lookup(scope, from, column).ok_or_else(|| {
        Error::query(
            QueryErrorKind::NotFound,
            None,
            format!("no such column: {column}"),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::Table;
    use rowgraph_core::{Condition, OrderBy, TableRef};

    fn tables() -> BTreeMap<String, TableData> {
        let mut user = TableData::new(Table::new("user").serial("id").columns(["email"]));
        let mut comment = TableData::new(
            Table::new("comment")
                .serial("id")
                .columns(["user_id", "parent_type", "message"]),
        );
        for email in ["a@x", "b@x", "c@x"] {
            user.insert(&BTreeMap::from([("email".to_string(), Value::from(email))]))
                .unwrap();
        }
        for (user_id, parent_type, message) in
            [(1i64, "user", "one"), (1, "post", "two"), (2, "user", "three")]
        {
            comment
                .insert(&BTreeMap::from([
                    ("user_id".to_string(), Value::BigInt(user_id)),
                    ("parent_type".to_string(), Value::from(parent_type)),
                    ("message".to_string(), Value::from(message)),
                ]))
                .unwrap();
        }
        BTreeMap::from([("user".to_string(), user), ("comment".to_string(), comment)])
    }

    #[test]
    fn test_select_all_columns_are_qualified() {
        let rows = run_select(&tables(), &Select::new(TableRef::new("user", "u"))).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].column_names().collect::<Vec<_>>(), vec!["u.id", "u.email"]);
    }

    #[test]
    fn test_left_join_keeps_unmatched_rows_with_nulls() {
        let select = Select::new(TableRef::new("user", "user"))
            .join(
                Join::left(TableRef::new("comment", "user_comments"))
                    .on("user_comments.user_id", "user.id")
                    .condition(Condition::eq("user_comments.parent_type", "user")),
            )
            .order_by(OrderBy::asc("user.id"));
        let rows = run_select(&tables(), &select).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].get_by_name("user_comments.message"), Some(&Value::from("one")));
        assert_eq!(rows[1].get_by_name("user_comments.message"), Some(&Value::from("three")));
        assert_eq!(rows[2].get_by_name("user_comments.id"), Some(&Value::Null));
    }

    #[test]
    fn test_inner_join_drops_unmatched_rows() {
        let select = Select::new(TableRef::new("comment", "c"))
            .join(Join::inner(TableRef::new("user", "u")).on("u.id", "c.user_id"))
            .filter(Condition::eq("u.email", "a@x"));
        let rows = run_select(&tables(), &select).unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn test_order_limit_and_projection() {
        let id = "id".to_string();
        let select = Select::new(TableRef::new("comment", "c"))
            .columns("c", [&id])
            .order_by(OrderBy::desc("c.id"))
            .limit(2);
        let rows = run_select(&tables(), &select).unwrap();
        let ids: Vec<Value> = rows.iter().map(|r| r.get(0).cloned().unwrap()).collect();
        assert_eq!(ids, vec![Value::BigInt(3), Value::BigInt(2)]);
        assert_eq!(rows[0].len(), 1);
    }

    #[test]
    fn test_unknown_table_and_column() {
        let err = run_select(&tables(), &Select::new(TableRef::new("post", "p"))).unwrap_err();
        assert!(err.to_string().contains("post"));
        let title = "title".to_string();
        let select = Select::new(TableRef::new("user", "u")).columns("u", [&title]);
        assert!(run_select(&tables(), &select).is_err());
    }
}
