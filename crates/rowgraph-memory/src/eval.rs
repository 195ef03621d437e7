//! Predicate evaluation over a single (possibly joined) row.

use rowgraph_core::{CompareOp, Condition, Error, QueryErrorKind, Result, Value};
use std::cmp::Ordering;

/// Evaluate `condition`, resolving column names through `lookup`.
#[allow(clippy::result_large_err)]
pub(crate) fn evaluate<F>(condition: &Condition, lookup: &F) -> Result<bool>
where
    F: Fn(&str) -> Option<Value>,
{
    let value_of = |column: &str| {
        lookup(column).ok_or_else(|| {
            Error::query(
                QueryErrorKind::NotFound,
                None,
                format!("no such column: {column}"),
            )
        })
    };

    Ok(match condition {
        Condition::Eq(column, value) => equal(&value_of(column)?, value),
        Condition::In { columns, values } => {
            let actual = columns
                .iter()
                .map(|c| value_of(c))
                .collect::<Result<Vec<_>>>()?;
            values.iter().any(|tuple| {
                tuple.len() == actual.len() && tuple.iter().zip(&actual).all(|(v, a)| equal(a, v))
            })
        }
        Condition::IsNull(column) => value_of(column)?.is_null(),
        Condition::Compare { column, op, value } => {
            let actual = value_of(column)?;
            if actual.is_null() || value.is_null() {
                false
            } else {
                actual
                    .compare(value)
                    .is_some_and(|ordering| holds(*op, ordering))
            }
        }
        Condition::And(parts) => {
            for part in parts {
                if !evaluate(part, lookup)? {
                    return Ok(false);
                }
            }
            true
        }
        Condition::Or(parts) => {
            for part in parts {
                if evaluate(part, lookup)? {
                    return Ok(true);
                }
            }
            false
        }
    })
}

/// SQL equality: never true when either side is NULL.
pub(crate) fn equal(a: &Value, b: &Value) -> bool {
    if a.is_null() || b.is_null() {
        return false;
    }
    a.same_as(b) || a.compare(b) == Some(Ordering::Equal)
}

fn holds(op: CompareOp, ordering: Ordering) -> bool {
    match op {
        CompareOp::Ne => ordering != Ordering::Equal,
        CompareOp::Lt => ordering == Ordering::Less,
        CompareOp::Le => ordering != Ordering::Greater,
        CompareOp::Gt => ordering == Ordering::Greater,
        CompareOp::Ge => ordering != Ordering::Less,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn row() -> HashMap<String, Value> {
        HashMap::from([
            ("id".to_string(), Value::BigInt(3)),
            ("user_id".to_string(), Value::Int(7)),
            ("message".to_string(), Value::Null),
        ])
    }

    fn check(condition: &Condition) -> Result<bool> {
        let row = row();
        evaluate(condition, &|c: &str| row.get(c).cloned())
    }

    #[test]
    fn test_equality_ignores_integer_width() {
        assert!(check(&Condition::eq("user_id", 7i64)).unwrap());
        assert!(!check(&Condition::eq("user_id", 8i64)).unwrap());
    }

    #[test]
    fn test_null_never_equals() {
        assert!(!check(&Condition::Eq("message".into(), Value::Null)).unwrap());
        assert!(check(&Condition::is_null("message")).unwrap());
        assert!(!equal(&Value::Null, &Value::Null));
    }

    #[test]
    fn test_tuple_membership() {
        let hit = Condition::In {
            columns: vec!["id".into(), "user_id".into()],
            values: vec![
                vec![Value::BigInt(1), Value::BigInt(7)],
                vec![Value::BigInt(3), Value::BigInt(7)],
            ],
        };
        assert!(check(&hit).unwrap());
        let empty = Condition::In {
            columns: vec!["id".into()],
            values: vec![],
        };
        assert!(!check(&empty).unwrap());
    }

    #[test]
    fn test_comparisons_and_boolean_combinators() {
        let gt = Condition::compare("id", CompareOp::Gt, 2i64);
        let ne = Condition::compare("message", CompareOp::Ne, "x");
        assert!(check(&gt).unwrap());
        assert!(!check(&ne).unwrap());
        assert!(check(&Condition::Or(vec![ne.clone(), gt.clone()])).unwrap());
        assert!(!check(&Condition::And(vec![gt, ne])).unwrap());
    }

    #[test]
    fn test_unknown_column_is_an_error() {
        let err = check(&Condition::eq("nope", 1i64)).unwrap_err();
        assert!(err.to_string().contains("nope"));
    }
}
