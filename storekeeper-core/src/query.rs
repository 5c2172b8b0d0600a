// src/query.rs
//! Mongo-style query filters over documents.
//!
//! Supports the operator subset the maintenance tasks issue: implicit
//! equality, `$eq`, `$ne`, `$gt`, `$gte`, `$lt`, `$lte`, `$in`, `$nin`,
//! `$exists`, and the logical `$and` / `$or`. Unknown operators are
//! rejected rather than silently matching nothing.

use serde_json::Value;
use std::cmp::Ordering;

use crate::document::Document;
use crate::error::{Result, StoreError};

/// Check whether `doc` matches `filter`. An empty filter matches everything.
pub fn matches_filter(doc: &Document, filter: &Value) -> Result<bool> {
    let obj = filter
        .as_object()
        .ok_or_else(|| StoreError::InvalidQuery("filter must be a JSON object".into()))?;

    for (key, condition) in obj {
        let matched = match key.as_str() {
            "$and" => {
                let clauses = expect_clause_array(key, condition)?;
                let mut all = true;
                for clause in clauses {
                    if !matches_filter(doc, clause)? {
                        all = false;
                        break;
                    }
                }
                all
            }
            "$or" => {
                let clauses = expect_clause_array(key, condition)?;
                let mut any = false;
                for clause in clauses {
                    if matches_filter(doc, clause)? {
                        any = true;
                        break;
                    }
                }
                any
            }
            _ if key.starts_with('$') => {
                return Err(StoreError::InvalidQuery(format!(
                    "unsupported top-level operator: {}",
                    key
                )));
            }
            field => matches_field(doc, field, condition)?,
        };
        if !matched {
            return Ok(false);
        }
    }
    Ok(true)
}

fn expect_clause_array<'a>(op: &str, condition: &'a Value) -> Result<&'a Vec<Value>> {
    condition
        .as_array()
        .ok_or_else(|| StoreError::InvalidQuery(format!("{} expects an array of clauses", op)))
}

/// `_id` lives outside the field map, so resolve it specially.
fn field_value(doc: &Document, field: &str) -> Option<Value> {
    if field == "_id" {
        Some(doc.id_value())
    } else {
        doc.get(field).cloned()
    }
}

fn matches_field(doc: &Document, field: &str, condition: &Value) -> Result<bool> {
    let actual = field_value(doc, field);

    // An object whose keys all start with '$' is an operator expression;
    // anything else is an implicit equality match.
    if let Some(ops) = condition.as_object() {
        if !ops.is_empty() && ops.keys().all(|k| k.starts_with('$')) {
            for (op, operand) in ops {
                if !apply_operator(field, actual.as_ref(), op, operand)? {
                    return Ok(false);
                }
            }
            return Ok(true);
        }
    }

    Ok(values_equal(actual.as_ref(), condition))
}

fn apply_operator(
    field: &str,
    actual: Option<&Value>,
    op: &str,
    operand: &Value,
) -> Result<bool> {
    match op {
        "$eq" => Ok(values_equal(actual, operand)),
        "$ne" => Ok(!values_equal(actual, operand)),
        "$gt" => Ok(compare(actual, operand) == Some(Ordering::Greater)),
        "$gte" => Ok(matches!(
            compare(actual, operand),
            Some(Ordering::Greater) | Some(Ordering::Equal)
        )),
        "$lt" => Ok(compare(actual, operand) == Some(Ordering::Less)),
        "$lte" => Ok(matches!(
            compare(actual, operand),
            Some(Ordering::Less) | Some(Ordering::Equal)
        )),
        "$in" => {
            let candidates = operand.as_array().ok_or_else(|| {
                StoreError::InvalidQuery(format!("$in on '{}' expects an array", field))
            })?;
            Ok(candidates.iter().any(|c| values_equal(actual, c)))
        }
        "$nin" => {
            let candidates = operand.as_array().ok_or_else(|| {
                StoreError::InvalidQuery(format!("$nin on '{}' expects an array", field))
            })?;
            Ok(!candidates.iter().any(|c| values_equal(actual, c)))
        }
        "$exists" => {
            let want = operand.as_bool().ok_or_else(|| {
                StoreError::InvalidQuery(format!("$exists on '{}' expects a boolean", field))
            })?;
            Ok(actual.is_some() == want)
        }
        other => Err(StoreError::InvalidQuery(format!(
            "unsupported operator '{}' on field '{}'",
            other, field
        ))),
    }
}

/// Equality with Mongo null semantics: `null` matches a missing field too.
fn values_equal(actual: Option<&Value>, expected: &Value) -> bool {
    match actual {
        Some(v) => v == expected,
        None => expected.is_null(),
    }
}

/// Ordering comparison; a missing field never orders against anything.
/// Numbers compare numerically, strings lexically - RFC 3339 UTC timestamps
/// therefore compare chronologically, which the date-range task relies on.
fn compare(actual: Option<&Value>, expected: &Value) -> Option<Ordering> {
    match (actual?, expected) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.as_str().cmp(b.as_str())),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::DocumentId;
    use serde_json::json;
    use std::collections::HashMap;

    fn doc(id: i64, fields: Vec<(&str, Value)>) -> Document {
        let mut map = HashMap::new();
        for (k, v) in fields {
            map.insert(k.to_string(), v);
        }
        Document::new(DocumentId::Int(id), map)
    }

    #[test]
    fn test_empty_filter_matches_all() {
        let d = doc(1, vec![("name", json!("Alice"))]);
        assert!(matches_filter(&d, &json!({})).unwrap());
    }

    #[test]
    fn test_implicit_equality() {
        let d = doc(1, vec![("status", json!("PREPARING"))]);
        assert!(matches_filter(&d, &json!({"status": "PREPARING"})).unwrap());
        assert!(!matches_filter(&d, &json!({"status": "DELIVERED"})).unwrap());
    }

    #[test]
    fn test_id_matching() {
        let d = doc(42, vec![]);
        assert!(matches_filter(&d, &json!({"_id": 42})).unwrap());
        assert!(!matches_filter(&d, &json!({"_id": 41})).unwrap());

        let mut fields = HashMap::new();
        fields.insert("x".to_string(), json!(1));
        let s = Document::new(DocumentId::String("A".into()), fields);
        assert!(matches_filter(&s, &json!({"_id": "A"})).unwrap());
    }

    #[test]
    fn test_exists_and_ne_null() {
        let with = doc(1, vec![("userId", json!("u1"))]);
        let without = doc(2, vec![]);
        let null = doc(3, vec![("userId", json!(null))]);

        let filter = json!({"userId": {"$exists": true, "$ne": null}});
        assert!(matches_filter(&with, &filter).unwrap());
        assert!(!matches_filter(&without, &filter).unwrap());
        assert!(!matches_filter(&null, &filter).unwrap());
    }

    #[test]
    fn test_null_equality_matches_missing() {
        let without = doc(1, vec![]);
        assert!(matches_filter(&without, &json!({"userId": null})).unwrap());
    }

    #[test]
    fn test_comparison_operators() {
        let d = doc(1, vec![("age", json!(25))]);
        assert!(matches_filter(&d, &json!({"age": {"$gte": 18, "$lt": 30}})).unwrap());
        assert!(!matches_filter(&d, &json!({"age": {"$gt": 25}})).unwrap());
        assert!(matches_filter(&d, &json!({"age": {"$lte": 25}})).unwrap());
    }

    #[test]
    fn test_string_range_is_chronological_for_rfc3339() {
        let d = doc(1, vec![("createdAt", json!("2024-01-15T10:00:00Z"))]);
        let filter = json!({"createdAt": {
            "$gte": "2024-01-01T00:00:00Z",
            "$lte": "2024-01-31T23:59:59Z"
        }});
        assert!(matches_filter(&d, &filter).unwrap());

        let outside = doc(2, vec![("createdAt", json!("2024-02-01T00:00:00Z"))]);
        assert!(!matches_filter(&outside, &filter).unwrap());
    }

    #[test]
    fn test_in_and_nin() {
        let d = doc(1, vec![("deliveryStatus", json!("PENDING"))]);
        let filter = json!({"deliveryStatus": {"$in": ["PENDING", "DISPATCHED", "PREPARING"]}});
        assert!(matches_filter(&d, &filter).unwrap());
        assert!(!matches_filter(&d, &json!({"deliveryStatus": {"$nin": ["PENDING"]}})).unwrap());
    }

    #[test]
    fn test_logical_operators() {
        let d = doc(1, vec![("a", json!(1)), ("b", json!(2))]);
        assert!(matches_filter(&d, &json!({"$and": [{"a": 1}, {"b": 2}]})).unwrap());
        assert!(matches_filter(&d, &json!({"$or": [{"a": 9}, {"b": 2}]})).unwrap());
        assert!(!matches_filter(&d, &json!({"$or": [{"a": 9}, {"b": 9}]})).unwrap());
    }

    #[test]
    fn test_unknown_operator_is_an_error() {
        let d = doc(1, vec![("a", json!(1))]);
        assert!(matches_filter(&d, &json!({"a": {"$regex": "x"}})).is_err());
        assert!(matches_filter(&d, &json!({"$nor": []})).is_err());
    }

    #[test]
    fn test_missing_field_never_orders() {
        let d = doc(1, vec![]);
        assert!(!matches_filter(&d, &json!({"age": {"$gt": 0}})).unwrap());
        assert!(!matches_filter(&d, &json!({"age": {"$lte": 100}})).unwrap());
    }
}
