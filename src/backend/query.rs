//! Query evaluation for the in-memory backend
//!
//! Supports field equality plus the `$lt`, `$lte`, `$gt`, `$gte`, `$in` and
//! `$ne` comparison operators, ordering and pagination.

use std::cmp::Ordering;

use serde_json::Value;

use super::{FindOptions, SortDirection};
use crate::error::{CoreError, CoreResult};
use crate::Object;

/// Whether `object` satisfies every condition of `query`
pub(crate) fn matches(object: &Object, query: &Object) -> CoreResult<bool> {
    for (field, condition) in query {
        let value = object.get(field).unwrap_or(&Value::Null);
        if !matches_condition(value, condition)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn matches_condition(value: &Value, condition: &Value) -> CoreResult<bool> {
    let operators = match condition {
        Value::Object(map) if !map.is_empty() && map.keys().all(|k| k.starts_with('$')) => map,
        _ => return Ok(value == condition),
    };

    for (operator, operand) in operators {
        let satisfied = match operator.as_str() {
            "$eq" => value == operand,
            "$ne" => value != operand,
            "$lt" => compare(value, operand) == Some(Ordering::Less),
            "$lte" => matches!(
                compare(value, operand),
                Some(Ordering::Less | Ordering::Equal)
            ),
            "$gt" => compare(value, operand) == Some(Ordering::Greater),
            "$gte" => matches!(
                compare(value, operand),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            "$in" => operand
                .as_array()
                .ok_or_else(|| CoreError::backend("$in expects an array"))?
                .contains(value),
            other => {
                return Err(CoreError::backend(format!(
                    "Unsupported query operator '{}'",
                    other
                )))
            }
        };
        if !satisfied {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Ordering between two comparable JSON values; `None` when incomparable
fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

/// Sort then paginate
pub(crate) fn apply_options(mut objects: Vec<Object>, options: &FindOptions) -> Vec<Object> {
    if !options.order.is_empty() {
        objects.sort_by(|a, b| {
            for (field, direction) in &options.order {
                let left = a.get(field).unwrap_or(&Value::Null);
                let right = b.get(field).unwrap_or(&Value::Null);
                let ordering = compare(left, right).unwrap_or(Ordering::Equal);
                let ordering = match direction {
                    SortDirection::Asc => ordering,
                    SortDirection::Desc => ordering.reverse(),
                };
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            Ordering::Equal
        });
    }

    let skip = options.skip.unwrap_or(0);
    let limit = options.limit.unwrap_or(usize::MAX);
    objects.into_iter().skip(skip).take(limit).collect()
}
