use std::cmp::Ordering;

use serde_json::Value;

use crate::firestore::query::{Direction, Filter, OrderBy, StructuredQuery, WhereClause, WhereFilterOp};
use crate::firestore::snapshot::DocumentSnapshot;
use crate::firestore::value::{compare_values, total_order, values_equal};

/// Runs `query` over the snapshots of its collection.
pub(crate) fn evaluate(query: &StructuredQuery, documents: Vec<DocumentSnapshot>) -> Vec<DocumentSnapshot> {
    let filters: Vec<&Filter> = query.filters().collect();
    let order_by: Vec<&OrderBy> = query.order_by().collect();

    let mut matched: Vec<DocumentSnapshot> = documents
        .into_iter()
        .filter(|snapshot| snapshot.exists())
        .filter(|snapshot| filters.iter().all(|filter| matches_filter(snapshot, filter)))
        // Ordering on a field excludes documents that lack it.
        .filter(|snapshot| order_by.iter().all(|order| field_value(snapshot, &order.field).is_some()))
        .collect();

    matched.sort_by(|left, right| compare_snapshots(left, right, &order_by));

    if let Some(cursor) = query.start_after() {
        matched.retain(|snapshot| compare_snapshots(snapshot, cursor, &order_by) == Ordering::Greater);
    }

    if let Some(limit) = query.limit() {
        matched.truncate(limit as usize);
    }

    matched
}

/// Number of documents matching the filters of `query`, ignoring sort, cursor and limit.
pub(crate) fn count(query: &StructuredQuery, documents: &[DocumentSnapshot]) -> u64 {
    let filters: Vec<&Filter> = query.filters().collect();
    documents
        .iter()
        .filter(|snapshot| snapshot.exists())
        .filter(|snapshot| filters.iter().all(|filter| matches_filter(snapshot, filter)))
        .count() as u64
}

fn matches_filter(snapshot: &DocumentSnapshot, filter: &Filter) -> bool {
    match filter {
        Filter::Field(clause) => matches_clause(snapshot, clause),
        Filter::And(filters) => filters.iter().all(|filter| matches_filter(snapshot, filter)),
        Filter::Or(filters) => filters.iter().any(|filter| matches_filter(snapshot, filter)),
    }
}

fn matches_clause(snapshot: &DocumentSnapshot, clause: &WhereClause) -> bool {
    match field_value(snapshot, &clause.key) {
        Some(value) => evaluate_clause(clause, &value),
        // Missing fields never match, `!=` and `not-in` included.
        None => false,
    }
}

fn evaluate_clause(clause: &WhereClause, value: &Value) -> bool {
    let operand = &clause.value;
    match clause.operator {
        WhereFilterOp::Equal => values_equal(value, operand),
        WhereFilterOp::NotEqual => !value.is_null() && !values_equal(value, operand),
        WhereFilterOp::LessThan => compare_values(value, operand) == Some(Ordering::Less),
        WhereFilterOp::LessThanOrEqual => matches!(
            compare_values(value, operand),
            Some(Ordering::Less) | Some(Ordering::Equal)
        ),
        WhereFilterOp::GreaterThan => compare_values(value, operand) == Some(Ordering::Greater),
        WhereFilterOp::GreaterThanOrEqual => matches!(
            compare_values(value, operand),
            Some(Ordering::Greater) | Some(Ordering::Equal)
        ),
        WhereFilterOp::ArrayContains => match value {
            Value::Array(values) => values.iter().any(|candidate| values_equal(candidate, operand)),
            _ => false,
        },
        WhereFilterOp::ArrayContainsAny => match (value, operand) {
            (Value::Array(values), Value::Array(needles)) => needles
                .iter()
                .any(|needle| values.iter().any(|candidate| values_equal(candidate, needle))),
            _ => false,
        },
        WhereFilterOp::In => match operand {
            Value::Array(needles) => needles.iter().any(|needle| values_equal(needle, value)),
            _ => false,
        },
        WhereFilterOp::NotIn => match operand {
            Value::Array(needles) => {
                !value.is_null() && needles.iter().all(|needle| !values_equal(needle, value))
            }
            _ => false,
        },
    }
}

/// Resolves a dotted field path; `__name__` is the document id.
fn field_value(snapshot: &DocumentSnapshot, path: &str) -> Option<Value> {
    if path == "__name__" {
        return Some(Value::String(snapshot.id().to_string()));
    }
    let data = snapshot.data()?;
    if let Some(value) = data.get(path) {
        return Some(value.clone());
    }
    let mut segments = path.split('.');
    let mut current = data.get(segments.next()?)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current.clone())
}

fn compare_snapshots(left: &DocumentSnapshot, right: &DocumentSnapshot, order_by: &[&OrderBy]) -> Ordering {
    for order in order_by {
        let left_value = field_value(left, &order.field).unwrap_or(Value::Null);
        let right_value = field_value(right, &order.field).unwrap_or(Value::Null);
        let mut ordering = total_order(&left_value, &right_value);
        if order.direction == Direction::Desc {
            ordering = ordering.reverse();
        }
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    left.id().cmp(right.id())
}
