use std::cmp::Ordering;

use serde::de::DeserializeOwned;
use serde_json::{Map, Number, Value};

use crate::firestore::error::{invalid_argument, FirestoreResult};

/// Field name carrying the document identifier on records handed to callers.
pub const REFERENCE_FIELD: &str = "reference";

pub type DocumentData = Map<String, Value>;

/// A document as seen by callers: its identifier plus the stored fields.
#[derive(Clone, Debug, PartialEq)]
pub struct Record {
    pub reference: String,
    pub data: DocumentData,
}

impl Record {
    pub fn new(reference: impl Into<String>, data: DocumentData) -> Self {
        Self {
            reference: reference.into(),
            data,
        }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.data.get(field)
    }

    /// The stored fields with `reference` set to the document id.
    pub fn to_json(&self) -> Value {
        let mut object = self.data.clone();
        object.insert(
            REFERENCE_FIELD.to_string(),
            Value::String(self.reference.clone()),
        );
        Value::Object(object)
    }

    pub fn deserialize<T: DeserializeOwned>(&self) -> FirestoreResult<T> {
        serde_json::from_value(self.to_json())
            .map_err(|err| invalid_argument(format!("Cannot decode record {}: {err}", self.reference)))
    }
}

/// Accepts any JSON object as a write payload and removes the synthetic `reference` field.
///
/// Returns the payload and the reference it carried, if it was a string.
pub fn into_write_payload(value: Value) -> FirestoreResult<(DocumentData, Option<String>)> {
    match value {
        Value::Object(mut map) => {
            let reference = match map.remove(REFERENCE_FIELD) {
                Some(Value::String(reference)) => Some(reference),
                _ => None,
            };
            Ok((map, reference))
        }
        other => Err(invalid_argument(format!(
            "Document data must be an object, got {}",
            type_name(&other)
        ))),
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum TransformOp {
    Increment(Number),
    ArrayUnion(Vec<Value>),
    ArrayRemove(Vec<Value>),
}

#[derive(Clone, Debug, PartialEq)]
pub struct FieldTransform {
    pub field: String,
    pub op: TransformOp,
}

impl FieldTransform {
    pub fn increment(field: impl Into<String>, operand: Number) -> Self {
        Self {
            field: field.into(),
            op: TransformOp::Increment(operand),
        }
    }

    pub fn array_union(field: impl Into<String>, elements: Vec<Value>) -> Self {
        Self {
            field: field.into(),
            op: TransformOp::ArrayUnion(elements),
        }
    }

    pub fn array_remove(field: impl Into<String>, elements: Vec<Value>) -> Self {
        Self {
            field: field.into(),
            op: TransformOp::ArrayRemove(elements),
        }
    }

    /// Computes the new field value from the current one.
    pub fn apply(&self, current: Option<&Value>) -> Value {
        match &self.op {
            TransformOp::Increment(operand) => match current {
                Some(Value::Number(existing)) => add_numbers(existing, operand),
                _ => Value::Number(operand.clone()),
            },
            TransformOp::ArrayUnion(elements) => {
                let mut values = match current {
                    Some(Value::Array(values)) => values.clone(),
                    _ => Vec::new(),
                };
                for element in elements {
                    if !values.iter().any(|value| values_equal(value, element)) {
                        values.push(element.clone());
                    }
                }
                Value::Array(values)
            }
            TransformOp::ArrayRemove(elements) => {
                let values = match current {
                    Some(Value::Array(values)) => values
                        .iter()
                        .filter(|value| !elements.iter().any(|element| values_equal(value, element)))
                        .cloned()
                        .collect(),
                    _ => Vec::new(),
                };
                Value::Array(values)
            }
        }
    }
}

fn add_numbers(left: &Number, right: &Number) -> Value {
    if let (Some(a), Some(b)) = (left.as_i64(), right.as_i64()) {
        if let Some(sum) = a.checked_add(b) {
            return Value::from(sum);
        }
    }
    let sum = left.as_f64().unwrap_or(0.0) + right.as_f64().unwrap_or(0.0);
    Number::from_f64(sum).map(Value::Number).unwrap_or(Value::Null)
}

/// Equality with integers and doubles compared numerically.
pub fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => match (a.as_i64(), b.as_i64()) {
            (Some(a), Some(b)) => a == b,
            _ => a.as_f64() == b.as_f64(),
        },
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| values_equal(x, y))
        }
        (Value::Object(a), Value::Object(b)) => {
            a.len() == b.len()
                && a
                    .iter()
                    .all(|(key, value)| b.get(key).is_some_and(|other| values_equal(value, other)))
        }
        _ => left == right,
    }
}

/// Ordering between two values of the same type; `None` when the types differ.
pub fn compare_values(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        (Value::Number(a), Value::Number(b)) => match (a.as_i64(), b.as_i64()) {
            (Some(a), Some(b)) => Some(a.cmp(&b)),
            _ => a.as_f64()?.partial_cmp(&b.as_f64()?),
        },
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Array(a), Value::Array(b)) => {
            for (x, y) in a.iter().zip(b) {
                match total_order(x, y) {
                    Ordering::Equal => continue,
                    other => return Some(other),
                }
            }
            Some(a.len().cmp(&b.len()))
        }
        (Value::Object(a), Value::Object(b)) => {
            let mut left_entries: Vec<_> = a.iter().collect();
            let mut right_entries: Vec<_> = b.iter().collect();
            left_entries.sort_by(|x, y| x.0.cmp(y.0));
            right_entries.sort_by(|x, y| x.0.cmp(y.0));
            for ((lk, lv), (rk, rv)) in left_entries.iter().zip(&right_entries) {
                match lk.cmp(rk).then_with(|| total_order(lv, rv)) {
                    Ordering::Equal => continue,
                    other => return Some(other),
                }
            }
            Some(left_entries.len().cmp(&right_entries.len()))
        }
        _ => None,
    }
}

/// Ordering across types: null, booleans, numbers, strings, arrays, maps.
pub fn total_order(left: &Value, right: &Value) -> Ordering {
    compare_values(left, right).unwrap_or_else(|| type_rank(left).cmp(&type_rank(right)))
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
