use std::str::FromStr;

use serde_json::{json, Map, Number, Value as JsonValue};

use crate::firestore::error::{invalid_argument, FirestoreResult};
use crate::firestore::query::{Direction, Filter, StructuredQuery, WhereClause, WhereFilterOp};
use crate::firestore::snapshot::DocumentSnapshot;
use crate::firestore::store::WriteOperation;
use crate::firestore::value::{DocumentData, FieldTransform, TransformOp};

/// Converts between plain JSON documents and the typed values of the Firestore REST API.
#[derive(Clone, Debug)]
pub struct JsonProtoSerializer {
    project_id: String,
    database: String,
}

impl JsonProtoSerializer {
    pub fn new(project_id: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            database: database.into(),
        }
    }

    pub fn database_name(&self) -> String {
        format!("projects/{}/databases/{}", self.project_id, self.database)
    }

    pub fn document_name(&self, collection: &str, id: &str) -> String {
        format!("{}/documents/{collection}/{id}", self.database_name())
    }

    /// Splits `projects/p/databases/d/documents/{collection}/{id}` into its last two segments.
    pub fn parse_document_name(&self, name: &str) -> FirestoreResult<(String, String)> {
        let prefix = format!("{}/documents/", self.database_name());
        let relative = name
            .strip_prefix(&prefix)
            .ok_or_else(|| invalid_argument(format!("Unexpected document name '{name}'")))?;
        let mut segments = relative.rsplitn(2, '/');
        let id = segments.next().unwrap_or_default();
        let collection = segments.next().unwrap_or_default();
        if id.is_empty() || collection.is_empty() {
            return Err(invalid_argument(format!("Unexpected document name '{name}'")));
        }
        Ok((collection.to_string(), id.to_string()))
    }

    pub fn encode_commit_body(&self, writes: &[WriteOperation]) -> JsonValue {
        let encoded: Vec<JsonValue> = writes.iter().map(|write| self.encode_write(write)).collect();
        json!({ "writes": encoded })
    }

    fn encode_write(&self, write: &WriteOperation) -> JsonValue {
        match write {
            WriteOperation::Set {
                collection,
                id,
                data,
            } => json!({
                "update": {
                    "name": self.document_name(collection, id),
                    "fields": encode_fields(data),
                }
            }),
            WriteOperation::Update {
                collection,
                id,
                data,
                transforms,
            } => {
                let mut write = Map::new();
                write.insert(
                    "update".to_string(),
                    json!({
                        "name": self.document_name(collection, id),
                        "fields": encode_fields(data),
                    }),
                );
                let mask: Vec<String> = data.keys().map(|key| quote_field_path(key)).collect();
                write.insert("updateMask".to_string(), json!({ "fieldPaths": mask }));
                if !transforms.is_empty() {
                    let encoded: Vec<JsonValue> =
                        transforms.iter().map(encode_field_transform).collect();
                    write.insert("updateTransforms".to_string(), JsonValue::Array(encoded));
                }
                write.insert("currentDocument".to_string(), json!({ "exists": true }));
                JsonValue::Object(write)
            }
            WriteOperation::Delete { collection, id } => json!({
                "delete": self.document_name(collection, id)
            }),
        }
    }

    pub fn encode_structured_query(&self, query: &StructuredQuery) -> JsonValue {
        let mut structured = Map::new();
        structured.insert(
            "from".to_string(),
            json!([{ "collectionId": query.collection_id(), "allDescendants": false }]),
        );

        let filters: Vec<&Filter> = query.filters().collect();
        match filters.as_slice() {
            [] => {}
            [single] => {
                structured.insert("where".to_string(), encode_filter(single));
            }
            many => {
                let nested: Vec<JsonValue> = many.iter().map(|filter| encode_filter(filter)).collect();
                structured.insert(
                    "where".to_string(),
                    json!({ "compositeFilter": { "op": "AND", "filters": nested } }),
                );
            }
        }

        let mut orders: Vec<JsonValue> = query
            .order_by()
            .map(|order| {
                json!({
                    "field": { "fieldPath": quote_field_path(&order.field) },
                    "direction": direction_name(order.direction),
                })
            })
            .collect();

        if let Some(cursor) = query.start_after() {
            // A document cursor needs the document name as the final ordering key.
            let last_direction = query
                .order_by()
                .last()
                .map(|order| order.direction)
                .unwrap_or_default();
            orders.push(json!({
                "field": { "fieldPath": "__name__" },
                "direction": direction_name(last_direction),
            }));
            let mut values: Vec<JsonValue> = query
                .order_by()
                .map(|order| encode_value(cursor.get(&order.field).unwrap_or(&JsonValue::Null)))
                .collect();
            values.push(json!({
                "referenceValue": self.document_name(cursor.collection(), cursor.id())
            }));
            structured.insert("startAt".to_string(), json!({ "values": values, "before": false }));
        }

        if !orders.is_empty() {
            structured.insert("orderBy".to_string(), JsonValue::Array(orders));
        }

        if let Some(limit) = query.limit() {
            structured.insert("limit".to_string(), json!(limit));
        }

        JsonValue::Object(structured)
    }

    pub fn encode_count_body(&self, query: &StructuredQuery) -> JsonValue {
        json!({
            "structuredAggregationQuery": {
                "structuredQuery": self.encode_structured_query(query),
                "aggregations": [{ "alias": "count", "count": {} }]
            }
        })
    }

    pub fn decode_document(&self, document: &JsonValue) -> FirestoreResult<DocumentSnapshot> {
        let name = document
            .get("name")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| invalid_argument("Firestore document missing 'name' field"))?;
        let (collection, id) = self.parse_document_name(name)?;
        let data = decode_fields(document)?;
        Ok(DocumentSnapshot::new(
            collection,
            id,
            Some(data),
            Default::default(),
        ))
    }
}

fn direction_name(direction: Direction) -> &'static str {
    match direction {
        Direction::Asc => "ASCENDING",
        Direction::Desc => "DESCENDING",
    }
}

fn operator_name(operator: WhereFilterOp) -> &'static str {
    match operator {
        WhereFilterOp::LessThan => "LESS_THAN",
        WhereFilterOp::LessThanOrEqual => "LESS_THAN_OR_EQUAL",
        WhereFilterOp::Equal => "EQUAL",
        WhereFilterOp::NotEqual => "NOT_EQUAL",
        WhereFilterOp::GreaterThanOrEqual => "GREATER_THAN_OR_EQUAL",
        WhereFilterOp::GreaterThan => "GREATER_THAN",
        WhereFilterOp::ArrayContains => "ARRAY_CONTAINS",
        WhereFilterOp::ArrayContainsAny => "ARRAY_CONTAINS_ANY",
        WhereFilterOp::In => "IN",
        WhereFilterOp::NotIn => "NOT_IN",
    }
}

fn encode_filter(filter: &Filter) -> JsonValue {
    match filter {
        Filter::Field(clause) => encode_field_filter(clause),
        Filter::And(filters) => encode_composite("AND", filters),
        Filter::Or(filters) => encode_composite("OR", filters),
    }
}

fn encode_composite(op: &str, filters: &[Filter]) -> JsonValue {
    let nested: Vec<JsonValue> = filters.iter().map(encode_filter).collect();
    json!({ "compositeFilter": { "op": op, "filters": nested } })
}

fn encode_field_filter(clause: &WhereClause) -> JsonValue {
    json!({
        "fieldFilter": {
            "field": { "fieldPath": quote_field_path(&clause.key) },
            "op": operator_name(clause.operator),
            "value": encode_value(&clause.value)
        }
    })
}

fn encode_field_transform(transform: &FieldTransform) -> JsonValue {
    let field_path = quote_field_path(&transform.field);
    match &transform.op {
        TransformOp::Increment(operand) => json!({
            "fieldPath": field_path,
            "increment": encode_number(operand)
        }),
        TransformOp::ArrayUnion(elements) => json!({
            "fieldPath": field_path,
            "appendMissingElements": { "values": elements.iter().map(encode_value).collect::<Vec<_>>() }
        }),
        TransformOp::ArrayRemove(elements) => json!({
            "fieldPath": field_path,
            "removeAllFromArray": { "values": elements.iter().map(encode_value).collect::<Vec<_>>() }
        }),
    }
}

/// Quotes a top-level field name unless it is a plain identifier.
fn quote_field_path(field: &str) -> String {
    let simple = field
        .chars()
        .next()
        .is_some_and(|first| first.is_ascii_alphabetic() || first == '_')
        && field.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if simple || field == "__name__" {
        field.to_string()
    } else {
        format!("`{}`", field.replace('\\', "\\\\").replace('`', "\\`"))
    }
}

fn encode_fields(map: &DocumentData) -> JsonValue {
    let fields: Map<String, JsonValue> = map
        .iter()
        .map(|(key, value)| (key.clone(), encode_value(value)))
        .collect();
    JsonValue::Object(fields)
}

fn encode_number(number: &Number) -> JsonValue {
    match number.as_i64() {
        Some(integer) => json!({ "integerValue": integer.to_string() }),
        None => json!({ "doubleValue": number.as_f64().unwrap_or(0.0) }),
    }
}

pub(crate) fn encode_value(value: &JsonValue) -> JsonValue {
    match value {
        JsonValue::Null => json!({ "nullValue": JsonValue::Null }),
        JsonValue::Bool(boolean) => json!({ "booleanValue": boolean }),
        JsonValue::Number(number) => encode_number(number),
        JsonValue::String(string) => json!({ "stringValue": string }),
        JsonValue::Array(values) => {
            let values: Vec<JsonValue> = values.iter().map(encode_value).collect();
            json!({ "arrayValue": { "values": values } })
        }
        JsonValue::Object(map) => json!({ "mapValue": { "fields": encode_fields(map) } }),
    }
}

pub(crate) fn decode_fields(value: &JsonValue) -> FirestoreResult<DocumentData> {
    let fields = match value.get("fields") {
        Some(fields) => fields
            .as_object()
            .ok_or_else(|| invalid_argument("Expected 'fields' to be an object"))?,
        None => return Ok(DocumentData::new()),
    };
    let mut decoded = DocumentData::new();
    for (key, value) in fields {
        decoded.insert(key.clone(), decode_value(value)?);
    }
    Ok(decoded)
}

pub(crate) fn decode_value(value: &JsonValue) -> FirestoreResult<JsonValue> {
    let object = value
        .as_object()
        .ok_or_else(|| invalid_argument("Expected Firestore value object"))?;
    if object.contains_key("nullValue") {
        return Ok(JsonValue::Null);
    }
    if let Some(bool_value) = object.get("booleanValue") {
        let value = bool_value
            .as_bool()
            .ok_or_else(|| invalid_argument("booleanValue must be bool"))?;
        return Ok(JsonValue::Bool(value));
    }
    if let Some(integer_value) = object.get("integerValue") {
        let parsed = match integer_value {
            JsonValue::String(value) => i64::from_str(value)
                .map_err(|err| invalid_argument(format!("Invalid integerValue: {err}")))?,
            JsonValue::Number(number) => number
                .as_i64()
                .ok_or_else(|| invalid_argument("Integer out of range"))?,
            _ => return Err(invalid_argument("integerValue must be a string or number")),
        };
        return Ok(JsonValue::from(parsed));
    }
    if let Some(double_value) = object.get("doubleValue") {
        let parsed = match double_value {
            JsonValue::Number(number) => number
                .as_f64()
                .ok_or_else(|| invalid_argument("Invalid doubleValue"))?,
            JsonValue::String(value) => value
                .parse::<f64>()
                .map_err(|err| invalid_argument(format!("Invalid doubleValue: {err}")))?,
            _ => return Err(invalid_argument("doubleValue must be a number or string")),
        };
        return Ok(Number::from_f64(parsed).map(JsonValue::Number).unwrap_or(JsonValue::Null));
    }
    for key in ["stringValue", "timestampValue", "referenceValue", "bytesValue"] {
        if let Some(string_value) = object.get(key) {
            let string_value = string_value
                .as_str()
                .ok_or_else(|| invalid_argument(format!("{key} must be string")))?;
            return Ok(JsonValue::String(string_value.to_string()));
        }
    }
    if let Some(geo_point) = object.get("geoPointValue") {
        return Ok(json!({
            "latitude": geo_point.get("latitude").cloned().unwrap_or(JsonValue::from(0.0)),
            "longitude": geo_point.get("longitude").cloned().unwrap_or(JsonValue::from(0.0)),
        }));
    }
    if let Some(array_value) = object.get("arrayValue") {
        let decoded = match array_value.get("values").and_then(JsonValue::as_array) {
            Some(entries) => entries
                .iter()
                .map(decode_value)
                .collect::<FirestoreResult<Vec<_>>>()?,
            None => Vec::new(),
        };
        return Ok(JsonValue::Array(decoded));
    }
    if let Some(map_value) = object.get("mapValue") {
        return decode_fields(map_value).map(JsonValue::Object);
    }

    Err(invalid_argument("Unknown Firestore value type"))
}
