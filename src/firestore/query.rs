//! Translation of generic where clauses into query constraints.
//!
//! Constraints always come out in the same order: filters in input order, then the
//! sort, then the pagination cursor, then the limit. Operator and value compatibility
//! is left for the backend to judge.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::firestore::error::{invalid_argument, FirestoreError};
use crate::firestore::snapshot::DocumentSnapshot;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WhereFilterOp {
    #[serde(rename = "<")]
    LessThan,
    #[serde(rename = "<=")]
    LessThanOrEqual,
    #[serde(rename = "==")]
    Equal,
    #[serde(rename = "!=")]
    NotEqual,
    #[serde(rename = ">=")]
    GreaterThanOrEqual,
    #[serde(rename = ">")]
    GreaterThan,
    #[serde(rename = "array-contains")]
    ArrayContains,
    #[serde(rename = "array-contains-any")]
    ArrayContainsAny,
    #[serde(rename = "in")]
    In,
    #[serde(rename = "not-in")]
    NotIn,
}

impl WhereFilterOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            WhereFilterOp::LessThan => "<",
            WhereFilterOp::LessThanOrEqual => "<=",
            WhereFilterOp::Equal => "==",
            WhereFilterOp::NotEqual => "!=",
            WhereFilterOp::GreaterThanOrEqual => ">=",
            WhereFilterOp::GreaterThan => ">",
            WhereFilterOp::ArrayContains => "array-contains",
            WhereFilterOp::ArrayContainsAny => "array-contains-any",
            WhereFilterOp::In => "in",
            WhereFilterOp::NotIn => "not-in",
        }
    }
}

impl fmt::Display for WhereFilterOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WhereFilterOp {
    type Err = FirestoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "<" => Ok(WhereFilterOp::LessThan),
            "<=" => Ok(WhereFilterOp::LessThanOrEqual),
            "==" => Ok(WhereFilterOp::Equal),
            "!=" => Ok(WhereFilterOp::NotEqual),
            ">=" => Ok(WhereFilterOp::GreaterThanOrEqual),
            ">" => Ok(WhereFilterOp::GreaterThan),
            "array-contains" => Ok(WhereFilterOp::ArrayContains),
            "array-contains-any" => Ok(WhereFilterOp::ArrayContainsAny),
            "in" => Ok(WhereFilterOp::In),
            "not-in" => Ok(WhereFilterOp::NotIn),
            other => Err(invalid_argument(format!(
                "Invalid query operator '{other}'"
            ))),
        }
    }
}

/// A single `{key, operator, value}` condition.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WhereClause {
    pub key: String,
    pub operator: WhereFilterOp,
    pub value: Value,
}

impl WhereClause {
    pub fn new(key: impl Into<String>, operator: WhereFilterOp, value: impl Into<Value>) -> Self {
        Self {
            key: key.into(),
            operator,
            value: value.into(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClauseKind {
    And,
    Or,
}

/// A where clause tagged with the group it belongs to.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AndOrWhereClause {
    #[serde(flatten)]
    pub clause: WhereClause,
    #[serde(rename = "type")]
    pub kind: ClauseKind,
}

impl AndOrWhereClause {
    pub fn and(clause: WhereClause) -> Self {
        Self {
            clause,
            kind: ClauseKind::And,
        }
    }

    pub fn or(clause: WhereClause) -> Self {
        Self {
            clause,
            kind: ClauseKind::Or,
        }
    }
}

/// How the `and` and `or` groups are combined.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompositeMode {
    #[default]
    #[serde(rename = "and")]
    And,
    #[serde(rename = "or")]
    Or,
    #[serde(rename = "andOr")]
    AndOr,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Asc => "asc",
            Direction::Desc => "desc",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    pub field: String,
    pub direction: Direction,
}

impl OrderBy {
    pub fn new(field: impl Into<String>, direction: Direction) -> Self {
        Self {
            field: field.into(),
            direction,
        }
    }
}

/// Where a paginated query resumes.
#[derive(Clone, Debug, PartialEq)]
pub enum Cursor {
    /// Resume after this document; it is fetched before the query runs.
    DocumentId(String),
    /// Resume after the last document returned by the previous query on the same gateway.
    LastSeen,
    /// Resume after an already fetched snapshot.
    Snapshot(DocumentSnapshot),
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct QueryOptions {
    pub where_clauses: Vec<WhereClause>,
    pub order_by: Option<OrderBy>,
    pub limit: Option<u32>,
    pub cursor: Option<Cursor>,
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_clauses(where_clauses: Vec<WhereClause>) -> Self {
        Self {
            where_clauses,
            ..Self::default()
        }
    }

    pub fn filter(
        mut self,
        key: impl Into<String>,
        operator: WhereFilterOp,
        value: impl Into<Value>,
    ) -> Self {
        self.where_clauses
            .push(WhereClause::new(key, operator, value));
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.order_by = Some(OrderBy::new(field, direction));
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn start_after(mut self, cursor: Cursor) -> Self {
        self.cursor = Some(cursor);
        self
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct AndOrQueryOptions {
    pub clauses: Vec<AndOrWhereClause>,
    pub mode: CompositeMode,
    pub order_by: Option<OrderBy>,
    pub limit: Option<u32>,
    pub cursor: Option<Cursor>,
}

impl AndOrQueryOptions {
    pub fn new(mode: CompositeMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    pub fn and_where(
        mut self,
        key: impl Into<String>,
        operator: WhereFilterOp,
        value: impl Into<Value>,
    ) -> Self {
        self.clauses
            .push(AndOrWhereClause::and(WhereClause::new(key, operator, value)));
        self
    }

    pub fn or_where(
        mut self,
        key: impl Into<String>,
        operator: WhereFilterOp,
        value: impl Into<Value>,
    ) -> Self {
        self.clauses
            .push(AndOrWhereClause::or(WhereClause::new(key, operator, value)));
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.order_by = Some(OrderBy::new(field, direction));
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn start_after(mut self, cursor: Cursor) -> Self {
        self.cursor = Some(cursor);
        self
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Filter {
    Field(WhereClause),
    And(Vec<Filter>),
    Or(Vec<Filter>),
}

#[derive(Clone, Debug, PartialEq)]
pub enum QueryConstraint {
    Filter(Filter),
    OrderBy(OrderBy),
    StartAfter(DocumentSnapshot),
    Limit(u32),
}

/// One constraint per clause, followed by sort, cursor and limit.
///
/// `cursor` is the already resolved pagination document.
pub fn translate(options: &QueryOptions, cursor: Option<DocumentSnapshot>) -> Vec<QueryConstraint> {
    let mut constraints: Vec<QueryConstraint> = options
        .where_clauses
        .iter()
        .cloned()
        .map(|clause| QueryConstraint::Filter(Filter::Field(clause)))
        .collect();
    push_tail(&mut constraints, options.order_by.as_ref(), cursor, options.limit);
    constraints
}

/// Groups tagged clauses into a conjunction and a disjunction combined per `mode`.
pub fn translate_and_or(
    options: &AndOrQueryOptions,
    cursor: Option<DocumentSnapshot>,
) -> Vec<QueryConstraint> {
    let (and_filters, or_filters): (Vec<_>, Vec<_>) = options
        .clauses
        .iter()
        .partition(|clause| clause.kind == ClauseKind::And);
    let and_filters: Vec<Filter> = and_filters
        .into_iter()
        .map(|clause| Filter::Field(clause.clause.clone()))
        .collect();
    let or_filters: Vec<Filter> = or_filters
        .into_iter()
        .map(|clause| Filter::Field(clause.clause.clone()))
        .collect();

    let composite = match options.mode {
        CompositeMode::And => non_empty(and_filters).map(Filter::And),
        CompositeMode::Or => non_empty(or_filters).map(Filter::Or),
        CompositeMode::AndOr => {
            let mut combined = and_filters;
            if let Some(or_group) = non_empty(or_filters) {
                combined.push(Filter::Or(or_group));
            }
            non_empty(combined).map(Filter::And)
        }
    };

    let mut constraints = Vec::new();
    if let Some(filter) = composite {
        constraints.push(QueryConstraint::Filter(filter));
    }
    push_tail(&mut constraints, options.order_by.as_ref(), cursor, options.limit);
    constraints
}

fn non_empty(filters: Vec<Filter>) -> Option<Vec<Filter>> {
    if filters.is_empty() {
        None
    } else {
        Some(filters)
    }
}

fn push_tail(
    constraints: &mut Vec<QueryConstraint>,
    order_by: Option<&OrderBy>,
    cursor: Option<DocumentSnapshot>,
    limit: Option<u32>,
) {
    if let Some(order_by) = order_by {
        constraints.push(QueryConstraint::OrderBy(order_by.clone()));
    }
    if let Some(cursor) = cursor {
        constraints.push(QueryConstraint::StartAfter(cursor));
    }
    if let Some(limit) = limit {
        constraints.push(QueryConstraint::Limit(limit));
    }
}

/// A query over one collection, ready for a [`crate::firestore::DocumentStore`].
#[derive(Clone, Debug, PartialEq)]
pub struct StructuredQuery {
    collection: String,
    constraints: Vec<QueryConstraint>,
}

impl StructuredQuery {
    pub fn new(collection: impl Into<String>, constraints: Vec<QueryConstraint>) -> Self {
        Self {
            collection: collection.into(),
            constraints,
        }
    }

    /// Every document of the collection.
    pub fn collection(collection: impl Into<String>) -> Self {
        Self::new(collection, Vec::new())
    }

    pub fn collection_id(&self) -> &str {
        &self.collection
    }

    pub fn constraints(&self) -> &[QueryConstraint] {
        &self.constraints
    }

    pub fn filters(&self) -> impl Iterator<Item = &Filter> {
        self.constraints.iter().filter_map(|constraint| match constraint {
            QueryConstraint::Filter(filter) => Some(filter),
            _ => None,
        })
    }

    pub fn order_by(&self) -> impl Iterator<Item = &OrderBy> {
        self.constraints.iter().filter_map(|constraint| match constraint {
            QueryConstraint::OrderBy(order) => Some(order),
            _ => None,
        })
    }

    pub fn start_after(&self) -> Option<&DocumentSnapshot> {
        self.constraints.iter().rev().find_map(|constraint| match constraint {
            QueryConstraint::StartAfter(snapshot) => Some(snapshot),
            _ => None,
        })
    }

    pub fn limit(&self) -> Option<u32> {
        self.constraints.iter().rev().find_map(|constraint| match constraint {
            QueryConstraint::Limit(limit) => Some(*limit),
            _ => None,
        })
    }
}
