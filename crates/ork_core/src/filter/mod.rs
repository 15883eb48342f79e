//! Filter compiler: criteria -> SQL predicate, ordering and pagination.
//!
//! # Responsibility
//! - Resolve filter keys against a descriptor and pick one type handler per field.
//! - Merge caller filters over a descriptor's default filter.
//! - Compile signed order specs into `ORDER BY` terms.
//!
//! # Invariants
//! - Unknown fields, unknown operators and operators a handler does not
//!   support are dropped from the predicate, never reported as errors.
//! - Every operand is bound as a parameter; identifiers come only from the descriptor.

pub mod operators;
pub mod query;

use crate::schema::{FieldType, ResourceDescriptor};
use log::debug;
use operators::{quote_ident, Operator, TypeHandler};
use rusqlite::types::Value as SqlValue;
use serde_json::{Map, Value};

/// Field key (optionally `field__op`) -> scalar, list or `{op: operand}` map.
pub type Filters = Map<String, Value>;

/// Normalized filter/sort/pagination request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Criteria {
    pub filters: Filters,
    /// Signed field names; `None` falls back to the descriptor default order.
    pub orders: Option<Vec<String>>,
    pub offset: Option<u64>,
    pub limit: Option<u64>,
}

impl Criteria {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, key: impl Into<String>, value: Value) -> Self {
        self.filters.insert(key.into(), value);
        self
    }

    pub fn orders<I, S>(mut self, orders: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.orders = Some(orders.into_iter().map(Into::into).collect());
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// A declared column a filter or order term may reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnRef<'d> {
    pub name: &'d str,
    pub field_type: FieldType,
}

pub fn resolve_column<'d>(descriptor: &'d ResourceDescriptor, field: &str) -> Option<ColumnRef<'d>> {
    descriptor.field(field).map(|def| ColumnRef {
        name: def.name.as_str(),
        field_type: def.field_type,
    })
}

pub fn operator_handler(field_type: FieldType) -> TypeHandler {
    TypeHandler::for_type(field_type)
}

/// Caller keys win; keys only present in `default` are added.
pub fn merge_default(explicit: &Filters, default: &Filters) -> Filters {
    let mut merged = explicit.clone();
    for (key, value) in default {
        if !merged.contains_key(key) {
            merged.insert(key.clone(), value.clone());
        }
    }
    merged
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderTerm {
    pub field: String,
    pub ascending: bool,
}

impl OrderTerm {
    fn to_sql(&self) -> String {
        let direction = if self.ascending { "ASC" } else { "DESC" };
        format!("{} {direction}", quote_ident(&self.field))
    }
}

/// `+field`/`field` ascend, `-field` descends; unknown fields are dropped.
pub fn compile_order<S: AsRef<str>>(
    descriptor: &ResourceDescriptor,
    terms: &[S],
) -> Vec<OrderTerm> {
    terms
        .iter()
        .filter_map(|raw| {
            let raw = raw.as_ref().trim();
            let (ascending, field) = match raw.strip_prefix('-') {
                Some(field) => (false, field),
                None => (true, raw.strip_prefix('+').unwrap_or(raw)),
            };
            match resolve_column(descriptor, field) {
                Some(column) => Some(OrderTerm {
                    field: column.name.to_string(),
                    ascending,
                }),
                None => {
                    debug!(
                        "event=compile_order module=filter status=skip resource={} field={}",
                        descriptor.name(),
                        field
                    );
                    None
                }
            }
        })
        .collect()
}

pub(crate) fn order_by_sql(terms: &[OrderTerm]) -> String {
    if terms.is_empty() {
        return String::new();
    }
    let terms: Vec<String> = terms.iter().map(OrderTerm::to_sql).collect();
    format!(" ORDER BY {}", terms.join(", "))
}

/// Conjunction of SQL clauses with positional parameters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Predicate {
    clauses: Vec<String>,
    params: Vec<SqlValue>,
}

impl Predicate {
    pub(crate) fn push(&mut self, clause: String, params: Vec<SqlValue>) {
        self.clauses.push(clause);
        self.params.extend(params);
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    pub fn clauses(&self) -> &[String] {
        &self.clauses
    }

    pub fn params(&self) -> &[SqlValue] {
        &self.params
    }

    /// ` WHERE a AND b`, or an empty string when there is nothing to match.
    pub fn where_sql(&self) -> String {
        if self.clauses.is_empty() {
            return String::new();
        }
        format!(" WHERE {}", self.clauses.join(" AND "))
    }
}

/// Compiles `filters` into a predicate, dropping terms that do not apply.
pub fn compile_filters(descriptor: &ResourceDescriptor, filters: &Filters) -> Predicate {
    let mut predicate = Predicate::default();
    for (key, value) in filters {
        compile_term(descriptor, key, value, &mut predicate);
    }
    predicate
}

fn compile_term(descriptor: &ResourceDescriptor, key: &str, value: &Value, predicate: &mut Predicate) {
    let Some((column, suffix)) = split_key(descriptor, key) else {
        skip(descriptor, key, "unknown_field");
        return;
    };
    let handler = operator_handler(column.field_type);

    let terms: Vec<(&str, &Value)> = match (suffix, value) {
        (Some(op), _) => vec![(op, value)],
        (None, Value::Object(ops)) => ops.iter().map(|(op, v)| (op.as_str(), v)).collect(),
        (None, _) => vec![("eq", value)],
    };

    for (op_name, operand) in terms {
        let Some(op) = Operator::from_name(op_name) else {
            skip(descriptor, key, "unknown_operator");
            continue;
        };
        if !handler.compile(column.field_type, column.name, op, operand, predicate) {
            skip(descriptor, key, "unsupported_operator");
        }
    }
}

/// Splits `field__op` when `field` is declared; a declared field wins over a split.
fn split_key<'d, 'k>(
    descriptor: &'d ResourceDescriptor,
    key: &'k str,
) -> Option<(ColumnRef<'d>, Option<&'k str>)> {
    if let Some(column) = resolve_column(descriptor, key) {
        return Some((column, None));
    }
    let (field, op) = key.rsplit_once("__")?;
    resolve_column(descriptor, field).map(|column| (column, Some(op)))
}

fn skip(descriptor: &ResourceDescriptor, key: &str, reason: &str) {
    debug!(
        "event=compile_filter module=filter status=skip resource={} key={} reason={}",
        descriptor.name(),
        key,
        reason
    );
}
