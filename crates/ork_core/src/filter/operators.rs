//! Comparison operators and per-type handlers.
//!
//! Each declared field type maps to exactly one [`TypeHandler`]; each handler
//! supports a fixed set of [`Operator`]s. An operator a handler does not
//! support compiles to nothing: the term is skipped, not rejected.

use super::Predicate;
use crate::model::record::{number_to_sql, parse_bool, parse_date, parse_timestamp};
use crate::schema::FieldType;
use chrono::NaiveDateTime;
use rusqlite::types::Value as SqlValue;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
    In,
    NotIn,
    Contains,
    IContains,
    StartsWith,
    IStartsWith,
    EndsWith,
    IEndsWith,
}

impl Operator {
    /// Resolves a canonical or legacy operator name.
    pub fn from_name(name: &str) -> Option<Self> {
        let op = match name {
            "eq" => Self::Eq,
            "ne" => Self::Ne,
            "lt" => Self::Lt,
            "lte" => Self::Lte,
            "gt" => Self::Gt,
            "gte" => Self::Gte,
            "in" => Self::In,
            "notIn" | "nin" | "notin" => Self::NotIn,
            "contains" | "like" => Self::Contains,
            "icontains" | "ilike" => Self::IContains,
            "startsWith" | "starts" => Self::StartsWith,
            "istartsWith" | "istarts" => Self::IStartsWith,
            "endsWith" | "ends" => Self::EndsWith,
            "iendsWith" | "iends" => Self::IEndsWith,
            _ => return None,
        };
        Some(op)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::Ne => "ne",
            Self::Lt => "lt",
            Self::Lte => "lte",
            Self::Gt => "gt",
            Self::Gte => "gte",
            Self::In => "in",
            Self::NotIn => "notIn",
            Self::Contains => "contains",
            Self::IContains => "icontains",
            Self::StartsWith => "startsWith",
            Self::IStartsWith => "istartsWith",
            Self::EndsWith => "endsWith",
            Self::IEndsWith => "iendsWith",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeHandler {
    Numeric,
    Temporal,
    Network,
    Boolean,
    Text,
    Generic,
}

const NUMERIC_OPS: &[Operator] = &[
    Operator::Eq,
    Operator::Ne,
    Operator::Lt,
    Operator::Lte,
    Operator::Gt,
    Operator::Gte,
    Operator::In,
    Operator::NotIn,
];
const NETWORK_OPS: &[Operator] = &[
    Operator::Eq,
    Operator::Ne,
    Operator::In,
    Operator::NotIn,
    Operator::StartsWith,
    Operator::IStartsWith,
];
const BOOLEAN_OPS: &[Operator] = &[Operator::Eq, Operator::Ne];
const TEXT_OPS: &[Operator] = &[
    Operator::Eq,
    Operator::Ne,
    Operator::In,
    Operator::NotIn,
    Operator::Contains,
    Operator::IContains,
    Operator::StartsWith,
    Operator::IStartsWith,
    Operator::EndsWith,
    Operator::IEndsWith,
];
const GENERIC_OPS: &[Operator] = &[Operator::Eq, Operator::Ne, Operator::In, Operator::NotIn];

impl TypeHandler {
    pub fn for_type(field_type: FieldType) -> Self {
        match field_type {
            FieldType::SmallInteger
            | FieldType::Integer
            | FieldType::BigInteger
            | FieldType::Numeric
            | FieldType::Float => Self::Numeric,
            FieldType::Date | FieldType::DateTime => Self::Temporal,
            FieldType::Inet | FieldType::Cidr => Self::Network,
            FieldType::Boolean => Self::Boolean,
            FieldType::String | FieldType::Text => Self::Text,
            FieldType::Json | FieldType::MacAddr => Self::Generic,
        }
    }

    pub fn operators(self) -> &'static [Operator] {
        match self {
            Self::Numeric | Self::Temporal => NUMERIC_OPS,
            Self::Network => NETWORK_OPS,
            Self::Boolean => BOOLEAN_OPS,
            Self::Text => TEXT_OPS,
            Self::Generic => GENERIC_OPS,
        }
    }

    pub fn supports(self, op: Operator) -> bool {
        self.operators().contains(&op)
    }

    /// Appends the SQL for `column <op> operand` to `predicate`.
    ///
    /// Returns `false` (and appends nothing) when the operator is not
    /// supported by this handler or the operand cannot be coerced.
    pub fn compile(
        self,
        field_type: FieldType,
        column: &str,
        op: Operator,
        operand: &Value,
        predicate: &mut Predicate,
    ) -> bool {
        if !self.supports(op) {
            return false;
        }
        let column = quote_ident(column);

        match op {
            Operator::Eq | Operator::Ne if operand.is_array() => {
                let list_op = if op == Operator::Eq {
                    Operator::In
                } else {
                    Operator::NotIn
                };
                self.compile_list(field_type, &column, list_op, operand, predicate)
            }
            Operator::Eq | Operator::Ne if operand.is_null() => {
                let test = if op == Operator::Eq {
                    "IS NULL"
                } else {
                    "IS NOT NULL"
                };
                predicate.push(format!("{column} {test}"), Vec::new());
                true
            }
            Operator::Eq | Operator::Ne | Operator::Lt | Operator::Lte | Operator::Gt | Operator::Gte => {
                let Some(bound) = self.coerce(field_type, operand) else {
                    return false;
                };
                let symbol = match op {
                    Operator::Eq => "=",
                    Operator::Ne => "<>",
                    Operator::Lt => "<",
                    Operator::Lte => "<=",
                    Operator::Gt => ">",
                    _ => ">=",
                };
                predicate.push(format!("{column} {symbol} ?"), vec![bound]);
                true
            }
            Operator::In | Operator::NotIn => {
                self.compile_list(field_type, &column, op, operand, predicate)
            }
            Operator::Contains | Operator::StartsWith | Operator::EndsWith => {
                let Some(needle) = operand_text(operand) else {
                    return false;
                };
                let escaped = escape_glob(&needle);
                let pattern = match op {
                    Operator::Contains => format!("*{escaped}*"),
                    Operator::StartsWith => format!("{escaped}*"),
                    _ => format!("*{escaped}"),
                };
                predicate.push(format!("{column} GLOB ?"), vec![SqlValue::Text(pattern)]);
                true
            }
            Operator::IContains | Operator::IStartsWith | Operator::IEndsWith => {
                let Some(needle) = operand_text(operand) else {
                    return false;
                };
                let escaped = escape_like(&needle);
                let pattern = match op {
                    Operator::IContains => format!("%{escaped}%"),
                    Operator::IStartsWith => format!("{escaped}%"),
                    _ => format!("%{escaped}"),
                };
                predicate.push(
                    format!("{column} LIKE ? ESCAPE '\\'"),
                    vec![SqlValue::Text(pattern)],
                );
                true
            }
        }
    }

    fn compile_list(
        self,
        field_type: FieldType,
        column: &str,
        op: Operator,
        operand: &Value,
        predicate: &mut Predicate,
    ) -> bool {
        let items: Vec<&Value> = match operand {
            Value::Array(items) => items.iter().collect(),
            single => vec![single],
        };
        let mut bound = Vec::with_capacity(items.len());
        for item in items {
            match self.coerce(field_type, item) {
                Some(value) => bound.push(value),
                None => return false,
            }
        }

        if bound.is_empty() {
            if op == Operator::In {
                predicate.push("0 = 1".to_string(), Vec::new());
                return true;
            }
            return false;
        }

        let placeholders = vec!["?"; bound.len()].join(", ");
        let keyword = if op == Operator::In { "IN" } else { "NOT IN" };
        predicate.push(format!("{column} {keyword} ({placeholders})"), bound);
        true
    }

    /// Converts a filter operand into a bind value for this handler.
    fn coerce(self, field_type: FieldType, operand: &Value) -> Option<SqlValue> {
        match (self, operand) {
            (_, Value::Null) => Some(SqlValue::Null),
            (_, Value::Array(_) | Value::Object(_)) if field_type != FieldType::Json => None,
            (_, Value::Array(_) | Value::Object(_)) => Some(SqlValue::Text(operand.to_string())),
            (Self::Numeric, Value::Number(number)) => Some(number_to_sql(number)),
            (Self::Numeric, Value::String(text)) => {
                let text = text.trim();
                text.parse::<i64>()
                    .map(SqlValue::Integer)
                    .or_else(|_| text.parse::<f64>().map(SqlValue::Real))
                    .ok()
            }
            (Self::Numeric | Self::Boolean, Value::Bool(flag)) => {
                Some(SqlValue::Integer(i64::from(*flag)))
            }
            (Self::Boolean, Value::Number(number)) => number.as_i64().map(SqlValue::Integer),
            (Self::Boolean, Value::String(text)) => {
                parse_bool(text).map(|flag| SqlValue::Integer(i64::from(flag)))
            }
            (Self::Temporal, Value::String(text)) => Some(SqlValue::Text(
                normalize_temporal_operand(field_type, text),
            )),
            (_, Value::Number(number)) => Some(number_to_sql(number)),
            (_, Value::Bool(flag)) => Some(SqlValue::Integer(i64::from(*flag))),
            (_, Value::String(text)) => Some(SqlValue::Text(text.clone())),
        }
    }
}

fn normalize_temporal_operand(field_type: FieldType, text: &str) -> String {
    if field_type == FieldType::Date {
        return parse_date(text).map_or_else(
            || text.to_string(),
            |date| date.format("%Y-%m-%d").to_string(),
        );
    }
    parse_timestamp(text).map_or_else(
        || text.to_string(),
        |ts: NaiveDateTime| ts.format("%Y-%m-%d %H:%M:%S").to_string(),
    )
}

fn operand_text(operand: &Value) -> Option<String> {
    match operand {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}

/// Double-quotes an identifier taken from a descriptor.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn escape_like(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for ch in raw.chars() {
        if matches!(ch, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

fn escape_glob(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '*' => escaped.push_str("[*]"),
            '?' => escaped.push_str("[?]"),
            '[' => escaped.push_str("[[]"),
            other => escaped.push(other),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::{escape_glob, escape_like, Operator, TypeHandler};
    use crate::filter::Predicate;
    use crate::schema::FieldType;
    use rusqlite::types::Value as SqlValue;
    use serde_json::json;

    #[test]
    fn operator_names_roundtrip_and_accept_aliases() {
        for op in TypeHandler::Text.operators() {
            assert_eq!(Operator::from_name(op.name()), Some(*op));
        }
        assert_eq!(Operator::from_name("nin"), Some(Operator::NotIn));
        assert_eq!(Operator::from_name("ilike"), Some(Operator::IContains));
        assert_eq!(Operator::from_name("between"), None);
    }

    #[test]
    fn each_type_maps_to_one_handler() {
        assert_eq!(TypeHandler::for_type(FieldType::BigInteger), TypeHandler::Numeric);
        assert_eq!(TypeHandler::for_type(FieldType::DateTime), TypeHandler::Temporal);
        assert_eq!(TypeHandler::for_type(FieldType::Cidr), TypeHandler::Network);
        assert_eq!(TypeHandler::for_type(FieldType::Boolean), TypeHandler::Boolean);
        assert_eq!(TypeHandler::for_type(FieldType::String), TypeHandler::Text);
        assert_eq!(TypeHandler::for_type(FieldType::Json), TypeHandler::Generic);
        assert_eq!(TypeHandler::for_type(FieldType::MacAddr), TypeHandler::Generic);
    }

    #[test]
    fn generic_handler_matches_exactly_and_skips_patterns() {
        let mut predicate = Predicate::default();
        let handler = TypeHandler::for_type(FieldType::MacAddr);
        assert!(handler.compile(
            FieldType::MacAddr,
            "mac",
            Operator::Eq,
            &json!("00:1a:2b:3c:4d:5e"),
            &mut predicate
        ));
        assert!(!handler.compile(
            FieldType::MacAddr,
            "mac",
            Operator::StartsWith,
            &json!("00:1a"),
            &mut predicate
        ));
        assert!(!handler.compile(
            FieldType::MacAddr,
            "mac",
            Operator::Gt,
            &json!("00"),
            &mut predicate
        ));
        assert_eq!(predicate.where_sql(), " WHERE \"mac\" = ?");
        assert_eq!(
            predicate.params(),
            [SqlValue::Text("00:1a:2b:3c:4d:5e".to_string())]
        );
    }

    #[test]
    fn numeric_gte_coerces_string_operand() {
        let mut predicate = Predicate::default();
        let applied = TypeHandler::Numeric.compile(
            FieldType::Integer,
            "age",
            Operator::Gte,
            &json!("30"),
            &mut predicate,
        );
        assert!(applied);
        assert_eq!(predicate.where_sql(), " WHERE \"age\" >= ?");
        assert_eq!(predicate.params(), [SqlValue::Integer(30)]);
    }

    #[test]
    fn text_handler_skips_range_operators() {
        let mut predicate = Predicate::default();
        let applied = TypeHandler::Text.compile(
            FieldType::String,
            "age",
            Operator::Gte,
            &json!(30),
            &mut predicate,
        );
        assert!(!applied);
        assert!(predicate.is_empty());
    }

    #[test]
    fn null_equality_uses_is_null() {
        let mut predicate = Predicate::default();
        TypeHandler::Temporal.compile(
            FieldType::DateTime,
            "removed",
            Operator::Eq,
            &json!(null),
            &mut predicate,
        );
        assert_eq!(predicate.where_sql(), " WHERE \"removed\" IS NULL");
    }

    #[test]
    fn empty_in_matches_nothing_and_empty_not_in_is_skipped() {
        let mut predicate = Predicate::default();
        assert!(TypeHandler::Text.compile(
            FieldType::Text,
            "name",
            Operator::In,
            &json!([]),
            &mut predicate
        ));
        assert!(!TypeHandler::Text.compile(
            FieldType::Text,
            "name",
            Operator::NotIn,
            &json!([]),
            &mut predicate
        ));
        assert_eq!(predicate.where_sql(), " WHERE 0 = 1");
    }

    #[test]
    fn pattern_escaping() {
        assert_eq!(escape_like("50%_off\\"), "50\\%\\_off\\\\");
        assert_eq!(escape_glob("a*b?[c]"), "a[*]b[?][[]c]");
    }
}
