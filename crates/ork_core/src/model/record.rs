//! Record values and storage <-> JSON conversion.
//!
//! # Responsibility
//! - Define `Record`, the JSON-safe, order-preserving row mapping.
//! - Convert between SQLite values and JSON according to a field's type.
//! - Normalize temporal values to `YYYY-MM-DD HH:MM:SS` / `YYYY-MM-DD`.
//!
//! # Invariants
//! - Timestamps in records never carry sub-second precision or a zone suffix.
//! - Persisted JSON text that fails to parse is reported, never masked.

use crate::resource::{EngineError, EngineResult};
use crate::schema::FieldType;
use chrono::{DateTime, Local, NaiveDate, NaiveDateTime};
use rusqlite::types::Value as SqlValue;
use serde_json::{Map, Number, Value};

/// One row, keyed by field name in declaration order.
pub type Record = Map<String, Value>;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const DATE_FORMAT: &str = "%Y-%m-%d";
const TIMESTAMP_INPUT_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

pub fn format_timestamp(value: &NaiveDateTime) -> String {
    value.format(TIMESTAMP_FORMAT).to_string()
}

/// Local wall-clock time, used for soft-delete marks and audit entries.
pub fn now_timestamp() -> String {
    format_timestamp(&Local::now().naive_local())
}

/// Parses the timestamp shapes accepted on input and returns the wall-clock part.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.naive_local());
    }
    TIMESTAMP_INPUT_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .or_else(|| parse_date(raw).and_then(|date| date.and_hms_opt(0, 0, 0)))
}

pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, DATE_FORMAT)
        .ok()
        .or_else(|| parse_timestamp_prefix(raw).map(|ts| ts.date()))
}

fn parse_timestamp_prefix(raw: &str) -> Option<NaiveDateTime> {
    if raw.len() <= DATE_FORMAT.len() {
        return None;
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.naive_local());
    }
    TIMESTAMP_INPUT_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
}

/// Rewrites a stored timestamp into the output format; unparseable text is kept.
pub fn normalize_timestamp(raw: &str) -> String {
    parse_timestamp(raw).map_or_else(|| raw.to_string(), |ts| format_timestamp(&ts))
}

pub fn normalize_date(raw: &str) -> String {
    parse_date(raw).map_or_else(
        || raw.to_string(),
        |date| date.format(DATE_FORMAT).to_string(),
    )
}

/// JSON input value -> bind parameter for a column of `field_type`.
pub fn json_to_sql(field_type: FieldType, value: &Value) -> SqlValue {
    match (field_type, value) {
        (_, Value::Null) => SqlValue::Null,
        (FieldType::Json, other) => SqlValue::Text(other.to_string()),
        (_, Value::Bool(flag)) => SqlValue::Integer(i64::from(*flag)),
        (_, Value::Number(number)) => number_to_sql(number),
        (_, Value::String(text)) => SqlValue::Text(text.clone()),
        (_, other @ (Value::Array(_) | Value::Object(_))) => SqlValue::Text(other.to_string()),
    }
}

pub(crate) fn number_to_sql(number: &Number) -> SqlValue {
    if let Some(int) = number.as_i64() {
        SqlValue::Integer(int)
    } else {
        SqlValue::Real(number.as_f64().unwrap_or(f64::NAN))
    }
}

/// Stored column value -> record value for a field of `field_type`.
pub fn sql_to_json(field: &str, field_type: FieldType, value: SqlValue) -> EngineResult<Value> {
    let json = match (field_type, value) {
        (_, SqlValue::Null) => Value::Null,
        (FieldType::Boolean, SqlValue::Integer(int)) => Value::Bool(int != 0),
        (FieldType::Boolean, SqlValue::Text(text)) => match parse_bool(&text) {
            Some(flag) => Value::Bool(flag),
            None => return Err(invalid(field, &format!("boolean `{text}`"))),
        },
        (FieldType::Json, SqlValue::Text(text)) => serde_json::from_str(&text)
            .map_err(|err| invalid(field, &format!("json ({err})")))?,
        (FieldType::DateTime, SqlValue::Text(text)) => Value::String(normalize_timestamp(&text)),
        (FieldType::Date, SqlValue::Text(text)) => Value::String(normalize_date(&text)),
        (_, SqlValue::Integer(int)) => Value::from(int),
        (_, SqlValue::Real(real)) => Number::from_f64(real)
            .map(Value::Number)
            .ok_or_else(|| invalid(field, &format!("non-finite number `{real}`")))?,
        (_, SqlValue::Text(text)) => Value::String(text),
        (_, SqlValue::Blob(_)) => return Err(invalid(field, "binary value")),
    };
    Ok(json)
}

/// Truthy/falsy spellings accepted for boolean fields and filters.
pub fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "t" | "true" | "on" | "y" | "yes" => Some(true),
        "0" | "f" | "false" | "off" | "n" | "no" => Some(false),
        _ => None,
    }
}

fn invalid(field: &str, what: &str) -> EngineError {
    EngineError::InvalidData(format!("field `{field}` holds unreadable {what}"))
}

#[cfg(test)]
mod tests {
    use super::{json_to_sql, normalize_date, normalize_timestamp, parse_bool, sql_to_json};
    use crate::schema::FieldType;
    use rusqlite::types::Value as SqlValue;
    use serde_json::{json, Value};

    #[test]
    fn timestamps_are_truncated_to_seconds_without_zone() {
        assert_eq!(
            normalize_timestamp("2019-05-02T22:19:07.123456"),
            "2019-05-02 22:19:07"
        );
        assert_eq!(
            normalize_timestamp("2019-05-02 22:19:07.5"),
            "2019-05-02 22:19:07"
        );
        assert_eq!(
            normalize_timestamp("2019-05-02T22:19:07+08:00"),
            "2019-05-02 22:19:07"
        );
        assert_eq!(normalize_timestamp("2019-05-02"), "2019-05-02 00:00:00");
        assert_eq!(normalize_timestamp("not a time"), "not a time");
    }

    #[test]
    fn dates_drop_time_component() {
        assert_eq!(normalize_date("2019-05-02 22:19:07"), "2019-05-02");
        assert_eq!(normalize_date("2019-05-02"), "2019-05-02");
    }

    #[test]
    fn json_fields_roundtrip_through_text() {
        let value = json!({"a": [1, 2], "b": null});
        let stored = json_to_sql(FieldType::Json, &value);
        assert!(matches!(stored, SqlValue::Text(_)));
        let loaded = sql_to_json("payload", FieldType::Json, stored).unwrap();
        assert_eq!(loaded, value);
    }

    #[test]
    fn booleans_are_stored_as_integers() {
        assert_eq!(
            json_to_sql(FieldType::Boolean, &json!(true)),
            SqlValue::Integer(1)
        );
        assert_eq!(
            sql_to_json("flag", FieldType::Boolean, SqlValue::Integer(0)).unwrap(),
            Value::Bool(false)
        );
        assert_eq!(parse_bool(" Yes "), Some(true));
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn corrupt_json_is_reported() {
        let err = sql_to_json("payload", FieldType::Json, SqlValue::Text("{".into())).unwrap_err();
        assert!(err.to_string().contains("payload"));
    }
}
