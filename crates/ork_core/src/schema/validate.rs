//! Write-time validation of caller input against a descriptor.
//!
//! Unknown keys are dropped; known keys are checked and coerced to the
//! JSON shape the field type expects. The first failing field is reported.

use super::{FieldDef, FieldType, ResourceDescriptor};
use crate::model::record::{format_timestamp, parse_bool, parse_date, parse_timestamp, Record};
use crate::resource::{EngineError, EngineResult};
use log::debug;
use serde_json::{Number, Value};

/// Returns the known, coerced subset of `input` in descriptor field order.
pub fn validate_fields(descriptor: &ResourceDescriptor, input: &Record) -> EngineResult<Record> {
    for key in input.keys() {
        if descriptor.field(key).is_none() {
            debug!(
                "event=validate module=schema status=skip resource={} field={} reason=unknown_field",
                descriptor.name(),
                key
            );
        }
    }

    let mut validated = Record::new();
    for field in descriptor.fields() {
        if let Some(value) = input.get(&field.name) {
            validated.insert(field.name.clone(), validate_value(field, value)?);
        }
    }
    Ok(validated)
}

/// Checks one value against one field definition.
pub fn validate_value(field: &FieldDef, value: &Value) -> EngineResult<Value> {
    if value.is_null() {
        return if field.nullable {
            Ok(Value::Null)
        } else {
            Err(EngineError::validation(&field.name, "must not be null"))
        };
    }

    let reject = |reason: &str| EngineError::validation(&field.name, reason);

    match field.field_type {
        FieldType::SmallInteger | FieldType::Integer | FieldType::BigInteger => {
            let parsed = match value {
                Value::Number(number) => number.as_i64(),
                Value::String(text) => text.trim().parse::<i64>().ok(),
                _ => None,
            };
            let number = parsed.ok_or_else(|| reject("must be int type"))?;
            if field.field_type == FieldType::SmallInteger && i16::try_from(number).is_err() {
                return Err(reject("must be between -32768 and 32767"));
            }
            Ok(Value::from(number))
        }
        FieldType::Numeric | FieldType::Float => match value {
            Value::Number(_) => Ok(value.clone()),
            Value::String(text) => text
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .map(Value::Number)
                .ok_or_else(|| reject("must be float type")),
            _ => Err(reject("must be float type")),
        },
        FieldType::Boolean => match value {
            Value::Bool(_) => Ok(value.clone()),
            Value::Number(number) => match number.as_i64() {
                Some(0) => Ok(Value::Bool(false)),
                Some(1) => Ok(Value::Bool(true)),
                _ => Err(reject("must be boolean type")),
            },
            Value::String(text) => parse_bool(text)
                .map(Value::Bool)
                .ok_or_else(|| reject("must be boolean type")),
            _ => Err(reject("must be boolean type")),
        },
        FieldType::String => {
            let Value::String(text) = value else {
                return Err(reject("must be string type"));
            };
            let length = text.chars().count();
            match field.max_length {
                Some(max) if length > max => Err(reject(&format!(
                    "length must be at 0 <= {length} <= {max}"
                ))),
                _ => Ok(value.clone()),
            }
        }
        FieldType::Text | FieldType::Inet | FieldType::Cidr | FieldType::MacAddr => match value {
            Value::String(_) => Ok(value.clone()),
            _ => Err(reject("must be string type")),
        },
        FieldType::Json => match value {
            Value::Object(_) | Value::Array(_) => Ok(value.clone()),
            _ => Err(reject("must be dict or list")),
        },
        FieldType::DateTime => value
            .as_str()
            .and_then(parse_timestamp)
            .map(|ts| Value::String(format_timestamp(&ts)))
            .ok_or_else(|| reject("must be datetime type")),
        FieldType::Date => value
            .as_str()
            .and_then(parse_date)
            .map(|date| Value::String(date.format("%Y-%m-%d").to_string()))
            .ok_or_else(|| reject("must be date type")),
    }
}

#[cfg(test)]
mod tests {
    use super::{validate_fields, validate_value};
    use crate::resource::ErrorKind;
    use crate::schema::{FieldDef, FieldType, ResourceDescriptor};
    use serde_json::json;

    fn descriptor() -> ResourceDescriptor {
        ResourceDescriptor::builder("device")
            .field(FieldDef::string("uuid", 8))
            .field(FieldDef::new("port", FieldType::Integer).nullable())
            .field(FieldDef::new("enabled", FieldType::Boolean).nullable())
            .field(FieldDef::new("seen", FieldType::DateTime).nullable())
            .field(FieldDef::new("tags", FieldType::Json).nullable())
            .primary_keys(["uuid"])
            .build()
            .unwrap()
    }

    #[test]
    fn coerces_strings_and_drops_unknown_keys() {
        let input = json!({
            "uuid": "dev-1",
            "port": "8080",
            "enabled": "yes",
            "seen": "2024-01-02T03:04:05.999",
            "tags": ["edge"],
            "owner": "nobody"
        });
        let validated = validate_fields(&descriptor(), input.as_object().unwrap()).unwrap();

        assert_eq!(
            serde_json::Value::Object(validated),
            json!({
                "uuid": "dev-1",
                "port": 8080,
                "enabled": true,
                "seen": "2024-01-02 03:04:05",
                "tags": ["edge"]
            })
        );
    }

    #[test]
    fn enforces_max_length_and_nullability() {
        let descriptor = descriptor();
        let uuid = descriptor.field("uuid").unwrap();

        let err = validate_value(uuid, &json!("too-long-id")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let err = validate_value(uuid, &json!(null)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let port = descriptor.field("port").unwrap();
        assert_eq!(validate_value(port, &json!(null)).unwrap(), json!(null));
        assert!(validate_value(port, &json!("eighty")).is_err());
    }

    #[test]
    fn integers_must_fit_their_column() {
        let port = FieldDef::new("port", FieldType::Integer);
        assert_eq!(validate_value(&port, &json!(i64::MAX)).unwrap(), json!(i64::MAX));
        let err = validate_value(&port, &json!(u64::MAX)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(err.to_string().contains("must be int type"));
        assert!(validate_value(&port, &json!(1.5)).is_err());

        let level = FieldDef::new("level", FieldType::SmallInteger);
        assert_eq!(validate_value(&level, &json!("-32768")).unwrap(), json!(-32768));
        assert!(validate_value(&level, &json!(32768)).is_err());
        assert!(validate_value(&level, &json!(-40000)).is_err());
    }
}
