//! Descriptors shipped with the engine.
//!
//! `sys_operation_log` backs the audit change log; `city` and `line` are
//! the traffic sample resources the bundled migrations create.

use crate::model::record::Record;
use crate::resource::{EngineError, EngineResult};
use crate::schema::{FieldDef, FieldType, ResourceDescriptor};
use once_cell::sync::OnceCell;
use serde_json::Value;
use uuid::Uuid;

pub const OPERATION_LOG: &str = "sys_operation_log";
pub const CITY: &str = "city";
pub const LINE: &str = "line";

static REGISTRY: OnceCell<Vec<ResourceDescriptor>> = OnceCell::new();

/// Looks up a built-in descriptor by resource name.
pub fn descriptor(name: &str) -> EngineResult<&'static ResourceDescriptor> {
    registry()?
        .iter()
        .find(|descriptor| descriptor.name() == name)
        .ok_or_else(|| EngineError::critical(format!("no descriptor bound for resource `{name}`")))
}

/// Names of every built-in resource.
pub fn names() -> EngineResult<Vec<&'static str>> {
    Ok(registry()?.iter().map(ResourceDescriptor::name).collect())
}

fn registry() -> EngineResult<&'static Vec<ResourceDescriptor>> {
    REGISTRY.get_or_try_init(|| Ok(vec![operation_log()?, city()?, line()?]))
}

fn operation_log() -> EngineResult<ResourceDescriptor> {
    ResourceDescriptor::builder(OPERATION_LOG)
        .field(FieldDef::new("id", FieldType::Integer).nullable())
        .field(FieldDef::string("resource", 127))
        .field(FieldDef::string("tenant_uuid", 36))
        .field(FieldDef::string("user_name", 63))
        .field(FieldDef::string("operation", 31))
        .field(FieldDef::new("operate_time", FieldType::DateTime))
        .field(FieldDef::new("data_before", FieldType::Json).nullable())
        .field(FieldDef::new("data_after", FieldType::Json).nullable())
        .primary_keys(["id"])
        .default_order(["+id"])
        .build()
}

fn city() -> EngineResult<ResourceDescriptor> {
    ResourceDescriptor::builder(CITY)
        .field(FieldDef::string("uuid", 63))
        .field(FieldDef::string("id", 63))
        .field(FieldDef::string("name", 255))
        .primary_keys(["uuid"])
        .build()
}

fn line() -> EngineResult<ResourceDescriptor> {
    ResourceDescriptor::builder(LINE)
        .field(FieldDef::string("uuid", 63))
        .field(FieldDef::new("id", FieldType::Integer).nullable())
        .field(FieldDef::string("name", 255))
        .field(FieldDef::string("city_id", 63).nullable())
        .field(FieldDef::new("removed", FieldType::DateTime).nullable())
        .primary_keys(["uuid"])
        .default_filter("removed", Value::Null)
        .soft_delete("removed")
        .summary_fields(["uuid", "name", "removed"])
        .before_create(assign_line_uuid)
        .build()
}

fn assign_line_uuid(input: &mut Record) {
    input.insert("uuid".to_string(), Value::String(prefixed_id("line-", 8)));
}

/// `prefix` followed by `len` lowercase hex characters of a random v4 UUID.
pub fn prefixed_id(prefix: &str, len: usize) -> String {
    let hex = Uuid::new_v4().simple().to_string();
    let len = len.min(hex.len());
    format!("{prefix}{}", &hex[..len])
}

#[cfg(test)]
mod tests {
    use super::{descriptor, names, prefixed_id, LINE};
    use crate::model::record::Record;
    use crate::resource::ErrorKind;

    #[test]
    fn registry_resolves_known_names() {
        assert_eq!(names().unwrap(), ["sys_operation_log", "city", "line"]);
        let line = descriptor(LINE).unwrap();
        assert_eq!(line.soft_delete_field(), Some("removed"));
        assert_eq!(line.primary_keys(), ["uuid".to_string()]);
    }

    #[test]
    fn unknown_resource_is_critical() {
        let err = descriptor("bus").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CriticalConfiguration);
    }

    #[test]
    fn line_hook_assigns_prefixed_uuid() {
        let hook = descriptor(LINE).unwrap().before_create().unwrap();
        let mut input = Record::new();
        hook(&mut input);
        let uuid = input["uuid"].as_str().unwrap();
        assert!(uuid.starts_with("line-"));
        assert_eq!(uuid.len(), 13);
        assert!(uuid[5..].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn prefixed_id_caps_length() {
        assert_eq!(prefixed_id("x", 64).len(), 33);
    }
}
