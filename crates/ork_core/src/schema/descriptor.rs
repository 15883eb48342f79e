//! Resource descriptor: static metadata for one storage-backed resource type.
//!
//! # Invariants
//! - At least one primary key; every key, default filter field, default
//!   order field and the soft-delete field name a declared field.
//! - Immutable after `build()`; shared by reference across threads.

use crate::filter::Filters;
use crate::model::record::Record;
use crate::resource::{EngineError, EngineResult};
use serde_json::Value;

/// Declared semantic type of a field. Decides which filter handler and
/// which validation/coercion rules apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    SmallInteger,
    Integer,
    BigInteger,
    Numeric,
    Float,
    Date,
    DateTime,
    Inet,
    Cidr,
    MacAddr,
    Boolean,
    String,
    Text,
    Json,
}

impl FieldType {
    pub fn is_integer(self) -> bool {
        matches!(self, Self::SmallInteger | Self::Integer | Self::BigInteger)
    }

    pub fn is_number(self) -> bool {
        self.is_integer() || matches!(self, Self::Numeric | Self::Float)
    }

    pub fn is_temporal(self) -> bool {
        matches!(self, Self::Date | Self::DateTime)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDef {
    pub name: String,
    pub field_type: FieldType,
    pub nullable: bool,
    /// Character limit for `String` fields.
    pub max_length: Option<usize>,
}

impl FieldDef {
    /// A non-nullable field without a length limit.
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            nullable: false,
            max_length: None,
        }
    }

    /// Shorthand for a `String` field limited to `max_length` characters.
    pub fn string(name: impl Into<String>, max_length: usize) -> Self {
        Self::new(name, FieldType::String).max_length(max_length)
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn max_length(mut self, max_length: usize) -> Self {
        self.max_length = Some(max_length);
        self
    }
}

/// Input enrichment run by `create` before validation and insert.
pub type BeforeCreate = fn(&mut Record);

#[derive(Debug, Clone)]
pub struct ResourceDescriptor {
    name: String,
    table: String,
    fields: Vec<FieldDef>,
    primary_keys: Vec<String>,
    default_filter: Filters,
    default_order: Vec<String>,
    soft_delete_field: Option<String>,
    summary_fields: Vec<String>,
    detail_fields: Vec<String>,
    before_create: Option<BeforeCreate>,
}

impl ResourceDescriptor {
    pub fn builder(name: impl Into<String>) -> DescriptorBuilder {
        DescriptorBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|field| field.name == name)
    }

    pub fn primary_keys(&self) -> &[String] {
        &self.primary_keys
    }

    pub fn default_filter(&self) -> &Filters {
        &self.default_filter
    }

    pub fn default_order(&self) -> &[String] {
        &self.default_order
    }

    pub fn soft_delete_field(&self) -> Option<&str> {
        self.soft_delete_field.as_deref()
    }

    pub fn before_create(&self) -> Option<BeforeCreate> {
        self.before_create
    }

    pub fn is_primary_key(&self, name: &str) -> bool {
        self.primary_keys.iter().any(|key| key == name)
    }

    /// Summary projection of a full row (`list`, write results).
    pub fn to_record(&self, row: &Record) -> Record {
        project(row, &self.summary_fields)
    }

    /// Full projection of a full row (`get`).
    pub fn to_detail_record(&self, row: &Record) -> Record {
        project(row, &self.detail_fields)
    }
}

fn project(row: &Record, names: &[String]) -> Record {
    names
        .iter()
        .map(|name| {
            let value = row.get(name).cloned().unwrap_or(Value::Null);
            (name.clone(), value)
        })
        .collect()
}

/// Step-by-step descriptor construction with validation at `build()`.
#[derive(Debug, Clone)]
pub struct DescriptorBuilder {
    name: String,
    table: Option<String>,
    fields: Vec<FieldDef>,
    primary_keys: Vec<String>,
    default_filter: Filters,
    default_order: Vec<String>,
    soft_delete_field: Option<String>,
    summary_fields: Option<Vec<String>>,
    detail_fields: Option<Vec<String>>,
    before_create: Option<BeforeCreate>,
}

impl DescriptorBuilder {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: None,
            fields: Vec::new(),
            primary_keys: Vec::new(),
            default_filter: Filters::new(),
            default_order: Vec::new(),
            soft_delete_field: None,
            summary_fields: None,
            detail_fields: None,
            before_create: None,
        }
    }

    /// Storage table; defaults to the resource name.
    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    pub fn field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    pub fn primary_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.primary_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Adds one always-on filter term (`field -> value | {op: value}`).
    pub fn default_filter(mut self, field: impl Into<String>, value: Value) -> Self {
        self.default_filter.insert(field.into(), value);
        self
    }

    /// Signed field names, e.g. `["-created", "+name"]`.
    pub fn default_order<I, S>(mut self, order: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.default_order = order.into_iter().map(Into::into).collect();
        self
    }

    pub fn soft_delete(mut self, field: impl Into<String>) -> Self {
        self.soft_delete_field = Some(field.into());
        self
    }

    pub fn summary_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.summary_fields = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn detail_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.detail_fields = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn before_create(mut self, hook: BeforeCreate) -> Self {
        self.before_create = Some(hook);
        self
    }

    pub fn build(self) -> EngineResult<ResourceDescriptor> {
        let all_fields: Vec<String> = self.fields.iter().map(|f| f.name.clone()).collect();
        let known = |name: &str| all_fields.iter().any(|field| field == name);

        if self.fields.is_empty() {
            return Err(self.invalid("at least one field is required"));
        }
        for (idx, name) in all_fields.iter().enumerate() {
            if all_fields[..idx].contains(name) {
                return Err(self.invalid(&format!("duplicate field `{name}`")));
            }
        }
        if self.primary_keys.is_empty() {
            return Err(self.invalid("at least one primary key is required"));
        }
        if let Some(key) = self.primary_keys.iter().find(|key| !known(key.as_str())) {
            return Err(self.invalid(&format!("primary key `{key}` is not a declared field")));
        }
        if let Some(field) = self.default_filter.keys().find(|field| !known(field.as_str())) {
            return Err(self.invalid(&format!("default filter names unknown field `{field}`")));
        }
        if let Some(order) = self
            .default_order
            .iter()
            .find(|order| !known(order.trim_start_matches(['+', '-'])))
        {
            return Err(self.invalid(&format!("default order names unknown field `{order}`")));
        }
        if let Some(field) = self.soft_delete_field.as_deref() {
            if !known(field) {
                return Err(self.invalid(&format!("soft-delete field `{field}` is not declared")));
            }
        }
        for projection in [&self.summary_fields, &self.detail_fields]
            .into_iter()
            .flatten()
        {
            if let Some(field) = projection.iter().find(|field| !known(field.as_str())) {
                return Err(self.invalid(&format!("projection names unknown field `{field}`")));
            }
        }

        Ok(ResourceDescriptor {
            table: self.table.unwrap_or_else(|| self.name.clone()),
            summary_fields: self.summary_fields.unwrap_or_else(|| all_fields.clone()),
            detail_fields: self.detail_fields.unwrap_or(all_fields),
            name: self.name,
            fields: self.fields,
            primary_keys: self.primary_keys,
            default_filter: self.default_filter,
            default_order: self.default_order,
            soft_delete_field: self.soft_delete_field,
            before_create: self.before_create,
        })
    }

    fn invalid(&self, reason: &str) -> EngineError {
        EngineError::critical(format!("descriptor `{}`: {reason}", self.name))
    }
}

#[cfg(test)]
mod tests {
    use super::{FieldDef, FieldType, ResourceDescriptor};
    use crate::resource::ErrorKind;
    use serde_json::{json, Value};

    fn builder() -> super::DescriptorBuilder {
        ResourceDescriptor::builder("person")
            .field(FieldDef::string("uuid", 36))
            .field(FieldDef::string("name", 64))
            .field(FieldDef::new("age", FieldType::Integer).nullable())
            .field(FieldDef::new("removed", FieldType::DateTime).nullable())
    }

    #[test]
    fn build_applies_defaults() {
        let descriptor = builder()
            .primary_keys(["uuid"])
            .default_filter("removed", Value::Null)
            .soft_delete("removed")
            .summary_fields(["uuid", "name"])
            .build()
            .unwrap();

        assert_eq!(descriptor.table(), "person");
        assert_eq!(descriptor.primary_keys(), ["uuid".to_string()]);
        assert_eq!(descriptor.soft_delete_field(), Some("removed"));
        assert!(descriptor.field("age").unwrap().nullable);

        let row = json!({"uuid": "p-1", "name": "Ann", "age": 30, "removed": null});
        let row = row.as_object().unwrap();
        let summary = descriptor.to_record(row);
        assert_eq!(summary.keys().collect::<Vec<_>>(), ["uuid", "name"]);
        let detail = descriptor.to_detail_record(row);
        assert_eq!(detail.len(), 4);
    }

    #[test]
    fn build_rejects_missing_or_unknown_primary_key() {
        let err = builder().build().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CriticalConfiguration);

        let err = builder().primary_keys(["id"]).build().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CriticalConfiguration);
    }

    #[test]
    fn build_rejects_unknown_scoping_fields() {
        let err = builder()
            .primary_keys(["uuid"])
            .default_filter("deleted", json!(false))
            .build()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CriticalConfiguration);

        let err = builder()
            .primary_keys(["uuid"])
            .default_order(["-created"])
            .build()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CriticalConfiguration);

        let err = builder()
            .primary_keys(["uuid"])
            .soft_delete("deleted_at")
            .build()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CriticalConfiguration);
    }
}
