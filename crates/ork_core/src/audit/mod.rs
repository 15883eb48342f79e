//! Change log and change publication for engine writes.
//!
//! # Responsibility
//! - Persist before/after snapshots of writes into `sys_operation_log`.
//! - Publish changes on a message bus keyed by `<operation>.<resource>`.
//!
//! # Invariants
//! - Audit failures are logged and swallowed; they never alter the result
//!   of the write being audited.
//! - A failed publish is retried exactly once, after one reconnect.
//! - Log entries are written on the audited engine's storage source, so a
//!   caller-owned transaction carries its entries with it.

use crate::builtin::{self, OPERATION_LOG};
use crate::config::AuditConfig;
use crate::logging::single_line;
use crate::model::record::{now_timestamp, Record};
use crate::resource::{EngineResult, ResourceEngine};
use log::{debug, error, warn};
use serde_json::{json, Value};
use std::error::Error;
use std::fmt::{Display, Formatter};

const MAX_ERROR_CHARS: usize = 200;

/// Acting identity recorded with every change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub tenant: String,
    pub user: String,
}

impl Credentials {
    pub fn new(tenant: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            tenant: tenant.into(),
            user: user.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Create,
    Update,
    Delete,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishError(pub String);

impl Display for PublishError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "publish failed: {}", self.0)
    }
}

impl Error for PublishError {}

/// Message bus seam. Implementations own their connection state.
pub trait MessagePublisher: Send + Sync {
    fn publish(&self, routing_key: &str, payload: &Value) -> Result<(), PublishError>;

    fn reconnect(&self) -> Result<(), PublishError>;
}

/// Audit hook invoked after successful engine writes.
#[derive(Clone, Copy)]
pub struct ChangeLog<'a> {
    config: &'a AuditConfig,
    publisher: Option<&'a dyn MessagePublisher>,
}

impl<'a> ChangeLog<'a> {
    pub fn new(config: &'a AuditConfig) -> Self {
        Self {
            config,
            publisher: None,
        }
    }

    pub fn with_publisher(mut self, publisher: &'a dyn MessagePublisher) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn record_create(
        &self,
        engine: &ResourceEngine<'_>,
        credentials: &Credentials,
        input: &Record,
        created: &Record,
    ) {
        self.emit(
            engine,
            Operation::Create,
            credentials,
            Value::Object(input.clone()),
            Value::Object(created.clone()),
        );
    }

    /// Records an update unless nothing outside the ignored fields changed.
    pub fn record_update(
        &self,
        engine: &ResourceEngine<'_>,
        credentials: &Credentials,
        before: &Record,
        after: &Record,
    ) {
        let resource = engine.descriptor().name();
        let ignored = self.config.ignored_fields(resource);
        if strip(before, ignored) == strip(after, ignored) {
            debug!(
                "event=audit_update module=audit status=skip resource={} reason=unchanged",
                resource
            );
            return;
        }
        self.emit(
            engine,
            Operation::Update,
            credentials,
            Value::Object(before.clone()),
            Value::Object(after.clone()),
        );
    }

    /// One entry per affected row, each with `before == after`.
    pub fn record_delete(&self, engine: &ResourceEngine<'_>, credentials: &Credentials, details: &[Record]) {
        for detail in details {
            let snapshot = Value::Object(detail.clone());
            self.emit(engine, Operation::Delete, credentials, snapshot.clone(), snapshot);
        }
    }

    fn emit(
        &self,
        engine: &ResourceEngine<'_>,
        operation: Operation,
        credentials: &Credentials,
        before: Value,
        after: Value,
    ) {
        let resource = engine.descriptor().name();
        if self.config.logs(resource) {
            if let Err(err) = write_entry(engine, operation, credentials, &before, &after) {
                error!(
                    "event=audit_log module=audit status=error resource={} operation={} error={}",
                    resource,
                    operation.as_str(),
                    single_line(&err.to_string(), MAX_ERROR_CHARS)
                );
            }
        }

        if let Some(publisher) = self.publisher {
            if self.config.message.publishes(resource) {
                let routing_key = format!("{}.{}", operation.as_str(), resource);
                let payload = json!({"data_before": before, "data_after": after});
                publish_with_retry(publisher, &routing_key, &payload);
            }
        }
    }
}

fn write_entry(
    engine: &ResourceEngine<'_>,
    operation: Operation,
    credentials: &Credentials,
    before: &Value,
    after: &Value,
) -> EngineResult<()> {
    let log_descriptor = builtin::descriptor(OPERATION_LOG)?;
    let mut entry = Record::new();
    entry.insert("resource".into(), engine.descriptor().name().into());
    entry.insert("tenant_uuid".into(), credentials.tenant.clone().into());
    entry.insert("user_name".into(), credentials.user.clone().into());
    entry.insert("operation".into(), operation.as_str().into());
    entry.insert("operate_time".into(), now_timestamp().into());
    entry.insert("data_before".into(), before.clone());
    entry.insert("data_after".into(), after.clone());
    engine.sibling(log_descriptor).create(entry)?;
    Ok(())
}

fn publish_with_retry(publisher: &dyn MessagePublisher, routing_key: &str, payload: &Value) {
    let Err(first) = publisher.publish(routing_key, payload) else {
        debug!("event=audit_publish module=audit status=ok routing_key={}", routing_key);
        return;
    };
    warn!(
        "event=audit_publish module=audit status=retry routing_key={} error={}",
        routing_key, first
    );

    if let Err(err) = publisher.reconnect() {
        error!(
            "event=audit_reconnect module=audit status=error routing_key={} error={}",
            routing_key, err
        );
        return;
    }
    match publisher.publish(routing_key, payload) {
        Ok(()) => debug!(
            "event=audit_publish module=audit status=ok routing_key={} attempt=2",
            routing_key
        ),
        Err(err) => error!(
            "event=audit_publish module=audit status=error routing_key={} attempt=2 error={}",
            routing_key, err
        ),
    }
}

fn strip(record: &Record, ignored: &[String]) -> Record {
    record
        .iter()
        .filter(|(name, _)| !ignored.contains(*name))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{publish_with_retry, strip, MessagePublisher, PublishError};
    use serde_json::{json, Value};
    use std::sync::Mutex;

    #[derive(Default)]
    struct ScriptedPublisher {
        failures_left: Mutex<u32>,
        reconnect_fails: bool,
        published: Mutex<Vec<String>>,
        reconnects: Mutex<u32>,
    }

    impl MessagePublisher for ScriptedPublisher {
        fn publish(&self, routing_key: &str, _payload: &Value) -> Result<(), PublishError> {
            let mut failures = self.failures_left.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(PublishError("channel closed".into()));
            }
            self.published.lock().unwrap().push(routing_key.to_string());
            Ok(())
        }

        fn reconnect(&self) -> Result<(), PublishError> {
            *self.reconnects.lock().unwrap() += 1;
            if self.reconnect_fails {
                return Err(PublishError("broker down".into()));
            }
            Ok(())
        }
    }

    #[test]
    fn one_failure_is_retried_after_reconnect() {
        let publisher = ScriptedPublisher {
            failures_left: Mutex::new(1),
            ..Default::default()
        };
        publish_with_retry(&publisher, "create.line", &json!({}));
        assert_eq!(*publisher.reconnects.lock().unwrap(), 1);
        assert_eq!(*publisher.published.lock().unwrap(), ["create.line"]);
    }

    #[test]
    fn second_failure_is_swallowed() {
        let publisher = ScriptedPublisher {
            failures_left: Mutex::new(5),
            ..Default::default()
        };
        publish_with_retry(&publisher, "delete.line", &json!({}));
        assert_eq!(*publisher.reconnects.lock().unwrap(), 1);
        assert_eq!(*publisher.failures_left.lock().unwrap(), 3);
        assert!(publisher.published.lock().unwrap().is_empty());
    }

    #[test]
    fn failed_reconnect_skips_the_retry() {
        let publisher = ScriptedPublisher {
            failures_left: Mutex::new(1),
            reconnect_fails: true,
            ..Default::default()
        };
        publish_with_retry(&publisher, "update.line", &json!({}));
        assert_eq!(*publisher.failures_left.lock().unwrap(), 0);
        assert!(publisher.published.lock().unwrap().is_empty());
    }

    #[test]
    fn strip_drops_ignored_fields() {
        let record = json!({"uuid": "a", "updated": "x"});
        let stripped = strip(record.as_object().unwrap(), &["updated".to_string()]);
        assert_eq!(Value::Object(stripped), json!({"uuid": "a"}));
    }
}
