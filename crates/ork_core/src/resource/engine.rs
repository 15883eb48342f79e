//! CRUD over one descriptor.
//!
//! # Responsibility
//! - Compile criteria into SQL and serialize rows into records.
//! - Scope every read and write in a session or transaction, reusing a
//!   caller-supplied handle when the engine was bound to one.
//!
//! # Invariants
//! - The descriptor default filter applies to every read and to key
//!   resolution, and the default order to unordered lists, unless the
//!   engine was built with `bypass_default_filter`.
//! - Writes run atomically: owned transactions commit on success and roll
//!   back on error; borrowed ones are left to their owner.
//! - Storage constraint failures surface as `ConstraintViolation`.

use super::{EngineError, EngineResult, RowId};
use crate::db::{AppContext, StorageHandle};
use crate::filter::operators::quote_ident;
use crate::filter::{
    compile_filters, compile_order, merge_default, order_by_sql, Criteria, Filters, OrderTerm,
    Predicate,
};
use crate::model::record::{json_to_sql, now_timestamp, sql_to_json, Record};
use crate::schema::validate::validate_fields;
use crate::schema::ResourceDescriptor;
use log::{debug, info, warn};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection, Row};
use std::time::Instant;

#[derive(Clone, Copy)]
enum Source<'a> {
    Context(&'a AppContext),
    Handle(StorageHandle<'a>),
}

/// Resource engine bound to one descriptor and one storage source.
#[derive(Clone, Copy)]
pub struct ResourceEngine<'a> {
    descriptor: &'a ResourceDescriptor,
    source: Source<'a>,
    apply_default: bool,
}

impl<'a> ResourceEngine<'a> {
    /// Engine that checks out its own session or transaction per call.
    pub fn new(descriptor: &'a ResourceDescriptor, context: &'a AppContext) -> Self {
        Self {
            descriptor,
            source: Source::Context(context),
            apply_default: true,
        }
    }

    /// Engine that runs every call inside a caller-owned session or transaction.
    pub fn with_handle(descriptor: &'a ResourceDescriptor, handle: impl Into<StorageHandle<'a>>) -> Self {
        Self {
            descriptor,
            source: Source::Handle(handle.into()),
            apply_default: true,
        }
    }

    /// Same engine without the descriptor default filter and default order.
    pub fn bypass_default_filter(mut self) -> Self {
        self.apply_default = false;
        self
    }

    pub fn descriptor(&self) -> &'a ResourceDescriptor {
        self.descriptor
    }

    /// Engine for another descriptor on the same storage source.
    pub fn sibling(&self, descriptor: &'a ResourceDescriptor) -> Self {
        Self {
            descriptor,
            source: self.source,
            apply_default: true,
        }
    }

    pub fn list(&self, criteria: &Criteria) -> EngineResult<Vec<Record>> {
        let started_at = Instant::now();
        let result = self.with_session(|conn| {
            let predicate = compile_filters(self.descriptor, &self.scoped(&criteria.filters));
            let orders = self.order_terms(criteria);
            let tail = format!(
                "{}{}",
                order_by_sql(&orders),
                page_sql(criteria.offset, criteria.limit)
            );
            let rows = self.select_rows(conn, &predicate, &tail)?;
            Ok(rows.iter().map(|row| self.descriptor.to_record(row)).collect::<Vec<_>>())
        });
        self.observe("list", started_at, &result, |rows| rows.len());
        result
    }

    pub fn count(&self, filters: &Filters) -> EngineResult<u64> {
        let started_at = Instant::now();
        let result = self.with_session(|conn| {
            let predicate = compile_filters(self.descriptor, &self.scoped(filters));
            let sql = format!(
                "SELECT COUNT(*) FROM {}{}",
                quote_ident(self.descriptor.table()),
                predicate.where_sql()
            );
            let count: i64 =
                conn.query_row(&sql, params_from_iter(predicate.params()), |row| row.get(0))?;
            Ok(u64::try_from(count).unwrap_or_default())
        });
        self.observe("count", started_at, &result, |count| *count as usize);
        result
    }

    /// Detail record for `rid`; `NotFound` when nothing matches.
    pub fn get(&self, rid: impl Into<RowId>) -> EngineResult<Record> {
        let rid = rid.into();
        let started_at = Instant::now();
        let result = self.with_session(|conn| {
            let row = self.find_one(conn, &rid)?;
            Ok(self.descriptor.to_detail_record(&row))
        });
        self.observe("get", started_at, &result, |_| 1);
        result
    }

    /// Runs `before_create`, validates, inserts and returns the stored row.
    pub fn create(&self, fields: Record) -> EngineResult<Record> {
        let started_at = Instant::now();
        let mut input = fields;
        if let Some(hook) = self.descriptor.before_create() {
            hook(&mut input);
        }

        let result = validate_fields(self.descriptor, &input).and_then(|values| {
            self.with_transaction(|conn| {
                let rowid = self.insert_row(conn, &values)?;
                let row = self.reload_created(conn, &values, rowid)?;
                Ok(self.descriptor.to_record(&row))
            })
        });
        self.observe("create", started_at, &result, |_| 1);
        result
    }

    /// Applies a partial update and returns `(before, after)`.
    ///
    /// Primary-key fields are not updatable and are ignored. An update with
    /// nothing left to set returns the current row twice without writing.
    pub fn update(&self, rid: impl Into<RowId>, fields: Record) -> EngineResult<(Record, Record)> {
        let rid = rid.into();
        let started_at = Instant::now();
        let result = validate_fields(self.descriptor, &fields).and_then(|mut values| {
            values.retain(|name, _| {
                let keep = !self.descriptor.is_primary_key(name);
                if !keep {
                    debug!(
                        "event=resource_update module=resource status=skip resource={} field={} reason=primary_key",
                        self.descriptor.name(),
                        name
                    );
                }
                keep
            });

            self.with_transaction(|conn| {
                let before = self.find_one(conn, &rid)?;
                if values.is_empty() {
                    let snapshot = self.descriptor.to_record(&before);
                    return Ok((snapshot.clone(), snapshot));
                }

                let key = self.key_only_predicate(&rid)?;
                let assignments: Vec<String> = values
                    .keys()
                    .map(|name| format!("{} = ?", quote_ident(name)))
                    .collect();
                let sql = format!(
                    "UPDATE {} SET {}{}",
                    quote_ident(self.descriptor.table()),
                    assignments.join(", "),
                    key.where_sql()
                );
                let mut params = self.bind_values(&values);
                params.extend(key.params().iter().cloned());
                conn.execute(&sql, params_from_iter(params))?;

                let after = self
                    .select_rows(conn, &key, " LIMIT 1")?
                    .into_iter()
                    .next()
                    .ok_or_else(|| self.not_found(&rid))?;
                Ok((
                    self.descriptor.to_record(&before),
                    self.descriptor.to_record(&after),
                ))
            })
        });
        self.observe("update", started_at, &result, |_| 1);
        result
    }

    /// Deletes (or soft-deletes) the rows matching `rid`.
    ///
    /// Returns the affected count and the rows as they were before the
    /// change; `(0, [])` when nothing matched.
    pub fn delete(&self, rid: impl Into<RowId>) -> EngineResult<(usize, Vec<Record>)> {
        let rid = rid.into();
        let started_at = Instant::now();
        let result = self.with_transaction(|conn| {
            let predicate = self.key_predicate(&rid)?;
            let rows = self.select_rows(conn, &predicate, "")?;
            if rows.is_empty() {
                return Ok((0, Vec::new()));
            }
            let snapshots: Vec<Record> = rows.iter().map(|row| self.descriptor.to_record(row)).collect();

            let table = quote_ident(self.descriptor.table());
            let affected = match self.descriptor.soft_delete_field() {
                Some(field) => {
                    let sql = format!(
                        "UPDATE {table} SET {} = ?{}",
                        quote_ident(field),
                        predicate.where_sql()
                    );
                    let mut params = vec![SqlValue::Text(now_timestamp())];
                    params.extend(predicate.params().iter().cloned());
                    conn.execute(&sql, params_from_iter(params))?
                }
                None => {
                    let sql = format!("DELETE FROM {table}{}", predicate.where_sql());
                    conn.execute(&sql, params_from_iter(predicate.params()))?
                }
            };
            Ok((affected, snapshots))
        });
        self.observe("delete", started_at, &result, |(count, _)| *count);
        result
    }

    fn with_session<T>(&self, f: impl FnOnce(&Connection) -> EngineResult<T>) -> EngineResult<T> {
        match self.source {
            Source::Context(context) => {
                let session = context.get_session()?;
                f(session.connection())
            }
            Source::Handle(StorageHandle::Session(session)) => f(session.connection()),
            Source::Handle(StorageHandle::Transaction(tx)) => tx.enter(f),
        }
    }

    fn with_transaction<T>(&self, f: impl FnOnce(&Connection) -> EngineResult<T>) -> EngineResult<T> {
        match self.source {
            Source::Context(context) => context.transaction(|tx| tx.enter(f)),
            Source::Handle(StorageHandle::Session(session)) => session.transaction(f),
            Source::Handle(StorageHandle::Transaction(tx)) => tx.enter(f),
        }
    }

    fn order_terms(&self, criteria: &Criteria) -> Vec<OrderTerm> {
        match criteria.orders.as_deref() {
            Some(orders) => compile_order(self.descriptor, orders),
            None if self.apply_default => {
                compile_order(self.descriptor, self.descriptor.default_order())
            }
            None => Vec::new(),
        }
    }

    fn scoped(&self, filters: &Filters) -> Filters {
        if self.apply_default {
            merge_default(filters, self.descriptor.default_filter())
        } else {
            filters.clone()
        }
    }

    /// Default-filter scoping plus one equality per primary key.
    fn key_predicate(&self, rid: &RowId) -> EngineResult<Predicate> {
        let mut predicate = compile_filters(self.descriptor, &self.scoped(&Filters::new()));
        self.push_key_terms(rid, &mut predicate)?;
        Ok(predicate)
    }

    fn key_only_predicate(&self, rid: &RowId) -> EngineResult<Predicate> {
        let mut predicate = Predicate::default();
        self.push_key_terms(rid, &mut predicate)?;
        Ok(predicate)
    }

    fn push_key_terms(&self, rid: &RowId, predicate: &mut Predicate) -> EngineResult<()> {
        for (key, value) in rid.resolve(self.descriptor.primary_keys())? {
            let field_type = self
                .descriptor
                .field(key)
                .map(|field| field.field_type)
                .ok_or_else(|| EngineError::critical(format!("primary key `{key}` is not declared")))?;
            predicate.push(
                format!("{} = ?", quote_ident(key)),
                vec![json_to_sql(field_type, &value)],
            );
        }
        Ok(())
    }

    fn find_one(&self, conn: &Connection, rid: &RowId) -> EngineResult<Record> {
        let predicate = self.key_predicate(rid)?;
        self.select_rows(conn, &predicate, " LIMIT 1")?
            .into_iter()
            .next()
            .ok_or_else(|| self.not_found(rid))
    }

    fn select_rows(&self, conn: &Connection, predicate: &Predicate, tail: &str) -> EngineResult<Vec<Record>> {
        let columns: Vec<String> = self
            .descriptor
            .fields()
            .iter()
            .map(|field| quote_ident(&field.name))
            .collect();
        let sql = format!(
            "SELECT {} FROM {}{}{}",
            columns.join(", "),
            quote_ident(self.descriptor.table()),
            predicate.where_sql(),
            tail
        );
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(predicate.params()))?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            records.push(self.read_row(row)?);
        }
        Ok(records)
    }

    fn read_row(&self, row: &Row<'_>) -> EngineResult<Record> {
        let mut record = Record::new();
        for (idx, field) in self.descriptor.fields().iter().enumerate() {
            let raw: SqlValue = row.get(idx)?;
            record.insert(field.name.clone(), sql_to_json(&field.name, field.field_type, raw)?);
        }
        Ok(record)
    }

    fn insert_row(&self, conn: &Connection, values: &Record) -> EngineResult<i64> {
        let table = quote_ident(self.descriptor.table());
        if values.is_empty() {
            conn.execute(&format!("INSERT INTO {table} DEFAULT VALUES"), [])?;
        } else {
            let columns: Vec<String> = values.keys().map(|name| quote_ident(name)).collect();
            let placeholders = vec!["?"; values.len()].join(", ");
            let sql = format!(
                "INSERT INTO {table} ({}) VALUES ({placeholders})",
                columns.join(", ")
            );
            conn.execute(&sql, params_from_iter(self.bind_values(values)))?;
        }
        Ok(conn.last_insert_rowid())
    }

    /// Reads a freshly inserted row back, by key when the input carried
    /// every primary key and by rowid otherwise.
    fn reload_created(&self, conn: &Connection, values: &Record, rowid: i64) -> EngineResult<Record> {
        let keys = self.descriptor.primary_keys();
        let mut predicate = Predicate::default();
        if keys.iter().all(|key| values.get(key).is_some_and(|v| !v.is_null())) {
            let rid = RowId::Composite(keys.iter().map(|key| values[key].clone()).collect());
            self.push_key_terms(&rid, &mut predicate)?;
        } else {
            predicate.push("rowid = ?".to_string(), vec![SqlValue::Integer(rowid)]);
        }
        self.select_rows(conn, &predicate, " LIMIT 1")?
            .into_iter()
            .next()
            .ok_or_else(|| {
                EngineError::InvalidData(format!(
                    "row inserted into {} could not be read back",
                    self.descriptor.name()
                ))
            })
    }

    fn bind_values(&self, values: &Record) -> Vec<SqlValue> {
        values
            .iter()
            .map(|(name, value)| match self.descriptor.field(name) {
                Some(field) => json_to_sql(field.field_type, value),
                None => SqlValue::Null,
            })
            .collect()
    }

    fn not_found(&self, rid: &RowId) -> EngineError {
        EngineError::NotFound {
            resource: self.descriptor.name().to_string(),
            rid: rid.to_string(),
        }
    }

    fn observe<T>(
        &self,
        operation: &str,
        started_at: Instant,
        result: &EngineResult<T>,
        rows: impl FnOnce(&T) -> usize,
    ) {
        let duration_ms = started_at.elapsed().as_millis();
        match result {
            Ok(value) if operation == "list" || operation == "count" || operation == "get" => debug!(
                "event=resource_{} module=resource status=ok resource={} rows={} duration_ms={}",
                operation,
                self.descriptor.name(),
                rows(value),
                duration_ms
            ),
            Ok(value) => info!(
                "event=resource_{} module=resource status=ok resource={} rows={} duration_ms={}",
                operation,
                self.descriptor.name(),
                rows(value),
                duration_ms
            ),
            Err(err) => warn!(
                "event=resource_{} module=resource status=error resource={} error_kind={:?} duration_ms={} error={}",
                operation,
                self.descriptor.name(),
                err.kind(),
                duration_ms,
                err
            ),
        }
    }
}

fn page_sql(offset: Option<u64>, limit: Option<u64>) -> String {
    let clamp = |value: u64| i64::try_from(value).unwrap_or(i64::MAX);
    match (limit, offset) {
        (Some(limit), offset) => format!(
            " LIMIT {} OFFSET {}",
            clamp(limit),
            clamp(offset.unwrap_or(0))
        ),
        (None, Some(offset)) if offset > 0 => format!(" LIMIT -1 OFFSET {}", clamp(offset)),
        (None, _) => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::{page_sql, ResourceEngine};
    use crate::builtin;
    use crate::db::AppContext;
    use crate::filter::Criteria;

    #[test]
    fn pagination_clauses() {
        assert_eq!(page_sql(None, None), "");
        assert_eq!(page_sql(Some(0), None), "");
        assert_eq!(page_sql(Some(5), None), " LIMIT -1 OFFSET 5");
        assert_eq!(page_sql(None, Some(10)), " LIMIT 10 OFFSET 0");
        assert_eq!(page_sql(Some(20), Some(10)), " LIMIT 10 OFFSET 20");
    }

    #[test]
    fn bypass_drops_default_order_but_keeps_explicit_orders() {
        let context = AppContext::new();
        let descriptor = builtin::descriptor(builtin::OPERATION_LOG).unwrap();
        let engine = ResourceEngine::new(descriptor, &context);

        let defaulted = engine.order_terms(&Criteria::new());
        assert_eq!(defaulted.len(), 1);
        assert_eq!(defaulted[0].field, "id");
        assert!(defaulted[0].ascending);

        let bypass = engine.bypass_default_filter();
        assert!(bypass.order_terms(&Criteria::new()).is_empty());
        let explicit = bypass.order_terms(&Criteria::new().orders(["-operate_time"]));
        assert_eq!(explicit.len(), 1);
        assert_eq!(explicit[0].field, "operate_time");
        assert!(!explicit[0].ascending);
    }
}
