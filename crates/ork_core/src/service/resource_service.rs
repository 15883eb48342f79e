//! Resource use-case service.
//!
//! # Responsibility
//! - Provide the CRUD entry points request handlers call.
//! - Hand every successful write to the change log.
//!
//! # Invariants
//! - Audit outcome never changes the value or error a call returns.

use crate::audit::{ChangeLog, Credentials};
use crate::filter::Criteria;
use crate::model::record::Record;
use crate::resource::{EngineResult, ResourceEngine, RowId};
use serde::Serialize;

/// One page of a list call plus the unpaginated match count.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ListPage {
    pub count: u64,
    pub data: Vec<Record>,
}

/// Engine + change log bound to one acting identity.
pub struct ResourceService<'a> {
    engine: ResourceEngine<'a>,
    audit: ChangeLog<'a>,
    credentials: Credentials,
}

impl<'a> ResourceService<'a> {
    pub fn new(engine: ResourceEngine<'a>, audit: ChangeLog<'a>, credentials: Credentials) -> Self {
        Self {
            engine,
            audit,
            credentials,
        }
    }

    pub fn engine(&self) -> &ResourceEngine<'a> {
        &self.engine
    }

    /// Lists one page and counts every match of the same filters.
    ///
    /// # Contract
    /// - `count` ignores `offset`/`limit`; `data` honours them.
    pub fn list(&self, criteria: &Criteria) -> EngineResult<ListPage> {
        let count = self.engine.count(&criteria.filters)?;
        let data = self.engine.list(criteria)?;
        Ok(ListPage { count, data })
    }

    pub fn get(&self, rid: impl Into<RowId>) -> EngineResult<Record> {
        self.engine.get(rid)
    }

    /// Creates a row and logs `input -> created`.
    pub fn create(&self, input: Record) -> EngineResult<Record> {
        let created = self.engine.create(input.clone())?;
        self.audit
            .record_create(&self.engine, &self.credentials, &input, &created);
        Ok(created)
    }

    /// Updates a row and returns its new state.
    ///
    /// # Contract
    /// - Logs only when a non-ignored field changed.
    pub fn update(&self, rid: impl Into<RowId>, fields: Record) -> EngineResult<Record> {
        let (before, after) = self.engine.update(rid, fields)?;
        self.audit
            .record_update(&self.engine, &self.credentials, &before, &after);
        Ok(after)
    }

    /// Deletes matching rows and logs one entry per row.
    pub fn delete(&self, rid: impl Into<RowId>) -> EngineResult<(usize, Vec<Record>)> {
        let (count, details) = self.engine.delete(rid)?;
        self.audit
            .record_delete(&self.engine, &self.credentials, &details);
        Ok((count, details))
    }
}
