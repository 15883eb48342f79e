//! Generic resource data-access engine.
//! Descriptors declare resources; one engine serves list/count/get/create/update/delete for all of them.

pub mod audit;
pub mod builtin;
pub mod config;
pub mod db;
pub mod executor;
pub mod filter;
pub mod logging;
pub mod model;
pub mod resource;
pub mod schema;
pub mod service;

pub use audit::{ChangeLog, Credentials, MessagePublisher, Operation, PublishError};
pub use config::{AppConfig, AuditConfig, ConfigError, LogConfig, PoolConfig};
pub use db::{AppContext, DbError, DbResult, Session, StorageHandle, TransactionHandle, TxState};
pub use executor::BlockingExecutor;
pub use filter::query::parse_criteria;
pub use filter::{merge_default, Criteria, Filters};
pub use logging::{default_log_level, init_from_config, init_logging, logging_status};
pub use model::record::Record;
pub use resource::{EngineError, EngineResult, ErrorKind, ResourceEngine, RowId};
pub use schema::{FieldDef, FieldType, ResourceDescriptor};
pub use service::resource_service::{ListPage, ResourceService};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
