//! SQLite storage plumbing: connection bootstrap, pooling and unit-of-work scopes.
//!
//! # Responsibility
//! - Open and configure SQLite connections for the resource engine.
//! - Keep a bounded, refreshable pool of reusable connections per process.
//! - Provide session and transaction scopes with guaranteed release.
//!
//! # Invariants
//! - Migration version is tracked via `PRAGMA user_version`.
//! - A pool is only observable once it is fully built (`AppContext::refresh`).
//! - A checked-out connection is returned to its pool or closed on every exit path.

use std::error::Error;
use std::fmt::{Display, Formatter};

mod context;
pub mod migrations;
mod open;
mod pool;
mod scope;

pub use context::AppContext;
pub use open::{open_db, open_db_in_memory};
pub use pool::{ConnectionPool, PoolStatus, PooledConnection};
pub use scope::{Session, StorageHandle, TransactionHandle, TxState};

pub type DbResult<T> = Result<T, DbError>;

#[derive(Debug)]
pub enum DbError {
    Sqlite(rusqlite::Error),
    UnsupportedSchemaVersion {
        db_version: u32,
        latest_supported: u32,
    },
    /// The pool could not open its warm connections.
    Pool(r2d2::Error),
    /// `get_session`/`begin_transaction` before the first successful refresh.
    PoolUninitialized,
    AcquireTimeout {
        waited_ms: u128,
        capacity: usize,
    },
    InvalidConfig(String),
    /// A unit-of-work handle used after it was committed, rolled back or released.
    ScopeViolation(String),
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "{err}"),
            Self::UnsupportedSchemaVersion {
                db_version,
                latest_supported,
            } => write!(
                f,
                "database schema version {db_version} is newer than supported {latest_supported}"
            ),
            Self::Pool(err) => write!(f, "connection pool failed: {err}"),
            Self::PoolUninitialized => {
                write!(f, "connection pool is not initialized; call refresh first")
            }
            Self::AcquireTimeout {
                waited_ms,
                capacity,
            } => write!(
                f,
                "timed out after {waited_ms}ms waiting for a connection (capacity {capacity})"
            ),
            Self::InvalidConfig(message) => write!(f, "invalid pool configuration: {message}"),
            Self::ScopeViolation(message) => write!(f, "unit-of-work misuse: {message}"),
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            Self::Pool(err) => Some(err),
            Self::UnsupportedSchemaVersion { .. }
            | Self::PoolUninitialized
            | Self::AcquireTimeout { .. }
            | Self::InvalidConfig(_)
            | Self::ScopeViolation(_) => None,
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}
