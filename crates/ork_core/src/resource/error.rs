//! Engine error taxonomy.
//!
//! `NotFound`, `ConstraintViolation` and `Validation` are expected outcomes
//! for callers to branch on. `CriticalConfiguration` means a caller or
//! descriptor contract was broken and is logged loudly when raised.

use crate::db::DbError;
use log::error;
use rusqlite::ErrorCode;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type EngineResult<T> = Result<T, EngineError>;

/// Coarse classification for callers mapping errors onto a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    CriticalConfiguration,
    ConstraintViolation,
    StorageUnavailable,
    Validation,
    Internal,
}

#[derive(Debug)]
pub enum EngineError {
    NotFound { resource: String, rid: String },
    CriticalConfiguration(String),
    ConstraintViolation(String),
    StorageUnavailable(String),
    Validation { field: String, reason: String },
    Db(DbError),
    InvalidData(String),
}

impl EngineError {
    /// Builds a `CriticalConfiguration` error and logs it at error level.
    pub fn critical(message: impl Into<String>) -> Self {
        let message = message.into();
        error!(
            "event=critical_configuration module=resource status=error error={}",
            message
        );
        Self::CriticalConfiguration(message)
    }

    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::CriticalConfiguration(_) => ErrorKind::CriticalConfiguration,
            Self::ConstraintViolation(_) => ErrorKind::ConstraintViolation,
            Self::StorageUnavailable(_) => ErrorKind::StorageUnavailable,
            Self::Validation { .. } => ErrorKind::Validation,
            Self::Db(_) | Self::InvalidData(_) => ErrorKind::Internal,
        }
    }

    /// Conventional HTTP status for the external request layer.
    pub fn status_code(&self) -> u16 {
        match self.kind() {
            ErrorKind::NotFound => 404,
            ErrorKind::ConstraintViolation => 409,
            ErrorKind::StorageUnavailable => 503,
            ErrorKind::Validation => 400,
            ErrorKind::CriticalConfiguration | ErrorKind::Internal => 500,
        }
    }
}

impl Display for EngineError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound { resource, rid } => {
                write!(f, "the resource({rid}) you request not found in {resource}")
            }
            Self::CriticalConfiguration(message) => write!(f, "critical error: {message}"),
            Self::ConstraintViolation(message) => write!(f, "conflict: {message}"),
            Self::StorageUnavailable(message) => write!(f, "storage unavailable: {message}"),
            Self::Validation { field, reason } => {
                write!(f, "column {field} validate failed, because: {reason}")
            }
            Self::Db(err) => write!(f, "{err}"),
            Self::InvalidData(message) => write!(f, "invalid persisted data: {message}"),
        }
    }
}

impl Error for EngineError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for EngineError {
    fn from(value: DbError) -> Self {
        match value {
            DbError::Sqlite(err) => Self::from(err),
            DbError::AcquireTimeout { .. } | DbError::Pool(_) => {
                Self::StorageUnavailable(value.to_string())
            }
            DbError::PoolUninitialized
            | DbError::InvalidConfig(_)
            | DbError::UnsupportedSchemaVersion { .. }
            | DbError::ScopeViolation(_) => Self::critical(value.to_string()),
        }
    }
}

impl From<rusqlite::Error> for EngineError {
    fn from(value: rusqlite::Error) -> Self {
        match value.sqlite_error_code() {
            Some(ErrorCode::ConstraintViolation) => Self::ConstraintViolation(value.to_string()),
            Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked | ErrorCode::CannotOpen) => {
                Self::StorageUnavailable(value.to_string())
            }
            _ => Self::Db(DbError::Sqlite(value)),
        }
    }
}
