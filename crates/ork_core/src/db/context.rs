//! Application context owning the process-wide connection pool.
//!
//! # Responsibility
//! - Hold at most one live pool and rebind it on `refresh`.
//! - Hand out sessions and transactions from the current pool.
//!
//! # Invariants
//! - Readers observe either the previous pool or the fully built new one.
//! - Before the first successful refresh every checkout fails with `PoolUninitialized`.

use super::pool::{ConnectionPool, PoolStatus};
use super::scope::{Session, TransactionHandle};
use super::{DbError, DbResult};
use crate::config::PoolConfig;
use log::{error, info, warn};
use once_cell::sync::Lazy;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

static GLOBAL_CONTEXT: Lazy<AppContext> = Lazy::new(AppContext::new);

#[derive(Default)]
pub struct AppContext {
    pool: RwLock<Option<Arc<ConnectionPool>>>,
}

impl AppContext {
    /// Creates an uninitialized context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a context and refreshes it with `config`.
    pub fn with_config(config: PoolConfig) -> DbResult<Self> {
        let context = Self::new();
        context.refresh(config)?;
        Ok(context)
    }

    /// The per-process context used by callers that do not inject their own.
    pub fn global() -> &'static AppContext {
        &GLOBAL_CONTEXT
    }

    /// Builds a pool from `config` and swaps it in. The previous pool, if
    /// any, stops handing out connections and closes once its checked-out
    /// connections come back.
    pub fn refresh(&self, config: PoolConfig) -> DbResult<()> {
        let started_at = Instant::now();
        let pool = match ConnectionPool::build(config) {
            Ok(pool) => Arc::new(pool),
            Err(err) => {
                error!(
                    "event=pool_refresh module=db status=error duration_ms={} error={}",
                    started_at.elapsed().as_millis(),
                    err
                );
                return Err(err);
            }
        };

        let previous = self.write_slot().replace(pool);
        if let Some(previous) = previous {
            previous.close();
        }
        info!(
            "event=pool_refresh module=db status=ok duration_ms={}",
            started_at.elapsed().as_millis()
        );
        Ok(())
    }

    pub fn shutdown(&self) {
        if let Some(pool) = self.write_slot().take() {
            pool.close();
            info!("event=pool_shutdown module=db status=ok");
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.read_slot().is_some()
    }

    pub fn status(&self) -> Option<PoolStatus> {
        self.read_slot().as_ref().map(|pool| pool.status())
    }

    pub fn pool(&self) -> DbResult<Arc<ConnectionPool>> {
        self.read_slot()
            .as_ref()
            .map(Arc::clone)
            .ok_or(DbError::PoolUninitialized)
    }

    pub fn get_session(&self) -> DbResult<Session> {
        let conn = self.pool()?.acquire()?;
        Ok(Session::new(conn))
    }

    pub fn begin_transaction(&self) -> DbResult<TransactionHandle> {
        let conn = self.pool()?.acquire()?;
        TransactionHandle::begin(conn)
    }

    /// Runs `f` inside a fresh transaction: commit on `Ok`, rollback on `Err`,
    /// release on both.
    pub fn transaction<T, E>(&self, f: impl FnOnce(&TransactionHandle) -> Result<T, E>) -> Result<T, E>
    where
        E: From<DbError>,
    {
        let tx = self.begin_transaction()?;
        match f(&tx) {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(err) => {
                tx.rollback()?;
                Err(err)
            }
        }
    }

    fn read_slot(&self) -> RwLockReadGuard<'_, Option<Arc<ConnectionPool>>> {
        match self.pool.read() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("event=context_lock module=db status=recovered error_code=rwlock_poisoned");
                poisoned.into_inner()
            }
        }
    }

    fn write_slot(&self) -> RwLockWriteGuard<'_, Option<Arc<ConnectionPool>>> {
        match self.pool.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("event=context_lock module=db status=recovered error_code=rwlock_poisoned");
                poisoned.into_inner()
            }
        }
    }
}
