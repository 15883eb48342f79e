//! Session and transaction scopes over pooled connections.
//!
//! # Responsibility
//! - Own one pooled connection for the lifetime of a logical unit of work.
//! - Guarantee commit-or-rollback and release on every exit path.
//! - Let several engines share one unit of work by borrowing the same handle.
//!
//! # Invariants
//! - Transaction state moves `Idle -> Acquired -> {Committed | RolledBack} -> Released`.
//! - Nested participation (`enter`) never commits or rolls back.
//! - A handle dropped while `Acquired` rolls back before its connection is released.
//! - Write scopes take the write lock up front (`BEGIN IMMEDIATE`); contending
//!   writers wait on the busy timeout.

use super::pool::PooledConnection;
use super::{DbError, DbResult};
use log::{debug, error, info, warn};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::cell::Cell;

/// Lifecycle of a [`TransactionHandle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    Idle,
    Acquired,
    Committed,
    RolledBack,
    Released,
}

/// Read-oriented scope: one pooled connection in autocommit mode.
pub struct Session {
    conn: PooledConnection,
}

impl Session {
    pub(crate) fn new(conn: PooledConnection) -> Self {
        Self { conn }
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Runs `f` atomically on this session's connection.
    ///
    /// Joins the open transaction instead when one is already active on the
    /// connection, leaving commit to whoever opened it.
    pub fn transaction<T, E>(&self, f: impl FnOnce(&Connection) -> Result<T, E>) -> Result<T, E>
    where
        E: From<DbError>,
    {
        run_atomic(&self.conn, f)
    }

    /// Returns the connection to the pool.
    pub fn release(self) {}
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.conn.is_autocommit() {
            return;
        }
        warn!("event=session_release module=db status=error error_code=open_transaction_on_release");
        if let Err(err) = self.conn.execute_batch("ROLLBACK;") {
            error!(
                "event=session_release module=db status=error error_code=rollback_failed error={}",
                err
            );
        }
    }
}

/// Write-oriented scope that several engines may borrow to share atomicity.
pub struct TransactionHandle {
    conn: Option<PooledConnection>,
    state: Cell<TxState>,
    depth: Cell<u32>,
}

impl TransactionHandle {
    pub(crate) fn begin(conn: PooledConnection) -> DbResult<Self> {
        let state = Cell::new(TxState::Idle);
        conn.execute_batch("BEGIN IMMEDIATE;")?;
        state.set(TxState::Acquired);
        debug!("event=tx_begin module=db status=ok");
        Ok(Self {
            conn: Some(conn),
            state,
            depth: Cell::new(0),
        })
    }

    pub fn state(&self) -> TxState {
        self.state.get()
    }

    /// Number of engine calls currently running inside this transaction.
    pub fn depth(&self) -> u32 {
        self.depth.get()
    }

    /// Participates in the open transaction without owning its outcome.
    pub fn enter<T, E>(&self, f: impl FnOnce(&Connection) -> Result<T, E>) -> Result<T, E>
    where
        E: From<DbError>,
    {
        let conn = self.active_connection()?;
        self.depth.set(self.depth.get() + 1);
        let result = f(conn);
        self.depth.set(self.depth.get() - 1);
        result
    }

    /// Commits and releases the connection. A failed commit rolls back.
    pub fn commit(mut self) -> DbResult<()> {
        let conn = self.active_connection()?;
        match conn.execute_batch("COMMIT;") {
            Ok(()) => {
                self.state.set(TxState::Committed);
                info!("event=tx_commit module=db status=ok");
                self.release();
                Ok(())
            }
            Err(err) => {
                error!(
                    "event=tx_commit module=db status=error error_code=commit_failed error={}",
                    err
                );
                self.rollback_in_place();
                self.release();
                Err(err.into())
            }
        }
    }

    /// Rolls back and releases the connection.
    pub fn rollback(mut self) -> DbResult<()> {
        self.active_connection()?;
        self.rollback_in_place();
        self.release();
        Ok(())
    }

    fn active_connection(&self) -> DbResult<&Connection> {
        match (&self.conn, self.state.get()) {
            (Some(conn), TxState::Acquired) => Ok(&**conn),
            (_, state) => Err(DbError::ScopeViolation(format!(
                "transaction is not active (state {state:?})"
            ))),
        }
    }

    fn rollback_in_place(&mut self) {
        if let Some(conn) = self.conn.as_ref() {
            if conn.is_autocommit() {
                self.state.set(TxState::RolledBack);
                return;
            }
            match conn.execute_batch("ROLLBACK;") {
                Ok(()) => info!("event=tx_rollback module=db status=ok"),
                Err(err) => error!(
                    "event=tx_rollback module=db status=error error_code=rollback_failed error={}",
                    err
                ),
            }
        }
        self.state.set(TxState::RolledBack);
    }

    fn release(&mut self) {
        self.conn = None;
        self.state.set(TxState::Released);
    }
}

impl Drop for TransactionHandle {
    fn drop(&mut self) {
        if self.state.get() == TxState::Acquired {
            self.rollback_in_place();
        }
        self.release();
    }
}

/// An externally supplied unit of work an engine can be bound to.
#[derive(Clone, Copy)]
pub enum StorageHandle<'h> {
    Session(&'h Session),
    Transaction(&'h TransactionHandle),
}

impl<'h> From<&'h Session> for StorageHandle<'h> {
    fn from(value: &'h Session) -> Self {
        Self::Session(value)
    }
}

impl<'h> From<&'h TransactionHandle> for StorageHandle<'h> {
    fn from(value: &'h TransactionHandle) -> Self {
        Self::Transaction(value)
    }
}

/// Commit on `Ok`, roll back on `Err`, join when a transaction is already open.
pub(crate) fn run_atomic<T, E>(
    conn: &Connection,
    f: impl FnOnce(&Connection) -> Result<T, E>,
) -> Result<T, E>
where
    E: From<DbError>,
{
    if !conn.is_autocommit() {
        return f(conn);
    }

    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)
        .map_err(DbError::from)?;
    match f(&tx) {
        Ok(value) => {
            tx.commit().map_err(DbError::from)?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback() {
                error!(
                    "event=tx_rollback module=db status=error error_code=rollback_failed error={}",
                    rollback_err
                );
            }
            Err(err)
        }
    }
}
