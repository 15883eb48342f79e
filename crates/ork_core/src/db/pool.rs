//! Bounded pool of reusable SQLite connections on top of `r2d2`.
//!
//! # Responsibility
//! - Hand out exclusive connections up to `pool_size + max_overflow`.
//! - Keep `pool_size` connections warm and retire connections older than
//!   the recycle interval.
//! - Fail with `AcquireTimeout` when no connection frees up in time.
//!
//! # Invariants
//! - Migrations run once, before the first pooled connection is opened.
//! - Every pooled connection carries the session pragmas from `configure_connection`.
//! - `:memory:` pools share one private in-memory database that lives as
//!   long as the pool.

use super::open::{configure_connection, open_db};
use super::{DbError, DbResult};
use crate::config::PoolConfig;
use log::{debug, info, warn};
use r2d2::{CustomizeConnection, Pool};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Instant;
use uuid::Uuid;

const IN_MEMORY: &str = ":memory:";

/// A checked-out connection; dropping it returns the connection to its pool.
pub type PooledConnection = r2d2::PooledConnection<SqliteConnectionManager>;

/// Point-in-time pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    pub idle: usize,
    pub in_use: usize,
    pub capacity: usize,
}

#[derive(Debug)]
struct SessionPragmas;

impl CustomizeConnection<Connection, rusqlite::Error> for SessionPragmas {
    fn on_acquire(&self, conn: &mut Connection) -> Result<(), rusqlite::Error> {
        configure_connection(conn)?;
        debug!("event=pool_connect module=db status=ok");
        Ok(())
    }
}

pub struct ConnectionPool {
    config: PoolConfig,
    inner: Pool<SqliteConnectionManager>,
    closed: AtomicBool,
    // Holds a shared in-memory database open while pooled connections come and go.
    anchor: Option<Mutex<Connection>>,
}

impl ConnectionPool {
    /// Applies migrations through a bootstrap connection, then builds the
    /// pool and waits until `pool_size` connections are open.
    pub fn build(config: PoolConfig) -> DbResult<Self> {
        config
            .validate()
            .map_err(|err| DbError::InvalidConfig(err.to_string()))?;

        let in_memory = config.connection == IN_MEMORY;
        let target = if in_memory {
            format!(
                "file:ork-{}?mode=memory&cache=shared",
                Uuid::new_v4().simple()
            )
        } else {
            config.connection.clone()
        };
        let bootstrap = open_with_retries(&config, &target)?;

        let capacity = pool_u32(config.capacity())?;
        let warm = pool_u32(config.pool_size)?;
        let inner = Pool::builder()
            .max_size(capacity)
            .min_idle(Some(warm))
            .connection_timeout(config.acquire_timeout())
            .max_lifetime(config.recycle_interval())
            .idle_timeout(config.recycle_interval())
            .connection_customizer(Box::new(SessionPragmas))
            .build(SqliteConnectionManager::file(&target))
            .map_err(|err| {
                warn!("event=pool_build module=db status=error error={}", err);
                DbError::Pool(err)
            })?;

        info!(
            "event=pool_build module=db status=ok in_memory={} pool_size={} max_overflow={} recycle_secs={} timeout_secs={}",
            in_memory,
            config.pool_size,
            config.max_overflow,
            config.pool_recycle_secs,
            config.pool_timeout_secs
        );
        Ok(Self {
            config,
            inner,
            closed: AtomicBool::new(false),
            anchor: in_memory.then(|| Mutex::new(bootstrap)),
        })
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Checks out one connection, waiting up to the acquire timeout.
    pub fn acquire(&self) -> DbResult<PooledConnection> {
        if self.closed.load(Ordering::Acquire) {
            return Err(DbError::PoolUninitialized);
        }
        let started_at = Instant::now();
        self.inner.get().map_err(|err| {
            let waited_ms = started_at.elapsed().as_millis();
            let capacity = self.config.capacity();
            warn!(
                "event=pool_acquire module=db status=error error_code=acquire_timeout waited_ms={} capacity={} error={}",
                waited_ms, capacity, err
            );
            DbError::AcquireTimeout {
                waited_ms,
                capacity,
            }
        })
    }

    pub fn status(&self) -> PoolStatus {
        let state = self.inner.state();
        PoolStatus {
            idle: state.idle_connections as usize,
            in_use: state.connections.saturating_sub(state.idle_connections) as usize,
            capacity: self.config.capacity(),
        }
    }

    pub fn is_in_memory(&self) -> bool {
        self.anchor.is_some()
    }

    /// Refuses further checkouts. The underlying connections close once the
    /// last holder of this pool and its checked-out connections let go.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        debug!("event=pool_close module=db status=ok");
    }
}

fn pool_u32(value: usize) -> DbResult<u32> {
    u32::try_from(value)
        .map_err(|_| DbError::InvalidConfig(format!("pool size {value} is too large")))
}

fn open_with_retries(config: &PoolConfig, target: &str) -> DbResult<Connection> {
    let attempts = config.connect_retries + 1;
    let mut last_err = None;
    for attempt in 1..=attempts {
        match open_db(target) {
            Ok(conn) => return Ok(conn),
            // Schema mismatch will not go away on retry.
            Err(err @ DbError::UnsupportedSchemaVersion { .. }) => return Err(err),
            Err(err) => {
                warn!(
                    "event=pool_connect module=db status=error attempt={} max_attempts={} error={}",
                    attempt, attempts, err
                );
                last_err = Some(err);
            }
        }
    }
    Err(last_err.unwrap_or(DbError::PoolUninitialized))
}
