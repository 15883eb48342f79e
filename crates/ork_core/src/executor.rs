//! Bounded offload of blocking storage work for async hosts.
//!
//! # Responsibility
//! - Run engine calls on tokio's blocking thread pool so scheduler threads
//!   never wait on SQLite.
//! - Cap how many such calls run at once.
//!
//! # Invariants
//! - At most `max_concurrent` closures run concurrently.
//! - A caller waits at most `acquire_timeout` for a slot, then gets
//!   `StorageUnavailable`; a started closure always runs to completion.

use crate::config::PoolConfig;
use crate::resource::{EngineError, EngineResult};
use log::{error, warn};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;

pub struct BlockingExecutor {
    semaphore: Arc<Semaphore>,
    max_concurrent: usize,
    acquire_timeout: Duration,
}

impl BlockingExecutor {
    pub fn new(max_concurrent: usize, acquire_timeout: Duration) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
            acquire_timeout,
        }
    }

    /// Sized to the pool: one slot per connection the pool can hand out.
    pub fn for_pool(config: &PoolConfig) -> Self {
        Self::new(config.capacity(), config.acquire_timeout())
    }

    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Runs `work` on a blocking thread once a slot is free.
    pub async fn run<T, F>(&self, work: F) -> EngineResult<T>
    where
        F: FnOnce() -> EngineResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let started_at = Instant::now();
        let acquire = Arc::clone(&self.semaphore).acquire_owned();
        let permit = match tokio::time::timeout(self.acquire_timeout, acquire).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(EngineError::critical("blocking executor is closed")),
            Err(_) => {
                warn!(
                    "event=executor_acquire module=executor status=error error_code=timeout waited_ms={} max_concurrent={}",
                    started_at.elapsed().as_millis(),
                    self.max_concurrent
                );
                return Err(EngineError::StorageUnavailable(format!(
                    "no executor slot free after {}ms ({} in flight)",
                    started_at.elapsed().as_millis(),
                    self.max_concurrent
                )));
            }
        };

        let handle = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            work()
        });
        match handle.await {
            Ok(result) => result,
            Err(err) => {
                error!(
                    "event=executor_join module=executor status=error error={}",
                    err
                );
                Err(EngineError::critical(format!("blocking task failed: {err}")))
            }
        }
    }

    /// Rejects new work; running closures finish normally.
    pub fn close(&self) {
        self.semaphore.close();
    }
}
