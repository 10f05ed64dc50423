//! Key-fetch scheduling core for a content-addressed storage node.
//!
//! Decides which pending block fetches run, coalesces duplicate requests for
//! the same key into one fetch, rests keys after transient failures, and
//! delivers exactly one outcome to every requester.
//!
//! # Layout
//!
//! - [`list`]: ordered list with identity-based removal, the substrate for
//!   every queue below
//! - [`scheduler`]: cooldown queue, request index, priority tiers, the
//!   scheduler and its worker pool
//! - [`fetch`]: block keys, blocks, failures, and the [`fetch::Fetcher`]
//!   transport contract
//! - [`bucket`]: read-only buckets over fetched payloads
//!
//! The transport and persistence live outside this crate and plug in
//! through [`fetch::Fetcher`] and the scheduler's reload/snapshot calls.

pub mod bucket;
pub mod config;
pub mod fetch;
pub mod list;
pub mod scheduler;
pub mod telemetry;

use std::sync::Arc;

use fetch::Fetcher;
use scheduler::{Scheduler, SchedulerConfig, WorkerPool, WorkerPoolConfig};

/// Runtime configuration.
#[derive(Debug, Clone, Default)]
pub struct RuntimeConfig {
    pub scheduler: SchedulerConfig,
    pub pool: WorkerPoolConfig,
}

impl From<config::EnvConfig> for RuntimeConfig {
    fn from(env: config::EnvConfig) -> Self {
        Self {
            scheduler: env.scheduler,
            pool: env.pool,
        }
    }
}

/// A scheduler plus the workers driving it.
pub struct Runtime {
    pub scheduler: Arc<Scheduler>,
    pool: Option<WorkerPool>,
    pool_config: WorkerPoolConfig,
}

impl Runtime {
    /// Create a runtime. No workers run until [`start`](Self::start).
    pub fn new(fetcher: Arc<dyn Fetcher>, config: RuntimeConfig) -> Self {
        Self {
            scheduler: Arc::new(Scheduler::new(fetcher, config.scheduler)),
            pool: None,
            pool_config: config.pool,
        }
    }

    /// Spawn the worker pool. Must be called inside a tokio runtime.
    /// Calling it again while running is a no-op.
    pub fn start(&mut self) {
        if self.pool.is_none() {
            self.pool = Some(WorkerPool::start(Arc::clone(&self.scheduler), &self.pool_config));
        }
    }

    pub fn is_running(&self) -> bool {
        self.pool.is_some()
    }

    /// Stop the workers. Registered requesters stay indexed.
    pub async fn shutdown(&mut self) {
        if let Some(pool) = self.pool.take() {
            pool.shutdown().await;
        }
    }
}
