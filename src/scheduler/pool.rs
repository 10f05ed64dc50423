//! Worker pool: a fixed set of dispatch workers plus the cooldown ticker.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::fetch_scheduler::Scheduler;
use super::worker::{spawn_cooldown_ticker, spawn_worker};

/// Worker pool configuration.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Number of concurrent dispatch workers.
    pub worker_count: NonZeroUsize,
    /// How often the cooldown ticker looks for expired keys.
    pub cooldown_tick: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self::with_workers(num_cpus::get())
    }
}

impl WorkerPoolConfig {
    /// Create config with a specific worker count (at least one).
    pub fn with_workers(count: usize) -> Self {
        Self {
            worker_count: NonZeroUsize::new(count).unwrap_or(NonZeroUsize::MIN),
            cooldown_tick: Duration::from_secs(1),
        }
    }
}

/// Running workers. Must be started inside a tokio runtime.
pub struct WorkerPool {
    shutdown: CancellationToken,
    workers: Vec<JoinHandle<()>>,
    ticker: JoinHandle<()>,
}

impl WorkerPool {
    pub fn start(scheduler: Arc<Scheduler>, config: &WorkerPoolConfig) -> Self {
        let shutdown = CancellationToken::new();
        let workers = (0..config.worker_count.get())
            .map(|id| spawn_worker(Arc::clone(&scheduler), id, shutdown.child_token()))
            .collect();
        let ticker = spawn_cooldown_ticker(scheduler, config.cooldown_tick, shutdown.child_token());
        tracing::info!(workers = config.worker_count.get(), "worker pool started");
        Self {
            shutdown,
            workers,
            ticker,
        }
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Token cancelled when the pool shuts down.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Stop all workers. In-flight dispatches run to completion first.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        let handles = self.workers.into_iter().chain(std::iter::once(self.ticker));
        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                tracing::warn!(error = %e, "worker did not stop cleanly");
            }
        }
        tracing::info!("worker pool stopped");
    }
}
