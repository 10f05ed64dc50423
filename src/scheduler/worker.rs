//! Worker loops: pick candidates and dispatch them, and wake cooled keys.
//!
//! Dispatch blocks for a network round trip, so it runs on tokio's blocking
//! pool. The async side only waits for work and for shutdown.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::fetch_scheduler::Scheduler;
use super::requester::Requester;

/// Spawn one dispatch worker. Returns a handle for shutdown.
pub fn spawn_worker(
    scheduler: Arc<Scheduler>,
    worker_id: usize,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        worker_loop(scheduler, worker_id, shutdown).await;
    })
}

async fn worker_loop(scheduler: Arc<Scheduler>, worker_id: usize, shutdown: CancellationToken) {
    loop {
        tokio::select! {
            biased;
            () = shutdown.cancelled() => {
                tracing::info!(worker_id, "worker: shutdown signal received");
                break;
            }
            requester = scheduler.wait_for_candidate() => {
                execute(&scheduler, worker_id, requester).await;
            }
        }
    }
}

async fn execute(scheduler: &Arc<Scheduler>, worker_id: usize, requester: Arc<dyn Requester>) {
    let sched = Arc::clone(scheduler);
    let key = requester.key();
    match tokio::task::spawn_blocking(move || sched.dispatch(&requester)).await {
        Ok(outcome) => {
            tracing::debug!(worker_id, %key, ?outcome, "dispatch finished");
        }
        Err(e) => {
            // Dispatch catches fetcher and callback panics itself.
            tracing::error!(worker_id, %key, error = %e, "dispatch task failed");
        }
    }
}

/// Spawn the cooldown ticker. Every `tick` it wakes keys whose cooldown has
/// expired, in batches of the scheduler's `wake_batch`.
pub fn spawn_cooldown_ticker(
    scheduler: Arc<Scheduler>,
    tick: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(tick);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => {
                    tracing::info!("cooldown ticker: shutdown signal received");
                    break;
                }
                _ = interval.tick() => {
                    wake_all_due(&scheduler);
                }
            }
        }
    })
}

fn wake_all_due(scheduler: &Scheduler) {
    let batch = scheduler.config().wake_batch.max(1);
    let mut total = 0;
    loop {
        let woken = scheduler.wake_due(batch);
        total += woken;
        if woken < batch {
            break;
        }
    }
    if total > 0 {
        tracing::debug!(woken = total, "cooldown ticker woke keys");
    }
}

#[cfg(test)]
#[path = "worker_tests.rs"]
mod tests;
