//! Fetch scheduling.
//!
//! Manages registration, prioritization, coalescing of duplicate fetches,
//! cooldown after transient failures, and the worker pool that drives
//! dispatch.

mod clock;
mod cooldown;
mod fetch_scheduler;
mod index;
mod pool;
mod priority;
mod requester;
mod worker;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use cooldown::{CooldownEntry, CooldownQueue};
pub use fetch_scheduler::{
    DispatchOutcome, KeyState, NoWorkReason, Scheduler, SchedulerConfig, SchedulerStats,
};
pub use index::RequestIndex;
pub use pool::{WorkerPool, WorkerPoolConfig};
pub use priority::{PendingEntry, PendingTiers, Priority};
pub use requester::{ChannelRequester, FetchResult, Requester, RequesterId};
pub use worker::{spawn_cooldown_ticker, spawn_worker};
