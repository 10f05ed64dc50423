//! The fetch scheduler: registration, dispatch, coalesced delivery and
//! cooldown.
//!
//! All bookkeeping lives in one [`SchedulerState`] behind one lock. Resolving
//! a key's requesters and changing its state happen in the same critical
//! section, so a registration either lands before resolution and is served,
//! or after it and starts a new cycle. Fetches and requester callbacks run
//! with the lock released.

use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::Notify;

use super::clock::{Clock, MonotonicClock};
use super::cooldown::{CooldownEntry, CooldownQueue};
use super::index::RequestIndex;
use super::priority::PendingTiers;
use super::requester::{Requester, RequesterId};
use crate::fetch::{Block, BlockKey, FailureKind, FetchFailure, FetchOptions, Fetcher};
use crate::telemetry::{self, DispatchSpan, SpanExt};

/// Scheduler tuning.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerConfig {
    /// How long a key rests after a transient failure.
    pub cooldown_period: Duration,
    /// Most cooldown entries woken per `wake_due` call.
    pub wake_batch: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            cooldown_period: Duration::from_secs(30 * 60),
            wake_batch: 256,
        }
    }
}

/// Where a key is in its dispatch cycle. Absent keys are idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyState {
    /// Has requesters waiting for a worker.
    Registered,
    /// A fetch is in flight.
    Dispatching,
    /// Resting after a transient failure.
    Cooling,
}

/// Why `dispatch` did not fetch anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoWorkReason {
    CoolingDown,
    Cancelled,
    AlreadyInFlight,
    NotRegistered,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The fetcher ran. `failure` is `None` on success.
    Completed {
        failure: Option<FailureKind>,
        delivered: usize,
    },
    NoWork(NoWorkReason),
}

impl DispatchOutcome {
    /// True if a fetch was attempted.
    pub fn did_work(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed { failure: None, .. })
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Completed { failure: None, .. } => "succeeded",
            Self::Completed { .. } => "failed",
            Self::NoWork(NoWorkReason::CoolingDown) => "cooling_down",
            Self::NoWork(NoWorkReason::Cancelled) => "cancelled",
            Self::NoWork(NoWorkReason::AlreadyInFlight) => "already_in_flight",
            Self::NoWork(NoWorkReason::NotRegistered) => "not_registered",
        }
    }
}

/// Point-in-time counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct SchedulerStats {
    pub indexed_keys: usize,
    pub registrations: usize,
    pub pending: usize,
    pub cooling: usize,
    pub in_flight: usize,
}

#[derive(Default)]
struct SchedulerState {
    index: RequestIndex<BlockKey, dyn Requester>,
    cooldown: CooldownQueue<BlockKey>,
    pending: PendingTiers,
    keys: HashMap<BlockKey, KeyState>,
}

impl SchedulerState {
    /// Queue a requester for dispatch if its key allows it. Returns how many
    /// entries were queued.
    fn enqueue(&mut self, requester: &Arc<dyn Requester>, key: BlockKey, now: Instant) -> usize {
        match self.keys.get(&key) {
            Some(KeyState::Dispatching) => 0,
            Some(KeyState::Cooling) if self.cooldown.is_cooling(&key, now) => 0,
            Some(KeyState::Cooling) => {
                // Expired but not yet woken: release everyone parked on it.
                self.cooldown.remove(&key);
                self.keys.insert(key, KeyState::Registered);
                self.queue_drivers(key)
            }
            _ => {
                self.keys.insert(key, KeyState::Registered);
                usize::from(self.pending.push(requester, key, requester.priority()))
            }
        }
    }

    fn queue_drivers(&mut self, key: BlockKey) -> usize {
        let mut queued = 0;
        for requester in self.index.drivers(&key) {
            if self.pending.push(&requester, key, requester.priority()) {
                queued += 1;
            }
        }
        queued
    }

    /// Resolve the key's requesters and end its cycle.
    fn resolve(&mut self, key: &BlockKey) -> Vec<Arc<dyn Requester>> {
        let requesters = self.index.resolve(key);
        for requester in &requesters {
            self.pending.remove(RequesterId::of(requester));
        }
        requesters
    }

    /// Remove a requester from the index and the pending tiers. Returns the
    /// key it was indexed under.
    fn withdraw(&mut self, requester: &Arc<dyn Requester>) -> Option<BlockKey> {
        self.pending.remove(RequesterId::of(requester));
        let key = self.index.key_of(requester).copied()?;
        self.index.unregister(&key, requester);
        self.forget_key_if_idle(&key);
        Some(key)
    }

    /// Drop registrations of requesters their owners have released, and the
    /// key's state with them if nobody is left.
    fn prune_dead(&mut self, key: &BlockKey) {
        if self.index.prune_dead(key) > 0 {
            self.forget_key_if_idle(key);
        }
    }

    /// Drop the key's state once nobody is interested in it.
    fn forget_key_if_idle(&mut self, key: &BlockKey) {
        if self.index.contains(key) {
            return;
        }
        match self.keys.get(key) {
            // The in-flight fetch resolves to an empty set and cleans up.
            Some(KeyState::Dispatching) => {}
            Some(_) => {
                self.keys.remove(key);
                self.cooldown.remove(key);
            }
            None => {}
        }
    }

    fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            indexed_keys: self.index.len(),
            registrations: self.index.registrations(),
            pending: self.pending.len(),
            cooling: self.cooldown.len(),
            in_flight: self
                .keys
                .values()
                .filter(|s| **s == KeyState::Dispatching)
                .count(),
        }
    }
}

/// Decides which fetches run and delivers their outcomes.
pub struct Scheduler {
    state: Mutex<SchedulerState>,
    fetcher: Arc<dyn Fetcher>,
    clock: Arc<dyn Clock>,
    config: SchedulerConfig,
    notify: Notify,
}

impl Scheduler {
    pub fn new(fetcher: Arc<dyn Fetcher>, config: SchedulerConfig) -> Self {
        Self::with_clock(fetcher, Arc::new(MonotonicClock), config)
    }

    pub fn with_clock(
        fetcher: Arc<dyn Fetcher>,
        clock: Arc<dyn Clock>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            state: Mutex::new(SchedulerState::default()),
            fetcher,
            clock,
            config,
            notify: Notify::new(),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Register interest in the requester's key.
    ///
    /// Returns false if it was already registered for that key. A cooling
    /// key parks the requester until [`wake_due`](Self::wake_due); an
    /// in-flight key serves it from the running fetch.
    pub fn register(&self, requester: Arc<dyn Requester>) -> bool {
        let key = requester.key();
        let now = self.clock.now();
        let (added, queued) = {
            let mut state = self.state.lock();
            let added = state.index.register(key, &requester);
            let queued = state.enqueue(&requester, key, now);
            (added, queued)
        };
        tracing::debug!(%key, added, queued, "requester registered");
        for _ in 0..queued {
            self.notify.notify_one();
        }
        added
    }

    /// Register again after an earlier attempt, clearing any cooldown left
    /// on the key so it is eligible for dispatch right away.
    ///
    /// An in-flight key is left alone; the running fetch serves the
    /// requester.
    pub fn reregister(&self, requester: Arc<dyn Requester>) -> bool {
        let key = requester.key();
        let now = self.clock.now();
        let (added, queued) = {
            let mut state = self.state.lock();
            let added = state.index.register(key, &requester);
            let queued = if state.keys.get(&key) == Some(&KeyState::Cooling) {
                state.cooldown.remove(&key);
                state.keys.insert(key, KeyState::Registered);
                state.queue_drivers(key)
            } else {
                state.enqueue(&requester, key, now)
            };
            (added, queued)
        };
        tracing::debug!(%key, added, queued, "requester re-registered, cooldown reset");
        for _ in 0..queued {
            self.notify.notify_one();
        }
        added
    }

    /// Run one fetch on behalf of `requester`.
    ///
    /// Blocks for the duration of the fetch. Outcomes reach requesters only
    /// through their callbacks; nothing the fetcher does escapes this call.
    pub fn dispatch(&self, requester: &Arc<dyn Requester>) -> DispatchOutcome {
        let outcome = self.dispatch_inner(requester);
        telemetry::record_dispatch(outcome.label());
        outcome
    }

    fn dispatch_inner(&self, requester: &Arc<dyn Requester>) -> DispatchOutcome {
        let key = requester.key();
        let id = RequesterId::of(requester);
        let now = self.clock.now();

        let options = {
            let mut state = self.state.lock();

            if let Some(wake) = state.cooldown.wakeup(&key).filter(|w| *w > now) {
                tracing::error!(
                    %key,
                    remaining_ms = wake.duration_since(now).as_millis() as u64,
                    "dispatch requested for a key that is still cooling down"
                );
                return DispatchOutcome::NoWork(NoWorkReason::CoolingDown);
            }

            if requester.is_cancelled() {
                let was_indexed = state.index.unregister(&key, requester);
                state.pending.remove(id);
                state.forget_key_if_idle(&key);
                drop(state);
                if !was_indexed {
                    // Already resolved by an earlier fetch.
                    return DispatchOutcome::NoWork(NoWorkReason::NotRegistered);
                }
                tracing::debug!(%key, "requester cancelled before dispatch");
                let failure = FetchFailure::cancelled();
                self.deliver_one(requester, Err(&failure));
                telemetry::record_delivery(Some(FailureKind::Cancelled), 1);
                return DispatchOutcome::NoWork(NoWorkReason::Cancelled);
            }

            if state.keys.get(&key) == Some(&KeyState::Dispatching) {
                return DispatchOutcome::NoWork(NoWorkReason::AlreadyInFlight);
            }
            if !state.index.is_registered(&key, requester) {
                return DispatchOutcome::NoWork(NoWorkReason::NotRegistered);
            }

            state.pending.remove(id);
            state.cooldown.remove(&key);
            state.keys.insert(key, KeyState::Dispatching);
            requester.fetch_options()
        };

        let span = DispatchSpan::new(&key, requester.priority());
        let _enter = span.enter();

        let start = Instant::now();
        let result = self.run_fetch(&key, &options);
        let elapsed = start.elapsed();
        span.record_result(&result);
        span.record_latency(elapsed);
        telemetry::record_fetch_latency(elapsed);

        let (requesters, stats) = {
            let mut state = self.state.lock();
            let requesters = state.resolve(&key);
            match &result {
                Err(failure) if failure.kind.is_transient() => {
                    let wake = self.clock.now() + self.config.cooldown_period;
                    state.cooldown.add(key, wake);
                    state.keys.insert(key, KeyState::Cooling);
                }
                _ => {
                    state.cooldown.remove(&key);
                    state.keys.remove(&key);
                }
            }
            (requesters, state.stats())
        };
        telemetry::record_queue_depths(stats.pending, stats.cooling, stats.indexed_keys);

        let failure = result.as_ref().err().map(|f| f.kind);
        match &result {
            Ok(block) => {
                tracing::info!(
                    bytes = block.len(),
                    requesters = requesters.len(),
                    "fetch succeeded"
                );
            }
            Err(f) if f.kind == FailureKind::InternalError => {
                tracing::error!(
                    error = %f,
                    requesters = requesters.len(),
                    "fetch failed internally"
                );
            }
            Err(f) => {
                tracing::warn!(
                    error = %f,
                    transient = f.kind.is_transient(),
                    requesters = requesters.len(),
                    "fetch failed"
                );
            }
        }

        let delivered = self.deliver(&requesters, result.as_ref());
        span.record("delivered", delivered as u64);
        DispatchOutcome::Completed { failure, delivered }
    }

    /// Call the fetcher, normalizing every way it can go wrong.
    fn run_fetch(&self, key: &BlockKey, options: &FetchOptions) -> Result<Block, FetchFailure> {
        let fetched = panic::catch_unwind(AssertUnwindSafe(|| self.fetcher.fetch(key, options)));
        match fetched {
            Ok(Ok(block)) if block.key() != key => {
                let detail = format!("fetcher returned block {} for key {}", block.key(), key);
                Err(FetchFailure::new(FailureKind::VerifyFailed).with_detail(detail))
            }
            Ok(Ok(block)) if !block.verify() => {
                Err(FetchFailure::new(FailureKind::VerifyFailed)
                    .with_detail("payload does not hash to its key"))
            }
            Ok(Ok(block)) => Ok(block),
            Ok(Err(err)) => Err(err.into_failure()),
            Err(payload) => {
                let detail = format!("fetcher panicked: {}", panic_message(&*payload));
                Err(FetchFailure::new(FailureKind::InternalError).with_detail(detail))
            }
        }
    }

    /// Fan one outcome out to every resolved requester. Cancelled requesters
    /// get `Cancelled` instead.
    fn deliver(
        &self,
        requesters: &[Arc<dyn Requester>],
        outcome: Result<&Block, &FetchFailure>,
    ) -> usize {
        let cancelled = FetchFailure::cancelled();
        let mut shared = 0;
        for requester in requesters {
            if requester.is_cancelled() {
                self.deliver_one(requester, Err(&cancelled));
                telemetry::record_delivery(Some(FailureKind::Cancelled), 1);
            } else {
                self.deliver_one(requester, outcome);
                shared += 1;
            }
        }
        telemetry::record_delivery(outcome.err().map(|f| f.kind), shared);
        requesters.len()
    }

    fn deliver_one(&self, requester: &Arc<dyn Requester>, outcome: Result<&Block, &FetchFailure>) {
        let delivered = panic::catch_unwind(AssertUnwindSafe(|| match outcome {
            Ok(block) => requester.on_success(block),
            Err(failure) => requester.on_failure(failure),
        }));
        if let Err(payload) = delivered {
            telemetry::record_callback_panic();
            tracing::error!(
                key = %requester.key(),
                panic = panic_message(&*payload),
                "requester callback panicked"
            );
        }
    }

    /// Ask for `key` to rest until `proposed`. Never pushes an existing wake
    /// time later. True if the cooldown queue changed.
    pub fn requeue_after_cooldown(&self, key: BlockKey, proposed: Instant) -> bool {
        let mut state = self.state.lock();
        let changed = state.cooldown.add(key, proposed);
        if state.keys.get(&key) != Some(&KeyState::Dispatching) {
            state.keys.insert(key, KeyState::Cooling);
        }
        changed
    }

    /// Withdraw a requester.
    ///
    /// With `stay_subscribed` it stays indexed and still receives the key's
    /// outcome, but no longer drives dispatch. Otherwise it is removed
    /// entirely, and a key left without requesters loses its cooldown.
    pub fn unregister(&self, requester: &Arc<dyn Requester>, stay_subscribed: bool) -> bool {
        let mut state = self.state.lock();
        if stay_subscribed {
            let was_pending = state.pending.remove(RequesterId::of(requester));
            return state.index.make_passive(requester) || was_pending;
        }
        state.withdraw(requester).is_some()
    }

    /// Remove `requester` from `key` only. False if it was not registered
    /// under that key.
    pub fn unregister_key(&self, requester: &Arc<dyn Requester>, key: &BlockKey) -> bool {
        let mut state = self.state.lock();
        if !state.index.unregister(key, requester) {
            return false;
        }
        state.pending.remove(RequesterId::of(requester));
        state.forget_key_if_idle(key);
        true
    }

    /// Fail `requester` with an internal error outside of any dispatch.
    ///
    /// It is unregistered first, so it will not also see the key's outcome.
    /// Returns false, delivering nothing, if it was no longer registered.
    pub fn internal_error<E>(&self, requester: &Arc<dyn Requester>, err: E) -> bool
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        let failure = FetchFailure::internal(err);
        let withdrawn = self.state.lock().withdraw(requester);
        let Some(key) = withdrawn else {
            tracing::debug!(
                key = %requester.key(),
                error = %failure,
                "internal error for a requester that is no longer registered"
            );
            return false;
        };
        tracing::error!(%key, error = %failure, "internal error reported for requester");
        self.deliver_one(requester, Err(&failure));
        telemetry::record_delivery(Some(FailureKind::InternalError), 1);
        true
    }

    /// Next requester worth dispatching, most urgent first.
    ///
    /// Entries for in-flight keys are dropped (the running fetch serves
    /// them); entries for cooling keys are parked until the key wakes.
    pub fn next_candidate(&self) -> Option<Arc<dyn Requester>> {
        let now = self.clock.now();
        let mut state = self.state.lock();
        while let Some(entry) = state.pending.pop() {
            let Some(requester) = entry.upgrade() else {
                state.prune_dead(&entry.key);
                continue;
            };
            match state.keys.get(&entry.key) {
                Some(KeyState::Dispatching) => continue,
                Some(KeyState::Cooling) if state.cooldown.is_cooling(&entry.key, now) => continue,
                _ => {}
            }
            if !state.index.is_registered(&entry.key, &requester) {
                continue;
            }
            return Some(requester);
        }
        None
    }

    /// Wait until a candidate is available.
    pub async fn wait_for_candidate(&self) -> Arc<dyn Requester> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if let Some(requester) = self.next_candidate() {
                return requester;
            }
            notified.await;
        }
    }

    /// Wake up to `limit` keys whose cooldown has expired and requeue their
    /// driving requesters. Returns the number of keys woken.
    pub fn wake_due(&self, limit: usize) -> usize {
        let now = self.clock.now();
        let (woken, queued) = {
            let mut state = self.state.lock();
            let due = state.cooldown.take_due(now, limit);
            let woken = due.len();
            let mut queued = 0;
            for CooldownEntry { key, .. } in due {
                if state.keys.get(&key) != Some(&KeyState::Cooling) {
                    continue;
                }
                state.index.prune_dead(&key);
                if !state.index.contains(&key) {
                    state.keys.remove(&key);
                    continue;
                }
                state.keys.insert(key, KeyState::Registered);
                queued += state.queue_drivers(key);
            }
            (woken, queued)
        };
        if woken > 0 {
            tracing::debug!(woken, queued, "cooldown expired");
        }
        for _ in 0..queued {
            self.notify.notify_one();
        }
        woken
    }

    /// Restore a persisted registration without dispatching or waking anyone.
    pub fn reload(&self, requester: Arc<dyn Requester>) -> bool {
        let key = requester.key();
        let now = self.clock.now();
        let mut state = self.state.lock();
        let added = state.index.register(key, &requester);
        state.enqueue(&requester, key, now);
        added
    }

    /// Restore a persisted cooldown entry.
    pub fn reload_cooldown(&self, key: BlockKey, wake_time: Instant) -> bool {
        self.requeue_after_cooldown(key, wake_time)
    }

    /// Copy of the cooldown queue, for persistence.
    pub fn cooldown_snapshot(&self) -> Vec<CooldownEntry<BlockKey>> {
        self.state.lock().cooldown.snapshot()
    }

    /// Earliest cooldown expiry.
    pub fn next_wakeup(&self) -> Option<Instant> {
        self.state.lock().cooldown.next_wakeup()
    }

    pub fn key_state(&self, key: &BlockKey) -> Option<KeyState> {
        self.state.lock().keys.get(key).copied()
    }

    /// Number of requesters indexed under `key`.
    pub fn requester_count(&self, key: &BlockKey) -> usize {
        self.state.lock().index.requester_count(key)
    }

    pub fn stats(&self) -> SchedulerStats {
        self.state.lock().stats()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
#[path = "fetch_scheduler_tests.rs"]
mod tests;
