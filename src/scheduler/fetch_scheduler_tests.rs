//! Tests for dispatch, coalescing and cooldown.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread;

use super::*;
use crate::fetch::FetchError;
use crate::scheduler::clock::ManualClock;
use crate::scheduler::priority::Priority;

/// Requester that records every outcome it is handed.
struct Recorder {
    key: BlockKey,
    priority: Priority,
    cancelled: AtomicBool,
    panic_on_delivery: bool,
    successes: parking_lot::Mutex<Vec<Block>>,
    failures: parking_lot::Mutex<Vec<FailureKind>>,
}

impl Recorder {
    fn new(key: BlockKey) -> Arc<Self> {
        Self::build(key, Priority::Normal, false)
    }

    fn build(key: BlockKey, priority: Priority, panic_on_delivery: bool) -> Arc<Self> {
        Arc::new(Self {
            key,
            priority,
            cancelled: AtomicBool::new(false),
            panic_on_delivery,
            successes: parking_lot::Mutex::new(Vec::new()),
            failures: parking_lot::Mutex::new(Vec::new()),
        })
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    fn outcomes(&self) -> usize {
        self.successes.lock().len() + self.failures.lock().len()
    }

    fn failure_kinds(&self) -> Vec<FailureKind> {
        self.failures.lock().clone()
    }
}

impl Requester for Recorder {
    fn key(&self) -> BlockKey {
        self.key
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn on_success(&self, block: &Block) {
        self.successes.lock().push(block.clone());
        if self.panic_on_delivery {
            panic!("requester blew up");
        }
    }

    fn on_failure(&self, failure: &FetchFailure) {
        self.failures.lock().push(failure.kind);
        if self.panic_on_delivery {
            panic!("requester blew up");
        }
    }

    fn priority(&self) -> Priority {
        self.priority
    }
}

fn dyn_req(r: &Arc<Recorder>) -> Arc<dyn Requester> {
    Arc::clone(r) as Arc<dyn Requester>
}

/// Fetcher serving a fixed set of payloads and counting calls.
fn store_fetcher<P: AsRef<[u8]>>(payloads: &[P], calls: Arc<AtomicUsize>) -> Arc<dyn Fetcher> {
    let store: HashMap<BlockKey, Vec<u8>> = payloads
        .iter()
        .map(|p| (BlockKey::for_content(p.as_ref()), p.as_ref().to_vec()))
        .collect();
    Arc::new(move |key: &BlockKey, _: &FetchOptions| -> Result<Block, FetchError> {
        calls.fetch_add(1, Ordering::SeqCst);
        match store.get(key) {
            Some(data) => Ok(Block::new(data.clone())),
            None => Err(FailureKind::DataNotFound.into()),
        }
    })
}

fn empty_fetcher() -> Arc<dyn Fetcher> {
    store_fetcher::<&[u8]>(&[], Arc::new(AtomicUsize::new(0)))
}

fn failing_fetcher(kind: FailureKind, calls: Arc<AtomicUsize>) -> Arc<dyn Fetcher> {
    Arc::new(move |_: &BlockKey, _: &FetchOptions| -> Result<Block, FetchError> {
        calls.fetch_add(1, Ordering::SeqCst);
        Err(FetchFailure::new(kind).with_detail("peer said no").into())
    })
}

fn scheduler(fetcher: Arc<dyn Fetcher>) -> (Scheduler, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new());
    let sched = Scheduler::with_clock(fetcher, clock.clone(), SchedulerConfig::default());
    (sched, clock)
}

#[test]
fn coalesced_success_reaches_every_requester_once() {
    let calls = Arc::new(AtomicUsize::new(0));
    let (sched, _) = scheduler(store_fetcher(&[b"payload"], calls.clone()));
    let key = BlockKey::for_content(b"payload");

    let requesters: Vec<_> = (0..5).map(|_| Recorder::new(key)).collect();
    for r in &requesters {
        assert!(sched.register(dyn_req(r)));
    }
    assert_eq!(sched.requester_count(&key), 5);
    assert_eq!(sched.key_state(&key), Some(KeyState::Registered));

    let candidate = sched.next_candidate().unwrap();
    let outcome = sched.dispatch(&candidate);
    assert_eq!(outcome, DispatchOutcome::Completed { failure: None, delivered: 5 });
    assert!(outcome.is_success());

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    for r in &requesters {
        assert_eq!(r.successes.lock().len(), 1);
        assert!(r.failures.lock().is_empty());
        assert_eq!(r.successes.lock()[0].data(), b"payload");
    }
    assert_eq!(sched.requester_count(&key), 0);
    assert_eq!(sched.key_state(&key), None);
    // The other queued entries went with the resolution.
    assert!(sched.next_candidate().is_none());
    assert_eq!(sched.stats(), SchedulerStats::default());
}

#[test]
fn requesters_a_and_b_share_one_fetch() {
    let calls = Arc::new(AtomicUsize::new(0));
    let (sched, _) = scheduler(store_fetcher(&[b"X"], calls.clone()));
    let key = BlockKey::for_content(b"X");
    let a = Recorder::new(key);
    let b = Recorder::new(key);
    sched.register(dyn_req(&a));
    sched.register(dyn_req(&b));

    sched.dispatch(&dyn_req(&a));

    assert_eq!(a.successes.lock()[0].key(), &key);
    assert_eq!(b.successes.lock()[0].key(), &key);
    assert_eq!(a.outcomes() + b.outcomes(), 2);
    assert_eq!(sched.requester_count(&key), 0);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn duplicate_registration_is_ignored() {
    let (sched, _) = scheduler(store_fetcher(&[b"dup"], Arc::new(AtomicUsize::new(0))));
    let r = Recorder::new(BlockKey::for_content(b"dup"));
    assert!(sched.register(dyn_req(&r)));
    assert!(!sched.register(dyn_req(&r)));
    assert_eq!(sched.stats().pending, 1);

    sched.dispatch(&dyn_req(&r));
    assert_eq!(r.outcomes(), 1);
}

#[test]
fn cancelled_requester_never_fetches() {
    let calls = Arc::new(AtomicUsize::new(0));
    let (sched, _) = scheduler(store_fetcher(&[b"c"], calls.clone()));
    let key = BlockKey::for_content(b"c");
    let r = Recorder::new(key);
    sched.register(dyn_req(&r));
    r.cancel();

    let outcome = sched.dispatch(&dyn_req(&r));
    assert_eq!(outcome, DispatchOutcome::NoWork(NoWorkReason::Cancelled));
    assert!(!outcome.did_work());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(r.failure_kinds(), vec![FailureKind::Cancelled]);
    assert_eq!(sched.requester_count(&key), 0);
    assert_eq!(sched.key_state(&key), None);
    assert!(sched.next_candidate().is_none());
}

#[test]
fn cancelled_coalesced_requester_gets_cancelled_not_the_block() {
    let (sched, _) = scheduler(store_fetcher(&[b"shared"], Arc::new(AtomicUsize::new(0))));
    let key = BlockKey::for_content(b"shared");
    let driver = Recorder::new(key);
    let quitter = Recorder::new(key);
    sched.register(dyn_req(&driver));
    sched.register(dyn_req(&quitter));
    quitter.cancel();

    sched.dispatch(&dyn_req(&driver));
    assert_eq!(driver.successes.lock().len(), 1);
    assert!(quitter.successes.lock().is_empty());
    assert_eq!(quitter.failure_kinds(), vec![FailureKind::Cancelled]);
}

#[test]
fn transient_failure_cools_key_until_woken() {
    let calls = Arc::new(AtomicUsize::new(0));
    let fail = Arc::new(AtomicBool::new(true));
    let fetcher: Arc<dyn Fetcher> = {
        let calls = calls.clone();
        let fail = fail.clone();
        Arc::new(move |key: &BlockKey, _: &FetchOptions| -> Result<Block, FetchError> {
            calls.fetch_add(1, Ordering::SeqCst);
            if fail.load(Ordering::SeqCst) {
                Err(FailureKind::RouteNotFound.into())
            } else {
                assert_eq!(*key, BlockKey::for_content(b"retry me"));
                Ok(Block::new(b"retry me".to_vec()))
            }
        })
    };
    let (sched, clock) = scheduler(fetcher);
    let key = BlockKey::for_content(b"retry me");

    let first = Recorder::new(key);
    sched.register(dyn_req(&first));
    let outcome = sched.dispatch(&dyn_req(&first));
    assert_eq!(
        outcome,
        DispatchOutcome::Completed { failure: Some(FailureKind::RouteNotFound), delivered: 1 }
    );
    assert_eq!(first.failure_kinds(), vec![FailureKind::RouteNotFound]);
    assert_eq!(sched.key_state(&key), Some(KeyState::Cooling));
    assert_eq!(sched.stats().cooling, 1);

    // Parked while cooling.
    let second = Recorder::new(key);
    sched.register(dyn_req(&second));
    assert!(sched.next_candidate().is_none());
    assert_eq!(
        sched.dispatch(&dyn_req(&second)),
        DispatchOutcome::NoWork(NoWorkReason::CoolingDown)
    );
    assert_eq!(sched.wake_due(16), 0);

    clock.advance(sched.config().cooldown_period);
    fail.store(false, Ordering::SeqCst);
    assert_eq!(sched.wake_due(16), 1);
    assert_eq!(sched.key_state(&key), Some(KeyState::Registered));

    let candidate = sched.next_candidate().unwrap();
    assert!(sched.dispatch(&candidate).is_success());
    assert_eq!(second.successes.lock().len(), 1);
    assert_eq!(first.outcomes(), 1);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(sched.cooldown_snapshot().is_empty());
}

#[test]
fn cooling_key_without_requesters_is_forgotten_on_wake() {
    let (sched, clock) = scheduler(failing_fetcher(
        FailureKind::TransferFailed,
        Arc::new(AtomicUsize::new(0)),
    ));
    let key = BlockKey::for_content(b"lonely");
    let r = Recorder::new(key);
    sched.register(dyn_req(&r));
    sched.dispatch(&dyn_req(&r));
    assert_eq!(sched.key_state(&key), Some(KeyState::Cooling));

    clock.advance(Duration::from_secs(3600));
    assert_eq!(sched.wake_due(16), 1);
    assert_eq!(sched.key_state(&key), None);
    assert!(sched.next_candidate().is_none());
}

#[test]
fn permanent_failure_is_terminal() {
    let calls = Arc::new(AtomicUsize::new(0));
    let (sched, _) = scheduler(failing_fetcher(FailureKind::DataNotFound, calls.clone()));
    let key = BlockKey::for_content(b"missing");
    let r = Recorder::new(key);
    sched.register(dyn_req(&r));

    let outcome = sched.dispatch(&dyn_req(&r));
    assert_eq!(
        outcome,
        DispatchOutcome::Completed { failure: Some(FailureKind::DataNotFound), delivered: 1 }
    );
    assert_eq!(sched.key_state(&key), None);
    assert!(sched.cooldown_snapshot().is_empty());
}

#[test]
fn fetcher_panic_becomes_internal_error() {
    let fetcher: Arc<dyn Fetcher> =
        Arc::new(|_: &BlockKey, _: &FetchOptions| -> Result<Block, FetchError> {
            panic!("transport exploded")
        });
    let (sched, _) = scheduler(fetcher);
    let key = BlockKey::for_content(b"boom");
    let a = Recorder::new(key);
    let b = Recorder::new(key);
    sched.register(dyn_req(&a));
    sched.register(dyn_req(&b));

    let outcome = sched.dispatch(&dyn_req(&a));
    assert_eq!(
        outcome,
        DispatchOutcome::Completed { failure: Some(FailureKind::InternalError), delivered: 2 }
    );
    assert_eq!(a.failure_kinds(), vec![FailureKind::InternalError]);
    assert_eq!(b.failure_kinds(), vec![FailureKind::InternalError]);
    assert_eq!(sched.key_state(&key), None);
}

#[test]
fn unexpected_error_is_normalized() {
    let fetcher: Arc<dyn Fetcher> =
        Arc::new(|_: &BlockKey, _: &FetchOptions| -> Result<Block, FetchError> {
            Err(FetchError::unexpected("socket closed"))
        });
    let (sched, _) = scheduler(fetcher);
    let r = Recorder::new(BlockKey::for_content(b"odd"));
    sched.register(dyn_req(&r));
    sched.dispatch(&dyn_req(&r));
    assert_eq!(r.failure_kinds(), vec![FailureKind::InternalError]);
}

#[test]
fn wrong_block_is_a_verify_failure() {
    let fetcher: Arc<dyn Fetcher> =
        Arc::new(|_: &BlockKey, _: &FetchOptions| -> Result<Block, FetchError> {
            Ok(Block::new(b"something else".to_vec()))
        });
    let (sched, _) = scheduler(fetcher);
    let key = BlockKey::for_content(b"wanted");
    let r = Recorder::new(key);
    sched.register(dyn_req(&r));

    let outcome = sched.dispatch(&dyn_req(&r));
    assert_eq!(
        outcome,
        DispatchOutcome::Completed { failure: Some(FailureKind::VerifyFailed), delivered: 1 }
    );
    assert!(r.successes.lock().is_empty());
}

#[test]
fn panicking_callback_does_not_stop_fan_out() {
    let (sched, _) = scheduler(store_fetcher(&[b"fan"], Arc::new(AtomicUsize::new(0))));
    let key = BlockKey::for_content(b"fan");
    let bad = Recorder::build(key, Priority::Normal, true);
    let good = Recorder::new(key);
    sched.register(dyn_req(&bad));
    sched.register(dyn_req(&good));

    let outcome = sched.dispatch(&dyn_req(&bad));
    assert_eq!(outcome, DispatchOutcome::Completed { failure: None, delivered: 2 });
    assert_eq!(bad.successes.lock().len(), 1);
    assert_eq!(good.successes.lock().len(), 1);
}

#[test]
fn dropped_requesters_are_skipped() {
    let (sched, _) = scheduler(store_fetcher(&[b"drop"], Arc::new(AtomicUsize::new(0))));
    let key = BlockKey::for_content(b"drop");
    let keep = Recorder::new(key);
    let gone = Recorder::new(key);
    sched.register(dyn_req(&keep));
    sched.register(dyn_req(&gone));
    drop(gone);

    let outcome = sched.dispatch(&dyn_req(&keep));
    assert_eq!(outcome, DispatchOutcome::Completed { failure: None, delivered: 1 });
}

#[test]
fn dispatch_of_unregistered_requester_does_nothing() {
    let calls = Arc::new(AtomicUsize::new(0));
    let (sched, _) = scheduler(store_fetcher(&[b"n"], calls.clone()));
    let r = Recorder::new(BlockKey::for_content(b"n"));
    assert_eq!(
        sched.dispatch(&dyn_req(&r)),
        DispatchOutcome::NoWork(NoWorkReason::NotRegistered)
    );
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(r.outcomes(), 0);
}

#[test]
fn second_dispatch_while_in_flight_is_served_by_fan_out() {
    let (started_tx, started_rx) = mpsc::channel::<()>();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let started_tx = parking_lot::Mutex::new(started_tx);
    let release_rx = parking_lot::Mutex::new(release_rx);
    let fetcher: Arc<dyn Fetcher> =
        Arc::new(move |_: &BlockKey, _: &FetchOptions| -> Result<Block, FetchError> {
            started_tx.lock().send(()).ok();
            release_rx.lock().recv().ok();
            Ok(Block::new(b"slow".to_vec()))
        });
    let (sched, _) = scheduler(fetcher);
    let sched = Arc::new(sched);
    let key = BlockKey::for_content(b"slow");
    let a = Recorder::new(key);
    let b = Recorder::new(key);
    sched.register(dyn_req(&a));
    sched.register(dyn_req(&b));

    let worker = {
        let sched = Arc::clone(&sched);
        let a = dyn_req(&a);
        thread::spawn(move || sched.dispatch(&a))
    };
    started_rx.recv().unwrap();
    assert_eq!(sched.key_state(&key), Some(KeyState::Dispatching));
    assert_eq!(sched.stats().in_flight, 1);

    assert_eq!(
        sched.dispatch(&dyn_req(&b)),
        DispatchOutcome::NoWork(NoWorkReason::AlreadyInFlight)
    );
    // Joins the running fetch.
    let late = Recorder::new(key);
    sched.register(dyn_req(&late));
    assert!(sched.next_candidate().is_none());

    release_tx.send(()).unwrap();
    let outcome = worker.join().unwrap();
    assert_eq!(outcome, DispatchOutcome::Completed { failure: None, delivered: 3 });
    for r in [&a, &b, &late] {
        assert_eq!(r.successes.lock().len(), 1);
    }
}

#[test]
fn next_candidate_prefers_urgent_requesters() {
    let (sched, _) = scheduler(empty_fetcher());
    let low = Recorder::build(BlockKey::for_content(b"low"), Priority::Low, false);
    let high = Recorder::build(BlockKey::for_content(b"high"), Priority::High, false);
    sched.register(dyn_req(&low));
    sched.register(dyn_req(&high));

    assert_eq!(sched.next_candidate().unwrap().key(), high.key);
    assert_eq!(sched.next_candidate().unwrap().key(), low.key);
    assert!(sched.next_candidate().is_none());
}

#[test]
fn requeue_never_extends_cooldown() {
    let (sched, clock) = scheduler(empty_fetcher());
    let key = BlockKey::for_content(b"k");
    let t = clock.now();

    assert!(sched.requeue_after_cooldown(key, t + Duration::from_secs(10)));
    assert!(!sched.requeue_after_cooldown(key, t + Duration::from_secs(20)));
    assert_eq!(sched.next_wakeup(), Some(t + Duration::from_secs(10)));
    assert!(sched.requeue_after_cooldown(key, t + Duration::from_secs(5)));

    let snapshot = sched.cooldown_snapshot();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].wake_time, t + Duration::from_secs(5));
    assert_eq!(sched.key_state(&key), Some(KeyState::Cooling));
}

#[test]
fn unregistering_last_requester_cancels_cooldown() {
    let (sched, clock) = scheduler(empty_fetcher());
    let key = BlockKey::for_content(b"k");
    let a = Recorder::new(key);
    let b = Recorder::new(key);
    sched.register(dyn_req(&a));
    sched.register(dyn_req(&b));
    sched.requeue_after_cooldown(key, clock.now() + Duration::from_secs(60));

    assert!(sched.unregister(&dyn_req(&a), false));
    assert_eq!(sched.stats().cooling, 1);
    assert!(sched.unregister(&dyn_req(&b), false));
    assert!(!sched.unregister(&dyn_req(&b), false));
    assert_eq!(sched.key_state(&key), None);
    assert!(sched.cooldown_snapshot().is_empty());
    assert_eq!(a.outcomes() + b.outcomes(), 0);
}

#[test]
fn stay_subscribed_still_receives_outcome() {
    let (sched, _) = scheduler(store_fetcher(&[b"watch"], Arc::new(AtomicUsize::new(0))));
    let key = BlockKey::for_content(b"watch");
    let watcher = Recorder::new(key);
    let driver = Recorder::new(key);
    sched.register(dyn_req(&watcher));
    sched.register(dyn_req(&driver));

    assert!(sched.unregister(&dyn_req(&watcher), true));
    assert_eq!(sched.requester_count(&key), 2);
    let candidate = sched.next_candidate().unwrap();
    assert_eq!(RequesterId::of(&candidate), RequesterId::of(&driver));
    assert!(sched.next_candidate().is_none());

    sched.dispatch(&candidate);
    assert_eq!(watcher.successes.lock().len(), 1);
    assert_eq!(driver.successes.lock().len(), 1);
}

#[test]
fn unregister_key_only_touches_that_key() {
    let (sched, _) = scheduler(empty_fetcher());
    let key = BlockKey::for_content(b"mine");
    let other = BlockKey::for_content(b"other");
    let r = Recorder::new(key);
    sched.register(dyn_req(&r));

    assert!(!sched.unregister_key(&dyn_req(&r), &other));
    assert_eq!(sched.requester_count(&key), 1);
    assert!(sched.unregister_key(&dyn_req(&r), &key));
    assert_eq!(sched.requester_count(&key), 0);
    assert_eq!(sched.key_state(&key), None);
}

#[test]
fn internal_error_is_delivered_once() {
    let (sched, _) = scheduler(store_fetcher(&[b"ie"], Arc::new(AtomicUsize::new(0))));
    let key = BlockKey::for_content(b"ie");
    let r = Recorder::new(key);
    let other = Recorder::new(key);
    sched.register(dyn_req(&r));
    sched.register(dyn_req(&other));

    let err = std::io::Error::new(std::io::ErrorKind::Other, "bad state");
    assert!(sched.internal_error(&dyn_req(&r), err));
    assert_eq!(r.failure_kinds(), vec![FailureKind::InternalError]);

    sched.dispatch(&dyn_req(&other));
    assert_eq!(r.outcomes(), 1);
    assert_eq!(other.successes.lock().len(), 1);
}

#[test]
fn reload_restores_state_without_dispatching() {
    let calls = Arc::new(AtomicUsize::new(0));
    let (sched, clock) = scheduler(store_fetcher(&[b"r"], calls.clone()));
    let key = BlockKey::for_content(b"r");
    let cooled = BlockKey::for_content(b"cooled");
    let r = Recorder::new(key);
    let parked = Recorder::new(cooled);

    assert!(sched.reload_cooldown(cooled, clock.now() + Duration::from_secs(30)));
    assert!(sched.reload(dyn_req(&r)));
    assert!(sched.reload(dyn_req(&parked)));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(sched.key_state(&cooled), Some(KeyState::Cooling));

    let candidate = sched.next_candidate().unwrap();
    assert_eq!(candidate.key(), key);
    assert!(sched.next_candidate().is_none());

    clock.advance(Duration::from_secs(30));
    assert_eq!(sched.wake_due(16), 1);
    assert_eq!(sched.next_candidate().unwrap().key(), cooled);
}

#[tokio::test]
async fn wait_for_candidate_wakes_on_register() {
    let (sched, _) = scheduler(store_fetcher(&[b"w"], Arc::new(AtomicUsize::new(0))));
    let sched = Arc::new(sched);
    let key = BlockKey::for_content(b"w");

    let waiter = {
        let sched = Arc::clone(&sched);
        tokio::spawn(async move { sched.wait_for_candidate().await })
    };
    tokio::task::yield_now().await;
    let r = Recorder::new(key);
    sched.register(dyn_req(&r));

    let candidate = tokio::time::timeout(Duration::from_secs(5), waiter)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(candidate.key(), key);
}

#[test]
fn wait_for_candidate_pends_until_registration() {
    use tokio_test::{assert_ready, task};

    let (sched, _) = scheduler(store_fetcher(&[b"p"], Arc::new(AtomicUsize::new(0))));
    let key = BlockKey::for_content(b"p");

    let mut waiter = task::spawn(sched.wait_for_candidate());
    assert!(waiter.poll().is_pending());
    assert!(!waiter.is_woken());

    let r = Recorder::new(key);
    sched.register(dyn_req(&r));
    assert!(waiter.is_woken());
    let candidate = assert_ready!(waiter.poll());
    assert_eq!(candidate.key(), key);
}

#[test]
fn cancel_after_resolution_delivers_nothing_more() {
    let (sched, _) = scheduler(store_fetcher(&[b"late"], Arc::new(AtomicUsize::new(0))));
    let key = BlockKey::for_content(b"late");
    let r = Recorder::new(key);
    sched.register(dyn_req(&r));

    // A second worker still holds the candidate after the first one served it.
    let candidate = sched.next_candidate().unwrap();
    assert!(sched.dispatch(&candidate).is_success());
    r.cancel();

    assert_eq!(
        sched.dispatch(&candidate),
        DispatchOutcome::NoWork(NoWorkReason::NotRegistered)
    );
    assert_eq!(r.outcomes(), 1);
    assert_eq!(r.successes.lock().len(), 1);
    assert!(r.failure_kinds().is_empty());
}

#[test]
fn internal_error_after_resolution_is_dropped() {
    let (sched, _) = scheduler(store_fetcher(&[b"done"], Arc::new(AtomicUsize::new(0))));
    let key = BlockKey::for_content(b"done");
    let r = Recorder::new(key);
    sched.register(dyn_req(&r));
    sched.dispatch(&dyn_req(&r));

    let err = std::io::Error::new(std::io::ErrorKind::Other, "too late");
    assert!(!sched.internal_error(&dyn_req(&r), err));
    assert_eq!(r.outcomes(), 1);
    assert!(r.failure_kinds().is_empty());
}

#[test]
fn dropped_requesters_leave_no_state_behind() {
    let (sched, _) = scheduler(empty_fetcher());
    let key = BlockKey::for_content(b"abandoned");
    for _ in 0..3 {
        let r = Recorder::new(key);
        sched.register(dyn_req(&r));
    }

    assert!(sched.next_candidate().is_none());
    assert_eq!(sched.key_state(&key), None);
    assert_eq!(sched.requester_count(&key), 0);
    assert_eq!(sched.stats(), SchedulerStats::default());
}

#[test]
fn requesters_dropped_while_cooling_are_forgotten_on_wake() {
    let (sched, clock) = scheduler(failing_fetcher(
        FailureKind::RejectedOverload,
        Arc::new(AtomicUsize::new(0)),
    ));
    let key = BlockKey::for_content(b"gone");
    let r = Recorder::new(key);
    sched.register(dyn_req(&r));
    sched.dispatch(&dyn_req(&r));
    assert_eq!(sched.key_state(&key), Some(KeyState::Cooling));

    let parked = Recorder::new(key);
    sched.register(dyn_req(&parked));
    drop(parked);

    clock.advance(SchedulerConfig::default().cooldown_period);
    assert_eq!(sched.wake_due(16), 1);
    assert_eq!(sched.key_state(&key), None);
    assert_eq!(sched.stats(), SchedulerStats::default());
}

#[test]
fn reregister_clears_cooldown() {
    let calls = Arc::new(AtomicUsize::new(0));
    let (sched, _) = scheduler(failing_fetcher(FailureKind::RouteNotFound, calls.clone()));
    let key = BlockKey::for_content(b"again");
    let r = Recorder::new(key);
    sched.register(dyn_req(&r));
    sched.dispatch(&dyn_req(&r));
    assert_eq!(sched.key_state(&key), Some(KeyState::Cooling));

    // Plain registration parks behind the cooldown.
    let parked = Recorder::new(key);
    sched.register(dyn_req(&parked));
    assert!(sched.next_candidate().is_none());

    assert!(!sched.reregister(dyn_req(&parked)));
    assert_eq!(sched.key_state(&key), Some(KeyState::Registered));
    assert!(sched.cooldown_snapshot().is_empty());

    let candidate = sched.next_candidate().unwrap();
    assert_eq!(RequesterId::of(&candidate), RequesterId::of(&parked));
    assert!(sched.dispatch(&candidate).did_work());
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(parked.failure_kinds(), vec![FailureKind::RouteNotFound]);
}
