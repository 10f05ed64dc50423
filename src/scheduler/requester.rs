//! The requester capability set and a channel-backed implementation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use super::priority::Priority;
use crate::fetch::{Block, BlockKey, FetchFailure, FetchOptions};

/// An entity waiting on the outcome of fetching one key.
///
/// The scheduler only keeps weak back-references, so dropping the last `Arc`
/// silently withdraws the requester. `key`, `priority` and `is_cancelled` may
/// be called while scheduler state is locked and must not call back into the
/// scheduler. The outcome callbacks run unlocked.
pub trait Requester: Send + Sync {
    fn key(&self) -> BlockKey;

    fn is_cancelled(&self) -> bool;

    fn on_success(&self, block: &Block);

    fn on_failure(&self, failure: &FetchFailure);

    fn priority(&self) -> Priority {
        Priority::Normal
    }

    fn fetch_options(&self) -> FetchOptions {
        FetchOptions::default()
    }
}

/// Allocation identity of a requester.
///
/// Stable for as long as the scheduler holds a weak reference, because a
/// live weak reference keeps the allocation from being reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequesterId(usize);

impl RequesterId {
    pub fn of<R: ?Sized>(requester: &Arc<R>) -> Self {
        Self(Arc::as_ptr(requester) as *const () as usize)
    }
}

/// Outcome delivered through a [`ChannelRequester`].
pub type FetchResult = Result<Block, FetchFailure>;

/// Requester that forwards its single outcome to a oneshot channel.
pub struct ChannelRequester {
    key: BlockKey,
    priority: Priority,
    options: FetchOptions,
    cancelled: Arc<AtomicBool>,
    response_tx: Mutex<Option<oneshot::Sender<FetchResult>>>,
}

impl std::fmt::Debug for ChannelRequester {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelRequester")
            .field("key", &self.key)
            .field("priority", &self.priority)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

impl ChannelRequester {
    pub fn new(
        key: BlockKey,
        priority: Priority,
    ) -> (Arc<Self>, oneshot::Receiver<FetchResult>) {
        Self::with_options(key, priority, FetchOptions::default())
    }

    pub fn with_options(
        key: BlockKey,
        priority: Priority,
        options: FetchOptions,
    ) -> (Arc<Self>, oneshot::Receiver<FetchResult>) {
        let (tx, rx) = oneshot::channel();
        let requester = Arc::new(Self {
            key,
            priority,
            options,
            cancelled: Arc::new(AtomicBool::new(false)),
            response_tx: Mutex::new(Some(tx)),
        });
        (requester, rx)
    }

    /// Withdraw interest. Takes effect at the next dispatch check.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Shared cancellation flag, for callers that cancel from elsewhere.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    fn send(&self, result: FetchResult) {
        if let Some(tx) = self.response_tx.lock().take() {
            let _ = tx.send(result);
        }
    }
}

impl Requester for ChannelRequester {
    fn key(&self) -> BlockKey {
        self.key
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    fn on_success(&self, block: &Block) {
        self.send(Ok(block.clone()));
    }

    fn on_failure(&self, failure: &FetchFailure) {
        self.send(Err(failure.clone()));
    }

    fn priority(&self) -> Priority {
        self.priority
    }

    fn fetch_options(&self) -> FetchOptions {
        self.options
    }
}
