//! The `block_fetch` span and helpers for filling in its deferred fields.

use tracing::{info_span, Span};

use crate::fetch::BlockKey;
use crate::scheduler::Priority;

/// Deferred-field recording on a [`Span`].
pub trait SpanExt {
    /// Set `status`, and `error.message` on failure.
    fn record_result<T, E>(&self, result: &Result<T, E>)
    where
        E: std::fmt::Display;

    fn record_latency(&self, elapsed: std::time::Duration);
}

impl SpanExt for Span {
    fn record_result<T, E>(&self, result: &Result<T, E>)
    where
        E: std::fmt::Display,
    {
        match result {
            Ok(_) => {
                self.record("status", "ok");
            }
            Err(e) => {
                self.record("status", "error");
                self.record("error.message", e.to_string().as_str());
            }
        }
    }

    fn record_latency(&self, elapsed: std::time::Duration) {
        self.record("latency_ms", elapsed.as_millis() as u64);
    }
}

/// Span covering one fetch and its fan-out.
pub struct DispatchSpan;

impl DispatchSpan {
    /// `key` and `priority` (of the driving requester) are set up front;
    /// `status`, `error.message`, `latency_ms` and `delivered` are recorded
    /// as the dispatch progresses.
    pub fn new(key: &BlockKey, priority: Priority) -> Span {
        info_span!(
            "block_fetch",
            key = %key,
            priority = ?priority,
            status = tracing::field::Empty,
            error.message = tracing::field::Empty,
            latency_ms = tracing::field::Empty,
            delivered = tracing::field::Empty,
        )
    }
}
