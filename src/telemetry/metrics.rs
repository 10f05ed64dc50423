//! Metrics recorded through the `metrics` facade.
//!
//! No exporter is installed here; the embedding node chooses one. Without a
//! recorder every call is a no-op.

use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};

use crate::fetch::FailureKind;

/// Register metric descriptions. Call once after installing a recorder.
pub fn init_metrics() {
    describe_counter!("keyfetch_dispatch_total", "Dispatch attempts by outcome");
    describe_counter!("keyfetch_delivery_total", "Outcomes delivered to requesters");
    describe_counter!("keyfetch_callback_panics_total", "Requester callbacks that panicked");
    describe_histogram!("keyfetch_fetch_latency_ms", "Fetch collaborator latency");
    describe_gauge!("keyfetch_pending", "Requesters waiting for dispatch");
    describe_gauge!("keyfetch_cooling", "Keys in cooldown");
    describe_gauge!("keyfetch_indexed_keys", "Keys with registered requesters");
}

/// Count one dispatch attempt. `outcome` is a short static label.
pub fn record_dispatch(outcome: &'static str) {
    counter!("keyfetch_dispatch_total", "outcome" => outcome).increment(1);
}

/// Count outcomes fanned out to requesters. `None` means success.
pub fn record_delivery(failure: Option<FailureKind>, count: usize) {
    let kind = match failure {
        Some(kind) => kind_label(kind),
        None => "success",
    };
    counter!("keyfetch_delivery_total", "kind" => kind).increment(count as u64);
}

pub fn record_callback_panic() {
    counter!("keyfetch_callback_panics_total").increment(1);
}

pub fn record_fetch_latency(elapsed: Duration) {
    histogram!("keyfetch_fetch_latency_ms").record(elapsed.as_secs_f64() * 1000.0);
}

pub fn record_queue_depths(pending: usize, cooling: usize, indexed_keys: usize) {
    gauge!("keyfetch_pending").set(pending as f64);
    gauge!("keyfetch_cooling").set(cooling as f64);
    gauge!("keyfetch_indexed_keys").set(indexed_keys as f64);
}

fn kind_label(kind: FailureKind) -> &'static str {
    match kind {
        FailureKind::DecodeFailed => "decode_failed",
        FailureKind::DataNotFound => "data_not_found",
        FailureKind::InternalError => "internal_error",
        FailureKind::RejectedOverload => "rejected_overload",
        FailureKind::RouteNotFound => "route_not_found",
        FailureKind::RouteReallyNotFound => "route_really_not_found",
        FailureKind::TransferFailed => "transfer_failed",
        FailureKind::VerifyFailed => "verify_failed",
        FailureKind::Cancelled => "cancelled",
        FailureKind::RecentlyFailed => "recently_failed",
    }
}
