//! Telemetry for the fetch scheduler.
//!
//! Provides structured logging, dispatch tracing, and metrics collection.

mod logging;
mod metrics;
mod spans;

pub use logging::{init_logging, LogConfig, LogError, LogFormat};
pub use self::metrics::{
    init_metrics, record_callback_panic, record_delivery, record_dispatch,
    record_fetch_latency, record_queue_depths,
};
pub use spans::{DispatchSpan, SpanExt};
