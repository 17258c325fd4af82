//! Metric instruments for serialq.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! Without a provider installed the instruments are no-ops.

use std::time::Duration;

use opentelemetry::KeyValue;
use opentelemetry::metrics::{Counter, Histogram, Meter};

/// Returns the shared meter for serialq instruments.
fn meter() -> Meter {
    opentelemetry::global::meter(super::SERVICE_NAME)
}

/// Counter: work items accepted by `submit`.
/// Labels: `origin`.
pub fn items_submitted() -> Counter<u64> {
    meter()
        .u64_counter("serialq.items.submitted")
        .with_description("Number of work items accepted by the dispatcher")
        .build()
}

/// Counter: submissions refused (rejected during shutdown or queue full).
/// Labels: `origin`.
pub fn items_rejected() -> Counter<u64> {
    meter()
        .u64_counter("serialq.items.rejected")
        .with_description("Number of work items refused by the dispatcher")
        .build()
}

/// Counter: work items that panicked while running.
/// Labels: `origin`.
pub fn items_faulted() -> Counter<u64> {
    meter()
        .u64_counter("serialq.items.faulted")
        .with_description("Number of work items that faulted")
        .build()
}

/// Histogram: time between enqueue and start of execution.
pub fn queue_wait_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("serialq.item.queue_wait_ms")
        .with_description("Time a work item spent queued")
        .with_unit("ms")
        .build()
}

/// Histogram: execution time on the dispatcher thread.
/// Labels: `origin`.
pub fn item_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("serialq.item.duration_ms")
        .with_description("Work item execution duration")
        .with_unit("ms")
        .build()
}

/// Instruments held by one dispatcher, built once at startup.
pub(crate) struct DispatchMetrics {
    submitted: Counter<u64>,
    rejected: Counter<u64>,
    faulted: Counter<u64>,
    queue_wait: Histogram<f64>,
    duration: Histogram<f64>,
}

impl DispatchMetrics {
    pub(crate) fn new() -> Self {
        Self {
            submitted: items_submitted(),
            rejected: items_rejected(),
            faulted: items_faulted(),
            queue_wait: queue_wait_ms(),
            duration: item_duration_ms(),
        }
    }

    pub(crate) fn record_submitted(&self, origin: &'static str) {
        self.submitted.add(1, &[KeyValue::new("origin", origin)]);
    }

    pub(crate) fn record_rejected(&self, origin: &'static str) {
        self.rejected.add(1, &[KeyValue::new("origin", origin)]);
    }

    pub(crate) fn record_fault(&self, origin: &'static str) {
        self.faulted.add(1, &[KeyValue::new("origin", origin)]);
    }

    pub(crate) fn record_queue_wait(&self, waited: Duration) {
        self.queue_wait.record(millis(waited), &[]);
    }

    pub(crate) fn record_duration(&self, took: Duration, origin: &'static str) {
        self.duration
            .record(millis(took), &[KeyValue::new("origin", origin)]);
    }
}

fn millis(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}
