//! Metrics registry for Netperf observability
//!
//! OpenTelemetry instruments emitted by the reconciler. When no meter
//! provider is installed (tests, no OTLP endpoint) the global no-op provider
//! swallows every measurement.

use once_cell::sync::Lazy;
use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry::{global, KeyValue};

/// Global meter for Netperf metrics
static METER: Lazy<Meter> = Lazy::new(|| global::meter("netperf"));

/// Counter of status phase transitions
///
/// Labels:
/// - `from`: phase before the transition
/// - `to`: phase after the transition
pub static PHASE_TRANSITIONS: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("netperf_phase_transitions_total")
        .with_description("Total number of Netperf phase transitions")
        .with_unit("{transitions}")
        .build()
});

/// Counter of reconciliation errors
///
/// Labels:
/// - `event`: job, pod
/// - `error_type`: transient, permanent
pub static RECONCILE_ERRORS: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("netperf_reconcile_errors_total")
        .with_description("Total number of Netperf reconciliation errors")
        .with_unit("{errors}")
        .build()
});

/// Histogram of single-event reconciliation duration
///
/// Labels:
/// - `event`: job, pod
/// - `result`: success, error
pub static RECONCILE_DURATION: Lazy<Histogram<f64>> = Lazy::new(|| {
    METER
        .f64_histogram("netperf_reconcile_duration_seconds")
        .with_description("Duration of Netperf event reconciliation in seconds")
        .with_unit("s")
        .build()
});

/// Histogram of measured throughput
pub static THROUGHPUT: Lazy<Histogram<f64>> = Lazy::new(|| {
    METER
        .f64_histogram("netperf_throughput_bits_per_second")
        .with_description("Throughput measured by completed Netperf benchmarks")
        .with_unit("bit/s")
        .build()
});

/// Counter of observed Netperf deletions
pub static JOBS_DELETED: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("netperf_jobs_deleted_total")
        .with_description("Total number of Netperf deletions observed")
        .with_unit("{netperfs}")
        .build()
});

/// Record a phase transition
pub fn record_transition(from: &str, to: &str) {
    PHASE_TRANSITIONS.add(
        1,
        &[
            KeyValue::new("from", from.to_string()),
            KeyValue::new("to", to.to_string()),
        ],
    );
}

/// Record a failed reconciliation
pub fn record_error(event: &'static str, retryable: bool) {
    let error_type = if retryable { "transient" } else { "permanent" };
    RECONCILE_ERRORS.add(
        1,
        &[
            KeyValue::new("event", event),
            KeyValue::new("error_type", error_type),
        ],
    );
}

/// Record how long a reconciliation took
pub fn record_duration(event: &'static str, success: bool, seconds: f64) {
    let result = if success { "success" } else { "error" };
    RECONCILE_DURATION.record(
        seconds,
        &[
            KeyValue::new("event", event),
            KeyValue::new("result", result),
        ],
    );
}
