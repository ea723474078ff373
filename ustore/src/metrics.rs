//! Process-wide counters for the wire-protocol server and `Database`
//! facade, registered the same way `ustore_store::metrics` registers
//! the chunk-store counters: lazily, against the default `prometheus`
//! registry, via `once_cell::sync::Lazy`.

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts, register_histogram_vec, register_int_counter_vec};

pub static REQUESTS_RECEIVED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        Opts::new("ustore_requests_received_total", "Wire-protocol requests received, by request type"),
        &["request_type"]
    )
    .unwrap()
});

pub static REQUESTS_FAILED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        Opts::new("ustore_requests_failed_total", "Wire-protocol requests that returned an error, by error code"),
        &["error_code"]
    )
    .unwrap()
});

pub static REQUEST_LATENCY_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        HistogramOpts::new("ustore_request_latency_seconds", "Time to service one wire-protocol request, by request type"),
        &["request_type"]
    )
    .unwrap()
});

pub static REMOTE_FETCHES: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        Opts::new("ustore_remote_fetches_total", "Chunk fetches forwarded to a remote node, by outcome"),
        &["outcome"]
    )
    .unwrap()
});
