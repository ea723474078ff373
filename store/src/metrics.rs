//! Process-wide counters for the chunk store and node builder.
//!
//! Registered lazily against the default `prometheus` registry, mirroring
//! the `LazyLock<IntGaugeVec>` pattern the glue crate uses for its own
//! metrics, substituting `once_cell::sync::Lazy` since that is the cell
//! type this workspace's dependency set actually provides.

use once_cell::sync::Lazy;
use prometheus::{
    Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, register_histogram,
    register_int_counter, register_int_counter_vec, register_int_gauge,
};

pub static CHUNKS_WRITTEN: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        Opts::new(
            "ustore_chunks_written_total",
            "Chunks accepted by the chunk store, by chunk type"
        ),
        &["chunk_type"]
    )
    .unwrap()
});

pub static CHUNK_BYTES_WRITTEN: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "ustore_chunk_bytes_written_total",
        "Total bytes of chunk payload (header included) written to the segment file"
    )
    .unwrap()
});

pub static SEGMENTS_ROLLED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "ustore_segments_rolled_total",
        "Number of times the active major segment was sealed and replaced"
    )
    .unwrap()
});

pub static PENDING_SYNC_CHUNKS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "ustore_pending_sync_chunks",
        "Chunks written since the last fsync of the segment file"
    )
    .unwrap()
});

pub static SYNC_LATENCY_SECONDS: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(HistogramOpts::new(
        "ustore_sync_latency_seconds",
        "Wall-clock time spent in a single fsync of the segment file"
    ))
    .unwrap()
});

pub static BUILDER_CHUNKS_REUSED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "ustore_builder_chunks_reused_total",
        "Chunks spliced by reference (not re-read, not re-written) during a commit"
    )
    .unwrap()
});
