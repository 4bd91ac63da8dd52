//! Prometheus metrics for the delivery driver.
//!
//! The [`StreamMetrics`] struct owns a dedicated [`Registry`] that the host
//! process's metrics endpoint can encode into the Prometheus text exposition
//! format. Sink delivery lag is observable here and through the persisted
//! task — never through block production failures.

use prometheus::{
    register_histogram_with_registry, register_int_counter_with_registry,
    register_int_gauge_with_registry, Histogram, HistogramOpts, IntCounter, IntGauge, Opts,
    Registry,
};

/// Central collection of delivery-coordination metrics.
pub struct StreamMetrics {
    /// The Prometheus registry that owns every metric below.
    pub registry: Registry,

    // ── Counters ────────────────────────────────────────────────────────
    /// Blocks whose delivery reached Success and was durably committed.
    pub blocks_committed: IntCounter,
    /// Sink deliveries still pending after a coordinator pass (failures and
    /// timeouts both land here; logs tell them apart).
    pub sink_deliveries_failed: IntCounter,
    /// Prepare-phase restarts (lock contention, store errors).
    pub prepare_retries: IntCounter,
    /// Commit attempts that failed or lost the atomic unlock-with-state race.
    pub commit_failures: IntCounter,
    /// Tasks resumed from persisted state instead of started fresh.
    pub tasks_resumed: IntCounter,

    // ── Gauges ──────────────────────────────────────────────────────────
    /// Blocks currently buffered in the cache queue.
    pub queue_depth: IntGauge,
    /// Height of the last block committed as fully delivered.
    pub last_committed_height: IntGauge,

    // ── Histograms ──────────────────────────────────────────────────────
    /// Wall time from first delivery attempt to durable commit, in seconds.
    pub block_delivery_seconds: Histogram,
}

impl StreamMetrics {
    /// Create a fresh set of metrics, all registered under a new [`Registry`].
    pub fn new() -> Self {
        let registry = Registry::new();

        let blocks_committed = register_int_counter_with_registry!(
            Opts::new(
                "blockcast_blocks_committed_total",
                "Blocks committed as fully delivered to every sink"
            ),
            registry
        )
        .expect("failed to register blocks_committed counter");

        let sink_deliveries_failed = register_int_counter_with_registry!(
            Opts::new(
                "blockcast_sink_deliveries_failed_total",
                "Sink deliveries still pending after a coordinator pass"
            ),
            registry
        )
        .expect("failed to register sink_deliveries_failed counter");

        let prepare_retries = register_int_counter_with_registry!(
            Opts::new(
                "blockcast_prepare_retries_total",
                "Prepare-phase restarts due to lock contention or store errors"
            ),
            registry
        )
        .expect("failed to register prepare_retries counter");

        let commit_failures = register_int_counter_with_registry!(
            Opts::new(
                "blockcast_commit_failures_total",
                "Atomic persist-and-release attempts that failed or lost the race"
            ),
            registry
        )
        .expect("failed to register commit_failures counter");

        let tasks_resumed = register_int_counter_with_registry!(
            Opts::new(
                "blockcast_tasks_resumed_total",
                "Delivery tasks resumed from persisted state after a restart or retry"
            ),
            registry
        )
        .expect("failed to register tasks_resumed counter");

        let queue_depth = register_int_gauge_with_registry!(
            Opts::new(
                "blockcast_cache_queue_depth",
                "Blocks buffered between block-end and delivery"
            ),
            registry
        )
        .expect("failed to register queue_depth gauge");

        let last_committed_height = register_int_gauge_with_registry!(
            Opts::new(
                "blockcast_last_committed_height",
                "Height of the last fully delivered block"
            ),
            registry
        )
        .expect("failed to register last_committed_height gauge");

        let block_delivery_seconds = register_histogram_with_registry!(
            HistogramOpts::new(
                "blockcast_block_delivery_seconds",
                "Wall time from first delivery attempt to durable commit"
            )
            .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]),
            registry
        )
        .expect("failed to register block_delivery_seconds histogram");

        Self {
            registry,
            blocks_committed,
            sink_deliveries_failed,
            prepare_retries,
            commit_failures,
            tasks_resumed,
            queue_depth,
            last_committed_height,
            block_delivery_seconds,
        }
    }
}

impl Default for StreamMetrics {
    fn default() -> Self {
        Self::new()
    }
}
