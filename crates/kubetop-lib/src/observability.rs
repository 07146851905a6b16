//! Observability infrastructure for the dashboard engine
//!
//! Provides:
//! - Prometheus self-metrics (tick latency, tracked containers, evictions, retries)
//! - Structured JSON logging with tracing

use crate::error::EngineError;
use prometheus::{
    register_histogram, register_int_counter, register_int_gauge, Histogram, IntCounter, IntGauge,
};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Histogram buckets for tick latency (in seconds)
const TICK_BUCKETS: &[f64] = &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<EngineMetricsInner> = OnceLock::new();

struct EngineMetricsInner {
    tick_duration_seconds: Histogram,
    containers_tracked: IntGauge,
    containers_published: IntGauge,
    containers_evicted: IntCounter,
    counter_resets: IntCounter,
    unchanged_counters: IntCounter,
    fetch_retries: IntCounter,
    resource_refreshes: IntCounter,
}

impl EngineMetricsInner {
    fn new() -> Self {
        Self {
            tick_duration_seconds: register_histogram!(
                "kubetop_tick_duration_seconds",
                "Time spent on one fetch-update-publish cycle",
                TICK_BUCKETS.to_vec()
            )
            .expect("Failed to register tick_duration_seconds"),

            containers_tracked: register_int_gauge!(
                "kubetop_containers_tracked",
                "Number of containers held in the registry"
            )
            .expect("Failed to register containers_tracked"),

            containers_published: register_int_gauge!(
                "kubetop_containers_published",
                "Number of containers in the last published snapshot"
            )
            .expect("Failed to register containers_published"),

            containers_evicted: register_int_counter!(
                "kubetop_containers_evicted_total",
                "Containers evicted after their CPU counter went stale"
            )
            .expect("Failed to register containers_evicted"),

            counter_resets: register_int_counter!(
                "kubetop_cpu_counter_resets_total",
                "CPU counters observed going backwards"
            )
            .expect("Failed to register counter_resets"),

            unchanged_counters: register_int_counter!(
                "kubetop_cpu_counter_unchanged_total",
                "CPU counter samples identical to the previous value"
            )
            .expect("Failed to register unchanged_counters"),

            fetch_retries: register_int_counter!(
                "kubetop_fetch_retries_total",
                "Retries of transient fetch failures"
            )
            .expect("Failed to register fetch_retries"),

            resource_refreshes: register_int_counter!(
                "kubetop_resource_refreshes_total",
                "Completed container resource-spec refreshes"
            )
            .expect("Failed to register resource_refreshes"),
        }
    }
}

/// Handle to the global engine metrics.
/// Clones share the same underlying metrics.
#[derive(Clone)]
pub struct EngineMetrics {
    _private: (),
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineMetrics {
    /// Create a handle, registering the metrics on first call
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(EngineMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &EngineMetricsInner {
        GLOBAL_METRICS.get_or_init(EngineMetricsInner::new)
    }

    pub fn observe_tick(&self, elapsed: Duration) {
        self.inner().tick_duration_seconds.observe(elapsed.as_secs_f64());
    }

    pub fn set_tracked(&self, count: usize) {
        self.inner().containers_tracked.set(count as i64);
    }

    pub fn set_published(&self, count: usize) {
        self.inner().containers_published.set(count as i64);
    }

    pub fn inc_evicted(&self, count: usize) {
        self.inner().containers_evicted.inc_by(count as u64);
    }

    pub fn inc_counter_resets(&self, count: usize) {
        self.inner().counter_resets.inc_by(count as u64);
    }

    pub fn inc_unchanged_counters(&self, count: usize) {
        self.inner().unchanged_counters.inc_by(count as u64);
    }

    pub fn inc_fetch_retries(&self) {
        self.inner().fetch_retries.inc();
    }

    pub fn inc_resource_refreshes(&self) {
        self.inner().resource_refreshes.inc();
    }
}

/// Structured logger for dashboard lifecycle events
#[derive(Clone)]
pub struct StructuredLogger {
    cluster: String,
}

impl StructuredLogger {
    pub fn new(cluster: impl Into<String>) -> Self {
        Self {
            cluster: cluster.into(),
        }
    }

    pub fn cluster(&self) -> &str {
        &self.cluster
    }

    /// Log dashboard startup
    pub fn log_startup(&self, version: &str, interval: Duration) {
        info!(
            event = "dashboard_started",
            cluster = %self.cluster,
            version = %version,
            interval_ms = interval.as_millis() as u64,
            "Dashboard started"
        );
    }

    /// Log dashboard shutdown
    pub fn log_shutdown(&self, reason: &str, ticks: u64) {
        info!(
            event = "dashboard_stopped",
            cluster = %self.cluster,
            reason = %reason,
            ticks = ticks,
            "Dashboard stopped"
        );
    }

    pub fn log_evictions(&self, tick: u64, evicted: usize) {
        debug!(
            event = "container_evicted",
            cluster = %self.cluster,
            tick = tick,
            evicted = evicted,
            "Evicted stale containers"
        );
    }

    pub fn log_counter_resets(&self, tick: u64, resets: usize) {
        info!(
            event = "counter_reset",
            cluster = %self.cluster,
            tick = tick,
            resets = resets,
            "CPU counters went backwards, containers likely restarted"
        );
    }

    /// Log a retry of a transient fetch failure
    pub fn log_fetch_retry(&self, stage: &str, attempt: u32, backoff: Duration, error: &str) {
        warn!(
            event = "fetch_retry",
            cluster = %self.cluster,
            stage = %stage,
            attempt = attempt,
            backoff_ms = backoff.as_millis() as u64,
            error = %error,
            "Transient fetch failure, retrying"
        );
    }

    /// Log the fatal failure of a cycle
    pub fn log_cycle_failed(&self, tick: u64, err: &EngineError) {
        error!(
            event = "cycle_failed",
            cluster = %self.cluster,
            tick = tick,
            stage = %err.stage(),
            error = %err,
            "Cycle failed, stopping"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::Encoder;

    #[test]
    fn test_engine_metrics_exposed() {
        let metrics = EngineMetrics::new();
        metrics.observe_tick(Duration::from_millis(12));
        metrics.set_tracked(7);
        metrics.set_published(3);
        metrics.inc_evicted(1);
        metrics.inc_counter_resets(2);
        metrics.inc_unchanged_counters(0);
        metrics.inc_fetch_retries();
        metrics.inc_resource_refreshes();

        let mut buffer = Vec::new();
        prometheus::TextEncoder::new()
            .encode(&prometheus::gather(), &mut buffer)
            .unwrap();
        let text = String::from_utf8(buffer).unwrap();
        assert!(text.contains("kubetop_tick_duration_seconds"));
        assert!(text.contains("kubetop_containers_tracked"));
    }

    #[test]
    fn test_structured_logger_creation() {
        let logger = StructuredLogger::new("prod-eu");
        assert_eq!(logger.cluster(), "prod-eu");
    }
}
