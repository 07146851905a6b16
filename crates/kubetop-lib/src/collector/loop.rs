//! Tick scheduler
//!
//! Drives the fetch-update-publish cycle at a fixed interval and refreshes
//! container resource specs on a slower, independent cadence. Both timers
//! live in one task so the registry has a single owner and needs no lock.

use super::ClusterFetcher;
use crate::error::{EngineError, FetchError, Stage};
use crate::models::{ContainerResourceSpec, NodeMetrics};
use crate::observability::{EngineMetrics, StructuredLogger};
use crate::pipeline::Pipeline;
use crate::registry::{ContainerRegistry, UpdateSummary};
use crate::sink::StatsSink;
use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval, sleep, Instant, MissedTickBehavior};
use tracing::{debug, info};

/// Configuration for the tick scheduler
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Metrics tick interval (default: 5 seconds)
    pub interval: Duration,
    /// Resource-spec refresh interval (default: 5 ticks)
    pub resource_refresh_interval: Duration,
    /// Retries of a transient fetch failure within one cycle (default: 0)
    pub fetch_retries: u32,
    /// Backoff before the first retry, doubled per attempt
    pub retry_backoff: Duration,
    /// Upper bound of the retry backoff
    pub max_retry_backoff: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            resource_refresh_interval: Duration::from_secs(25),
            fetch_retries: 0,
            retry_backoff: Duration::from_millis(500),
            max_retry_backoff: Duration::from_secs(30),
        }
    }
}

impl SchedulerConfig {
    /// Backoff before retry number `attempt` (zero-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.retry_backoff
            .saturating_mul(factor)
            .min(self.max_retry_backoff)
    }
}

/// Outcome of one metrics cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub tick: u64,
    /// Records handed to the sink
    pub published: usize,
    /// Containers held in the registry after eviction
    pub tracked: usize,
    pub evicted: usize,
}

/// Single-owner driver of the registry
pub struct TickScheduler {
    fetcher: Arc<dyn ClusterFetcher>,
    sink: Arc<dyn StatsSink>,
    registry: ContainerRegistry,
    pipeline: Pipeline,
    config: SchedulerConfig,
    metrics: EngineMetrics,
    logger: StructuredLogger,
    ticks: u64,
}

impl TickScheduler {
    pub fn new(
        fetcher: Arc<dyn ClusterFetcher>,
        sink: Arc<dyn StatsSink>,
        registry: ContainerRegistry,
        pipeline: Pipeline,
        config: SchedulerConfig,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            fetcher,
            sink,
            registry,
            pipeline,
            config,
            metrics: EngineMetrics::new(),
            logger,
            ticks: 0,
        }
    }

    pub fn registry(&self) -> &ContainerRegistry {
        &self.registry
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Run until `shutdown` fires or a cycle fails.
    ///
    /// The first resource refresh and metrics cycle happen immediately, even
    /// when a stop is already pending. When both timers are due at the same
    /// instant the refresh runs first. The stop signal is observed between
    /// cycles; an in-flight cycle completes. Returns the registry on a clean
    /// stop.
    pub async fn run(
        mut self,
        mut shutdown: broadcast::Receiver<()>,
    ) -> std::result::Result<ContainerRegistry, EngineError> {
        info!(
            interval_ms = self.config.interval.as_millis() as u64,
            resource_refresh_ms = self.config.resource_refresh_interval.as_millis() as u64,
            "Starting tick scheduler"
        );

        let mut metrics_ticker = interval(self.config.interval);
        metrics_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut resources_ticker = interval(self.config.resource_refresh_interval);
        resources_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // First tick of both timers completes at once and is the initial cycle
        resources_ticker.tick().await;
        metrics_ticker.tick().await;
        let initial = match self.refresh_resources().await {
            Ok(_) => self.tick().await.map(|_| ()),
            Err(err) => Err(err),
        };
        if let Err(err) = initial {
            return Err(self.fail(err));
        }

        loop {
            let outcome = tokio::select! {
                biased;

                _ = shutdown.recv() => {
                    info!(ticks = self.ticks, "Shutting down tick scheduler");
                    self.logger.log_shutdown("stop signal", self.ticks);
                    return Ok(self.registry);
                }
                _ = resources_ticker.tick() => self.refresh_resources().await.map(|_| ()),
                _ = metrics_ticker.tick() => self.tick().await.map(|_| ()),
            };

            if let Err(err) = outcome {
                return Err(self.fail(err));
            }
        }
    }

    fn fail(&self, err: EngineError) -> EngineError {
        self.logger.log_cycle_failed(self.ticks, &err);
        self.logger.log_shutdown("cycle failed", self.ticks);
        err
    }

    /// Overwrite requests and limits of every known container.
    /// Returns the number of container specs applied.
    pub async fn refresh_resources(&mut self) -> std::result::Result<usize, EngineError> {
        let started = Instant::now();
        let specs = self
            .fetch_resources()
            .await
            .map_err(EngineError::ResourceRefresh)?;

        self.registry.apply_resources(&specs, Utc::now());
        self.metrics.inc_resource_refreshes();

        debug!(
            containers = specs.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Refreshed container resources"
        );
        Ok(specs.len())
    }

    /// One metrics cycle: fetch, update, snapshot, filter, sort, publish
    pub async fn tick(&mut self) -> std::result::Result<TickReport, EngineError> {
        let started = Instant::now();
        self.ticks += 1;
        let tick = self.ticks;

        let nodes = self
            .fetch_metrics()
            .await
            .map_err(EngineError::from_metrics_fetch)?;

        let mut summary = UpdateSummary::default();
        for node in &nodes {
            summary.merge(self.registry.apply_node_metrics(node));
        }
        if summary.counter_resets > 0 {
            self.logger.log_counter_resets(tick, summary.counter_resets);
            self.metrics.inc_counter_resets(summary.counter_resets);
        }
        self.metrics.inc_unchanged_counters(summary.unchanged_counters);

        let snapshot = self.registry.snapshot(Utc::now());
        if snapshot.evicted > 0 {
            self.logger.log_evictions(tick, snapshot.evicted);
            self.metrics.inc_evicted(snapshot.evicted);
        }

        let stats = self.pipeline.run(snapshot.stats);
        let report = TickReport {
            tick,
            published: stats.len(),
            tracked: self.registry.len(),
            evicted: snapshot.evicted,
        };
        self.sink.publish(stats);

        let elapsed = started.elapsed();
        self.metrics.observe_tick(elapsed);
        self.metrics.set_tracked(report.tracked);
        self.metrics.set_published(report.published);

        debug!(
            tick = tick,
            nodes = nodes.len(),
            rates_updated = summary.rates_updated,
            published = report.published,
            tracked = report.tracked,
            elapsed_ms = elapsed.as_millis() as u64,
            "Tick complete"
        );

        Ok(report)
    }

    async fn fetch_metrics(&self) -> std::result::Result<Vec<NodeMetrics>, FetchError> {
        let mut attempt = 0;
        loop {
            match self.fetcher.list_metrics().await {
                Ok(nodes) => return Ok(nodes),
                Err(err) => match self.retry_delay(Stage::Fetch, attempt, &err) {
                    Some(delay) => sleep(delay).await,
                    None => return Err(err),
                },
            }
            attempt += 1;
        }
    }

    async fn fetch_resources(&self) -> std::result::Result<Vec<ContainerResourceSpec>, FetchError> {
        let mut attempt = 0;
        loop {
            match self.fetcher.list_container_resources().await {
                Ok(specs) => return Ok(specs),
                Err(err) => match self.retry_delay(Stage::ResourceRefresh, attempt, &err) {
                    Some(delay) => sleep(delay).await,
                    None => return Err(err),
                },
            }
            attempt += 1;
        }
    }

    /// Backoff before retrying `err`, or `None` if it must be surfaced
    fn retry_delay(&self, stage: Stage, attempt: u32, err: &FetchError) -> Option<Duration> {
        if !err.is_transient() || attempt >= self.config.fetch_retries {
            return None;
        }
        let delay = self.config.backoff(attempt);
        self.logger
            .log_fetch_retry(&stage.to_string(), attempt + 1, delay, &err.to_string());
        self.metrics.inc_fetch_retries();
        Some(delay)
    }
}

/// Builder for the tick scheduler
pub struct TickSchedulerBuilder {
    fetcher: Option<Arc<dyn ClusterFetcher>>,
    sink: Option<Arc<dyn StatsSink>>,
    registry: Option<ContainerRegistry>,
    pipeline: Pipeline,
    config: SchedulerConfig,
    resource_refresh_ratio: Option<u32>,
    logger: Option<StructuredLogger>,
}

impl TickSchedulerBuilder {
    /// Create a new builder with default configuration
    pub fn new() -> Self {
        Self {
            fetcher: None,
            sink: None,
            registry: None,
            pipeline: Pipeline::default(),
            config: SchedulerConfig::default(),
            resource_refresh_ratio: None,
            logger: None,
        }
    }

    pub fn fetcher(mut self, fetcher: Arc<dyn ClusterFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn sink(mut self, sink: Arc<dyn StatsSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Use a preconfigured registry (staleness window, reset clamp)
    pub fn registry(mut self, registry: ContainerRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn pipeline(mut self, pipeline: Pipeline) -> Self {
        self.pipeline = pipeline;
        self
    }

    /// Set the metrics tick interval
    pub fn interval(mut self, interval: Duration) -> Self {
        self.config.interval = interval;
        self
    }

    /// Refresh resources every `ratio` ticks; overrides `resource_refresh_interval`
    pub fn resource_refresh_ratio(mut self, ratio: u32) -> Self {
        self.resource_refresh_ratio = Some(ratio);
        self
    }

    pub fn resource_refresh_interval(mut self, interval: Duration) -> Self {
        self.config.resource_refresh_interval = interval;
        self.resource_refresh_ratio = None;
        self
    }

    pub fn fetch_retries(mut self, retries: u32) -> Self {
        self.config.fetch_retries = retries;
        self
    }

    pub fn retry_backoff(mut self, backoff: Duration) -> Self {
        self.config.retry_backoff = backoff;
        self
    }

    pub fn logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Build the scheduler
    pub fn build(self) -> Result<TickScheduler> {
        let fetcher = self
            .fetcher
            .ok_or_else(|| anyhow::anyhow!("Fetcher is required"))?;
        let sink = self
            .sink
            .ok_or_else(|| anyhow::anyhow!("Sink is required"))?;
        if self.config.interval.is_zero() {
            anyhow::bail!("Tick interval must be greater than zero");
        }

        let mut config = self.config;
        if let Some(ratio) = self.resource_refresh_ratio {
            config.resource_refresh_interval = config.interval.saturating_mul(ratio.max(1));
        }
        if config.resource_refresh_interval.is_zero() {
            anyhow::bail!("Resource refresh interval must be greater than zero");
        }

        Ok(TickScheduler::new(
            fetcher,
            sink,
            self.registry.unwrap_or_default(),
            self.pipeline,
            config,
            self.logger.unwrap_or_else(|| StructuredLogger::new("default")),
        ))
    }
}

impl Default for TickSchedulerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ParseError;
    use crate::models::{
        ContainerIdentity, RawCpuSample, RawMemorySample, ResourceQuantities, Stats,
    };
    use crate::pipeline::{Filters, SortBy};
    use async_trait::async_trait;
    use chrono::DateTime;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Fetcher serving one node with one container whose counter grows
    /// by 0.5s every 5s of sample time (100 milli-cores)
    struct ScriptedFetcher {
        base: DateTime<Utc>,
        events: Mutex<Vec<&'static str>>,
        served: Mutex<u32>,
        metric_failures: Mutex<VecDeque<FetchError>>,
        resource_failures: Mutex<VecDeque<FetchError>>,
    }

    impl ScriptedFetcher {
        fn new() -> Self {
            Self {
                base: Utc::now(),
                events: Mutex::new(Vec::new()),
                served: Mutex::new(0),
                metric_failures: Mutex::new(VecDeque::new()),
                resource_failures: Mutex::new(VecDeque::new()),
            }
        }

        fn fail_metrics(self, errors: Vec<FetchError>) -> Self {
            *self.metric_failures.lock().unwrap() = errors.into();
            self
        }

        fn fail_resources(self, errors: Vec<FetchError>) -> Self {
            *self.resource_failures.lock().unwrap() = errors.into();
            self
        }

        fn events(&self) -> Vec<&'static str> {
            self.events.lock().unwrap().clone()
        }

        fn identity() -> ContainerIdentity {
            ContainerIdentity::new("shop", "api-0", "api")
        }
    }

    #[async_trait]
    impl ClusterFetcher for ScriptedFetcher {
        async fn list_metrics(&self) -> std::result::Result<Vec<NodeMetrics>, FetchError> {
            self.events.lock().unwrap().push("metrics");
            if let Some(err) = self.metric_failures.lock().unwrap().pop_front() {
                return Err(err);
            }

            let mut served = self.served.lock().unwrap();
            let n = *served;
            *served += 1;

            Ok(vec![NodeMetrics {
                node_name: "worker-1".to_string(),
                cpu: vec![RawCpuSample {
                    identity: Self::identity(),
                    image: "shop/api:2.0".to_string(),
                    cpu_seconds_total: 10.0 + n as f64 * 0.5,
                }],
                memory: vec![RawMemorySample {
                    identity: Self::identity(),
                    image: "shop/api:2.0".to_string(),
                    memory_bytes: 64.0 * 1024.0 * 1024.0,
                }],
                fetched_at: self.base + chrono::Duration::seconds(5 * n as i64),
            }])
        }

        async fn list_container_resources(
            &self,
        ) -> std::result::Result<Vec<ContainerResourceSpec>, FetchError> {
            self.events.lock().unwrap().push("resources");
            if let Some(err) = self.resource_failures.lock().unwrap().pop_front() {
                return Err(err);
            }

            Ok(vec![ContainerResourceSpec {
                identity: Self::identity(),
                image: "shop/api:2.0".to_string(),
                node_name: "worker-1".to_string(),
                requests: ResourceQuantities {
                    cpu_millis: 100,
                    memory_bytes: 64 * 1024 * 1024,
                },
                limits: ResourceQuantities {
                    cpu_millis: 200,
                    memory_bytes: 256 * 1024 * 1024,
                },
            }])
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        published: Mutex<Vec<Vec<Stats>>>,
    }

    impl RecordingSink {
        fn snapshots(&self) -> Vec<Vec<Stats>> {
            self.published.lock().unwrap().clone()
        }
    }

    impl StatsSink for RecordingSink {
        fn publish(&self, stats: Vec<Stats>) {
            self.published.lock().unwrap().push(stats);
        }
    }

    fn timeout() -> FetchError {
        FetchError::Timeout {
            node: "worker-1".to_string(),
            after: Duration::from_secs(10),
        }
    }

    fn scheduler(
        fetcher: Arc<ScriptedFetcher>,
        sink: Arc<RecordingSink>,
    ) -> TickSchedulerBuilder {
        TickSchedulerBuilder::new()
            .fetcher(fetcher)
            .sink(sink)
            .interval(Duration::from_secs(5))
            .resource_refresh_ratio(5)
    }

    #[test]
    fn test_scheduler_config_default() {
        let config = SchedulerConfig::default();
        assert_eq!(config.interval, Duration::from_secs(5));
        assert_eq!(config.resource_refresh_interval, Duration::from_secs(25));
        assert_eq!(config.fetch_retries, 0);
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let config = SchedulerConfig::default();
        assert_eq!(config.backoff(0), Duration::from_millis(500));
        assert_eq!(config.backoff(1), Duration::from_secs(1));
        assert_eq!(config.backoff(3), Duration::from_secs(4));
        assert_eq!(config.backoff(10), Duration::from_secs(30));
        assert_eq!(config.backoff(40), Duration::from_secs(30));
    }

    #[test]
    fn test_builder_missing_fetcher() {
        let result = TickSchedulerBuilder::new()
            .sink(Arc::new(RecordingSink::default()))
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_builder_ratio_sets_refresh_interval() {
        let scheduler = TickSchedulerBuilder::new()
            .fetcher(Arc::new(ScriptedFetcher::new()))
            .sink(Arc::new(RecordingSink::default()))
            .interval(Duration::from_secs(2))
            .resource_refresh_ratio(3)
            .build()
            .unwrap();
        assert_eq!(
            scheduler.config().resource_refresh_interval,
            Duration::from_secs(6)
        );
    }

    #[test]
    fn test_builder_rejects_zero_interval() {
        let result = TickSchedulerBuilder::new()
            .fetcher(Arc::new(ScriptedFetcher::new()))
            .sink(Arc::new(RecordingSink::default()))
            .interval(Duration::ZERO)
            .build();
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_tick_publishes_filtered_sorted_snapshot() {
        let fetcher = Arc::new(ScriptedFetcher::new());
        let sink = Arc::new(RecordingSink::default());
        let mut scheduler = scheduler(fetcher.clone(), sink.clone()).build().unwrap();

        scheduler.refresh_resources().await.unwrap();
        let first = scheduler.tick().await.unwrap();
        let second = scheduler.tick().await.unwrap();

        assert_eq!(first.tick, 1);
        assert_eq!(second.tick, 2);
        assert_eq!(second.tracked, 1);

        let snapshots = sink.snapshots();
        assert_eq!(snapshots.len(), 2);

        // Memory is known after one tick, the CPU rate only after two
        assert_eq!(snapshots[0][0].cpu_usage_milli, 0.0);
        let stats = &snapshots[1][0];
        assert!((stats.cpu_usage_milli - 100.0).abs() < 1e-9);
        assert!((stats.cpu_usage_percent - 50.0).abs() < 1e-9);
        assert_eq!(stats.memory_usage_percent, 25.0);
        assert_eq!(stats.node_name, "worker-1");
        assert_eq!(stats.cpu_limit_milli, 200);
    }

    #[tokio::test]
    async fn test_tick_filters_out_other_namespaces() {
        let fetcher = Arc::new(ScriptedFetcher::new());
        let sink = Arc::new(RecordingSink::default());
        let pipeline = Pipeline::new(
            Filters {
                namespace: "kube-system".to_string(),
                ..Default::default()
            },
            SortBy::default(),
        );
        let mut scheduler = scheduler(fetcher, sink.clone())
            .pipeline(pipeline)
            .build()
            .unwrap();

        let report = scheduler.tick().await.unwrap();
        assert_eq!(report.published, 0);
        assert_eq!(report.tracked, 1);
        assert!(sink.snapshots()[0].is_empty());
    }

    #[tokio::test]
    async fn test_parse_failure_is_fatal_and_not_retried() {
        let fetcher = Arc::new(ScriptedFetcher::new().fail_metrics(vec![FetchError::Parse {
            node: "worker-1".to_string(),
            source: ParseError::UnknownLabel {
                family: "container_cpu_user_seconds_total".to_string(),
                label: "cpu".to_string(),
            },
        }]));
        let sink = Arc::new(RecordingSink::default());
        let mut scheduler = scheduler(fetcher.clone(), sink.clone())
            .fetch_retries(3)
            .build()
            .unwrap();

        let err = scheduler.tick().await.unwrap_err();
        assert_eq!(err.stage(), Stage::Parse);
        assert!(err.to_string().contains("worker-1"));
        assert_eq!(fetcher.events(), vec!["metrics"]);
        assert!(sink.snapshots().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_retried() {
        let fetcher = Arc::new(ScriptedFetcher::new().fail_metrics(vec![timeout(), timeout()]));
        let sink = Arc::new(RecordingSink::default());
        let mut scheduler = scheduler(fetcher.clone(), sink.clone())
            .fetch_retries(2)
            .build()
            .unwrap();

        let report = tokio_test::assert_ok!(scheduler.tick().await);
        assert_eq!(report.published, 1);
        assert_eq!(fetcher.events(), vec!["metrics", "metrics", "metrics"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_exhausted() {
        let fetcher = Arc::new(ScriptedFetcher::new().fail_metrics(vec![timeout(), timeout()]));
        let sink = Arc::new(RecordingSink::default());
        let mut scheduler = scheduler(fetcher.clone(), sink)
            .fetch_retries(1)
            .build()
            .unwrap();

        let err = scheduler.tick().await.unwrap_err();
        assert_eq!(err.stage(), Stage::Fetch);
        assert_eq!(fetcher.events().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_precedes_metrics_every_ratio_ticks() {
        let fetcher = Arc::new(ScriptedFetcher::new());
        let sink = Arc::new(RecordingSink::default());
        let scheduler = scheduler(fetcher.clone(), sink.clone()).build().unwrap();

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = tokio::spawn(scheduler.run(shutdown_rx));

        // Ticks at 0, 5, ..., 50 and refreshes at 0, 25, 50
        sleep(Duration::from_secs(52)).await;
        shutdown_tx.send(()).unwrap();
        let registry = handle.await.unwrap().unwrap();

        let events = fetcher.events();
        let refreshes: Vec<usize> = events
            .iter()
            .enumerate()
            .filter(|(_, e)| **e == "resources")
            .map(|(i, _)| i)
            .collect();
        assert_eq!(refreshes, vec![0, 6, 12]);
        assert_eq!(events.len(), 14);
        assert_eq!(sink.snapshots().len(), 11);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_fatal_error() {
        let fetcher = Arc::new(ScriptedFetcher::new().fail_resources(vec![timeout()]));
        let sink = Arc::new(RecordingSink::default());
        let scheduler = scheduler(fetcher.clone(), sink.clone()).build().unwrap();

        let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let err = tokio_test::assert_err!(scheduler.run(shutdown_rx).await);

        assert_eq!(err.stage(), Stage::ResourceRefresh);
        assert!(err.to_string().starts_with("resource-refresh stage failed"));
        assert!(sink.snapshots().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_cycle_runs_before_pending_stop() {
        let fetcher = Arc::new(ScriptedFetcher::new());
        let sink = Arc::new(RecordingSink::default());
        let scheduler = scheduler(fetcher.clone(), sink.clone()).build().unwrap();

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        shutdown_tx.send(()).unwrap();
        let registry = tokio_test::assert_ok!(scheduler.run(shutdown_rx).await);

        assert_eq!(fetcher.events(), vec!["resources", "metrics"]);
        assert_eq!(sink.snapshots().len(), 1);
        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry
                .get(&ScriptedFetcher::identity())
                .unwrap()
                .limits()
                .cpu_millis,
            200
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_metrics_failure_stops_run() {
        let fetcher = Arc::new(ScriptedFetcher::new().fail_metrics(vec![timeout()]));
        let sink = Arc::new(RecordingSink::default());
        let scheduler = scheduler(fetcher.clone(), sink.clone()).build().unwrap();

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        shutdown_tx.send(()).unwrap();
        let err = tokio_test::assert_err!(scheduler.run(shutdown_rx).await);

        assert_eq!(err.stage(), Stage::Fetch);
        assert_eq!(fetcher.events(), vec!["resources", "metrics"]);
        assert!(sink.snapshots().is_empty());
    }
}
