//! Container registry
//!
//! Long-lived per-container state keyed by `namespace/pod/container`. The
//! registry turns the cumulative CPU counter into a usage rate, keeps the
//! latest memory gauge and resource limits, and evicts containers whose CPU
//! counter has gone stale while producing snapshots.

use crate::models::{
    ContainerIdentity, ContainerResourceSpec, NodeMetrics, RawCpuSample, RawMemorySample,
    ResourceQuantities, Stats,
};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

/// Default staleness window after which a container is evicted
pub const DEFAULT_STALENESS_WINDOW: Duration = Duration::from_secs(120);

/// Running state of one container
#[derive(Debug, Clone)]
pub struct Container {
    identity: ContainerIdentity,
    image: String,
    node_name: String,
    first_seen: DateTime<Utc>,
    cpu_seconds_total: Option<f64>,
    cpu_sampled_at: Option<DateTime<Utc>>,
    /// Cores in use; `None` until two counter samples were seen
    cpu_rate: Option<f64>,
    memory_bytes: u64,
    requests: ResourceQuantities,
    limits: ResourceQuantities,
}

/// Outcome of feeding a counter sample to a container
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CpuUpdate {
    /// Counter equal to the stored value; the source did not refresh
    Unchanged,
    /// First sample, or no positive elapsed time; nothing to derive yet
    Primed,
    /// A new rate in cores
    Rate(f64),
    /// Counter went backwards (container restart); rate set to zero
    CounterReset,
    /// NaN or infinite counter; the sample is dropped
    Invalid,
}

impl Container {
    fn new(identity: ContainerIdentity, now: DateTime<Utc>) -> Self {
        Self {
            identity,
            image: String::new(),
            node_name: String::new(),
            first_seen: now,
            cpu_seconds_total: None,
            cpu_sampled_at: None,
            cpu_rate: None,
            memory_bytes: 0,
            requests: ResourceQuantities::default(),
            limits: ResourceQuantities::default(),
        }
    }

    pub fn identity(&self) -> &ContainerIdentity {
        &self.identity
    }

    pub fn image(&self) -> &str {
        &self.image
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    /// CPU usage in cores, if a rate has been derived
    pub fn cpu_rate(&self) -> Option<f64> {
        self.cpu_rate
    }

    pub fn cpu_sampled_at(&self) -> Option<DateTime<Utc>> {
        self.cpu_sampled_at
    }

    pub fn memory_bytes(&self) -> u64 {
        self.memory_bytes
    }

    pub fn requests(&self) -> ResourceQuantities {
        self.requests
    }

    pub fn limits(&self) -> ResourceQuantities {
        self.limits
    }

    fn set_placement(&mut self, image: &str, node_name: &str) {
        if !image.is_empty() {
            self.image = image.to_string();
        }
        if !node_name.is_empty() {
            self.node_name = node_name.to_string();
        }
    }

    /// Feed a cumulative counter value observed at `at`
    pub fn update_cpu(&mut self, cpu_seconds_total: f64, at: DateTime<Utc>, clamp_resets: bool) -> CpuUpdate {
        if !cpu_seconds_total.is_finite() {
            return CpuUpdate::Invalid;
        }
        if self.cpu_seconds_total == Some(cpu_seconds_total) {
            return CpuUpdate::Unchanged;
        }

        let mut outcome = CpuUpdate::Primed;
        if let (Some(previous), Some(previous_at)) = (self.cpu_seconds_total, self.cpu_sampled_at) {
            let elapsed = (at - previous_at)
                .to_std()
                .map(|d| d.as_secs_f64())
                .unwrap_or(0.0);
            if elapsed > 0.0 {
                let delta = cpu_seconds_total - previous;
                if delta < 0.0 && clamp_resets {
                    self.cpu_rate = Some(0.0);
                    outcome = CpuUpdate::CounterReset;
                } else {
                    let rate = delta / elapsed;
                    self.cpu_rate = Some(rate);
                    outcome = CpuUpdate::Rate(rate);
                }
            }
        }

        self.cpu_seconds_total = Some(cpu_seconds_total);
        self.cpu_sampled_at = Some(at);
        outcome
    }

    /// Overwrite the memory gauge
    pub fn update_memory(&mut self, memory_bytes: f64) {
        self.memory_bytes = if memory_bytes.is_finite() && memory_bytes > 0.0 {
            memory_bytes as u64
        } else {
            0
        };
    }

    /// Overwrite requests and limits
    pub fn update_resources(&mut self, requests: ResourceQuantities, limits: ResourceQuantities) {
        self.requests = requests;
        self.limits = limits;
    }

    /// Whether any usage signal has been observed
    pub fn has_usage(&self) -> bool {
        self.cpu_rate.is_some_and(|rate| rate != 0.0) || self.memory_bytes > 0
    }

    /// Last CPU sample time, or creation time if no counter was ever seen
    fn last_seen(&self) -> DateTime<Utc> {
        self.cpu_sampled_at.unwrap_or(self.first_seen)
    }

    fn is_stale(&self, now: DateTime<Utc>, window: Duration) -> bool {
        (now - self.last_seen())
            .to_std()
            .map(|age| age > window)
            .unwrap_or(false)
    }

    /// Project the container into a presentation record.
    /// Returns `None` while no usage has been observed.
    pub fn stats(&self) -> Option<Stats> {
        if !self.has_usage() {
            return None;
        }

        let cpu_usage_milli = self.cpu_rate.unwrap_or(0.0) * 1000.0;
        Some(Stats {
            namespace: self.identity.namespace.clone(),
            node_name: self.node_name.clone(),
            pod_name: self.identity.pod_name.clone(),
            container_name: self.identity.container_name.clone(),
            image: self.image.clone(),
            cpu_usage_milli,
            cpu_usage_percent: percent_of_limit(cpu_usage_milli, self.limits.cpu_millis as f64),
            memory_bytes: self.memory_bytes,
            memory_usage_percent: percent_of_limit(
                self.memory_bytes as f64,
                self.limits.memory_bytes as f64,
            ),
            cpu_request_milli: self.requests.cpu_millis,
            cpu_limit_milli: self.limits.cpu_millis,
            memory_request_bytes: self.requests.memory_bytes,
            memory_limit_bytes: self.limits.memory_bytes,
            last_update: self.cpu_sampled_at,
        })
    }
}

/// Usage as a percentage of `limit`, clamped to `[0, 100]`; zero without a limit
pub fn percent_of_limit(usage: f64, limit: f64) -> f64 {
    if limit <= 0.0 || !usage.is_finite() {
        return 0.0;
    }
    (usage / limit * 100.0).clamp(0.0, 100.0)
}

/// Counts from applying one node's samples
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct UpdateSummary {
    pub cpu_samples: usize,
    pub memory_samples: usize,
    pub rates_updated: usize,
    pub unchanged_counters: usize,
    pub counter_resets: usize,
    pub invalid_counters: usize,
}

impl UpdateSummary {
    pub fn merge(&mut self, other: UpdateSummary) {
        self.cpu_samples += other.cpu_samples;
        self.memory_samples += other.memory_samples;
        self.rates_updated += other.rates_updated;
        self.unchanged_counters += other.unchanged_counters;
        self.counter_resets += other.counter_resets;
        self.invalid_counters += other.invalid_counters;
    }
}

/// Result of a snapshot pass
#[derive(Debug, Default, Clone)]
pub struct Snapshot {
    pub stats: Vec<Stats>,
    pub evicted: usize,
}

/// Registry of all known containers
#[derive(Debug)]
pub struct ContainerRegistry {
    containers: HashMap<String, Container>,
    staleness_window: Duration,
    clamp_counter_resets: bool,
}

impl Default for ContainerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ContainerRegistry {
    /// Create an empty registry with the default staleness window
    pub fn new() -> Self {
        Self {
            containers: HashMap::new(),
            staleness_window: DEFAULT_STALENESS_WINDOW,
            clamp_counter_resets: true,
        }
    }

    pub fn with_staleness_window(mut self, window: Duration) -> Self {
        self.staleness_window = window;
        self
    }

    /// When disabled, a counter reset yields the raw negative rate for one tick
    pub fn with_counter_reset_clamp(mut self, clamp: bool) -> Self {
        self.clamp_counter_resets = clamp;
        self
    }

    pub fn staleness_window(&self) -> Duration {
        self.staleness_window
    }

    pub fn get(&self, identity: &ContainerIdentity) -> Option<&Container> {
        self.containers.get(&identity.key())
    }

    pub fn len(&self) -> usize {
        self.containers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.containers.is_empty()
    }

    fn get_or_create(&mut self, identity: &ContainerIdentity, now: DateTime<Utc>) -> &mut Container {
        self.containers.entry(identity.key()).or_insert_with(|| {
            debug!(container_id = %identity, "Tracking new container");
            Container::new(identity.clone(), now)
        })
    }

    /// Overwrite requests and limits from a resource-spec listing
    pub fn apply_resources(&mut self, specs: &[ContainerResourceSpec], now: DateTime<Utc>) {
        for spec in specs {
            let container = self.get_or_create(&spec.identity, now);
            container.set_placement(&spec.image, &spec.node_name);
            container.update_resources(spec.requests, spec.limits);
        }
    }

    /// Feed one CPU counter sample scraped from `node_name`
    pub fn update_cpu(&mut self, node_name: &str, sample: &RawCpuSample, at: DateTime<Utc>) -> CpuUpdate {
        if !sample.cpu_seconds_total.is_finite() {
            warn!(
                container_id = %sample.identity,
                value = sample.cpu_seconds_total,
                "Non-finite CPU counter, skipping sample"
            );
            return CpuUpdate::Invalid;
        }
        let clamp = self.clamp_counter_resets;
        let container = self.get_or_create(&sample.identity, at);
        container.set_placement(&sample.image, node_name);
        let outcome = container.update_cpu(sample.cpu_seconds_total, at, clamp);
        if outcome == CpuUpdate::CounterReset {
            debug!(container_id = %sample.identity, "CPU counter went backwards, clamping rate");
        }
        outcome
    }

    /// Feed one memory gauge sample scraped from `node_name`
    pub fn update_memory(&mut self, node_name: &str, sample: &RawMemorySample, at: DateTime<Utc>) {
        let container = self.get_or_create(&sample.identity, at);
        container.set_placement(&sample.image, node_name);
        container.update_memory(sample.memory_bytes);
    }

    /// Apply all samples scraped from one node
    pub fn apply_node_metrics(&mut self, node: &NodeMetrics) -> UpdateSummary {
        let mut summary = UpdateSummary {
            cpu_samples: node.cpu.len(),
            memory_samples: node.memory.len(),
            ..Default::default()
        };

        for sample in &node.cpu {
            match self.update_cpu(&node.node_name, sample, node.fetched_at) {
                CpuUpdate::Rate(_) => summary.rates_updated += 1,
                CpuUpdate::Unchanged => summary.unchanged_counters += 1,
                CpuUpdate::CounterReset => summary.counter_resets += 1,
                CpuUpdate::Invalid => summary.invalid_counters += 1,
                CpuUpdate::Primed => {}
            }
        }
        for sample in &node.memory {
            self.update_memory(&node.node_name, sample, node.fetched_at);
        }

        summary
    }

    /// Collect stats of every container with usage, evicting stale ones.
    ///
    /// Containers without any usage signal produce no stats but stay in the
    /// registry. Containers with usage whose last CPU sample is older than the
    /// staleness window are removed.
    pub fn snapshot(&mut self, now: DateTime<Utc>) -> Snapshot {
        let window = self.staleness_window;
        let mut snapshot = Snapshot::default();

        self.containers.retain(|id, container| {
            let Some(stats) = container.stats() else {
                return true;
            };
            if container.is_stale(now, window) {
                debug!(container_id = %id, "Evicting stale container");
                snapshot.evicted += 1;
                return false;
            }
            snapshot.stats.push(stats);
            true
        });

        snapshot
    }
}
