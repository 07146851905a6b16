//! Core data models for the metrics engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Composite key naming one container across the cluster
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContainerIdentity {
    pub namespace: String,
    pub pod_name: String,
    pub container_name: String,
}

impl ContainerIdentity {
    pub fn new(
        namespace: impl Into<String>,
        pod_name: impl Into<String>,
        container_name: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            pod_name: pod_name.into(),
            container_name: container_name.into(),
        }
    }

    /// Stable string id used as the registry key: `namespace/pod/container`
    pub fn key(&self) -> String {
        format!(
            "{}/{}/{}",
            self.namespace, self.pod_name, self.container_name
        )
    }
}

impl fmt::Display for ContainerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.namespace, self.pod_name, self.container_name
        )
    }
}

/// One data point of the cumulative CPU-seconds counter family
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawCpuSample {
    pub identity: ContainerIdentity,
    pub image: String,
    /// Cumulative CPU seconds since container start
    pub cpu_seconds_total: f64,
}

/// One data point of the memory usage gauge family
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawMemorySample {
    pub identity: ContainerIdentity,
    pub image: String,
    pub memory_bytes: f64,
}

/// CPU in milli-cores, memory in bytes. Unset values are zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceQuantities {
    pub cpu_millis: u64,
    pub memory_bytes: u64,
}

/// Requests and limits of one container, taken from its pod spec
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerResourceSpec {
    pub identity: ContainerIdentity,
    pub image: String,
    pub node_name: String,
    pub requests: ResourceQuantities,
    pub limits: ResourceQuantities,
}

/// Parsed samples scraped from a single node
#[derive(Debug, Clone)]
pub struct NodeMetrics {
    pub node_name: String,
    pub cpu: Vec<RawCpuSample>,
    pub memory: Vec<RawMemorySample>,
    /// Wall-clock time the scrape was issued
    pub fetched_at: DateTime<Utc>,
}

/// Presentation snapshot of one container
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Stats {
    pub namespace: String,
    pub node_name: String,
    pub pod_name: String,
    pub container_name: String,
    pub image: String,
    pub cpu_usage_milli: f64,
    /// Percent of the CPU limit, in `[0, 100]`; zero without a limit
    pub cpu_usage_percent: f64,
    pub memory_bytes: u64,
    /// Percent of the memory limit, in `[0, 100]`; zero without a limit
    pub memory_usage_percent: f64,
    pub cpu_request_milli: u64,
    pub cpu_limit_milli: u64,
    pub memory_request_bytes: u64,
    pub memory_limit_bytes: u64,
    pub last_update: Option<DateTime<Utc>>,
}

impl Stats {
    pub fn id(&self) -> String {
        format!(
            "{}/{}/{}",
            self.namespace, self.pod_name, self.container_name
        )
    }
}
