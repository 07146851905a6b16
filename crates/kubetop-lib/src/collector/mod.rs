//! Metrics collection from the cluster
//!
//! This module provides the cluster-facing half of the engine: the
//! [`ClusterFetcher`] contract, a Kubernetes API implementation of it, the
//! cAdvisor payload parser and the tick loop that drives everything.

mod kubernetes;
mod r#loop;
pub mod parser;
pub mod quantity;


pub use kubernetes::{ClusterApi, KubeApi, KubeFetcher, KubeFetcherConfig, CADVISOR_PATH_TEMPLATE};
pub use parser::{MetricsParser, ParsedMetrics, CPU_FAMILY, MEMORY_FAMILY};
pub use r#loop::{SchedulerConfig, TickReport, TickScheduler, TickSchedulerBuilder};

use crate::error::FetchError;
use crate::models::{ContainerResourceSpec, NodeMetrics};

pub use async_trait::async_trait;

/// Source of raw cluster data consumed by the engine
#[async_trait]
pub trait ClusterFetcher: Send + Sync {
    /// Scrape and parse the metrics of every node, one entry per node
    async fn list_metrics(&self) -> Result<Vec<NodeMetrics>, FetchError>;

    /// List requests and limits of every container in the cluster
    async fn list_container_resources(&self) -> Result<Vec<ContainerResourceSpec>, FetchError>;
}
