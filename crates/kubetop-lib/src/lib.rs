//! Metrics engine for the kubetop dashboard
//!
//! This crate provides the core functionality for:
//! - Scraping per-node cAdvisor metrics and pod resource specs
//! - Turning cumulative CPU counters into usage rates
//! - Tracking containers with staleness eviction
//! - Filtering and sorting snapshots for presentation
//! - Self-metrics and structured logging

pub mod collector;
pub mod error;
pub mod models;
pub mod observability;
pub mod pipeline;
pub mod registry;
pub mod sink;

pub use collector::{
    ClusterApi, ClusterFetcher, KubeApi, KubeFetcher, KubeFetcherConfig, SchedulerConfig,
    TickReport, TickScheduler, TickSchedulerBuilder,
};
pub use error::{EngineError, FetchError, ParseError, Stage};
pub use models::*;
pub use observability::{EngineMetrics, StructuredLogger};
pub use pipeline::{Filters, Pipeline, SortBy, SortKey};
pub use registry::{ContainerRegistry, Snapshot};
pub use sink::{ChannelSink, StatsSink};
