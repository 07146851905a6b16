//! Error types for parsing, fetching and the tick loop
//!
//! Errors are split by how the caller should react: transport failures may be
//! retried, parse contract violations point at a version mismatch with the
//! metrics source and are fatal. Tolerated data anomalies (repeated counter
//! values, missing limits, counter resets) never surface here.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Contract violations found while parsing a metrics payload
#[derive(Debug, Error, PartialEq)]
pub enum ParseError {
    #[error("malformed line {line}: {reason}")]
    Malformed { line: usize, reason: String },

    #[error("invalid sample value {value:?} on line {line}")]
    InvalidValue { line: usize, value: String },

    #[error("unknown label {label:?} in metric family {family}")]
    UnknownLabel { family: String, label: String },

    #[error("metric family {family} is present but has no samples")]
    EmptyFamily { family: String },

    #[error("payload contains neither {cpu_family} nor {memory_family}")]
    MissingFamilies {
        cpu_family: String,
        memory_family: String,
    },
}

/// Failures of the cluster collaborator
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("kubernetes API request failed: {0}")]
    Api(#[from] kube::Error),

    #[error("failed to build API request: {0}")]
    Request(#[from] http::Error),

    #[error("failed to load kubeconfig: {0}")]
    Kubeconfig(#[from] kube::config::KubeconfigError),

    #[error("request to node {node} timed out after {}s", after.as_secs())]
    Timeout { node: String, after: Duration },

    #[error("failed to parse metrics from node {node}: {source}")]
    Parse {
        node: String,
        #[source]
        source: ParseError,
    },
}

impl FetchError {
    /// Whether retrying the same request may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Api(_) | FetchError::Timeout { .. } => true,
            FetchError::Request(_) | FetchError::Kubeconfig(_) | FetchError::Parse { .. } => false,
        }
    }
}

/// The cycle stage that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Fetch,
    Parse,
    ResourceRefresh,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Fetch => "fetch",
            Stage::Parse => "parse",
            Stage::ResourceRefresh => "resource-refresh",
        };
        f.write_str(name)
    }
}

/// Fatal error terminating the tick loop
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("fetch stage failed: {0}")]
    Fetch(#[source] FetchError),

    #[error("parse stage failed on node {node}: {source}")]
    Parse {
        node: String,
        #[source]
        source: ParseError,
    },

    #[error("resource-refresh stage failed: {0}")]
    ResourceRefresh(#[source] FetchError),
}

impl EngineError {
    /// Classify a failure of the metrics fetch
    pub fn from_metrics_fetch(err: FetchError) -> Self {
        match err {
            FetchError::Parse { node, source } => EngineError::Parse { node, source },
            other => EngineError::Fetch(other),
        }
    }

    pub fn stage(&self) -> Stage {
        match self {
            EngineError::Fetch(_) => Stage::Fetch,
            EngineError::Parse { .. } => Stage::Parse,
            EngineError::ResourceRefresh(_) => Stage::ResourceRefresh,
        }
    }
}
