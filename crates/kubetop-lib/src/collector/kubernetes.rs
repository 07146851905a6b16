//! Kubernetes API fetcher
//!
//! Scrapes each node's cAdvisor endpoint through the API server proxy and
//! lists pod specs for container requests and limits.

use super::parser::MetricsParser;
use super::{quantity, ClusterFetcher};
use crate::error::FetchError;
use crate::models::{ContainerIdentity, ContainerResourceSpec, NodeMetrics, ResourceQuantities};
use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{self, StreamExt, TryStreamExt};
use k8s_openapi::api::core::v1::{Container, Node, Pod};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::api::{Api, ListParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// API server proxy path of a node's cAdvisor metrics
pub const CADVISOR_PATH_TEMPLATE: &str = "/api/v1/nodes/{node}/proxy/metrics/cadvisor";

/// Configuration for the Kubernetes fetcher
#[derive(Debug, Clone)]
pub struct KubeFetcherConfig {
    /// Maximum number of node scrapes in flight (default: 8)
    pub concurrency: usize,
    /// Timeout of a single node scrape (default: 10 seconds)
    pub request_timeout: Duration,
    /// Keep samples with an empty container label
    pub allow_unlabeled_name: bool,
}

impl Default for KubeFetcherConfig {
    fn default() -> Self {
        Self {
            concurrency: 8,
            request_timeout: Duration::from_secs(10),
            allow_unlabeled_name: false,
        }
    }
}

/// Kubernetes API calls made by [`KubeFetcher`]
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Names of all cluster nodes
    async fn list_nodes(&self) -> Result<Vec<String>, FetchError>;

    async fn list_pods(&self) -> Result<Vec<Pod>, FetchError>;

    /// Raw cAdvisor exposition text of one node
    async fn scrape_node(&self, node: &str) -> Result<String, FetchError>;
}

/// [`ClusterApi`] over a kube client
pub struct KubeApi {
    client: Client,
}

impl KubeApi {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ClusterApi for KubeApi {
    async fn list_nodes(&self) -> Result<Vec<String>, FetchError> {
        let api: Api<Node> = Api::all(self.client.clone());
        Ok(api
            .list(&ListParams::default())
            .await?
            .into_iter()
            .filter_map(|node| node.metadata.name)
            .collect())
    }

    async fn list_pods(&self) -> Result<Vec<Pod>, FetchError> {
        let api: Api<Pod> = Api::all(self.client.clone());
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn scrape_node(&self, node: &str) -> Result<String, FetchError> {
        let request = http::Request::get(cadvisor_path(node)).body(Vec::new())?;
        Ok(self.client.request_text(request).await?)
    }
}

/// [`ClusterFetcher`] backed by the Kubernetes API
pub struct KubeFetcher {
    api: Arc<dyn ClusterApi>,
    parser: MetricsParser,
    config: KubeFetcherConfig,
    /// Node names, listed lazily and re-listed on every resource refresh
    nodes: RwLock<Vec<String>>,
}

impl KubeFetcher {
    /// Create a fetcher from an existing client
    pub fn new(client: Client, config: KubeFetcherConfig) -> Self {
        Self::with_api(Arc::new(KubeApi::new(client)), config)
    }

    /// Create a fetcher over any [`ClusterApi`]
    pub fn with_api(api: Arc<dyn ClusterApi>, config: KubeFetcherConfig) -> Self {
        Self {
            api,
            parser: MetricsParser::new(config.allow_unlabeled_name),
            config,
            nodes: RwLock::new(Vec::new()),
        }
    }

    /// Create a fetcher from a kubeconfig file.
    ///
    /// Without a path the default kubeconfig lookup (`KUBECONFIG`, then
    /// `~/.kube/config`) is used. `context` overrides the current context.
    pub async fn from_kubeconfig(
        path: Option<&Path>,
        context: Option<String>,
        config: KubeFetcherConfig,
    ) -> Result<Self, FetchError> {
        let options = KubeConfigOptions {
            context,
            ..Default::default()
        };

        let client_config = match path {
            Some(path) => {
                let kubeconfig = Kubeconfig::read_from(path)?;
                Config::from_custom_kubeconfig(kubeconfig, &options).await?
            }
            None => Config::from_kubeconfig(&options).await?,
        };

        info!(cluster_url = %client_config.cluster_url, "Connecting to cluster");
        let client = Client::try_from(client_config)?;
        Ok(Self::new(client, config))
    }

    /// Cached node names
    pub async fn cached_nodes(&self) -> Vec<String> {
        self.nodes.read().await.clone()
    }

    /// Node names, listing them on first use
    async fn node_names(&self) -> Result<Vec<String>, FetchError> {
        {
            let nodes = self.nodes.read().await;
            if !nodes.is_empty() {
                return Ok(nodes.clone());
            }
        }
        self.refresh_nodes().await
    }

    /// Re-list cluster nodes and replace the cache
    async fn refresh_nodes(&self) -> Result<Vec<String>, FetchError> {
        let names = self.api.list_nodes().await?;

        let mut nodes = self.nodes.write().await;
        if *nodes != names {
            info!(count = names.len(), "Node list updated");
        }
        *nodes = names.clone();
        Ok(names)
    }

    /// Scrape and parse one node
    async fn fetch_node(&self, node: String) -> Result<NodeMetrics, FetchError> {
        let fetched_at = Utc::now();

        let body = tokio::time::timeout(self.config.request_timeout, self.api.scrape_node(&node))
            .await
            .map_err(|_| FetchError::Timeout {
                node: node.clone(),
                after: self.config.request_timeout,
            })??;

        let parsed = self.parser.parse(&body).map_err(|source| FetchError::Parse {
            node: node.clone(),
            source,
        })?;

        debug!(
            node = %node,
            cpu_samples = parsed.cpu.len(),
            memory_samples = parsed.memory.len(),
            skipped = parsed.skipped,
            "Scraped node metrics"
        );

        Ok(NodeMetrics {
            node_name: node,
            cpu: parsed.cpu,
            memory: parsed.memory,
            fetched_at,
        })
    }
}

#[async_trait]
impl ClusterFetcher for KubeFetcher {
    async fn list_metrics(&self) -> Result<Vec<NodeMetrics>, FetchError> {
        let nodes = self.node_names().await?;
        stream::iter(nodes)
            .map(|node| self.fetch_node(node))
            .buffer_unordered(self.config.concurrency.max(1))
            .try_collect()
            .await
    }

    async fn list_container_resources(&self) -> Result<Vec<ContainerResourceSpec>, FetchError> {
        // Keep the node list in step with the cluster at the refresh cadence
        self.refresh_nodes().await?;

        let pods = self.api.list_pods().await?;

        let mut specs = Vec::new();
        for pod in pods {
            let pod_name = pod.metadata.name.unwrap_or_default();
            let namespace = pod.metadata.namespace.unwrap_or_default();
            let Some(spec) = pod.spec else {
                continue;
            };
            let node_name = spec.node_name.unwrap_or_default();

            for container in &spec.containers {
                specs.push(container_resource_spec(
                    &namespace, &pod_name, &node_name, container,
                ));
            }
        }

        debug!(containers = specs.len(), "Listed container resources");
        Ok(specs)
    }
}

/// Build the cAdvisor proxy path for a node
pub fn cadvisor_path(node: &str) -> String {
    CADVISOR_PATH_TEMPLATE.replace("{node}", node)
}

/// Convert one pod-spec container into a resource spec
pub fn container_resource_spec(
    namespace: &str,
    pod_name: &str,
    node_name: &str,
    container: &Container,
) -> ContainerResourceSpec {
    let resources = container.resources.as_ref();
    let identity = ContainerIdentity::new(namespace, pod_name, &container.name);

    ContainerResourceSpec {
        requests: quantities(&identity, resources.and_then(|r| r.requests.as_ref())),
        limits: quantities(&identity, resources.and_then(|r| r.limits.as_ref())),
        image: container.image.clone().unwrap_or_default(),
        node_name: node_name.to_string(),
        identity,
    }
}

fn quantities(
    identity: &ContainerIdentity,
    values: Option<&BTreeMap<String, Quantity>>,
) -> ResourceQuantities {
    let Some(values) = values else {
        return ResourceQuantities::default();
    };

    let convert = |resource: &str, parse: fn(&str) -> Option<u64>| -> u64 {
        let Some(Quantity(raw)) = values.get(resource) else {
            return 0;
        };
        parse(raw).unwrap_or_else(|| {
            warn!(
                container_id = %identity,
                resource = resource,
                quantity = %raw,
                "Unparsable resource quantity, treating as unset"
            );
            0
        })
    };

    ResourceQuantities {
        cpu_millis: convert("cpu", quantity::cpu_millis),
        memory_bytes: convert("memory", quantity::memory_bytes),
    }
}
