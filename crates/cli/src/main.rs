//! kubetop CLI
//!
//! A live terminal view of per-container CPU and memory usage across a
//! Kubernetes cluster, sorted and filtered as requested.

mod config;
mod metrics_server;
mod output;

use anyhow::{Context, Result};
use clap::Parser;
use kubetop_lib::{
    ContainerRegistry, Filters, KubeFetcher, KubeFetcherConfig, Pipeline, SortBy,
    StructuredLogger, TickSchedulerBuilder,
};
use std::fs::OpenOptions;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Live CPU and memory usage of Kubernetes containers
#[derive(Parser, Debug)]
#[command(name = "kubetop")]
#[command(author, version, about = "Live CPU and memory usage of Kubernetes containers", long_about = None)]
pub struct Cli {
    /// Refresh interval (e.g. 500ms, 5s, 1m)
    #[arg(long, short, env = "KUBETOP_INTERVAL", value_parser = config::parse_duration)]
    pub interval: Option<Duration>,

    /// Only show containers in this namespace
    #[arg(long, short)]
    pub namespace: Option<String>,

    /// Only show containers on this node
    #[arg(long)]
    pub node: Option<String>,

    /// Only show containers of this pod
    #[arg(long, short)]
    pub pod: Option<String>,

    /// Only show containers with this name
    #[arg(long, short)]
    pub container: Option<String>,

    /// Sort by CPU usage
    #[arg(long)]
    pub sortby_cpu: bool,

    /// Sort by CPU usage relative to the limit
    #[arg(long)]
    pub sortby_cpu_utilization: bool,

    /// Sort by memory usage
    #[arg(long)]
    pub sortby_mem: bool,

    /// Sort by memory usage relative to the limit
    #[arg(long)]
    pub sortby_mem_utilization: bool,

    /// Sort by pod name
    #[arg(long)]
    pub sortby_pod_name: bool,

    /// Path to kubeconfig file (uses default if not specified)
    #[arg(long, env = "KUBECONFIG")]
    pub kubeconfig: Option<PathBuf>,

    /// Kubeconfig context to use instead of the current one
    #[arg(long)]
    pub context: Option<String>,

    /// Output format
    #[arg(long, short, value_enum, default_value = "table")]
    pub format: output::OutputFormat,

    /// Serve self-metrics on this address (e.g. 127.0.0.1:9184)
    #[arg(long, env = "KUBETOP_METRICS_ADDR")]
    pub metrics_addr: Option<SocketAddr>,

    /// Write logs to this file instead of stderr
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Settings file (default: ~/.config/kubetop/config.json)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Keep samples whose container label is empty
    #[arg(long)]
    pub allow_unlabeled_name: bool,
}

impl Cli {
    fn filters(&self) -> Filters {
        Filters {
            namespace: self.namespace.clone().unwrap_or_default(),
            node: self.node.clone().unwrap_or_default(),
            pod: self.pod.clone().unwrap_or_default(),
            container: self.container.clone().unwrap_or_default(),
        }
    }

    fn sort_by(&self) -> SortBy {
        SortBy {
            memory: self.sortby_mem,
            cpu: self.sortby_cpu,
            cpu_utilization: self.sortby_cpu_utilization,
            memory_utilization: self.sortby_mem_utilization,
            pod_name: self.sortby_pod_name,
        }
    }
}

/// Initialize tracing with JSON output and env filter.
/// Logs never go to stdout, which belongs to the table.
fn init_tracing(log_file: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(Mutex::new(file)))
                .init();
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.log_file.as_deref())?;

    // Load configuration, flags win over file and environment
    let mut settings = config::Settings::load(cli.config.as_deref())?;
    if let Some(interval) = cli.interval {
        settings.refresh_interval = interval;
    }
    settings.allow_unlabeled_name |= cli.allow_unlabeled_name;

    let kubeconfig = config::kubeconfig_path(cli.kubeconfig.as_deref());
    let fetcher = KubeFetcher::from_kubeconfig(
        kubeconfig.as_deref(),
        cli.context.clone(),
        KubeFetcherConfig {
            concurrency: settings.fetch_concurrency,
            request_timeout: settings.fetch_timeout(),
            allow_unlabeled_name: settings.allow_unlabeled_name,
        },
    )
    .await
    .context("Failed to connect to the cluster")?;

    let logger = StructuredLogger::new(cli.context.as_deref().unwrap_or("current-context"));
    logger.log_startup(VERSION, settings.refresh_interval);

    let registry = ContainerRegistry::new()
        .with_staleness_window(settings.staleness_window())
        .with_counter_reset_clamp(settings.clamp_counter_resets);

    // Ctrl-C or a closed stdout stops the scheduler at the next tick boundary
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

    let scheduler = TickSchedulerBuilder::new()
        .fetcher(Arc::new(fetcher))
        .sink(cli.format.sink(shutdown_tx.clone()))
        .registry(registry)
        .pipeline(Pipeline::new(cli.filters(), cli.sort_by()))
        .interval(settings.refresh_interval)
        .resource_refresh_ratio(settings.resource_refresh_ratio)
        .fetch_retries(settings.fetch_retries)
        .retry_backoff(settings.retry_backoff())
        .logger(logger)
        .build()?;

    if let Some(addr) = cli.metrics_addr {
        tokio::spawn(async move {
            if let Err(e) = metrics_server::serve(addr).await {
                tracing::error!(error = %e, "Metrics server failed");
            }
        });
    }

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown_tx.send(());
        }
    });

    match scheduler.run(shutdown_rx).await {
        Ok(registry) => {
            info!(containers = registry.len(), "Shutting down");
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            output::print_error(&err.to_string());
            Ok(ExitCode::FAILURE)
        }
    }
}
