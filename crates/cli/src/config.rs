//! Configuration management for the CLI
//!
//! Settings are layered: built-in defaults, then an optional settings file,
//! then `KUBETOP_*` environment variables. Command-line flags are applied on
//! top in `main`.

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Environment variable prefix for settings
pub const ENV_PREFIX: &str = "KUBETOP";

/// Engine settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Metrics tick interval
    #[serde(deserialize_with = "deserialize_duration")]
    pub refresh_interval: Duration,
    /// Resource-spec refresh period, in ticks
    pub resource_refresh_ratio: u32,
    /// Eviction window for containers without fresh CPU samples
    pub staleness_window_secs: u64,
    /// Maximum node scrapes in flight
    pub fetch_concurrency: usize,
    /// Timeout of a single node scrape
    pub fetch_timeout_secs: u64,
    /// Retries of transient fetch failures per cycle
    pub fetch_retries: u32,
    /// Initial retry backoff, doubled per attempt
    pub retry_backoff_ms: u64,
    /// Report zero usage instead of a negative rate after a counter reset
    pub clamp_counter_resets: bool,
    /// Keep samples whose container label is empty
    pub allow_unlabeled_name: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(5),
            resource_refresh_ratio: 5,
            staleness_window_secs: 120,
            fetch_concurrency: 8,
            fetch_timeout_secs: 10,
            fetch_retries: 0,
            retry_backoff_ms: 500,
            clamp_counter_resets: true,
            allow_unlabeled_name: false,
        }
    }
}

impl Settings {
    /// Load settings from `path` (or the default location) and the environment.
    ///
    /// An explicit path must exist; the default location is optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        match path {
            Some(path) => {
                builder = builder.add_source(config::File::from(path).required(true));
            }
            None => {
                if let Some(default_path) = default_config_path() {
                    builder = builder.add_source(config::File::from(default_path).required(false));
                }
            }
        }

        let settings: Settings = builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX))
            .build()
            .context("Failed to read settings")?
            .try_deserialize()
            .context("Failed to parse settings")?;

        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        if self.refresh_interval.is_zero() {
            anyhow::bail!("refresh_interval must be greater than zero");
        }
        if self.resource_refresh_ratio == 0 {
            anyhow::bail!("resource_refresh_ratio must be at least 1");
        }
        Ok(())
    }

    pub fn staleness_window(&self) -> Duration {
        Duration::from_secs(self.staleness_window_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

/// Get the settings file path
pub fn default_config_path() -> Option<PathBuf> {
    let home = dirs_next::home_dir()?;
    Some(home.join(".config").join("kubetop").join("config.json"))
}

/// Get kubeconfig path.
///
/// Returns `None` when the client should fall back to its own lookup, which
/// also covers a `KUBECONFIG` holding several files.
pub fn kubeconfig_path(override_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = override_path {
        let mut paths = std::env::split_paths(path.as_os_str()).filter(|p| !p.as_os_str().is_empty());
        return match (paths.next(), paths.next()) {
            (Some(single), None) => Some(single),
            _ => None,
        };
    }

    let home = dirs_next::home_dir()?;
    let default = home.join(".kube").join("config");
    default.exists().then_some(default)
}

/// Invalid duration strings
#[derive(Debug, Error, PartialEq)]
pub enum DurationError {
    #[error("empty duration")]
    Empty,

    #[error("invalid duration {0:?}, expected a number with optional ms, s, m or h suffix")]
    Invalid(String),

    #[error("duration must be greater than zero")]
    Zero,
}

/// Parse `500ms`, `5s`, `1.5m`, `1h` or bare seconds
pub fn parse_duration(raw: &str) -> Result<Duration, DurationError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(DurationError::Empty);
    }

    let (number, unit_secs) = if let Some(n) = raw.strip_suffix("ms") {
        (n, 0.001)
    } else if let Some(n) = raw.strip_suffix('s') {
        (n, 1.0)
    } else if let Some(n) = raw.strip_suffix('m') {
        (n, 60.0)
    } else if let Some(n) = raw.strip_suffix('h') {
        (n, 3600.0)
    } else {
        (raw, 1.0)
    };

    let value: f64 = number
        .trim()
        .parse()
        .map_err(|_| DurationError::Invalid(raw.to_string()))?;
    let duration = Duration::try_from_secs_f64(value * unit_secs)
        .map_err(|_| DurationError::Invalid(raw.to_string()))?;

    if duration.is_zero() {
        return Err(DurationError::Zero);
    }
    Ok(duration)
}

/// Accept either bare seconds or a duration string
fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Secs(u64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Secs(0) => Err(serde::de::Error::custom(DurationError::Zero)),
        Raw::Secs(secs) => Ok(Duration::from_secs(secs)),
        Raw::Text(text) => parse_duration(&text).map_err(serde::de::Error::custom),
    }
}
