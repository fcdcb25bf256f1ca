//! Configuration management for the load generator
//!
//! Loads configuration from TOML files with environment variable substitution.

use anyhow::{Context, Result};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

lazy_static! {
    static ref ENV_VAR: Regex = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").unwrap();
}

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub node: NodeConfig,
    pub run: RunConfig,
    #[serde(default)]
    pub tracker: TrackerConfig,
    #[serde(default)]
    pub rpc: RpcConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Node the load is driven against. `address` is the sending account.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    #[serde(default = "default_node_type")]
    pub node_type: String,
    pub url: String,
    pub address: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunConfig {
    pub receiver: String,
    #[serde(default = "default_tx_count")]
    pub tx_count: u64,
    #[serde(default = "default_value")]
    pub value: u64,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,
    #[serde(default = "default_stagger_ms")]
    pub stagger_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrackerConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_monitor_interval_ms")]
    pub monitor_interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcConfig {
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

fn default_node_type() -> String {
    "validator".to_string()
}

fn default_tx_count() -> u64 {
    10
}

fn default_value() -> u64 {
    1
}

fn default_workers() -> usize {
    1
}

fn default_max_retries() -> u32 {
    5
}

fn default_base_backoff_ms() -> u64 {
    100
}

fn default_stagger_ms() -> u64 {
    10
}

fn default_poll_interval_ms() -> u64 {
    2_000
}

fn default_timeout_secs() -> u64 {
    300
}

fn default_monitor_interval_ms() -> u64 {
    1_000
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_metrics_port() -> u16 {
    9100
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            timeout_secs: default_timeout_secs(),
            monitor_interval_ms: default_monitor_interval_ms(),
        }
    }
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}

impl RunConfig {
    pub fn base_backoff(&self) -> Duration {
        Duration::from_millis(self.base_backoff_ms)
    }

    pub fn stagger(&self) -> Duration {
        Duration::from_millis(self.stagger_ms)
    }
}

impl TrackerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_millis(self.monitor_interval_ms)
    }
}

impl Settings {
    /// Load settings from `LOADGEN_CONFIG`, falling back to `config/default.toml`
    pub fn load() -> Result<Self> {
        let config_path = env::var("LOADGEN_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        Self::load_from(&config_path)
    }

    /// Load settings from a specific file
    pub fn load_from(config_path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        Self::parse(&config_str)
    }

    fn parse(raw: &str) -> Result<Self> {
        // Substitute environment variables
        let config_str = substitute_env_vars(raw);

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.node.url.trim().is_empty() {
            anyhow::bail!("node.url must be set");
        }
        if self.node.address.trim().is_empty() {
            anyhow::bail!("node.address must be set");
        }
        if self.run.receiver.trim().is_empty() {
            anyhow::bail!("run.receiver must be set");
        }
        if self.run.workers == 0 {
            anyhow::bail!("run.workers must be at least 1");
        }
        if self.run.max_retries == 0 {
            anyhow::bail!("run.max_retries must be at least 1");
        }
        if self.run.tx_count == 0 {
            anyhow::bail!("run.tx_count must be at least 1");
        }
        if self.tracker.poll_interval_ms == 0 || self.tracker.monitor_interval_ms == 0 {
            anyhow::bail!("tracker intervals must be non-zero");
        }

        if self.run.workers > 1 {
            tracing::warn!(
                "Running with {} workers - node must accept out-of-order nonces",
                self.run.workers
            );
        }

        Ok(())
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    ENV_VAR
        .replace_all(input, |cap: &regex::Captures| {
            env::var(&cap[1]).unwrap_or_default()
        })
        .into_owned()
}
