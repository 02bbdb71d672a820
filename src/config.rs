use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::backoff::RetryPolicy;
use crate::cursor::LookbackSettings;
use crate::filter::FilterConfig;
use crate::stream::StreamSettings;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub source: SourceConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
    #[serde(default = "default_busy_timeout_secs")]
    pub busy_timeout_secs: u64,
}

fn default_busy_timeout_secs() -> u64 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct StreamConfig {
    #[serde(default)]
    pub poll_interval_secs: Option<u64>,
    #[serde(default)]
    pub user_handles: Vec<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default = "default_base_backoff_secs")]
    pub base_backoff_secs: u64,
    #[serde(default = "default_max_backoff_secs")]
    pub max_backoff_secs: u64,
    #[serde(default = "default_backoff_jitter")]
    pub backoff_jitter: f64,
    #[serde(default = "default_auth_attempts")]
    pub auth_attempts: u32,
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
    #[serde(default = "default_min_lookback_secs")]
    pub min_lookback_secs: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: None,
            user_handles: Vec::new(),
            keywords: Vec::new(),
            base_backoff_secs: default_base_backoff_secs(),
            max_backoff_secs: default_max_backoff_secs(),
            backoff_jitter: default_backoff_jitter(),
            auth_attempts: default_auth_attempts(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
            min_lookback_secs: default_min_lookback_secs(),
        }
    }
}

fn default_base_backoff_secs() -> u64 {
    2
}
fn default_max_backoff_secs() -> u64 {
    300
}
fn default_backoff_jitter() -> f64 {
    0.1
}
fn default_auth_attempts() -> u32 {
    3
}
fn default_shutdown_timeout_secs() -> u64 {
    5
}
fn default_min_lookback_secs() -> u64 {
    300
}

impl StreamConfig {
    /// Build worker settings from this section.
    pub fn to_settings(&self) -> StreamSettings {
        StreamSettings {
            poll_interval: self.poll_interval_secs.map(Duration::from_secs),
            filter: FilterConfig::new(&self.user_handles, &self.keywords),
            base_backoff: Duration::from_secs(self.base_backoff_secs),
            max_backoff: Duration::from_secs(self.max_backoff_secs),
            backoff_jitter: self.backoff_jitter,
            auth_retry: RetryPolicy {
                attempts: self.auth_attempts,
                ..RetryPolicy::default()
            },
            shutdown_timeout: Duration::from_secs(self.shutdown_timeout_secs),
            lookback: LookbackSettings {
                min_lookback: Duration::from_secs(self.min_lookback_secs),
                ..LookbackSettings::default()
            },
        }
    }
}

/// Location of the timeline export read by the file source.
#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    #[serde(default = "default_source_path")]
    pub path: PathBuf,
    /// Maximum posts returned per poll, newest first.
    #[serde(default = "default_source_limit")]
    pub limit: usize,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            path: default_source_path(),
            limit: default_source_limit(),
        }
    }
}

fn default_source_path() -> PathBuf {
    PathBuf::from("./data/timeline.json")
}
fn default_source_limit() -> usize {
    100
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    let stream = &config.stream;
    if stream.poll_interval_secs == Some(0) {
        bail!("stream.poll_interval_secs must be > 0");
    }
    if stream.base_backoff_secs == 0 {
        bail!("stream.base_backoff_secs must be > 0");
    }
    if stream.max_backoff_secs < stream.base_backoff_secs {
        bail!("stream.max_backoff_secs must be >= stream.base_backoff_secs");
    }
    if !(0.0..1.0).contains(&stream.backoff_jitter) {
        bail!("stream.backoff_jitter must be in [0.0, 1.0)");
    }
    if stream.auth_attempts == 0 {
        bail!("stream.auth_attempts must be >= 1");
    }
    if config.source.limit == 0 {
        bail!("source.limit must be > 0");
    }

    Ok(config)
}
