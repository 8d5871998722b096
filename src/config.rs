//! Run configuration: an optional YAML run file merged with CLI flags.
//!
//! Precedence is CLI, then run file, then built-in defaults. Channel lists
//! from both sources are concatenated and deduplicated in order.
//!
//! ```yaml
//! channels: [news_channel, sports_channel]
//! output_dir: ./exports
//! strategy: scroll
//! threshold: 3000
//! checkpoint_interval: 500
//! recovery_ceiling: 30
//! ```

use crate::cli::Cli;
use crate::controller::HarvestLimits;
use crate::error::ConfigError;
use crate::models::Strategy;
use crate::outputs::OutputFormat;
use crate::retry::RetryPolicy;
use itertools::Itertools;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::{info, instrument};

pub const DEFAULT_BASE_URL: &str = "https://eitaa.com";
pub const DEFAULT_OUTPUT_DIR: &str = "harvest_output";

/// The YAML run file; every key is optional.
#[derive(Debug, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigFile {
    pub channels: Vec<String>,
    pub output_dir: Option<PathBuf>,
    pub strategy: Option<Strategy>,
    pub base_url: Option<String>,
    pub threshold: Option<usize>,
    pub checkpoint_interval: Option<usize>,
    pub max_iterations: Option<usize>,
    pub max_attempts: Option<u32>,
    pub backoff_ms: Option<u64>,
    pub request_delay_ms: Option<u64>,
    pub timeout_secs: Option<u64>,
    pub recovery_step: Option<u32>,
    pub recovery_ceiling: Option<u32>,
    pub settle_ms: Option<u64>,
    pub format: Option<OutputFormat>,
    pub resume: Option<bool>,
}

impl ConfigFile {
    pub fn parse(text: &str, path: &Path) -> Result<Self, ConfigError> {
        serde_yaml::from_str(text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }
}

#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn load_config_file(path: &Path) -> Result<ConfigFile, ConfigError> {
    let text = fs::read_to_string(path)
        .await
        .map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
    let file = ConfigFile::parse(&text, path)?;
    info!(channels = file.channels.len(), "Loaded run file");
    Ok(file)
}

/// Fully resolved settings for one invocation.
#[derive(Debug, Clone)]
pub struct HarvestSettings {
    pub channels: Vec<String>,
    pub output_dir: PathBuf,
    pub strategy: Strategy,
    pub base_url: String,
    pub format: OutputFormat,
    pub resume: bool,
    pub limits: HarvestLimits,
    pub retry: RetryPolicy,
    pub request_timeout: Duration,
    pub settle: Duration,
}

impl HarvestSettings {
    pub fn resolve(cli: &Cli, file: ConfigFile) -> Result<Self, ConfigError> {
        let channels: Vec<String> = cli
            .channels
            .iter()
            .chain(file.channels.iter())
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .unique()
            .collect();
        if channels.is_empty() {
            return Err(ConfigError::NoChannels);
        }

        let defaults = HarvestLimits::default();
        let limits = HarvestLimits {
            post_threshold: cli.threshold.or(file.threshold).unwrap_or(defaults.post_threshold),
            checkpoint_interval: cli
                .checkpoint_interval
                .or(file.checkpoint_interval)
                .unwrap_or(defaults.checkpoint_interval),
            max_iterations: cli
                .max_iterations
                .or(file.max_iterations)
                .unwrap_or(defaults.max_iterations),
            recovery_step: cli
                .recovery_step
                .or(file.recovery_step)
                .unwrap_or(defaults.recovery_step),
            recovery_ceiling: cli
                .recovery_ceiling
                .or(file.recovery_ceiling)
                .unwrap_or(defaults.recovery_ceiling),
            request_delay: cli
                .request_delay_ms
                .or(file.request_delay_ms)
                .map(Duration::from_millis)
                .unwrap_or(defaults.request_delay),
        };
        ensure_positive("threshold", limits.post_threshold)?;
        ensure_positive("checkpoint_interval", limits.checkpoint_interval)?;
        ensure_positive("max_iterations", limits.max_iterations)?;

        let retry_defaults = RetryPolicy::default();
        let retry = RetryPolicy::new(
            cli.max_attempts
                .or(file.max_attempts)
                .unwrap_or(retry_defaults.max_attempts()),
            cli.backoff_ms
                .or(file.backoff_ms)
                .map(Duration::from_millis)
                .unwrap_or(retry_defaults.delay_after(1)),
        );

        let base_url = cli
            .base_url
            .clone()
            .or(file.base_url)
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        if let Err(e) = url::Url::parse(&base_url) {
            return Err(ConfigError::Invalid {
                field: "base_url",
                reason: e.to_string(),
            });
        }

        Ok(Self {
            channels,
            output_dir: cli
                .output_dir
                .clone()
                .or(file.output_dir)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR)),
            strategy: cli.strategy.or(file.strategy).unwrap_or(Strategy::Pages),
            base_url,
            format: cli.format.or(file.format).unwrap_or(OutputFormat::Csv),
            resume: cli.resume || file.resume.unwrap_or(false),
            limits,
            retry,
            request_timeout: Duration::from_secs(
                cli.timeout_secs.or(file.timeout_secs).unwrap_or(30),
            ),
            settle: Duration::from_millis(cli.settle_ms.or(file.settle_ms).unwrap_or(10_000)),
        })
    }
}

fn ensure_positive(field: &'static str, value: usize) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::Invalid {
            field,
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(())
}
