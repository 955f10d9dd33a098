// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Experiment configuration files
//!
//! ```toml
//! [scheduler]
//! base_experiment_dir = "runs"
//! max_concurrent_experiments = 2
//!
//! [[experiments]]
//! name = "baseline"
//! command = "python train.py --lr 0.1"
//! gpu_ids = "0,1"
//! max_retries = 2
//! delay_seconds = 30
//! ```

use em_core::JobSpec;
use em_engine::SchedulerConfig;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Used when no `--config` is given
pub const DEFAULT_CONFIG_FILE: &str = "experiments.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("{0}")]
    Invalid(String),
}

/// A loaded configuration
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub scheduler: SchedulerConfig,
    pub experiments: Vec<JobSpec>,
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    scheduler: RawScheduler,
    #[serde(default)]
    experiments: Vec<RawExperiment>,
}

#[derive(Debug, Deserialize)]
struct RawScheduler {
    base_experiment_dir: PathBuf,
    #[serde(default = "default_concurrency")]
    max_concurrent_experiments: usize,
    #[serde(default = "default_seconds")]
    check_interval: f64,
    #[serde(default)]
    linger: bool,
    #[serde(default = "default_seconds")]
    terminate_grace: f64,
    #[serde(default = "default_auto_restart")]
    auto_restart_on_error: bool,
}

fn default_concurrency() -> usize {
    1
}

fn default_seconds() -> f64 {
    10.0
}

fn default_auto_restart() -> bool {
    true
}

fn default_repeats() -> u32 {
    1
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum GpuIds {
    List(Vec<u32>),
    Text(String),
}

impl Default for GpuIds {
    fn default() -> Self {
        GpuIds::List(Vec::new())
    }
}

#[derive(Debug, Deserialize)]
struct RawExperiment {
    name: String,
    command: String,
    #[serde(default)]
    priority: i32,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    gpu_ids: GpuIds,
    cwd: Option<PathBuf>,
    base_dir: Option<PathBuf>,
    #[serde(default)]
    environment: BTreeMap<String, toml::Value>,
    resume: Option<String>,
    description: Option<String>,
    #[serde(default = "default_repeats")]
    repeats: u32,
    #[serde(default)]
    max_retries: u32,
    #[serde(default)]
    delay_seconds: f64,
}

impl Config {
    /// Read and validate a configuration file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let raw: RawConfig = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let dir = std::path::absolute(&dir).unwrap_or(dir);
        Self::from_raw(raw, &dir)
    }

    fn from_raw(raw: RawConfig, dir: &Path) -> Result<Self, ConfigError> {
        let scheduler = raw.scheduler;
        if scheduler.max_concurrent_experiments == 0 {
            return Err(ConfigError::Invalid(
                "max_concurrent_experiments must be at least 1".to_string(),
            ));
        }
        let check_interval = seconds("check_interval", scheduler.check_interval)?;
        if check_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "check_interval must be positive".to_string(),
            ));
        }

        let scheduler = SchedulerConfig::new(dir.join(&scheduler.base_experiment_dir))
            .with_default_cwd(dir)
            .with_max_concurrent(scheduler.max_concurrent_experiments)
            .with_check_interval(check_interval)
            .with_linger(scheduler.linger)
            .with_auto_restart(scheduler.auto_restart_on_error)
            .with_terminate_grace(seconds("terminate_grace", scheduler.terminate_grace)?);

        let experiments = raw
            .experiments
            .into_iter()
            .map(|experiment| experiment.into_spec(dir))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            scheduler,
            experiments,
        })
    }
}

impl RawExperiment {
    fn into_spec(self, dir: &Path) -> Result<JobSpec, ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::Invalid("experiment name is empty".to_string()));
        }
        let invalid = |what: String| ConfigError::Invalid(format!("experiment {}: {}", self.name, what));
        if self.command.trim().is_empty() {
            return Err(invalid("command is empty".to_string()));
        }
        if self.repeats == 0 {
            return Err(invalid("repeats must be at least 1".to_string()));
        }

        let gpu_ids = match &self.gpu_ids {
            GpuIds::List(ids) => ids.clone(),
            GpuIds::Text(text) => parse_gpu_ids(text).map_err(invalid)?,
        };
        let mut environment = BTreeMap::new();
        for (key, value) in &self.environment {
            let value = env_value(value)
                .ok_or_else(|| invalid(format!("environment value for {} must be a scalar", key)))?;
            environment.insert(key.clone(), value);
        }
        let delay = seconds("delay_seconds", self.delay_seconds).map_err(|e| invalid(e.to_string()))?;

        let mut spec = JobSpec::new(self.name.clone(), self.command.clone())
            .with_priority(self.priority)
            .with_tags(self.tags.clone())
            .with_gpu_ids(gpu_ids)
            .with_repeats(self.repeats)
            .with_max_retries(self.max_retries)
            .with_delay(delay);
        spec.environment = environment;
        spec.cwd = self.cwd.as_ref().map(|cwd| dir.join(cwd));
        spec.base_dir = self.base_dir.as_ref().map(|base| dir.join(base));
        spec.description = self.description.clone();
        spec.resume = self.resume.clone();
        Ok(spec)
    }
}

/// Parse `"0,1"` style device lists
fn parse_gpu_ids(text: &str) -> Result<Vec<u32>, String> {
    text.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse()
                .map_err(|_| format!("invalid gpu id {:?}", part))
        })
        .collect()
}

fn env_value(value: &toml::Value) -> Option<String> {
    match value {
        toml::Value::String(s) => Some(s.clone()),
        toml::Value::Integer(i) => Some(i.to_string()),
        toml::Value::Float(f) => Some(f.to_string()),
        toml::Value::Boolean(b) => Some(b.to_string()),
        toml::Value::Datetime(d) => Some(d.to_string()),
        toml::Value::Array(_) | toml::Value::Table(_) => None,
    }
}

fn seconds(field: &str, value: f64) -> Result<Duration, ConfigError> {
    Duration::try_from_secs_f64(value)
        .map_err(|_| ConfigError::Invalid(format!("{} must be a non-negative number of seconds", field)))
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
