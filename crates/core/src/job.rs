// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job descriptions consumed by the scheduler

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Stable identifier of a scheduled job
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Declarative description of one schedulable command.
///
/// Optional fields left unset (`cwd`, `description`, empty `tags` and
/// `gpu_ids`) are inherited from prior metadata when the job resumes an
/// existing directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    /// Overrides the scheduler's base experiment directory
    #[serde(default)]
    pub base_dir: Option<PathBuf>,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Resolved device ids, injected as `CUDA_VISIBLE_DEVICES`
    #[serde(default)]
    pub gpu_ids: Vec<u32>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_repeats")]
    pub repeats: u32,
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default, rename = "delay_seconds", with = "duration_secs")]
    pub delay: Duration,
    /// Label of an existing job directory to continue (`<name>_<label>`)
    #[serde(default)]
    pub resume: Option<String>,
}

fn default_repeats() -> u32 {
    1
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_f64(duration.as_secs_f64())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

impl JobSpec {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            priority: 0,
            cwd: None,
            base_dir: None,
            environment: BTreeMap::new(),
            tags: Vec::new(),
            gpu_ids: Vec::new(),
            description: None,
            repeats: 1,
            max_retries: 0,
            delay: Duration::ZERO,
            resume: None,
        }
    }

    pub fn with_priority(self, priority: i32) -> Self {
        Self { priority, ..self }
    }

    pub fn with_max_retries(self, max_retries: u32) -> Self {
        Self {
            max_retries,
            ..self
        }
    }

    pub fn with_delay(self, delay: Duration) -> Self {
        Self { delay, ..self }
    }

    pub fn with_repeats(self, repeats: u32) -> Self {
        Self { repeats, ..self }
    }

    pub fn with_cwd(self, cwd: impl Into<PathBuf>) -> Self {
        Self {
            cwd: Some(cwd.into()),
            ..self
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    pub fn with_tags(self, tags: Vec<String>) -> Self {
        Self { tags, ..self }
    }

    pub fn with_gpu_ids(self, gpu_ids: Vec<u32>) -> Self {
        Self { gpu_ids, ..self }
    }

    pub fn with_description(self, description: impl Into<String>) -> Self {
        Self {
            description: Some(description.into()),
            ..self
        }
    }

    pub fn with_resume(self, label: impl Into<String>) -> Self {
        Self {
            resume: Some(label.into()),
            ..self
        }
    }

    /// Total attempts allowed, counting the first one
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Whether a job that has made `attempt` attempts may be retried
    pub fn retry_allowed(&self, attempt: u32) -> bool {
        attempt < self.max_attempts()
    }

    /// Expand `repeats` into independent single-shot jobs
    pub fn expand(self) -> Vec<JobSpec> {
        let count = self.repeats.max(1);
        let single = JobSpec { repeats: 1, ..self };
        vec![single; count as usize]
    }
}

#[cfg(test)]
#[path = "job_tests.rs"]
mod tests;
