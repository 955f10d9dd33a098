// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-run lifecycle management
//!
//! A [`LifecycleManager`] exists for one attempt of one job. It reserves the
//! run id, writes the log header and metadata, starts the subprocess with
//! its environment, and persists the outcome when the scheduler harvests it.

use crate::AdmissionError;
use chrono::{DateTime, Local, Utc};
use em_adapters::{OutputSink, OutputStream, ProcessAdapter, ProcessExit, ProcessHandle, SpawnRequest};
use em_core::metadata::keys;
use em_core::{JobId, JobSpec, Metadata, RunId, RunRecord};
use em_storage::{MetricRecorder, RunDirectory, RunLog, StorageError, ENV_RUN_DIR, ENV_RUN_ID};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Warning raised when captured output could not be written to the run log
pub const LOG_WRITE_WARNING: &str = "log write failed";
/// Warning raised when `metadata.json` could not be updated
pub const METADATA_WRITE_WARNING: &str = "metadata write failed";

const DEVICES_ENV: &str = "CUDA_VISIBLE_DEVICES";

/// Create or reopen the job directory for `spec`.
///
/// `spec.base_dir` overrides `default_base`. A resumed job must point at an
/// existing `<name>_<label>` directory.
pub fn open_directory(
    spec: &JobSpec,
    default_base: &Path,
    started: DateTime<Utc>,
) -> Result<RunDirectory, AdmissionError> {
    let base = spec.base_dir.as_deref().unwrap_or(default_base);
    let dir = match &spec.resume {
        Some(label) => RunDirectory::resume(base, &spec.name, label)?,
        None => RunDirectory::create(base, &spec.name, started)?,
    };
    Ok(dir)
}

struct LogSink(Arc<RunLog>);

impl OutputSink for LogSink {
    fn write_line(&self, _stream: OutputStream, line: &str) -> io::Result<()> {
        self.0.append(line)
    }
}

/// One running attempt of a job
pub struct LifecycleManager {
    job_id: JobId,
    attempt: u32,
    run_id: RunId,
    dir: RunDirectory,
    log: Arc<RunLog>,
    handle: ProcessHandle,
    metadata: Metadata,
    metadata_failed: bool,
}

impl LifecycleManager {
    /// Reserve a run id in `dir` and start `spec.command`.
    ///
    /// `default_cwd` applies when neither the job nor prior metadata name a
    /// working directory.
    pub async fn start<P: ProcessAdapter>(
        adapter: &P,
        job_id: &JobId,
        spec: &JobSpec,
        dir: RunDirectory,
        attempt: u32,
        started: DateTime<Utc>,
        default_cwd: &Path,
    ) -> Result<Self, AdmissionError> {
        dir.ensure_layout()?;
        let run_id = dir.reserve_run()?;
        let log = Arc::new(RunLog::open(dir.log_path(run_id))?);

        let prior = match dir.load_metadata() {
            Ok(prior) => prior,
            Err(e) => {
                tracing::warn!(job_id = %job_id, error = %e, "ignoring unreadable metadata");
                None
            }
        };
        let mut metadata = launch_metadata(spec, prior.as_ref(), started, default_cwd);
        let cwd = metadata
            .get_path(keys::CWD)
            .unwrap_or_else(|| default_cwd.to_path_buf());
        let gpu_ids = metadata.get_u32s(keys::GPU_IDS).unwrap_or_default();

        write_header(&log, spec, &metadata, run_id, attempt, &dir);

        metadata.set(keys::STATUS, "pending");
        metadata.set(keys::CURRENT_RUN_ID, run_id.to_string());
        metadata.set(keys::ATTEMPT, attempt);
        let env = launch_env(spec, &gpu_ids, &dir, run_id);

        let request = SpawnRequest {
            name: spec.name.clone(),
            command: spec.command.clone(),
            cwd,
            env,
            sink: Arc::new(LogSink(log.clone())),
        };
        let handle = match adapter.spawn(request).await {
            Ok(handle) => handle,
            Err(e) => {
                log.note(&format!("Failed to start: {}", e));
                metadata.set(keys::STATUS, "error");
                metadata.set(keys::ERROR, e.to_string());
                metadata.set_opt::<u32>(keys::PID, None);
                if let Err(save) = dir.save_metadata(&metadata) {
                    tracing::warn!(job_id = %job_id, error = %save, "failed to save metadata");
                }
                return Err(e.into());
            }
        };

        metadata.set(keys::STATUS, "running");
        metadata.set(keys::PID, handle.pid());
        metadata.set(keys::STARTED_AT, started.to_rfc3339());
        log.note(&format!("Started attempt {} (pid {})", attempt, handle.pid()));

        let mut manager = Self {
            job_id: job_id.clone(),
            attempt,
            run_id,
            dir,
            log,
            handle,
            metadata,
            metadata_failed: false,
        };
        manager.save_metadata();
        tracing::info!(
            job_id = %manager.job_id,
            run_id = %manager.run_id,
            attempt,
            pid = manager.handle.pid(),
            "run started"
        );
        Ok(manager)
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    pub fn pid(&self) -> u32 {
        self.handle.pid()
    }

    pub fn dir(&self) -> &RunDirectory {
        &self.dir
    }

    pub fn log_path(&self) -> PathBuf {
        self.dir.log_path(self.run_id)
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// The exit, if the process has ended. Never blocks.
    pub fn try_exit(&self) -> Option<ProcessExit> {
        self.handle.try_exit()
    }

    pub async fn wait(&mut self) -> ProcessExit {
        self.handle.wait().await
    }

    /// Request termination: SIGTERM, then SIGKILL after `grace`
    pub fn terminate(&self, grace: Duration) -> bool {
        self.log.note(&format!("Termination requested (grace {}s)", grace.as_secs()));
        self.handle.terminate(grace)
    }

    /// Recorder for this run's default metric store
    pub fn metrics(&self) -> Result<MetricRecorder, StorageError> {
        MetricRecorder::open(&self.dir, self.run_id)
    }

    /// Persistence problems seen so far
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.handle.output_failed() || self.log.faulted() {
            warnings.push(LOG_WRITE_WARNING.to_string());
        }
        if self.metadata_failed {
            warnings.push(METADATA_WRITE_WARNING.to_string());
        }
        warnings
    }

    /// Persist the harvested outcome of `record` to the log and metadata
    pub fn finalize(&mut self, record: &RunRecord, exit: &ProcessExit) {
        self.log.note(&format!("Process ended: {}", exit));
        if let Some(failure) = record.failure() {
            self.log.note(&format!("Run failed: {}", failure));
        }

        self.metadata.set(keys::STATUS, record.status().as_str());
        self.metadata.set_opt(keys::EXIT_CODE, exit.code);
        self.metadata.set_opt::<u32>(keys::PID, None);
        self.metadata.set_opt(keys::COMPLETED_AT, record.completed_at.map(|t| t.to_rfc3339()));
        self.metadata.set_opt(keys::ERROR, record.failure().map(|f| f.to_string()));
        self.save_metadata();
    }

    fn save_metadata(&mut self) {
        if let Err(e) = self.dir.save_metadata(&self.metadata) {
            if !self.metadata_failed {
                tracing::warn!(job_id = %self.job_id, error = %e, "failed to save metadata");
            }
            self.metadata_failed = true;
        }
    }
}

/// Metadata for a new attempt: explicit fields from the job, everything else
/// carried over from the directory's previous metadata
fn launch_metadata(
    spec: &JobSpec,
    prior: Option<&Metadata>,
    started: DateTime<Utc>,
    default_cwd: &Path,
) -> Metadata {
    let mut metadata = Metadata::new();
    metadata.set(keys::NAME, spec.name.as_str());
    metadata.set(keys::COMMAND, spec.command.as_str());
    if !spec.tags.is_empty() {
        metadata.set(keys::TAGS, spec.tags.clone());
    }
    if !spec.gpu_ids.is_empty() {
        metadata.set(keys::GPU_IDS, spec.gpu_ids.clone());
    }
    if let Some(cwd) = &spec.cwd {
        metadata.set(keys::CWD, cwd.to_string_lossy().into_owned());
    }
    if let Some(description) = &spec.description {
        metadata.set(keys::DESCRIPTION, description.as_str());
    }
    if let Some(prior) = prior {
        metadata.inherit(prior);
    }

    let mut defaults = Metadata::new();
    defaults.set(keys::TAGS, Vec::<String>::new());
    defaults.set(keys::GPU_IDS, Vec::<u32>::new());
    defaults.set(keys::CWD, default_cwd.to_string_lossy().into_owned());
    defaults.set_opt::<String>(keys::DESCRIPTION, None);
    defaults.set(keys::TIMESTAMP, started.with_timezone(&Local).to_rfc3339());
    metadata.inherit(&defaults);

    for key in [keys::EXIT_CODE, keys::COMPLETED_AT, keys::ERROR, keys::STARTED_AT] {
        metadata.set_opt::<String>(key, None);
    }
    metadata
}

/// Environment overrides, lowest precedence first
fn launch_env(spec: &JobSpec, gpu_ids: &[u32], dir: &RunDirectory, run_id: RunId) -> Vec<(String, String)> {
    let mut env = Vec::with_capacity(spec.environment.len() + 3);
    if !gpu_ids.is_empty() {
        let devices = gpu_ids.iter().map(|id| id.to_string()).collect::<Vec<_>>().join(",");
        env.push((DEVICES_ENV.to_string(), devices));
    }
    env.push((ENV_RUN_DIR.to_string(), dir.root().to_string_lossy().into_owned()));
    env.push((ENV_RUN_ID.to_string(), run_id.to_string()));
    env.extend(spec.environment.iter().map(|(k, v)| (k.clone(), v.clone())));
    env
}

fn write_header(
    log: &RunLog,
    spec: &JobSpec,
    metadata: &Metadata,
    run_id: RunId,
    attempt: u32,
    dir: &RunDirectory,
) {
    let gpus = metadata.get_u32s(keys::GPU_IDS).unwrap_or_default();
    log.note("Experiment initialized");
    log.note(&format!("Run id: {}", run_id));
    log.note(&format!("Name: {}", spec.name));
    log.note(&format!("Command: {}", spec.command));
    log.note(&format!("GPUs: {:?}", gpus));
    if let Some(description) = metadata.get_str(keys::DESCRIPTION) {
        log.note(&format!("Description: {}", description));
    }
    log.note(&format!("Work dir: {}", dir.root().display()));
    log.note(&format!("Attempt: {}", attempt));
}

#[cfg(test)]
#[path = "lifecycle_tests.rs"]
mod tests;
