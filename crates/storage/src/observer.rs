// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Observer-side queries
//!
//! Everything here works from the published snapshot and the run
//! directories on disk. The only write an observer performs is enqueuing a
//! command.

use crate::channel::{ChannelError, SnapshotReader, StateChannel};
use crate::log::{self, LogFeed, LogFileInfo, DEFAULT_TAIL_LINES};
use crate::metrics::{self, MetricPreview, MetricTable};
use crate::run_dir::RunDirectory;
use crate::StorageError;
use em_core::{Action, CommandEnvelope, JobId, Metadata, RunId, SchedulerSnapshot, Section, TaskSummary};
use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Rows returned by [`Observer::read_metric`] when no limit is given
pub const DEFAULT_METRIC_ROWS: usize = 200;

#[derive(Debug, Error)]
pub enum ObserverError {
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("task not found: {0}")]
    TaskNotFound(String),
    #[error("task id {prefix} is ambiguous ({matches} matches)")]
    AmbiguousTask { prefix: String, matches: usize },
    #[error("task {0} has no run directory yet")]
    NoWorkDir(JobId),
    #[error("task {0} has no log files")]
    NoLog(JobId),
    #[error("metric file not found: {}", .0.display())]
    MetricNotFound(PathBuf),
}

/// Everything known about one task
#[derive(Debug, Clone, Serialize)]
pub struct TaskDetails {
    pub section: Section,
    pub task: TaskSummary,
    pub metadata: Option<Metadata>,
    pub work_dir_exists: bool,
    pub logs: Vec<LogFileInfo>,
    pub metrics: Vec<MetricPreview>,
}

/// Tail of one run log
#[derive(Debug, Clone, Serialize)]
pub struct LogTail {
    pub task_id: JobId,
    pub run_id: Option<RunId>,
    pub path: PathBuf,
    pub lines: Vec<String>,
}

pub struct Observer {
    reader: SnapshotReader,
}

impl Observer {
    pub fn open(base: &Path) -> Result<Self, ObserverError> {
        let channel = StateChannel::open(base)?;
        Ok(Self {
            reader: SnapshotReader::new(channel),
        })
    }

    pub fn channel(&self) -> &StateChannel {
        self.reader.channel()
    }

    /// Latest snapshot, or the last good one if the file is unreadable
    pub fn state(&mut self) -> SchedulerSnapshot {
        self.reader.read()
    }

    /// Locate a task by exact id or unique id prefix
    pub fn find_task(&mut self, id: &str) -> Result<(Section, TaskSummary), ObserverError> {
        let snapshot = self.state();
        if let Some((section, task)) = snapshot.find(id) {
            return Ok((section, task.clone()));
        }

        let matches: Vec<(Section, &TaskSummary)> = Section::ALL
            .into_iter()
            .flat_map(|section| {
                snapshot
                    .section(section)
                    .iter()
                    .filter(|t| t.id.as_str().starts_with(id))
                    .map(move |t| (section, t))
            })
            .collect();
        match matches.as_slice() {
            [] => Err(ObserverError::TaskNotFound(id.to_string())),
            [(section, task)] => Ok((*section, (*task).clone())),
            _ => Err(ObserverError::AmbiguousTask {
                prefix: id.to_string(),
                matches: matches.len(),
            }),
        }
    }

    pub fn task_details(&mut self, id: &str) -> Result<TaskDetails, ObserverError> {
        let (section, task) = self.find_task(id)?;
        let Some(work_dir) = task.work_dir.clone() else {
            return Ok(TaskDetails {
                section,
                task,
                metadata: None,
                work_dir_exists: false,
                logs: Vec::new(),
                metrics: Vec::new(),
            });
        };

        let dir = RunDirectory::open(work_dir);
        let work_dir_exists = dir.exists();
        let metadata = dir.load_metadata()?;
        let logs = log::list_logs(&dir.logs_dir())?;
        let metrics = metrics::list_metrics(&dir.metrics_dir())?;
        Ok(TaskDetails {
            section,
            task,
            metadata,
            work_dir_exists,
            logs,
            metrics,
        })
    }

    /// Last `lines` lines of a run log. Without a run id the task's current
    /// run is used; a missing file falls back to the latest log.
    pub fn read_log(
        &mut self,
        id: &str,
        run_id: Option<RunId>,
        lines: Option<usize>,
    ) -> Result<LogTail, ObserverError> {
        let (_, task) = self.find_task(id)?;
        let dir = work_dir(&task)?;
        let path = log::resolve_log(&dir.logs_dir(), run_id.or(task.run_id))?
            .ok_or_else(|| ObserverError::NoLog(task.id.clone()))?;
        let resolved = path
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(|s| s.parse().ok());
        let lines = log::tail(&path, lines.unwrap_or(DEFAULT_TAIL_LINES))?;
        Ok(LogTail {
            task_id: task.id,
            run_id: resolved,
            path,
            lines,
        })
    }

    /// Incremental feed over a task's run log
    pub fn log_feed(&mut self, id: &str, run_id: Option<RunId>) -> Result<LogFeed, ObserverError> {
        let (_, task) = self.find_task(id)?;
        let dir = work_dir(&task)?;
        Ok(LogFeed::new(dir.logs_dir(), run_id.or(task.run_id)))
    }

    /// First `limit` rows of `metrics/<file>`
    pub fn read_metric(
        &mut self,
        id: &str,
        file: &str,
        limit: Option<usize>,
    ) -> Result<MetricTable, ObserverError> {
        let (_, task) = self.find_task(id)?;
        let dir = work_dir(&task)?;
        let path = dir.metrics_dir().join(file);
        let plain_name = Path::new(file).file_name().is_some_and(|n| n == file);
        if !plain_name || !path.is_file() {
            return Err(ObserverError::MetricNotFound(path));
        }
        Ok(metrics::read_table(&path, limit.unwrap_or(DEFAULT_METRIC_ROWS))?)
    }

    /// Enqueue a command for the task matching `id`
    pub fn send(&mut self, action: Action, id: &str) -> Result<CommandEnvelope, ObserverError> {
        let (_, task) = self.find_task(id)?;
        let envelope = CommandEnvelope::new(action, task.id);
        let path = self.channel().enqueue(&envelope)?;
        tracing::debug!(action = %action, target = %envelope.target, path = %path.display(), "enqueued command");
        Ok(envelope)
    }
}

fn work_dir(task: &TaskSummary) -> Result<RunDirectory, ObserverError> {
    task.work_dir
        .as_ref()
        .map(RunDirectory::open)
        .ok_or_else(|| ObserverError::NoWorkDir(task.id.clone()))
}

#[cfg(test)]
#[path = "observer_tests.rs"]
mod tests;
