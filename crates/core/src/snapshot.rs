// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Read-only projection of scheduler queues, published for observers

use crate::job::JobId;
use crate::run::{Failure, RunId, RunStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Queue a task is listed in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Section {
    Pending,
    Running,
    Finished,
    Errors,
}

impl Section {
    pub const ALL: [Section; 4] = [
        Section::Pending,
        Section::Running,
        Section::Finished,
        Section::Errors,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Section::Pending => "pending",
            Section::Running => "running",
            Section::Finished => "finished",
            Section::Errors => "errors",
        }
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lightweight view of a job's current run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSummary {
    pub id: JobId,
    pub name: String,
    pub status: RunStatus,
    pub attempt: u32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub run_id: Option<RunId>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub work_dir: Option<PathBuf>,
    #[serde(default)]
    pub pid: Option<u32>,
    #[serde(default)]
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub error: Option<Failure>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

/// Aggregate counts across the four queues
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counts {
    pub total: usize,
    pub pending: usize,
    pub running: usize,
    pub finished: usize,
    pub errors: usize,
}

/// A job that ended in error, for the final summary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureLine {
    pub name: String,
    pub attempt: u32,
    pub exit_code: Option<i32>,
    pub reason: String,
}

/// Final report emitted when all jobs are terminal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub counts: Counts,
    /// Finished on the first attempt
    pub first_try: usize,
    /// Finished after at least one retry
    pub after_retry: usize,
    pub elapsed_secs: f64,
    pub failures: Vec<FailureLine>,
}

impl fmt::Display for ExecutionSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Scheduling complete in {:.1}s: {} finished ({} first try, {} after retry), {} failed, {} pending, {} running",
            self.elapsed_secs,
            self.counts.finished,
            self.first_try,
            self.after_retry,
            self.counts.errors,
            self.counts.pending,
            self.counts.running,
        )?;
        for line in &self.failures {
            let code = line
                .exit_code
                .map_or_else(|| "-".to_string(), |c| c.to_string());
            writeln!(
                f,
                "  - {} (attempt={}, exit_code={}): {}",
                line.name, line.attempt, code, line.reason
            )?;
        }
        Ok(())
    }
}

/// Published scheduler state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerSnapshot {
    pub updated_at: DateTime<Utc>,
    pub pending: Vec<TaskSummary>,
    pub running: Vec<TaskSummary>,
    pub finished: Vec<TaskSummary>,
    pub errors: Vec<TaskSummary>,
    pub counts: Counts,
    #[serde(default)]
    pub summary: Option<ExecutionSummary>,
}

impl SchedulerSnapshot {
    pub fn new(
        updated_at: DateTime<Utc>,
        pending: Vec<TaskSummary>,
        running: Vec<TaskSummary>,
        finished: Vec<TaskSummary>,
        errors: Vec<TaskSummary>,
    ) -> Self {
        let counts = Counts {
            total: pending.len() + running.len() + finished.len() + errors.len(),
            pending: pending.len(),
            running: running.len(),
            finished: finished.len(),
            errors: errors.len(),
        };
        Self {
            updated_at,
            pending,
            running,
            finished,
            errors,
            counts,
            summary: None,
        }
    }

    /// Snapshot of a scheduler that has published nothing yet
    pub fn empty(updated_at: DateTime<Utc>) -> Self {
        Self::new(updated_at, Vec::new(), Vec::new(), Vec::new(), Vec::new())
    }

    pub fn with_summary(self, summary: ExecutionSummary) -> Self {
        Self {
            summary: Some(summary),
            ..self
        }
    }

    pub fn section(&self, section: Section) -> &[TaskSummary] {
        match section {
            Section::Pending => &self.pending,
            Section::Running => &self.running,
            Section::Finished => &self.finished,
            Section::Errors => &self.errors,
        }
    }

    /// Locate a task by id across all sections
    pub fn find(&self, id: &str) -> Option<(Section, &TaskSummary)> {
        Section::ALL.into_iter().find_map(|section| {
            self.section(section)
                .iter()
                .find(|t| t.id.as_str() == id)
                .map(|t| (section, t))
        })
    }
}

#[cfg(test)]
#[path = "snapshot_tests.rs"]
mod tests;
