// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Run records and their state machine
//!
//! A [`RunRecord`] tracks one attempt of a job. Its [`RunState`] only moves
//! forward:
//!
//! ```text
//! Pending ──► Running ──► Finished
//!    │           │
//!    └───────────┴──────► Error ──(explicit retry)──► Pending
//! ```
//!
//! A pending record may carry a monotonic `ready_at` gate; it is not
//! admissible before that instant.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::time::Instant;
use thiserror::Error;

/// Errors from run identifier arithmetic and parsing
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RunIdError {
    #[error("run identifier space exhausted (max run_{:04})", RunId::MAX)]
    Exhausted,
    #[error("invalid run identifier: {0}")]
    Invalid(String),
}

/// Per-directory run identifier, rendered as `run_NNNN`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RunId(u16);

impl RunId {
    pub const MAX: u16 = 9999;
    pub const FIRST: RunId = RunId(1);

    pub fn new(number: u16) -> Result<Self, RunIdError> {
        if number == 0 || number > Self::MAX {
            return Err(RunIdError::Invalid(number.to_string()));
        }
        Ok(Self(number))
    }

    pub fn number(&self) -> u16 {
        self.0
    }

    /// The following identifier; overflowing four digits is an error, never a wrap
    pub fn next(&self) -> Result<RunId, RunIdError> {
        if self.0 >= Self::MAX {
            return Err(RunIdError::Exhausted);
        }
        Ok(RunId(self.0 + 1))
    }

    /// First free identifier after the given existing ones
    pub fn next_after<'a>(existing: impl IntoIterator<Item = &'a RunId>) -> Result<RunId, RunIdError> {
        match existing.into_iter().max() {
            Some(max) => max.next(),
            None => Ok(Self::FIRST),
        }
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "run_{:04}", self.0)
    }
}

impl FromStr for RunId {
    type Err = RunIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s
            .strip_prefix("run_")
            .filter(|d| d.len() == 4 && d.bytes().all(|b| b.is_ascii_digit()))
            .ok_or_else(|| RunIdError::Invalid(s.to_string()))?;
        let number = digits
            .parse::<u16>()
            .map_err(|_| RunIdError::Invalid(s.to_string()))?;
        RunId::new(number)
    }
}

impl Serialize for RunId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for RunId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Externally visible status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Running,
    Finished,
    Error,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Finished => "finished",
            RunStatus::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Finished | RunStatus::Error)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a run ended in error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Never started: unresolvable command or directory failure
    Admission,
    /// Non-zero exit or signal, with no retry budget configured
    Runtime,
    /// Non-zero exit after the retry budget was spent, or the run
    /// identifier space ran out
    Exhausted,
    /// Terminated on operator request
    Operator,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FailureKind::Admission => "admission",
            FailureKind::Runtime => "runtime",
            FailureKind::Exhausted => "exhausted",
            FailureKind::Operator => "operator",
        })
    }
}

/// Failure details of an errored run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
    #[serde(default)]
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub signal: Option<i32>,
}

impl Failure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            exit_code: None,
            signal: None,
        }
    }

    pub fn with_exit(self, exit_code: Option<i32>, signal: Option<i32>) -> Self {
        Self {
            exit_code,
            signal,
            ..self
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// State of a run
#[derive(Debug, Clone, PartialEq)]
pub enum RunState {
    Pending { ready_at: Option<Instant> },
    Running { pid: Option<u32> },
    Finished { exit_code: i32 },
    Error { failure: Failure },
}

impl RunState {
    pub fn status(&self) -> RunStatus {
        match self {
            RunState::Pending { .. } => RunStatus::Pending,
            RunState::Running { .. } => RunStatus::Running,
            RunState::Finished { .. } => RunStatus::Finished,
            RunState::Error { .. } => RunStatus::Error,
        }
    }
}

/// Rejected state transition
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition: {action} while {from}")]
pub struct TransitionError {
    pub from: RunStatus,
    pub action: &'static str,
}

/// One execution attempt of a job
#[derive(Debug, Clone, PartialEq)]
pub struct RunRecord {
    /// Attempt number this record represents (0 until first admission)
    pub attempt: u32,
    pub run_id: Option<RunId>,
    pub state: RunState,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub exit_code: Option<i32>,
    /// Persistence problems surfaced upstream (log or metadata writes)
    pub warnings: Vec<String>,
}

impl RunRecord {
    /// A fresh record, immediately admissible
    pub fn pending(attempt: u32, created_at: DateTime<Utc>) -> Self {
        Self {
            attempt,
            run_id: None,
            state: RunState::Pending { ready_at: None },
            created_at,
            started_at: None,
            completed_at: None,
            exit_code: None,
            warnings: Vec::new(),
        }
    }

    /// A record that becomes admissible at `ready_at`
    pub fn delayed(attempt: u32, created_at: DateTime<Utc>, ready_at: Instant) -> Self {
        Self {
            state: RunState::Pending {
                ready_at: Some(ready_at),
            },
            ..Self::pending(attempt, created_at)
        }
    }

    pub fn status(&self) -> RunStatus {
        self.state.status()
    }

    pub fn pid(&self) -> Option<u32> {
        match self.state {
            RunState::Running { pid } => pid,
            _ => None,
        }
    }

    pub fn failure(&self) -> Option<&Failure> {
        match &self.state {
            RunState::Error { failure } => Some(failure),
            _ => None,
        }
    }

    /// Whether a pending record's delay gate has elapsed
    pub fn is_ready(&self, now: Instant) -> bool {
        match self.state {
            RunState::Pending {
                ready_at: Some(at),
            } => at <= now,
            RunState::Pending { ready_at: None } => true,
            _ => false,
        }
    }

    /// Pending → Running
    pub fn start(
        &mut self,
        attempt: u32,
        run_id: RunId,
        pid: Option<u32>,
        at: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        if !matches!(self.state, RunState::Pending { .. }) || attempt <= self.attempt {
            return Err(self.reject("start"));
        }
        self.attempt = attempt;
        self.run_id = Some(run_id);
        self.state = RunState::Running { pid };
        self.started_at = Some(at);
        Ok(())
    }

    /// Running → Finished
    pub fn finish(&mut self, exit_code: i32, at: DateTime<Utc>) -> Result<(), TransitionError> {
        if !matches!(self.state, RunState::Running { .. }) {
            return Err(self.reject("finish"));
        }
        self.state = RunState::Finished { exit_code };
        self.exit_code = Some(exit_code);
        self.completed_at = Some(at);
        Ok(())
    }

    /// Pending or Running → Error
    pub fn fail(&mut self, failure: Failure, at: DateTime<Utc>) -> Result<(), TransitionError> {
        if self.status().is_terminal() {
            return Err(self.reject("fail"));
        }
        self.exit_code = failure.exit_code;
        self.state = RunState::Error { failure };
        self.completed_at = Some(at);
        Ok(())
    }

    /// Error → Pending, on explicit operator request. The attempt counter is kept.
    pub fn reset_for_retry(&mut self) -> Result<(), TransitionError> {
        if !matches!(self.state, RunState::Error { .. }) {
            return Err(self.reject("retry"));
        }
        self.state = RunState::Pending { ready_at: None };
        self.run_id = None;
        self.started_at = None;
        self.completed_at = None;
        self.exit_code = None;
        Ok(())
    }

    /// Record a persistence warning once
    pub fn warn(&mut self, warning: impl Into<String>) {
        let warning = warning.into();
        if !self.warnings.contains(&warning) {
            self.warnings.push(warning);
        }
    }

    fn reject(&self, action: &'static str) -> TransitionError {
        TransitionError {
            from: self.status(),
            action,
        }
    }
}

#[cfg(test)]
#[path = "run_tests.rs"]
mod tests;
