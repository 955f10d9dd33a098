// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error types for the scheduling engine

use em_adapters::ProcessError;
use em_core::{FailureKind, RunIdError, TransitionError};
use em_storage::{ChannelError, StorageError};
use thiserror::Error;

/// Reasons a job could not be started. The job goes straight to errors.
#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Process(#[from] ProcessError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Transition(#[from] TransitionError),
}

impl AdmissionError {
    /// Exhausting the run identifier space is a resource failure; everything
    /// else is an admission failure
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            AdmissionError::Storage(StorageError::RunId(RunIdError::Exhausted)) => {
                FailureKind::Exhausted
            }
            _ => FailureKind::Admission,
        }
    }
}

/// Errors that stop the scheduler itself
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error("invalid scheduler configuration: {0}")]
    InvalidConfig(String),
}
