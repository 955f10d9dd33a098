// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error types for on-disk run storage

use em_core::RunIdError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    RunId(#[from] RunIdError),
    #[error("no resumable directory for {name} with label {label} under {}", base.display())]
    ResumeNotFound {
        name: String,
        label: String,
        base: PathBuf,
    },
    #[error("environment variable {0} is not set")]
    MissingEnv(&'static str),
    #[error("malformed metric store {}: {reason}", path.display())]
    MalformedMetrics { path: PathBuf, reason: String },
}
