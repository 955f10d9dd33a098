// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Filesystem layout of one job directory
//!
//! ```text
//! <base>/<name>_<YYYY-mm-dd__HH-MM-SS>/
//!     metadata.json
//!     terminal_logs/run_0001.log
//!     metrics/run_0001.csv
//! ```

use crate::atomic::write_json_atomic;
use crate::StorageError;
use chrono::{DateTime, Local, Utc};
use em_core::{Metadata, RunId};
use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

pub const LOGS_DIR: &str = "terminal_logs";
pub const METRICS_DIR: &str = "metrics";
pub const METADATA_FILE: &str = "metadata.json";

/// Directory label format, in local time
pub const LABEL_FORMAT: &str = "%Y-%m-%d__%H-%M-%S";

/// Suffixes tried when two jobs with the same name start in the same second
const MAX_LABEL_SUFFIX: u32 = 1000;

/// A job's directory on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunDirectory {
    root: PathBuf,
}

impl RunDirectory {
    /// Wrap an existing directory without touching the filesystem
    pub fn open(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create a fresh `<name>_<label>` directory under `base`.
    ///
    /// A numeric suffix is appended when the label is already taken.
    pub fn create(base: &Path, name: &str, started: DateTime<Utc>) -> Result<Self, StorageError> {
        fs::create_dir_all(base)?;
        let label = started.with_timezone(&Local).format(LABEL_FORMAT).to_string();
        let stem = format!("{}_{}", name, label);

        let mut candidate = base.join(&stem);
        let mut suffix = 0;
        loop {
            match fs::create_dir(&candidate) {
                Ok(()) => break,
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists && suffix < MAX_LABEL_SUFFIX => {
                    suffix += 1;
                    candidate = base.join(format!("{}_{}", stem, suffix));
                }
                Err(e) => return Err(e.into()),
            }
        }

        let dir = Self { root: candidate };
        dir.ensure_layout()?;
        Ok(dir)
    }

    /// Open `<base>/<name>_<label>` for a resumed job; it must already exist
    pub fn resume(base: &Path, name: &str, label: &str) -> Result<Self, StorageError> {
        let root = base.join(format!("{}_{}", name, label));
        if !root.is_dir() {
            return Err(StorageError::ResumeNotFound {
                name: name.to_string(),
                label: label.to_string(),
                base: base.to_path_buf(),
            });
        }
        let dir = Self { root };
        dir.ensure_layout()?;
        Ok(dir)
    }

    pub fn ensure_layout(&self) -> io::Result<()> {
        fs::create_dir_all(self.logs_dir())?;
        fs::create_dir_all(self.metrics_dir())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn exists(&self) -> bool {
        self.root.is_dir()
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join(LOGS_DIR)
    }

    pub fn metrics_dir(&self) -> PathBuf {
        self.root.join(METRICS_DIR)
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.root.join(METADATA_FILE)
    }

    pub fn log_path(&self, run_id: RunId) -> PathBuf {
        self.logs_dir().join(format!("{}.log", run_id))
    }

    pub fn metric_path(&self, store: &str) -> PathBuf {
        self.metrics_dir().join(format!("{}.csv", store))
    }

    /// Run ids already present as log or metric artifacts
    pub fn existing_run_ids(&self) -> io::Result<Vec<RunId>> {
        let mut ids = Vec::new();
        for dir in [self.logs_dir(), self.metrics_dir()] {
            let entries = match fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e),
            };
            for entry in entries {
                let path = entry?.path();
                if let Some(id) = path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .and_then(|s| s.parse::<RunId>().ok())
                {
                    ids.push(id);
                }
            }
        }
        ids.sort();
        ids.dedup();
        Ok(ids)
    }

    /// Claim the next free run id by exclusively creating its log file.
    ///
    /// Never reuses an id already present on disk. Exceeding `run_9999` is
    /// an error.
    pub fn reserve_run(&self) -> Result<RunId, StorageError> {
        fs::create_dir_all(self.logs_dir())?;
        let existing = self.existing_run_ids()?;
        let mut candidate = RunId::next_after(&existing)?;
        loop {
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(self.log_path(candidate))
            {
                Ok(_) => return Ok(candidate),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    candidate = candidate.next()?;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Load `metadata.json`, `None` when absent
    pub fn load_metadata(&self) -> Result<Option<Metadata>, StorageError> {
        match fs::read_to_string(self.metadata_path()) {
            Ok(text) => Ok(Some(serde_json::from_str(&text)?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn save_metadata(&self, metadata: &Metadata) -> Result<(), StorageError> {
        write_json_atomic(&self.metadata_path(), metadata)
    }
}

#[cfg(test)]
#[path = "run_dir_tests.rs"]
mod tests;
