// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-run terminal logs
//!
//! Writers prefix every captured line with a local capture timestamp and
//! flush per line. Readers can tail a log or follow it with a [`LogFeed`].

use chrono::{DateTime, Local, Utc};
use em_core::RunId;
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// Lines returned by a tail when the caller does not ask for a count
pub const DEFAULT_TAIL_LINES: usize = 200;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Append-only log for a single run
#[derive(Debug)]
pub struct RunLog {
    path: PathBuf,
    file: Mutex<File>,
    fault: AtomicBool,
}

impl RunLog {
    pub fn open(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
            fault: AtomicBool::new(false),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one timestamped line and flush it
    pub fn append(&self, line: &str) -> io::Result<()> {
        let stamp = Local::now().format(TIMESTAMP_FORMAT);
        let mut file = self.file.lock().unwrap_or_else(|e| e.into_inner());
        writeln!(file, "[{}] {}", stamp, line.trim_end_matches(['\r', '\n']))?;
        file.flush()
    }

    /// Append, recording a fault instead of returning the error
    pub fn note(&self, line: &str) {
        if let Err(e) = self.append(line) {
            if !self.fault.swap(true, Ordering::SeqCst) {
                tracing::warn!(path = %self.path.display(), error = %e, "run log write failed");
            }
        }
    }

    /// True once any write to this log has failed
    pub fn faulted(&self) -> bool {
        self.fault.load(Ordering::SeqCst)
    }
}

/// Last `lines` lines of a file
pub fn tail(path: &Path, lines: usize) -> io::Result<Vec<String>> {
    let bytes = fs::read(path)?;
    let text = String::from_utf8_lossy(&bytes);
    let all: Vec<&str> = text.lines().collect();
    let start = all.len().saturating_sub(lines);
    Ok(all[start..].iter().map(|s| s.to_string()).collect())
}

/// The log for `run_id`, or the most recently modified log when that run has
/// none (or no run was asked for)
pub fn resolve_log(logs_dir: &Path, run_id: Option<RunId>) -> io::Result<Option<PathBuf>> {
    if let Some(run_id) = run_id {
        let path = logs_dir.join(format!("{}.log", run_id));
        if path.is_file() {
            return Ok(Some(path));
        }
    }
    Ok(list_logs(logs_dir)?
        .into_iter()
        .max_by(|a, b| a.updated_at.cmp(&b.updated_at).then_with(|| a.name.cmp(&b.name)))
        .map(|info| logs_dir.join(info.name)))
}

/// One `*.log` file in a run directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogFileInfo {
    pub name: String,
    pub run_id: Option<RunId>,
    pub size: u64,
    pub updated_at: DateTime<Utc>,
}

/// Log files in `logs_dir`, sorted by name. A missing directory is empty.
pub fn list_logs(logs_dir: &Path) -> io::Result<Vec<LogFileInfo>> {
    let entries = match fs::read_dir(logs_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut logs = Vec::new();
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("log") {
            continue;
        }
        let meta = entry.metadata()?;
        if !meta.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        let run_id = path
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(|s| s.parse().ok());
        let updated_at = meta.modified().map(DateTime::<Utc>::from)?;
        logs.push(LogFileInfo {
            name,
            run_id,
            size: meta.len(),
            updated_at,
        });
    }
    logs.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(logs)
}

/// Incremental reader over a run's logs.
///
/// Each [`poll`](LogFeed::poll) returns the complete lines written since the
/// previous one. A file that shrinks is read again from the start.
#[derive(Debug)]
pub struct LogFeed {
    logs_dir: PathBuf,
    run_id: Option<RunId>,
    current: Option<PathBuf>,
    position: u64,
    partial: String,
}

impl LogFeed {
    pub fn new(logs_dir: impl Into<PathBuf>, run_id: Option<RunId>) -> Self {
        Self {
            logs_dir: logs_dir.into(),
            run_id,
            current: None,
            position: 0,
            partial: String::new(),
        }
    }

    pub fn current(&self) -> Option<&Path> {
        self.current.as_deref()
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    /// Run being read: the requested one, else the run of the resolved file
    pub fn run_id(&self) -> Option<RunId> {
        self.run_id.or_else(|| {
            self.current
                .as_deref()
                .and_then(|path| path.file_stem())
                .and_then(|stem| stem.to_str())
                .and_then(|stem| stem.parse().ok())
        })
    }

    /// Switch to another run's log, starting from its beginning
    pub fn follow(&mut self, run_id: Option<RunId>) {
        self.run_id = run_id;
        self.current = None;
        self.position = 0;
        self.partial.clear();
    }

    pub fn poll(&mut self) -> io::Result<Vec<String>> {
        if self.current.is_none() {
            self.current = resolve_log(&self.logs_dir, self.run_id)?;
        }
        let Some(path) = self.current.as_ref() else {
            return Ok(Vec::new());
        };

        let mut file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let len = file.metadata()?.len();
        if len < self.position {
            self.position = 0;
            self.partial.clear();
        }
        file.seek(SeekFrom::Start(self.position))?;
        let mut buf = Vec::new();
        let read = file.read_to_end(&mut buf)?;
        self.position += read as u64;

        self.partial.push_str(&String::from_utf8_lossy(&buf));
        let mut lines = Vec::new();
        while let Some(idx) = self.partial.find('\n') {
            let line: String = self.partial.drain(..=idx).collect();
            lines.push(line.trim_end_matches(['\r', '\n']).to_string());
        }
        Ok(lines)
    }
}

#[cfg(test)]
#[path = "log_tests.rs"]
mod tests;
