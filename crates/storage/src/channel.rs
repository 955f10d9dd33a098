// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cross-process state channel
//!
//! The scheduler publishes snapshots and consumes commands; observers read
//! snapshots and enqueue commands. Everything lives under
//! `<base>/.exp_state/`:
//!
//! ```text
//! scheduler_state.json    latest snapshot (atomic replace)
//! commands/               one file per command, consumed then deleted
//! scheduler.lock          held by the running scheduler
//! scheduler.log           scheduler's own log
//! ```

use crate::atomic::{is_tmp_name, write_atomic};
use chrono::Utc;
use em_core::{CommandEnvelope, SchedulerSnapshot};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const STATE_DIR: &str = ".exp_state";
pub const SNAPSHOT_FILE: &str = "scheduler_state.json";
pub const COMMANDS_DIR: &str = "commands";
pub const LOCK_FILE: &str = "scheduler.lock";
pub const LOG_FILE: &str = "scheduler.log";

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("another scheduler already owns {}", path.display())]
    Locked { path: PathBuf },
}

/// Handle on the `.exp_state` directory of one base directory
#[derive(Debug, Clone)]
pub struct StateChannel {
    root: PathBuf,
}

/// Exclusive writer lock, released on drop
#[derive(Debug)]
pub struct WriterLock {
    path: PathBuf,
    _file: File,
}

impl WriterLock {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// A parsed command together with the file it came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboxEntry {
    pub path: PathBuf,
    pub envelope: CommandEnvelope,
}

impl StateChannel {
    /// Open (creating if needed) the channel under `base`
    pub fn open(base: &Path) -> Result<Self, ChannelError> {
        let channel = Self {
            root: base.join(STATE_DIR),
        };
        fs::create_dir_all(channel.commands_dir())?;
        Ok(channel)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.root.join(SNAPSHOT_FILE)
    }

    pub fn commands_dir(&self) -> PathBuf {
        self.root.join(COMMANDS_DIR)
    }

    pub fn lock_path(&self) -> PathBuf {
        self.root.join(LOCK_FILE)
    }

    pub fn log_path(&self) -> PathBuf {
        self.root.join(LOG_FILE)
    }

    /// Take the single-writer lock, failing fast if another process holds it
    pub fn acquire_writer(&self) -> Result<WriterLock, ChannelError> {
        let path = self.lock_path();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        file.try_lock_exclusive()
            .map_err(|_| ChannelError::Locked { path: path.clone() })?;

        file.set_len(0)?;
        writeln!(file, "{}", std::process::id())?;
        Ok(WriterLock { path, _file: file })
    }

    /// Atomically replace the published snapshot
    pub fn publish(&self, snapshot: &SchedulerSnapshot) -> Result<(), ChannelError> {
        let bytes = serde_json::to_vec_pretty(snapshot)?;
        write_atomic(&self.snapshot_path(), &bytes)?;
        Ok(())
    }

    /// The published snapshot, `None` before the first publish
    pub fn load_snapshot(&self) -> Result<Option<SchedulerSnapshot>, ChannelError> {
        match fs::read(self.snapshot_path()) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Write a command into the inbox
    pub fn enqueue(&self, envelope: &CommandEnvelope) -> Result<PathBuf, ChannelError> {
        let name = format!(
            "{:020}-{}.json",
            envelope.created_at.timestamp_micros().max(0),
            envelope.id
        );
        let path = self.commands_dir().join(name);
        let bytes = serde_json::to_vec_pretty(envelope)?;
        write_atomic(&path, &bytes)?;
        Ok(path)
    }

    /// Inbox files in submission order
    fn inbox_files(&self) -> Result<Vec<PathBuf>, ChannelError> {
        let entries = match fs::read_dir(self.commands_dir()) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut paths = Vec::new();
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if is_tmp_name(&name) || !name.ends_with(".json") {
                continue;
            }
            paths.push(entry.path());
        }
        paths.sort();
        Ok(paths)
    }

    /// Parse every queued command. Corrupt or unreadable files are logged,
    /// removed when possible, and skipped.
    ///
    /// Entries stay on disk until [`ack`](Self::ack)ed, so a crash between
    /// drain and ack replays them.
    pub fn drain(&self) -> Result<Vec<InboxEntry>, ChannelError> {
        let mut drained = Vec::new();
        for path in self.inbox_files()? {
            let bytes = match fs::read(&path) {
                Ok(bytes) => bytes,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable command");
                    discard(&path);
                    continue;
                }
            };
            match serde_json::from_slice::<CommandEnvelope>(&bytes) {
                Ok(envelope) => drained.push(InboxEntry { path, envelope }),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "discarding corrupt command");
                    discard(&path);
                }
            }
        }
        Ok(drained)
    }

    /// Delete an applied command
    pub fn ack(&self, entry: &InboxEntry) -> Result<(), ChannelError> {
        remove_if_present(&entry.path)?;
        Ok(())
    }

    /// Commands still waiting in the inbox, without consuming them
    pub fn pending_commands(&self) -> Result<Vec<CommandEnvelope>, ChannelError> {
        let mut commands = Vec::new();
        for path in self.inbox_files()? {
            let Ok(bytes) = fs::read(&path) else {
                continue;
            };
            if let Ok(envelope) = serde_json::from_slice(&bytes) {
                commands.push(envelope);
            }
        }
        Ok(commands)
    }
}

/// Best-effort removal of a command that cannot be applied
fn discard(path: &Path) {
    if let Err(e) = remove_if_present(path) {
        tracing::warn!(path = %path.display(), error = %e, "failed to remove command");
    }
}

fn remove_if_present(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Snapshot reader that falls back to the last good snapshot on corruption
#[derive(Debug)]
pub struct SnapshotReader {
    channel: StateChannel,
    last_good: Option<SchedulerSnapshot>,
}

impl SnapshotReader {
    pub fn new(channel: StateChannel) -> Self {
        Self {
            channel,
            last_good: None,
        }
    }

    pub fn channel(&self) -> &StateChannel {
        &self.channel
    }

    /// Current snapshot; never fails
    pub fn read(&mut self) -> SchedulerSnapshot {
        match self.channel.load_snapshot() {
            Ok(Some(snapshot)) => {
                self.last_good = Some(snapshot.clone());
                snapshot
            }
            Ok(None) => self.fallback(),
            Err(e) => {
                tracing::warn!(
                    path = %self.channel.snapshot_path().display(),
                    error = %e,
                    "unreadable snapshot, using last known good"
                );
                self.fallback()
            }
        }
    }

    fn fallback(&self) -> SchedulerSnapshot {
        self.last_good
            .clone()
            .unwrap_or_else(|| SchedulerSnapshot::empty(Utc::now()))
    }
}

#[cfg(test)]
#[path = "channel_tests.rs"]
mod tests;
