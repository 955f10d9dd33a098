// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Subprocess supervision
//!
//! An adapter starts a shell command and hands back a [`ProcessHandle`].
//! Output lines go to the request's [`OutputSink`] as they arrive; the exit
//! is published on a watch channel; termination is requested through a
//! control channel owned by the supervisor.

mod local;

pub use local::LocalProcessAdapter;

// Test support - only compiled for tests or when explicitly requested
#[cfg(any(test, feature = "test-support"))]
mod fake;
#[cfg(any(test, feature = "test-support"))]
pub use fake::{FakeOutcome, FakeProcessAdapter, ProcessCall};

use async_trait::async_trait;
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};

/// Errors from starting a process
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProcessError {
    #[error("command not found: {0}")]
    NotFound(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("working directory does not exist: {}", .0.display())]
    WorkingDir(PathBuf),
    #[error("spawn failed: {0}")]
    SpawnFailed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

impl fmt::Display for OutputStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OutputStream::Stdout => "stdout",
            OutputStream::Stderr => "stderr",
        })
    }
}

/// Destination for captured output lines
pub trait OutputSink: Send + Sync + 'static {
    fn write_line(&self, stream: OutputStream, line: &str) -> io::Result<()>;
}

/// What to start
#[derive(Clone)]
pub struct SpawnRequest {
    pub name: String,
    pub command: String,
    pub cwd: PathBuf,
    pub env: Vec<(String, String)>,
    pub sink: Arc<dyn OutputSink>,
}

impl fmt::Debug for SpawnRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpawnRequest")
            .field("name", &self.name)
            .field("command", &self.command)
            .field("cwd", &self.cwd)
            .field("env", &self.env.len())
            .finish()
    }
}

/// How a process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessExit {
    pub code: Option<i32>,
    pub signal: Option<i32>,
    /// Set when the exit followed a terminate request
    pub terminated: bool,
}

impl ProcessExit {
    pub fn code(code: i32) -> Self {
        Self {
            code: Some(code),
            signal: None,
            terminated: false,
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl fmt::Display for ProcessExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {}", code),
            (None, Some(signal)) => write!(f, "killed by signal {}", signal),
            (None, None) => f.write_str("exit status unknown"),
        }
    }
}

/// Requests delivered to a process supervisor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessControl {
    /// SIGTERM the process group, SIGKILL after `grace`
    Terminate { grace: Duration },
}

/// Live view of a started process
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    pid: u32,
    control: mpsc::UnboundedSender<ProcessControl>,
    exit: watch::Receiver<Option<ProcessExit>>,
    output_fault: Arc<AtomicBool>,
}

impl ProcessHandle {
    pub fn new(
        pid: u32,
        control: mpsc::UnboundedSender<ProcessControl>,
        exit: watch::Receiver<Option<ProcessExit>>,
        output_fault: Arc<AtomicBool>,
    ) -> Self {
        Self {
            pid,
            control,
            exit,
            output_fault,
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// The exit, if the process has ended. Never blocks.
    pub fn try_exit(&self) -> Option<ProcessExit> {
        *self.exit.borrow()
    }

    /// Wait for the process to end
    pub async fn wait(&mut self) -> ProcessExit {
        loop {
            if let Some(exit) = *self.exit.borrow_and_update() {
                return exit;
            }
            if self.exit.changed().await.is_err() {
                return (*self.exit.borrow()).unwrap_or(ProcessExit {
                    code: None,
                    signal: None,
                    terminated: false,
                });
            }
        }
    }

    /// Ask the supervisor to terminate the process. False if it is gone.
    pub fn terminate(&self, grace: Duration) -> bool {
        self.control.send(ProcessControl::Terminate { grace }).is_ok()
    }

    /// True once any captured line failed to reach the sink
    pub fn output_failed(&self) -> bool {
        self.output_fault.load(Ordering::SeqCst)
    }
}

/// Adapter for running shell commands
#[async_trait]
pub trait ProcessAdapter: Clone + Send + Sync + 'static {
    /// Start `request.command` under a shell in `request.cwd`
    async fn spawn(&self, request: SpawnRequest) -> Result<ProcessHandle, ProcessError>;
}
