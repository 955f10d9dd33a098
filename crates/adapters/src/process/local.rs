// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Local subprocess adapter

use super::{
    OutputSink, OutputStream, ProcessAdapter, ProcessControl, ProcessError, ProcessExit,
    ProcessHandle, SpawnRequest,
};
use async_trait::async_trait;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::ffi::OsString;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// How long the supervisor waits for output readers after the process exits
const READER_DRAIN: Duration = Duration::from_secs(5);

/// Words the shell handles itself; a command starting with one is not
/// looked up on `PATH`.
const SHELL_WORDS: &[&str] = &[
    "!", ".", ":", "[", "alias", "break", "case", "cd", "command", "continue", "echo", "eval",
    "exec", "exit", "export", "false", "for", "if", "printf", "pwd", "read", "set", "shift",
    "source", "test", "time", "trap", "true", "ulimit", "umask", "unset", "until", "wait",
    "while",
];

/// Runs commands as `sh -c <command>` in their own process group
#[derive(Clone, Debug)]
pub struct LocalProcessAdapter {
    shell: PathBuf,
}

impl Default for LocalProcessAdapter {
    fn default() -> Self {
        Self {
            shell: PathBuf::from("sh"),
        }
    }
}

impl LocalProcessAdapter {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProcessAdapter for LocalProcessAdapter {
    async fn spawn(&self, request: SpawnRequest) -> Result<ProcessHandle, ProcessError> {
        if !request.cwd.is_dir() {
            return Err(ProcessError::WorkingDir(request.cwd.clone()));
        }
        let path_var = request
            .env
            .iter()
            .rev()
            .find(|(k, _)| k == "PATH")
            .map(|(_, v)| OsString::from(v))
            .or_else(|| std::env::var_os("PATH"));
        resolve_program(&request.command, &request.cwd, path_var.as_deref())?;

        let mut child = Command::new(&self.shell)
            .arg("-c")
            .arg(&request.command)
            .current_dir(&request.cwd)
            .envs(request.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .spawn()
            .map_err(|e| spawn_error(&request.command, e))?;

        let pid = child
            .id()
            .ok_or_else(|| ProcessError::SpawnFailed("process exited before reporting a pid".to_string()))?;

        let fault = Arc::new(AtomicBool::new(false));
        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(spawn_reader(stdout, OutputStream::Stdout, request.sink.clone(), fault.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(spawn_reader(stderr, OutputStream::Stderr, request.sink.clone(), fault.clone()));
        }

        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (exit_tx, exit_rx) = watch::channel(None);
        tokio::spawn(supervise(child, pid, control_rx, exit_tx, readers));

        Ok(ProcessHandle::new(pid, control_tx, exit_rx, fault))
    }
}

fn spawn_error(command: &str, e: io::Error) -> ProcessError {
    match e.kind() {
        io::ErrorKind::NotFound => ProcessError::NotFound(command.to_string()),
        io::ErrorKind::PermissionDenied => ProcessError::PermissionDenied(command.to_string()),
        _ => ProcessError::SpawnFailed(e.to_string()),
    }
}

/// Check that the program a command starts with can be executed.
///
/// Leading `KEY=VALUE` assignments are skipped. Shell words and commands
/// starting with grouping syntax are left to the shell.
pub(crate) fn resolve_program(
    command: &str,
    cwd: &Path,
    path_var: Option<&std::ffi::OsStr>,
) -> Result<(), ProcessError> {
    let Some(program) = command.split_whitespace().find(|token| !is_assignment(token)) else {
        return Err(ProcessError::SpawnFailed("empty command".to_string()));
    };
    if SHELL_WORDS.contains(&program)
        || program.starts_with(['(', '{', '$', '`', '"', '\''])
        || program.contains(['=', ';', '|', '&', '<', '>'])
    {
        return Ok(());
    }

    if program.contains('/') {
        let path = cwd.join(program);
        return check_executable(&path, program);
    }

    let found = path_var
        .map(|paths| std::env::split_paths(paths).map(|dir| dir.join(program)).collect::<Vec<_>>())
        .unwrap_or_default()
        .into_iter()
        .find(|candidate| candidate.is_file());
    match found {
        Some(path) => check_executable(&path, program),
        None => Err(ProcessError::NotFound(program.to_string())),
    }
}

fn is_assignment(token: &str) -> bool {
    match token.split_once('=') {
        Some((name, _)) => {
            !name.is_empty()
                && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
                && !name.starts_with(|c: char| c.is_ascii_digit())
        }
        None => false,
    }
}

fn check_executable(path: &Path, program: &str) -> Result<(), ProcessError> {
    let meta = std::fs::metadata(path).map_err(|_| ProcessError::NotFound(program.to_string()))?;
    if !meta.is_file() {
        return Err(ProcessError::NotFound(program.to_string()));
    }
    if meta.permissions().mode() & 0o111 == 0 {
        return Err(ProcessError::PermissionDenied(program.to_string()));
    }
    Ok(())
}

fn spawn_reader<R>(
    reader: R,
    stream: OutputStream,
    sink: Arc<dyn OutputSink>,
    fault: Arc<AtomicBool>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf);
                    if let Err(e) = sink.write_line(stream, line.trim_end_matches(['\r', '\n'])) {
                        if !fault.swap(true, Ordering::SeqCst) {
                            tracing::warn!(%stream, error = %e, "failed to record output line");
                        }
                    }
                }
                Err(e) => {
                    tracing::debug!(%stream, error = %e, "output stream closed");
                    break;
                }
            }
        }
    })
}

async fn supervise(
    mut child: Child,
    pid: u32,
    mut control: mpsc::UnboundedReceiver<ProcessControl>,
    exit_tx: watch::Sender<Option<ProcessExit>>,
    readers: Vec<JoinHandle<()>>,
) {
    let mut terminated = false;
    let status = tokio::select! {
        status = child.wait() => status,
        Some(ProcessControl::Terminate { grace }) = control.recv() => {
            terminated = true;
            signal_group(pid, Signal::SIGTERM);
            match tokio::time::timeout(grace, child.wait()).await {
                Ok(status) => status,
                Err(_) => {
                    tracing::warn!(pid, grace_ms = grace.as_millis() as u64, "grace period elapsed, killing");
                    signal_group(pid, Signal::SIGKILL);
                    child.wait().await
                }
            }
        }
    };

    let drained = tokio::time::timeout(READER_DRAIN, async {
        for reader in readers {
            let _ = reader.await;
        }
    })
    .await;
    if drained.is_err() {
        tracing::debug!(pid, "output still open after exit, detaching readers");
    }

    let exit = match status {
        Ok(status) => ProcessExit {
            code: status.code(),
            signal: status.signal(),
            terminated,
        },
        Err(e) => {
            tracing::error!(pid, error = %e, "failed to wait for process");
            ProcessExit {
                code: None,
                signal: None,
                terminated,
            }
        }
    };
    let _ = exit_tx.send(Some(exit));
}

fn signal_group(pid: u32, signal: Signal) {
    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    if let Err(e) = killpg(Pid::from_raw(raw), signal) {
        tracing::debug!(pid, ?signal, error = %e, "signal not delivered");
    }
}

#[cfg(test)]
#[path = "local_tests.rs"]
mod tests;
