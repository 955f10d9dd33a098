// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fake process adapter for testing
#![cfg_attr(coverage_nightly, coverage(off))]

use super::{
    OutputStream, ProcessAdapter, ProcessControl, ProcessError, ProcessExit, ProcessHandle,
    SpawnRequest,
};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};

/// Recorded adapter call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessCall {
    Spawn {
        name: String,
        command: String,
        cwd: PathBuf,
        env: Vec<(String, String)>,
    },
    Terminate {
        pid: u32,
        grace: Duration,
    },
}

/// Scripted result of one spawn
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FakeOutcome {
    /// Exit immediately with this code
    Exit(i32),
    /// Keep running until completed or terminated
    Hold,
    /// Fail to start
    Fail(ProcessError),
}

struct FakeProcess {
    command: String,
    exit: Arc<watch::Sender<Option<ProcessExit>>>,
}

#[derive(Default)]
struct FakeState {
    next_pid: u32,
    scripts: HashMap<String, VecDeque<FakeOutcome>>,
    output: HashMap<String, Vec<String>>,
    default: Option<FakeOutcome>,
    processes: HashMap<u32, FakeProcess>,
    calls: Vec<ProcessCall>,
}

/// Fake process adapter for testing.
///
/// Outcomes are scripted per command string; unscripted commands use the
/// default outcome, which is `Exit(0)` unless changed.
#[derive(Clone, Default)]
pub struct FakeProcessAdapter {
    state: Arc<Mutex<FakeState>>,
}

impl FakeProcessAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queue outcomes for successive spawns of `command`
    pub fn script(&self, command: &str, outcomes: impl IntoIterator<Item = FakeOutcome>) {
        self.lock()
            .scripts
            .entry(command.to_string())
            .or_default()
            .extend(outcomes);
    }

    /// Outcome for commands without a script
    pub fn set_default(&self, outcome: FakeOutcome) {
        self.lock().default = Some(outcome);
    }

    /// Lines written to the sink on every spawn of `command`
    pub fn set_output(&self, command: &str, lines: Vec<String>) {
        self.lock().output.insert(command.to_string(), lines);
    }

    /// Get all recorded calls
    pub fn calls(&self) -> Vec<ProcessCall> {
        self.lock().calls.clone()
    }

    /// Commands passed to spawn, in order
    pub fn spawned(&self) -> Vec<String> {
        self.lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                ProcessCall::Spawn { command, .. } => Some(command.clone()),
                ProcessCall::Terminate { .. } => None,
            })
            .collect()
    }

    /// Pids of processes that have not exited
    pub fn running(&self) -> Vec<u32> {
        let mut pids: Vec<u32> = self
            .lock()
            .processes
            .iter()
            .filter(|(_, p)| p.exit.borrow().is_none())
            .map(|(pid, _)| *pid)
            .collect();
        pids.sort_unstable();
        pids
    }

    /// Pid of the most recent spawn of `command`
    pub fn pid_of(&self, command: &str) -> Option<u32> {
        self.lock()
            .processes
            .iter()
            .filter(|(_, p)| p.command == command)
            .map(|(pid, _)| *pid)
            .max()
    }

    /// Finish a held process with `code`. False if it already exited.
    pub fn complete(&self, pid: u32, code: i32) -> bool {
        let state = self.lock();
        match state.processes.get(&pid) {
            Some(process) => set_exit(&process.exit, ProcessExit::code(code)),
            None => false,
        }
    }
}

fn set_exit(sender: &watch::Sender<Option<ProcessExit>>, exit: ProcessExit) -> bool {
    sender.send_if_modified(|current| {
        if current.is_some() {
            return false;
        }
        *current = Some(exit);
        true
    })
}

#[async_trait]
impl ProcessAdapter for FakeProcessAdapter {
    async fn spawn(&self, request: SpawnRequest) -> Result<ProcessHandle, ProcessError> {
        let (pid, outcome, output, exit_tx, exit_rx) = {
            let mut state = self.lock();
            state.calls.push(ProcessCall::Spawn {
                name: request.name.clone(),
                command: request.command.clone(),
                cwd: request.cwd.clone(),
                env: request.env.clone(),
            });

            let scripted = state
                .scripts
                .get_mut(&request.command)
                .and_then(|queue| queue.pop_front());
            let outcome = scripted
                .or_else(|| state.default.clone())
                .unwrap_or(FakeOutcome::Exit(0));
            if let FakeOutcome::Fail(e) = &outcome {
                return Err(e.clone());
            }

            state.next_pid += 1;
            let pid = 1000 + state.next_pid;
            let (exit_tx, exit_rx) = watch::channel(None);
            let exit_tx = Arc::new(exit_tx);
            state.processes.insert(
                pid,
                FakeProcess {
                    command: request.command.clone(),
                    exit: exit_tx.clone(),
                },
            );
            let output = state.output.get(&request.command).cloned().unwrap_or_default();
            (pid, outcome, output, exit_tx, exit_rx)
        };

        let fault = Arc::new(AtomicBool::new(false));
        for line in &output {
            if request.sink.write_line(OutputStream::Stdout, line).is_err() {
                fault.store(true, Ordering::SeqCst);
            }
        }

        if let FakeOutcome::Exit(code) = outcome {
            set_exit(&exit_tx, ProcessExit::code(code));
        }

        let (control_tx, mut control_rx) = mpsc::unbounded_channel();
        let state = self.state.clone();
        tokio::spawn(async move {
            while let Some(ProcessControl::Terminate { grace }) = control_rx.recv().await {
                state
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .calls
                    .push(ProcessCall::Terminate { pid, grace });
                set_exit(
                    &exit_tx,
                    ProcessExit {
                        code: None,
                        signal: Some(15),
                        terminated: true,
                    },
                );
            }
        });

        Ok(ProcessHandle::new(pid, control_tx, exit_rx, fault))
    }
}

#[cfg(test)]
#[path = "fake_tests.rs"]
mod tests;
