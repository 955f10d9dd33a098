// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::process::{FakeOutcome, FakeProcessAdapter, OutputSink, OutputStream};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing_subscriber::fmt::MakeWriter;

/// A writer that captures log output for testing
#[derive(Clone, Default)]
struct CapturedLogs {
    logs: Arc<Mutex<Vec<u8>>>,
}

impl CapturedLogs {
    fn contents(&self) -> String {
        let logs = self.logs.lock().unwrap();
        String::from_utf8_lossy(&logs).to_string()
    }
}

impl std::io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.logs.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for CapturedLogs {
    type Writer = CapturedLogs;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Run a test with captured tracing output
fn with_tracing<F, Fut>(f: F) -> (String, Fut::Output)
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future,
{
    let logs = CapturedLogs::default();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_writer(logs.clone())
        .with_ansi(false)
        .without_time()
        .finish();

    let result = tracing::subscriber::with_default(subscriber, || {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
            .block_on(f())
    });

    (logs.contents(), result)
}

struct NullSink;

impl OutputSink for NullSink {
    fn write_line(&self, _stream: OutputStream, _line: &str) -> std::io::Result<()> {
        Ok(())
    }
}

fn request(name: &str, cwd: &Path, command: &str) -> SpawnRequest {
    SpawnRequest {
        name: name.to_string(),
        command: command.to_string(),
        cwd: cwd.to_path_buf(),
        env: Vec::new(),
        sink: Arc::new(NullSink),
    }
}

#[tokio::test]
async fn traced_spawn_rejects_nonexistent_cwd() {
    let fake = FakeProcessAdapter::new();
    let traced = TracedProcessAdapter::new(fake.clone());

    let err = traced
        .spawn(request("test", &PathBuf::from("/nonexistent/path"), "true"))
        .await
        .unwrap_err();

    assert!(
        err.to_string().contains("working directory does not exist"),
        "Expected error about working directory, got: {}",
        err
    );
    assert!(fake.calls().is_empty());
}

#[test]
fn traced_spawn_logs_entry_and_completion() {
    let (logs, result) = with_tracing(|| async {
        let traced = TracedProcessAdapter::new(FakeProcessAdapter::new());
        traced
            .spawn(request("train-model", Path::new("/tmp"), "python train.py"))
            .await
    });

    assert!(result.is_ok(), "spawn should succeed: {:?}", result.err());
    assert!(logs.contains("process.spawn"), "Should log span name. Logs:\n{}", logs);
    assert!(logs.contains("train-model"), "Should log job name. Logs:\n{}", logs);
    assert!(logs.contains("starting"), "Should log entry message. Logs:\n{}", logs);
    assert!(logs.contains("process started"), "Should log completion. Logs:\n{}", logs);
    assert!(logs.contains("elapsed_ms"), "Should log timing. Logs:\n{}", logs);
}

#[test]
fn traced_spawn_logs_failure() {
    let (logs, result) = with_tracing(|| async {
        let fake = FakeProcessAdapter::new();
        fake.set_default(FakeOutcome::Fail(ProcessError::NotFound("nope".to_string())));
        TracedProcessAdapter::new(fake)
            .spawn(request("test", Path::new("/tmp"), "nope"))
            .await
    });

    assert!(result.is_err());
    assert!(logs.contains("spawn failed"), "Should log failure. Logs:\n{}", logs);
    assert!(logs.contains("command not found"), "Should log error. Logs:\n{}", logs);
}
