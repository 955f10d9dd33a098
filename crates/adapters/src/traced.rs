// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Traced adapter wrapper for consistent observability

use crate::process::{ProcessAdapter, ProcessError, ProcessHandle, SpawnRequest};
use async_trait::async_trait;
use tracing::Instrument;

/// Wrapper that adds tracing to any ProcessAdapter
#[derive(Clone, Debug)]
pub struct TracedProcessAdapter<P> {
    inner: P,
}

impl<P> TracedProcessAdapter<P> {
    pub fn new(inner: P) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }
}

#[async_trait]
impl<P: ProcessAdapter> ProcessAdapter for TracedProcessAdapter<P> {
    async fn spawn(&self, request: SpawnRequest) -> Result<ProcessHandle, ProcessError> {
        let span = tracing::info_span!("process.spawn", name = %request.name, cwd = %request.cwd.display());
        async move {
            tracing::info!(command = %request.command, env_count = request.env.len(), "starting");

            // Precondition: cwd must exist
            if !request.cwd.is_dir() {
                tracing::error!("working directory does not exist");
                return Err(ProcessError::WorkingDir(request.cwd.clone()));
            }

            let start = std::time::Instant::now();
            let result = self.inner.spawn(request).await;
            let elapsed_ms = start.elapsed().as_millis() as u64;

            match &result {
                Ok(handle) => tracing::info!(pid = handle.pid(), elapsed_ms, "process started"),
                Err(e) => tracing::error!(elapsed_ms, error = %e, "spawn failed"),
            }
            result
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
#[path = "traced_tests.rs"]
mod tests;
