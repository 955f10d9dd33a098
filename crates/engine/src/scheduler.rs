// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scheduling engine
//!
//! Jobs move between four queues owned by a single control loop:
//!
//! ```text
//! pending ──admit──► running ──harvest──► finished
//!    ▲                  │
//!    └──retry (auto)────┴──────────────► errors ──retry_error──► pending
//! ```
//!
//! Each [`cycle`](Scheduler::cycle) harvests exited runs, admits ready jobs
//! up to the concurrency limit, applies queued commands, and publishes a
//! snapshot.

use crate::lifecycle::{open_directory, LifecycleManager};
use crate::{AdmissionError, EngineError};
use em_adapters::{ProcessAdapter, ProcessExit};
use em_core::{
    Action, ActionError, Clock, CommandEnvelope, Counts, ExecutionSummary, Failure, FailureKind,
    FailureLine, IdGen, JobId, JobSpec, RunRecord, SchedulerSnapshot, TaskSummary,
};
use em_storage::{RunDirectory, StateChannel, WriterLock};
use std::cmp::Reverse;
use std::future::Future;
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// Extra time allowed past the grace period when waiting for a terminated run
const TERMINATE_SLACK: Duration = Duration::from_secs(1);

/// Scheduler settings
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerConfig {
    /// Default parent of job directories; also holds `.exp_state`
    pub base_dir: PathBuf,
    /// Working directory for jobs that do not set one
    pub default_cwd: PathBuf,
    pub max_concurrent: usize,
    pub check_interval: Duration,
    /// Keep cycling after every job is terminal
    pub linger: bool,
    pub terminate_grace: Duration,
    /// Requeue failed runs within each job's `max_retries`
    pub auto_restart: bool,
}

impl SchedulerConfig {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        let base_dir = base_dir.into();
        Self {
            default_cwd: base_dir.clone(),
            base_dir,
            max_concurrent: 1,
            check_interval: Duration::from_secs(10),
            linger: false,
            terminate_grace: Duration::from_secs(10),
            auto_restart: true,
        }
    }

    pub fn with_max_concurrent(self, max_concurrent: usize) -> Self {
        Self {
            max_concurrent,
            ..self
        }
    }

    pub fn with_check_interval(self, check_interval: Duration) -> Self {
        Self {
            check_interval,
            ..self
        }
    }

    pub fn with_linger(self, linger: bool) -> Self {
        Self { linger, ..self }
    }

    pub fn with_terminate_grace(self, terminate_grace: Duration) -> Self {
        Self {
            terminate_grace,
            ..self
        }
    }

    pub fn with_auto_restart(self, auto_restart: bool) -> Self {
        Self {
            auto_restart,
            ..self
        }
    }

    pub fn with_default_cwd(self, default_cwd: impl Into<PathBuf>) -> Self {
        Self {
            default_cwd: default_cwd.into(),
            ..self
        }
    }
}

/// A job in admission order, for dry runs
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedJob {
    pub id: JobId,
    pub spec: JobSpec,
}

struct Job {
    id: JobId,
    /// Submission index, the priority tie-breaker
    seq: usize,
    spec: JobSpec,
    record: RunRecord,
    /// Earlier attempts, oldest first
    history: Vec<RunRecord>,
    dir: Option<RunDirectory>,
    manager: Option<LifecycleManager>,
}

impl Job {
    fn order_key(&self) -> (Reverse<i32>, usize) {
        (Reverse(self.spec.priority), self.seq)
    }

    fn summary(&self) -> TaskSummary {
        let mut warnings = self.record.warnings.clone();
        if let Some(manager) = &self.manager {
            for warning in manager.warnings() {
                if !warnings.contains(&warning) {
                    warnings.push(warning);
                }
            }
        }
        TaskSummary {
            id: self.id.clone(),
            name: self.spec.name.clone(),
            status: self.record.status(),
            attempt: self.record.attempt,
            created_at: self.record.created_at,
            started_at: self.record.started_at,
            completed_at: self.record.completed_at,
            run_id: self.record.run_id,
            priority: self.spec.priority,
            command: self.spec.command.clone(),
            description: self.spec.description.clone(),
            work_dir: self.dir.as_ref().map(|d| d.root().to_path_buf()),
            pid: self.record.pid(),
            exit_code: self.record.exit_code,
            error: self.record.failure().cloned(),
            warnings,
        }
    }
}

/// Why a run left the running queue
enum Harvest {
    Exited(ProcessExit),
    Operator(ProcessExit, &'static str),
}

/// The scheduling engine
pub struct Scheduler<P, C: Clock, I: IdGen> {
    adapter: P,
    clock: C,
    id_gen: I,
    config: SchedulerConfig,
    channel: StateChannel,
    _lock: WriterLock,
    started: Instant,
    next_seq: usize,
    pending: Vec<Job>,
    running: Vec<Job>,
    finished: Vec<Job>,
    errors: Vec<Job>,
}

impl<P, C, I> Scheduler<P, C, I>
where
    P: ProcessAdapter,
    C: Clock,
    I: IdGen,
{
    /// Create a scheduler over `specs`, taking the writer lock on the base
    /// directory's state channel. Repeats are expanded here.
    pub fn new(
        adapter: P,
        clock: C,
        id_gen: I,
        config: SchedulerConfig,
        specs: Vec<JobSpec>,
    ) -> Result<Self, EngineError> {
        if config.max_concurrent == 0 {
            return Err(EngineError::InvalidConfig(
                "max_concurrent must be at least 1".to_string(),
            ));
        }
        let channel = StateChannel::open(&config.base_dir)?;
        let lock = channel.acquire_writer()?;
        let started = clock.now();

        let mut scheduler = Self {
            adapter,
            clock,
            id_gen,
            config,
            channel,
            _lock: lock,
            started,
            next_seq: 0,
            pending: Vec::new(),
            running: Vec::new(),
            finished: Vec::new(),
            errors: Vec::new(),
        };
        for spec in specs {
            scheduler.submit(spec);
        }
        tracing::info!(
            jobs = scheduler.pending.len(),
            max_concurrent = scheduler.config.max_concurrent,
            base_dir = %scheduler.config.base_dir.display(),
            "scheduler created"
        );
        Ok(scheduler)
    }

    /// Enqueue a job description, expanding repeats. Returns the new ids.
    pub fn submit(&mut self, spec: JobSpec) -> Vec<JobId> {
        let mut ids = Vec::new();
        for spec in spec.expand() {
            let job = Job {
                id: self.id_gen.next(),
                seq: self.next_seq,
                record: RunRecord::pending(0, self.clock.wall()),
                spec,
                history: Vec::new(),
                dir: None,
                manager: None,
            };
            self.next_seq += 1;
            ids.push(job.id.clone());
            self.enqueue(job);
        }
        ids
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn channel(&self) -> &StateChannel {
        &self.channel
    }

    /// Admission order of everything pending, without starting anything
    pub fn plan(&self) -> Vec<PlannedJob> {
        self.pending
            .iter()
            .map(|job| PlannedJob {
                id: job.id.clone(),
                spec: job.spec.clone(),
            })
            .collect()
    }

    /// True when nothing is pending or running
    pub fn is_done(&self) -> bool {
        self.pending.is_empty() && self.running.is_empty()
    }

    /// Attempts a job made before its current record
    pub fn history(&self, id: &JobId) -> Option<&[RunRecord]> {
        self.queues()
            .find(|job| &job.id == id)
            .map(|job| job.history.as_slice())
    }

    fn queues(&self) -> impl Iterator<Item = &Job> {
        self.pending
            .iter()
            .chain(&self.running)
            .chain(&self.finished)
            .chain(&self.errors)
    }

    /// Insert into pending, keeping priority-then-submission order
    fn enqueue(&mut self, job: Job) {
        let key = job.order_key();
        let index = self.pending.partition_point(|other| other.order_key() <= key);
        self.pending.insert(index, job);
    }

    /// Run one scheduling cycle
    pub async fn cycle(&mut self) {
        self.harvest();
        self.admit().await;
        self.apply_commands().await;
        self.publish(None);
    }

    /// Cycle until every job is terminal (unless lingering) or `shutdown`
    /// resolves, then publish the final summary
    pub async fn run_until<F>(&mut self, shutdown: F) -> ExecutionSummary
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        loop {
            self.cycle().await;
            if self.is_done() && !self.config.linger {
                break;
            }
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("shutdown requested");
                    self.shutdown().await;
                    break;
                }
                _ = tokio::time::sleep(self.config.check_interval) => {}
            }
        }

        let summary = self.summary();
        self.publish(Some(summary.clone()));
        tracing::info!(
            finished = summary.counts.finished,
            errors = summary.counts.errors,
            elapsed_secs = summary.elapsed_secs,
            "scheduling complete"
        );
        summary
    }

    /// Terminate every running job and publish the result
    pub async fn shutdown(&mut self) {
        let grace = self.config.terminate_grace;
        for job in &self.running {
            if let Some(manager) = &job.manager {
                manager.terminate(grace);
            }
        }
        let running = std::mem::take(&mut self.running);
        for mut job in running {
            let exit = self.await_exit(&mut job).await;
            self.complete(job, Harvest::Operator(exit, "scheduler shutdown"));
        }
        self.publish(None);
    }

    /// Move exited runs out of the running queue
    fn harvest(&mut self) {
        let running = std::mem::take(&mut self.running);
        for job in running {
            match job.manager.as_ref().and_then(|m| m.try_exit()) {
                Some(exit) => self.complete(job, Harvest::Exited(exit)),
                None => self.running.push(job),
            }
        }
    }

    fn complete(&mut self, mut job: Job, harvest: Harvest) {
        let wall = self.clock.wall();
        let mut manager = job.manager.take();
        if let Some(manager) = &manager {
            for warning in manager.warnings() {
                job.record.warn(warning);
            }
        }

        let attempt = job.record.attempt;
        let auto_restart = self.config.auto_restart;
        let (exit, failure) = match harvest {
            Harvest::Exited(exit) if exit.success() => (exit, None),
            Harvest::Exited(exit) => {
                let kind = if !auto_restart
                    || job.spec.retry_allowed(attempt)
                    || job.spec.max_retries == 0
                {
                    FailureKind::Runtime
                } else {
                    FailureKind::Exhausted
                };
                (exit, Some(Failure::new(kind, format!("process {}", exit))))
            }
            Harvest::Operator(exit, reason) => {
                (exit, Some(Failure::new(FailureKind::Operator, reason)))
            }
        };

        let transition = match &failure {
            None => job.record.finish(exit.code.unwrap_or_default(), wall),
            Some(failure) => job
                .record
                .fail(failure.clone().with_exit(exit.code, exit.signal), wall),
        };
        if let Err(e) = transition {
            tracing::error!(job_id = %job.id, error = %e, "unexpected run transition");
        }
        if let Some(manager) = manager.as_mut() {
            manager.finalize(&job.record, &exit);
        }

        let Some(failure) = failure else {
            tracing::info!(job_id = %job.id, name = %job.spec.name, attempt, "run finished");
            self.finished.push(job);
            return;
        };

        let retry = auto_restart
            && failure.kind == FailureKind::Runtime
            && job.spec.retry_allowed(attempt);
        tracing::warn!(
            job_id = %job.id,
            name = %job.spec.name,
            attempt,
            reason = %failure,
            retry,
            "run failed"
        );
        if !retry {
            self.errors.push(job);
            return;
        }

        // Gate runs from harvest, at most one check interval after the exit
        let next = if job.spec.delay.is_zero() {
            RunRecord::pending(attempt, wall)
        } else {
            RunRecord::delayed(attempt, wall, self.clock.now() + job.spec.delay)
        };
        let failed = std::mem::replace(&mut job.record, next);
        job.history.push(failed);
        self.enqueue(job);
    }

    /// Start ready pending jobs while there is capacity
    async fn admit(&mut self) {
        while self.running.len() < self.config.max_concurrent {
            let now = self.clock.now();
            let Some(index) = self.pending.iter().position(|job| job.record.is_ready(now)) else {
                break;
            };
            let mut job = self.pending.remove(index);
            match self.launch(&mut job).await {
                Ok(()) => self.running.push(job),
                Err(e) => {
                    tracing::error!(job_id = %job.id, name = %job.spec.name, error = %e, "admission failed");
                    let failure = Failure::new(e.failure_kind(), e.to_string());
                    if let Err(e) = job.record.fail(failure, self.clock.wall()) {
                        tracing::error!(job_id = %job.id, error = %e, "unexpected run transition");
                    }
                    self.errors.push(job);
                }
            }
        }
    }

    async fn launch(&mut self, job: &mut Job) -> Result<(), AdmissionError> {
        let wall = self.clock.wall();
        let dir = match &job.dir {
            Some(dir) => dir.clone(),
            None => {
                let dir = open_directory(&job.spec, &self.config.base_dir, wall)?;
                job.dir = Some(dir.clone());
                dir
            }
        };

        let attempt = job.record.attempt + 1;
        let manager = LifecycleManager::start(
            &self.adapter,
            &job.id,
            &job.spec,
            dir,
            attempt,
            wall,
            &self.config.default_cwd,
        )
        .await?;
        job.record
            .start(attempt, manager.run_id(), Some(manager.pid()), wall)?;
        job.manager = Some(manager);
        Ok(())
    }

    async fn apply_commands(&mut self) {
        let entries = match self.channel.drain() {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(error = %e, "failed to read command inbox");
                return;
            }
        };
        for entry in entries {
            let envelope = &entry.envelope;
            match self.apply(envelope).await {
                Ok(true) => tracing::info!(id = %envelope.id, action = %envelope.action, target = %envelope.target, "command applied"),
                Ok(false) => tracing::info!(id = %envelope.id, action = %envelope.action, target = %envelope.target, "command target not found"),
                Err(e) => tracing::warn!(id = %envelope.id, action = %envelope.action, target = %envelope.target, error = %e, "command rejected"),
            }
            if let Err(e) = self.channel.ack(&entry) {
                tracing::warn!(path = %entry.path.display(), error = %e, "failed to remove command");
            }
        }
    }

    /// Apply one command. `Ok(false)` means the target was not in the
    /// addressed queue.
    pub async fn apply(&mut self, envelope: &CommandEnvelope) -> Result<bool, ActionError> {
        let action = envelope.action()?;
        let target = &envelope.target;
        let applied = match action {
            Action::RetryError => match take(&mut self.errors, target) {
                Some(mut job) => {
                    let failed = job.record.clone();
                    match job.record.reset_for_retry() {
                        Ok(()) => {
                            job.history.push(failed);
                            self.enqueue(job);
                        }
                        Err(e) => {
                            tracing::error!(job_id = %job.id, error = %e, "unexpected run transition");
                            self.errors.push(job);
                        }
                    }
                    true
                }
                None => false,
            },
            Action::RemovePending => take(&mut self.pending, target).is_some(),
            Action::RemoveFinished => take(&mut self.finished, target).is_some(),
            Action::RemoveError => take(&mut self.errors, target).is_some(),
            Action::TerminateRunning => match take(&mut self.running, target) {
                Some(mut job) => {
                    if let Some(manager) = &job.manager {
                        manager.terminate(self.config.terminate_grace);
                    }
                    let exit = self.await_exit(&mut job).await;
                    self.complete(job, Harvest::Operator(exit, "terminated by operator"));
                    true
                }
                None => false,
            },
        };
        Ok(applied)
    }

    async fn await_exit(&self, job: &mut Job) -> ProcessExit {
        let unknown = ProcessExit {
            code: None,
            signal: None,
            terminated: true,
        };
        let Some(manager) = job.manager.as_mut() else {
            return unknown;
        };
        let limit = self.config.terminate_grace + TERMINATE_SLACK;
        match tokio::time::timeout(limit, manager.wait()).await {
            Ok(exit) => exit,
            Err(_) => {
                tracing::warn!(job_id = %job.id, pid = manager.pid(), "run did not exit after termination");
                unknown
            }
        }
    }

    /// Current state of every queue
    pub fn snapshot(&self) -> SchedulerSnapshot {
        let summarize = |jobs: &[Job]| jobs.iter().map(Job::summary).collect::<Vec<_>>();
        SchedulerSnapshot::new(
            self.clock.wall(),
            summarize(&self.pending),
            summarize(&self.running),
            summarize(&self.finished),
            summarize(&self.errors),
        )
    }

    fn publish(&self, summary: Option<ExecutionSummary>) {
        let mut snapshot = self.snapshot();
        if let Some(summary) = summary {
            snapshot = snapshot.with_summary(summary);
        }
        if let Err(e) = self.channel.publish(&snapshot) {
            tracing::warn!(error = %e, "failed to publish snapshot");
        }
    }

    /// Counts, retry outcomes and failures so far
    pub fn summary(&self) -> ExecutionSummary {
        let first_try = self
            .finished
            .iter()
            .filter(|job| job.record.attempt <= 1)
            .count();
        let failures = self
            .errors
            .iter()
            .map(|job| FailureLine {
                name: job.spec.name.clone(),
                attempt: job.record.attempt,
                exit_code: job.record.exit_code,
                reason: job
                    .record
                    .failure()
                    .map(|f| f.to_string())
                    .unwrap_or_default(),
            })
            .collect();
        ExecutionSummary {
            counts: Counts {
                total: self.pending.len() + self.running.len() + self.finished.len() + self.errors.len(),
                pending: self.pending.len(),
                running: self.running.len(),
                finished: self.finished.len(),
                errors: self.errors.len(),
            },
            first_try,
            after_retry: self.finished.len() - first_try,
            elapsed_secs: self.clock.now().saturating_duration_since(self.started).as_secs_f64(),
            failures,
        }
    }
}

fn take(queue: &mut Vec<Job>, id: &JobId) -> Option<Job> {
    let index = queue.iter().position(|job| &job.id == id)?;
    Some(queue.remove(index))
}

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;
