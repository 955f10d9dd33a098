// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use em_adapters::{FakeOutcome, FakeProcessAdapter, LocalProcessAdapter, ProcessCall, ProcessError};
use em_core::{FakeClock, RunId, RunStatus, SequentialIdGen};
use em_storage::ChannelError;
use proptest::prelude::*;
use std::fs;
use tempfile::TempDir;
use yare::parameterized;

type TestScheduler = Scheduler<FakeProcessAdapter, FakeClock, SequentialIdGen>;

struct Harness {
    dir: TempDir,
    adapter: FakeProcessAdapter,
    clock: FakeClock,
}

impl Harness {
    fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
            adapter: FakeProcessAdapter::new(),
            clock: FakeClock::new(),
        }
    }

    fn config(&self) -> SchedulerConfig {
        SchedulerConfig::new(self.dir.path()).with_check_interval(Duration::from_millis(5))
    }

    fn scheduler(&self, max_concurrent: usize, specs: Vec<JobSpec>) -> TestScheduler {
        Scheduler::new(
            self.adapter.clone(),
            self.clock.clone(),
            SequentialIdGen::new("job"),
            self.config().with_max_concurrent(max_concurrent),
            specs,
        )
        .unwrap()
    }
}

fn names(jobs: &[Job]) -> Vec<&str> {
    jobs.iter().map(|job| job.spec.name.as_str()).collect()
}

fn id(n: usize) -> JobId {
    JobId::new(format!("job-{}", n))
}

fn command(action: Action, n: usize) -> CommandEnvelope {
    CommandEnvelope::new(action, id(n))
}

#[test]
fn pending_is_ordered_by_priority_then_submission() {
    let h = Harness::new();
    let scheduler = h.scheduler(
        1,
        vec![
            JobSpec::new("low", "true"),
            JobSpec::new("high-a", "true").with_priority(5),
            JobSpec::new("high-b", "true").with_priority(5),
            JobSpec::new("negative", "true").with_priority(-1),
        ],
    );

    assert_eq!(names(&scheduler.pending), vec!["high-a", "high-b", "low", "negative"]);
    let plan: Vec<_> = scheduler.plan().into_iter().map(|p| p.spec.name).collect();
    assert_eq!(plan, vec!["high-a", "high-b", "low", "negative"]);
}

#[test]
fn repeats_expand_into_independent_jobs() {
    let h = Harness::new();
    let scheduler = h.scheduler(1, vec![JobSpec::new("sweep", "true").with_repeats(3)]);

    let ids: Vec<_> = scheduler.pending.iter().map(|job| job.id.clone()).collect();
    assert_eq!(ids, vec![id(1), id(2), id(3)]);
    assert!(scheduler.pending.iter().all(|job| job.spec.repeats == 1));
}

#[test]
fn zero_concurrency_is_rejected() {
    let h = Harness::new();
    let result = Scheduler::new(
        h.adapter.clone(),
        h.clock.clone(),
        SequentialIdGen::default(),
        h.config().with_max_concurrent(0),
        Vec::new(),
    );
    assert!(matches!(result, Err(EngineError::InvalidConfig(_))));
}

#[test]
fn second_scheduler_on_same_base_is_refused() {
    let h = Harness::new();
    let _first = h.scheduler(1, Vec::new());

    let second = Scheduler::new(
        h.adapter.clone(),
        h.clock.clone(),
        SequentialIdGen::default(),
        h.config(),
        Vec::new(),
    );
    assert!(matches!(
        second,
        Err(EngineError::Channel(ChannelError::Locked { .. }))
    ));
}

#[tokio::test]
async fn admission_respects_priority_and_limit() {
    let h = Harness::new();
    h.adapter.set_default(FakeOutcome::Hold);
    let mut scheduler = h.scheduler(
        2,
        vec![
            JobSpec::new("a", "a"),
            JobSpec::new("b", "b").with_priority(3),
            JobSpec::new("c", "c").with_priority(1),
        ],
    );

    scheduler.cycle().await;

    assert_eq!(names(&scheduler.running), vec!["b", "c"]);
    assert_eq!(names(&scheduler.pending), vec!["a"]);
    assert_eq!(h.adapter.spawned(), vec!["b", "c"]);
}

#[tokio::test]
async fn successful_run_finishes_on_first_try() {
    let h = Harness::new();
    let mut scheduler = h.scheduler(1, vec![JobSpec::new("ok", "true")]);

    scheduler.cycle().await;
    assert_eq!(scheduler.running.len(), 1);
    scheduler.cycle().await;

    assert!(scheduler.is_done());
    let job = &scheduler.finished[0];
    assert_eq!(job.record.status(), RunStatus::Finished);
    assert_eq!(job.record.attempt, 1);
    assert_eq!(job.record.exit_code, Some(0));
    assert_eq!(job.record.run_id, Some(RunId::FIRST));

    let metadata = job.dir.as_ref().unwrap().load_metadata().unwrap().unwrap();
    assert_eq!(metadata.get_str("status"), Some("finished"));

    let summary = scheduler.summary();
    assert_eq!(summary.counts.finished, 1);
    assert_eq!(summary.first_try, 1);
    assert_eq!(summary.after_retry, 0);
}

#[tokio::test]
async fn failing_job_exhausts_retry_budget() {
    let h = Harness::new();
    h.adapter.set_default(FakeOutcome::Exit(1));
    let mut scheduler = h.scheduler(1, vec![JobSpec::new("flaky", "false").with_max_retries(2)]);

    for _ in 0..6 {
        scheduler.cycle().await;
    }

    assert!(scheduler.is_done());
    assert_eq!(scheduler.errors.len(), 1);
    let job = &scheduler.errors[0];
    assert_eq!(job.record.attempt, 3);
    assert_eq!(job.record.exit_code, Some(1));
    assert_eq!(job.record.failure().map(|f| f.kind), Some(FailureKind::Exhausted));
    assert_eq!(job.history.len(), 2);
    assert_eq!(
        job.history[0].failure().map(|f| f.kind),
        Some(FailureKind::Runtime)
    );
    assert_eq!(h.adapter.spawned().len(), 3);

    let dir = job.dir.as_ref().unwrap();
    let runs = dir.existing_run_ids().unwrap();
    assert_eq!(runs.len(), 3);
    assert_eq!(scheduler.history(&job.id).map(|h| h.len()), Some(2));
}

#[tokio::test]
async fn failed_run_is_not_retried_when_auto_restart_is_off() {
    let h = Harness::new();
    h.adapter.set_default(FakeOutcome::Exit(1));
    let mut scheduler = Scheduler::new(
        h.adapter.clone(),
        h.clock.clone(),
        SequentialIdGen::new("job"),
        h.config().with_auto_restart(false),
        vec![JobSpec::new("flaky", "false").with_max_retries(3)],
    )
    .unwrap();

    for _ in 0..4 {
        scheduler.cycle().await;
    }

    assert!(scheduler.is_done());
    assert_eq!(scheduler.errors.len(), 1);
    let job = &scheduler.errors[0];
    assert_eq!(job.record.attempt, 1);
    assert_eq!(job.record.failure().map(|f| f.kind), Some(FailureKind::Runtime));
    assert!(job.history.is_empty());
    assert_eq!(h.adapter.spawned().len(), 1);
}

#[parameterized(
    no_retries = { 0, 1 },
    one_retry = { 1, 2 },
    four_retries = { 4, 5 },
)]
fn spawn_count_matches_attempt_budget(max_retries: u32, expected: usize) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    rt.block_on(async {
        let h = Harness::new();
        h.adapter.set_default(FakeOutcome::Exit(2));
        let mut scheduler =
            h.scheduler(1, vec![JobSpec::new("bad", "bad").with_max_retries(max_retries)]);
        for _ in 0..12 {
            scheduler.cycle().await;
        }
        assert_eq!(h.adapter.spawned().len(), expected);
        let job = &scheduler.errors[0];
        assert_eq!(job.record.attempt, expected as u32);
        let kind = if max_retries == 0 {
            FailureKind::Runtime
        } else {
            FailureKind::Exhausted
        };
        assert_eq!(job.record.failure().map(|f| f.kind), Some(kind));
    });
}

#[tokio::test]
async fn retry_waits_for_delay() {
    let h = Harness::new();
    h.adapter.script("train", [FakeOutcome::Exit(1), FakeOutcome::Exit(0)]);
    let mut scheduler = h.scheduler(
        1,
        vec![JobSpec::new("train", "train")
            .with_max_retries(1)
            .with_delay(Duration::from_secs(30))],
    );

    scheduler.cycle().await;
    scheduler.cycle().await;
    assert_eq!(scheduler.pending.len(), 1);
    assert_eq!(h.adapter.spawned().len(), 1);

    h.clock.advance(Duration::from_secs(29));
    scheduler.cycle().await;
    assert_eq!(h.adapter.spawned().len(), 1);

    h.clock.advance(Duration::from_secs(1));
    scheduler.cycle().await;
    assert_eq!(h.adapter.spawned().len(), 2);
    assert_eq!(scheduler.running[0].record.attempt, 2);

    scheduler.cycle().await;
    let summary = scheduler.summary();
    assert_eq!(summary.counts.finished, 1);
    assert_eq!(summary.first_try, 0);
    assert_eq!(summary.after_retry, 1);
}

#[tokio::test]
async fn delayed_job_does_not_block_ready_ones() {
    let h = Harness::new();
    h.adapter.script("first", [FakeOutcome::Exit(1), FakeOutcome::Exit(0)]);
    h.adapter.script("second", [FakeOutcome::Hold]);
    let mut scheduler = h.scheduler(
        1,
        vec![
            JobSpec::new("first", "first")
                .with_priority(1)
                .with_max_retries(1)
                .with_delay(Duration::from_secs(60)),
            JobSpec::new("second", "second"),
        ],
    );

    scheduler.cycle().await;
    scheduler.cycle().await;

    assert_eq!(names(&scheduler.running), vec!["second"]);
    assert_eq!(names(&scheduler.pending), vec!["first"]);
}

#[tokio::test]
async fn admission_failure_skips_retries() {
    let h = Harness::new();
    h.adapter.set_default(FakeOutcome::Fail(ProcessError::NotFound("nope".to_string())));
    let mut scheduler = h.scheduler(1, vec![JobSpec::new("broken", "nope").with_max_retries(3)]);

    scheduler.cycle().await;

    assert!(scheduler.is_done());
    let job = &scheduler.errors[0];
    assert_eq!(job.record.attempt, 0);
    assert_eq!(job.record.pid(), None);
    let failure = job.record.failure().unwrap();
    assert_eq!(failure.kind, FailureKind::Admission);
    assert!(failure.message.contains("nope"));
    assert_eq!(h.adapter.spawned().len(), 1);
}

#[tokio::test]
async fn missing_resume_directory_is_an_admission_error() {
    let h = Harness::new();
    let mut scheduler = h.scheduler(1, vec![JobSpec::new("old", "true").with_resume("gone")]);

    scheduler.cycle().await;

    let job = &scheduler.errors[0];
    assert_eq!(job.record.failure().map(|f| f.kind), Some(FailureKind::Admission));
    assert!(job.dir.is_none());
    assert!(h.adapter.spawned().is_empty());
}

#[tokio::test]
async fn retry_error_keeps_attempt_count() {
    let h = Harness::new();
    h.adapter.script("job", [FakeOutcome::Exit(1), FakeOutcome::Hold]);
    let mut scheduler = h.scheduler(1, vec![JobSpec::new("job", "job")]);

    scheduler.cycle().await;
    scheduler.cycle().await;
    assert_eq!(scheduler.errors[0].record.attempt, 1);

    assert_eq!(scheduler.apply(&command(Action::RetryError, 1)).await, Ok(true));
    let job = &scheduler.pending[0];
    assert_eq!(job.record.status(), RunStatus::Pending);
    assert_eq!(job.record.attempt, 1);
    assert_eq!(job.history.len(), 1);

    scheduler.cycle().await;
    let job = &scheduler.running[0];
    assert_eq!(job.record.attempt, 2);
    assert_eq!(job.record.run_id, RunId::new(2).ok());
}

#[tokio::test]
async fn removal_is_idempotent() {
    let h = Harness::new();
    h.adapter.set_default(FakeOutcome::Hold);
    let mut scheduler = h.scheduler(1, vec![JobSpec::new("a", "a"), JobSpec::new("b", "b")]);
    scheduler.cycle().await;

    assert_eq!(scheduler.apply(&command(Action::RemovePending, 2)).await, Ok(true));
    assert_eq!(scheduler.apply(&command(Action::RemovePending, 2)).await, Ok(false));
    assert_eq!(scheduler.apply(&command(Action::RemoveFinished, 1)).await, Ok(false));
    assert_eq!(scheduler.apply(&command(Action::RemoveError, 1)).await, Ok(false));

    assert!(scheduler.pending.is_empty());
    assert_eq!(names(&scheduler.running), vec!["a"]);
}

#[tokio::test]
async fn remove_running_is_rejected() {
    let h = Harness::new();
    h.adapter.set_default(FakeOutcome::Hold);
    let mut scheduler = h.scheduler(1, vec![JobSpec::new("a", "a")]);
    scheduler.cycle().await;

    let envelope = CommandEnvelope {
        action: "remove_running".to_string(),
        ..command(Action::RemovePending, 1)
    };
    assert_eq!(scheduler.apply(&envelope).await, Err(ActionError::RemoveRunning));
    assert_eq!(scheduler.running.len(), 1);
}

#[tokio::test]
async fn terminate_moves_job_to_errors_without_retry() {
    let h = Harness::new();
    h.adapter.set_default(FakeOutcome::Hold);
    let mut scheduler = h.scheduler(1, vec![JobSpec::new("long", "sleep").with_max_retries(3)]);
    scheduler.cycle().await;
    let pid = scheduler.running[0].record.pid().unwrap();

    assert_eq!(scheduler.apply(&command(Action::TerminateRunning, 1)).await, Ok(true));

    assert!(scheduler.running.is_empty());
    assert!(scheduler.pending.is_empty());
    let job = &scheduler.errors[0];
    let failure = job.record.failure().unwrap();
    assert_eq!(failure.kind, FailureKind::Operator);
    assert_eq!(failure.signal, Some(15));
    assert!(h.adapter.calls().contains(&ProcessCall::Terminate {
        pid,
        grace: scheduler.config().terminate_grace,
    }));

    let metadata = job.dir.as_ref().unwrap().load_metadata().unwrap().unwrap();
    assert_eq!(metadata.get_str("status"), Some("error"));
}

#[tokio::test]
async fn inbox_commands_are_applied_and_acknowledged() {
    let h = Harness::new();
    h.adapter.set_default(FakeOutcome::Hold);
    let mut scheduler = h.scheduler(1, vec![JobSpec::new("a", "a"), JobSpec::new("b", "b")]);
    let channel = scheduler.channel().clone();

    channel.enqueue(&command(Action::RemovePending, 2)).unwrap();
    let bogus = CommandEnvelope {
        action: "explode".to_string(),
        ..command(Action::RemovePending, 1)
    };
    channel.enqueue(&bogus).unwrap();
    channel.enqueue(&command(Action::RemoveError, 99)).unwrap();

    scheduler.cycle().await;

    assert_eq!(names(&scheduler.running), vec!["a"]);
    assert!(scheduler.pending.is_empty());
    assert!(channel.pending_commands().unwrap().is_empty());
}

#[tokio::test]
async fn cycle_publishes_snapshot() {
    let h = Harness::new();
    h.adapter.set_default(FakeOutcome::Hold);
    let mut scheduler = h.scheduler(1, vec![JobSpec::new("a", "a"), JobSpec::new("b", "b")]);

    scheduler.cycle().await;

    let snapshot = StateChannel::open(h.dir.path())
        .unwrap()
        .load_snapshot()
        .unwrap()
        .unwrap();
    assert_eq!(snapshot.counts.running, 1);
    assert_eq!(snapshot.counts.pending, 1);
    assert_eq!(snapshot.counts.total, 2);
    let running = &snapshot.running[0];
    assert_eq!(running.name, "a");
    assert_eq!(running.run_id, Some(RunId::FIRST));
    assert!(running.pid.is_some());
    assert!(running.work_dir.as_ref().unwrap().starts_with(h.dir.path()));
    assert!(snapshot.summary.is_none());
}

#[tokio::test]
async fn run_until_drains_queue_and_publishes_summary() {
    let h = Harness::new();
    h.adapter.script("bad", [FakeOutcome::Exit(4)]);
    let mut scheduler = h.scheduler(
        2,
        vec![
            JobSpec::new("good", "good").with_repeats(2),
            JobSpec::new("bad", "bad"),
        ],
    );

    let summary = scheduler.run_until(std::future::pending()).await;

    assert_eq!(summary.counts.total, 3);
    assert_eq!(summary.counts.finished, 2);
    assert_eq!(summary.counts.errors, 1);
    assert_eq!(summary.first_try, 2);
    assert_eq!(summary.failures.len(), 1);
    assert_eq!(summary.failures[0].name, "bad");
    assert_eq!(summary.failures[0].exit_code, Some(4));

    let snapshot = StateChannel::open(h.dir.path())
        .unwrap()
        .load_snapshot()
        .unwrap()
        .unwrap();
    assert_eq!(snapshot.summary, Some(summary));
}

#[tokio::test]
async fn shutdown_terminates_running_jobs() {
    let h = Harness::new();
    h.adapter.set_default(FakeOutcome::Hold);
    let mut scheduler = h.scheduler(2, vec![JobSpec::new("a", "a"), JobSpec::new("b", "b")]);

    let summary = scheduler.run_until(async {}).await;

    assert_eq!(summary.counts.errors, 2);
    assert!(h.adapter.running().is_empty());
    for job in &scheduler.errors {
        let failure = job.record.failure().unwrap();
        assert_eq!(failure.kind, FailureKind::Operator);
        assert_eq!(failure.message, "scheduler shutdown");
    }
}

#[tokio::test]
async fn held_job_finishes_when_process_completes() {
    let h = Harness::new();
    h.adapter.set_default(FakeOutcome::Hold);
    let mut scheduler = h.scheduler(1, vec![JobSpec::new("a", "a"), JobSpec::new("b", "b")]);

    scheduler.cycle().await;
    scheduler.cycle().await;
    assert_eq!(names(&scheduler.running), vec!["a"]);

    let pid = h.adapter.pid_of("a").unwrap();
    assert!(h.adapter.complete(pid, 0));
    scheduler.cycle().await;

    assert_eq!(names(&scheduler.finished), vec!["a"]);
    assert_eq!(names(&scheduler.running), vec!["b"]);
}

#[tokio::test]
async fn real_processes_write_logs() {
    let dir = tempfile::tempdir().unwrap();
    let config = SchedulerConfig::new(dir.path())
        .with_max_concurrent(2)
        .with_check_interval(Duration::from_millis(20));
    let mut scheduler = Scheduler::new(
        LocalProcessAdapter::new(),
        em_core::SystemClock,
        SequentialIdGen::default(),
        config,
        vec![
            JobSpec::new("hello", "echo hello from $EM_RUN_ID"),
            JobSpec::new("fails", "echo oops >&2; exit 3"),
        ],
    )
    .unwrap();

    let summary = scheduler.run_until(std::future::pending()).await;

    assert_eq!(summary.counts.finished, 1);
    assert_eq!(summary.counts.errors, 1);

    let hello = &scheduler.finished[0];
    let log = hello.dir.as_ref().unwrap().log_path(RunId::FIRST);
    let text = fs::read_to_string(log).unwrap();
    assert!(text.contains("hello from run_0001"));

    let fails = &scheduler.errors[0];
    assert_eq!(fails.record.exit_code, Some(3));
    let log = fails.dir.as_ref().unwrap().log_path(RunId::FIRST);
    assert!(fs::read_to_string(log).unwrap().contains("oops"));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn running_never_exceeds_limit(
        max_concurrent in 1usize..4,
        outcomes in proptest::collection::vec(0i32..3, 1..8),
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let h = Harness::new();
            let specs = outcomes
                .iter()
                .enumerate()
                .map(|(i, code)| {
                    let name = format!("job{}", i);
                    h.adapter.script(&name, [FakeOutcome::Exit(*code)]);
                    JobSpec::new(name.clone(), name)
                })
                .collect();
            let mut scheduler = h.scheduler(max_concurrent, specs);

            for _ in 0..(outcomes.len() + 2) {
                scheduler.cycle().await;
                assert!(scheduler.running.len() <= max_concurrent);
            }
            assert!(scheduler.is_done());
            let successes = outcomes.iter().filter(|code| **code == 0).count();
            assert_eq!(scheduler.finished.len(), successes);
            assert_eq!(scheduler.errors.len(), outcomes.len() - successes);
        });
    }
}
