// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::metrics::MetricRecorder;
use chrono::Utc;
use em_core::RunStatus;
use std::fs;

fn task(id: &str, work_dir: Option<PathBuf>, run_id: Option<RunId>) -> TaskSummary {
    TaskSummary {
        id: JobId::new(id),
        name: format!("job-{}", id),
        status: RunStatus::Running,
        attempt: 1,
        created_at: Utc::now(),
        started_at: Some(Utc::now()),
        completed_at: None,
        run_id,
        priority: 0,
        command: "train.sh".to_string(),
        description: None,
        work_dir,
        pid: Some(42),
        exit_code: None,
        error: None,
        warnings: Vec::new(),
    }
}

struct Fixture {
    base: tempfile::TempDir,
    dir: RunDirectory,
    observer: Observer,
}

fn fixture() -> Fixture {
    let base = tempfile::tempdir().unwrap();
    let dir = RunDirectory::create(base.path(), "train", Utc::now()).unwrap();
    let run = dir.reserve_run().unwrap();
    fs::write(dir.log_path(run), "l1\nl2\nl3\n").unwrap();
    let mut meta = Metadata::new();
    meta.set("name", "train");
    dir.save_metadata(&meta).unwrap();

    let channel = StateChannel::open(base.path()).unwrap();
    let snapshot = SchedulerSnapshot::new(
        Utc::now(),
        vec![task("abc123", None, None), task("abd999", None, None)],
        vec![task("run777", Some(dir.root().to_path_buf()), Some(run))],
        Vec::new(),
        Vec::new(),
    );
    channel.publish(&snapshot).unwrap();
    let observer = Observer::open(base.path()).unwrap();
    Fixture { base, dir, observer }
}

#[test]
fn find_task_by_exact_id_or_unique_prefix() {
    let mut fx = fixture();
    let (section, found) = fx.observer.find_task("abc123").unwrap();
    assert_eq!(section, Section::Pending);
    assert_eq!(found.id, JobId::new("abc123"));

    let (section, found) = fx.observer.find_task("run").unwrap();
    assert_eq!(section, Section::Running);
    assert_eq!(found.id, JobId::new("run777"));

    assert!(matches!(
        fx.observer.find_task("ab"),
        Err(ObserverError::AmbiguousTask { matches: 2, .. })
    ));
    assert!(matches!(fx.observer.find_task("zzz"), Err(ObserverError::TaskNotFound(_))));
}

#[test]
fn details_include_metadata_logs_and_metrics() {
    let mut fx = fixture();
    let recorder = MetricRecorder::open(&fx.dir, RunId::FIRST).unwrap();
    recorder.upd_row([("loss", 1.5)]);
    recorder.save_row().unwrap();

    let details = fx.observer.task_details("run777").unwrap();
    assert_eq!(details.section, Section::Running);
    assert!(details.work_dir_exists);
    assert_eq!(details.metadata.unwrap().get_str("name"), Some("train"));
    assert_eq!(details.logs.len(), 1);
    assert_eq!(details.logs[0].name, "run_0001.log");
    assert_eq!(details.metrics.len(), 1);
    assert_eq!(details.metrics[0].rows, 1);
}

#[test]
fn details_without_work_dir_are_empty() {
    let mut fx = fixture();
    let details = fx.observer.task_details("abc123").unwrap();
    assert!(!details.work_dir_exists);
    assert!(details.metadata.is_none());
    assert!(details.logs.is_empty());
}

#[test]
fn read_log_tails_current_run() {
    let mut fx = fixture();
    let tail = fx.observer.read_log("run777", None, Some(2)).unwrap();
    assert_eq!(tail.run_id, Some(RunId::FIRST));
    assert_eq!(tail.lines, vec!["l2", "l3"]);

    let missing = fx.observer.read_log("abc123", None, None).unwrap_err();
    assert!(matches!(missing, ObserverError::NoWorkDir(_)));
}

#[test]
fn read_log_falls_back_to_latest_file() {
    let mut fx = fixture();
    let tail = fx
        .observer
        .read_log("run777", Some(RunId::new(9).unwrap()), None)
        .unwrap();
    assert_eq!(tail.run_id, Some(RunId::FIRST));
    assert_eq!(tail.lines.len(), 3);
}

#[test]
fn log_feed_streams_appended_lines() {
    let mut fx = fixture();
    let mut feed = fx.observer.log_feed("run777", None).unwrap();
    assert_eq!(feed.poll().unwrap().len(), 3);
    let log = crate::log::RunLog::open(fx.dir.log_path(RunId::FIRST)).unwrap();
    log.append("l4").unwrap();
    let lines = feed.poll().unwrap();
    assert_eq!(lines.len(), 1);
    assert!(lines[0].ends_with("l4"));
}

#[test]
fn read_metric_rejects_paths_outside_metrics_dir() {
    let mut fx = fixture();
    fs::write(fx.dir.metrics_dir().join("m.csv"), "timestamp,run_id,a\nt,run_0001,1\n").unwrap();

    let table = fx.observer.read_metric("run777", "m.csv", None).unwrap();
    assert_eq!(table.rows.len(), 1);

    let err = fx.observer.read_metric("run777", "../metadata.json", None).unwrap_err();
    assert!(matches!(err, ObserverError::MetricNotFound(_)));
    let err = fx.observer.read_metric("run777", "nope.csv", None).unwrap_err();
    assert!(matches!(err, ObserverError::MetricNotFound(_)));
}

#[test]
fn send_resolves_prefix_and_enqueues() {
    let mut fx = fixture();
    let envelope = fx.observer.send(Action::TerminateRunning, "run7").unwrap();
    assert_eq!(envelope.target, JobId::new("run777"));

    let channel = StateChannel::open(fx.base.path()).unwrap();
    assert_eq!(channel.pending_commands().unwrap(), vec![envelope]);
}
