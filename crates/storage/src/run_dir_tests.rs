// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use chrono::TimeZone;
use em_core::RunIdError;

fn started() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2023, 1, 1, 12, 0, 0).unwrap()
}

fn label() -> String {
    started().with_timezone(&Local).format(LABEL_FORMAT).to_string()
}

#[test]
fn create_builds_layout() {
    let base = tempfile::tempdir().unwrap();
    let dir = RunDirectory::create(base.path(), "test_exp", started()).unwrap();
    assert_eq!(dir.root(), base.path().join(format!("test_exp_{}", label())));
    assert!(dir.logs_dir().is_dir());
    assert!(dir.metrics_dir().is_dir());
}

#[test]
fn create_suffixes_taken_labels() {
    let base = tempfile::tempdir().unwrap();
    let first = RunDirectory::create(base.path(), "exp", started()).unwrap();
    let second = RunDirectory::create(base.path(), "exp", started()).unwrap();
    assert_ne!(first, second);
    assert!(second.root().to_string_lossy().ends_with("_1"));
}

#[test]
fn first_reservation_is_run_0001() {
    let base = tempfile::tempdir().unwrap();
    let dir = RunDirectory::create(base.path(), "exp", started()).unwrap();
    let run = dir.reserve_run().unwrap();
    assert_eq!(run.to_string(), "run_0001");
    assert!(dir.log_path(run).exists());
}

#[test]
fn reservation_continues_after_existing_runs() {
    let base = tempfile::tempdir().unwrap();
    let dir = RunDirectory::create(base.path(), "exp", started()).unwrap();
    for name in ["run_0001.log", "run_0002.log", "invalid_name.log"] {
        fs::write(dir.logs_dir().join(name), "").unwrap();
    }
    assert_eq!(dir.reserve_run().unwrap().to_string(), "run_0003");
    assert_eq!(dir.reserve_run().unwrap().to_string(), "run_0004");
}

#[test]
fn reservation_skips_gaps_instead_of_filling_them() {
    let base = tempfile::tempdir().unwrap();
    let dir = RunDirectory::create(base.path(), "exp", started()).unwrap();
    for name in ["run_0001.log", "run_0003.log", "run_0005.log"] {
        fs::write(dir.logs_dir().join(name), "").unwrap();
    }
    assert_eq!(dir.reserve_run().unwrap().to_string(), "run_0006");
}

#[test]
fn metric_artifacts_count_as_existing_runs() {
    let base = tempfile::tempdir().unwrap();
    let dir = RunDirectory::create(base.path(), "exp", started()).unwrap();
    fs::write(dir.metrics_dir().join("run_0007.csv"), "a\n").unwrap();
    assert_eq!(dir.reserve_run().unwrap().to_string(), "run_0008");
}

#[test]
fn reservation_fails_when_identifier_space_is_exhausted() {
    let base = tempfile::tempdir().unwrap();
    let dir = RunDirectory::create(base.path(), "exp", started()).unwrap();
    fs::write(dir.logs_dir().join("run_9999.log"), "").unwrap();
    let err = dir.reserve_run().unwrap_err();
    assert!(matches!(err, StorageError::RunId(RunIdError::Exhausted)));
}

#[test]
fn resume_requires_existing_directory() {
    let base = tempfile::tempdir().unwrap();
    let err = RunDirectory::resume(base.path(), "exp", "2023-01-01__12-00-00").unwrap_err();
    assert!(matches!(err, StorageError::ResumeNotFound { .. }));

    fs::create_dir_all(base.path().join("exp_2023-01-01__12-00-00")).unwrap();
    let dir = RunDirectory::resume(base.path(), "exp", "2023-01-01__12-00-00").unwrap();
    assert!(dir.logs_dir().is_dir());
}

#[test]
fn metadata_round_trips_and_absent_is_none() {
    let base = tempfile::tempdir().unwrap();
    let dir = RunDirectory::create(base.path(), "exp", started()).unwrap();
    assert!(dir.load_metadata().unwrap().is_none());

    let mut meta = Metadata::new();
    meta.set("name", "exp");
    meta.set("custom", serde_json::json!({"k": [1, 2]}));
    dir.save_metadata(&meta).unwrap();
    assert_eq!(dir.load_metadata().unwrap(), Some(meta));
}
