// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! em-storage: on-disk state for the experiment scheduler
//!
//! Run directories with their logs, metrics and metadata, plus the state
//! channel shared between the scheduler and its observers.

mod atomic;
pub mod channel;
mod error;
pub mod log;
pub mod metrics;
pub mod observer;
pub mod run_dir;

/// Run directory of the current run, exported to every child process
pub const ENV_RUN_DIR: &str = "EM_RUN_DIR";
/// Run identifier of the current run, exported to every child process
pub const ENV_RUN_ID: &str = "EM_RUN_ID";

pub use atomic::{write_atomic, write_json_atomic};
pub use channel::{ChannelError, InboxEntry, SnapshotReader, StateChannel, WriterLock};
pub use error::StorageError;
pub use log::{LogFeed, LogFileInfo, RunLog};
pub use metrics::{MetricPreview, MetricRecorder, MetricStore, MetricTable, MetricValue};
pub use observer::{LogTail, Observer, ObserverError, TaskDetails};
pub use run_dir::RunDirectory;
