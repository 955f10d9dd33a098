// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! em-core: domain types for the experiment scheduler
//!
//! This crate provides:
//! - Job descriptions and generated job ids
//! - Run records with an explicit state machine
//! - Open metadata documents
//! - Control commands and published snapshots
//! - Clock and id abstractions for deterministic tests

pub mod clock;
pub mod command;
pub mod id;
pub mod job;
pub mod metadata;
pub mod run;
pub mod snapshot;

pub use clock::{Clock, FakeClock, SystemClock};
pub use command::{Action, ActionError, CommandEnvelope};
pub use id::{IdGen, SequentialIdGen, UuidIdGen};
pub use job::{JobId, JobSpec};
pub use metadata::Metadata;
pub use run::{
    Failure, FailureKind, RunId, RunIdError, RunRecord, RunState, RunStatus, TransitionError,
};
pub use snapshot::{
    Counts, ExecutionSummary, FailureLine, SchedulerSnapshot, Section, TaskSummary,
};
