// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Experiment scheduling engine
//!
//! The [`Scheduler`] owns the pending, running, finished and error queues
//! and drives them in cycles. Each admitted job gets a [`LifecycleManager`]
//! that owns its run directory, log and subprocess.

mod error;
mod lifecycle;
mod scheduler;

pub use error::{AdmissionError, EngineError};
pub use lifecycle::{open_directory, LifecycleManager, LOG_WRITE_WARNING, METADATA_WRITE_WARNING};
pub use scheduler::{PlannedJob, Scheduler, SchedulerConfig};
