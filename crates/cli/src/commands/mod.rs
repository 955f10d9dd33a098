// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

pub mod control;
pub mod logs;
pub mod metrics;
pub mod run;
pub mod show;
pub mod status;
