// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `em run`: schedule every configured experiment

use crate::config::Config;
use crate::output::{self, OutputFormat};
use clap::Args;
use em_adapters::{LocalProcessAdapter, TracedProcessAdapter};
use em_core::{SystemClock, UuidIdGen};
use em_engine::{PlannedJob, Scheduler};
use serde::Serialize;
use std::fmt;

#[derive(Args)]
pub struct RunArgs {
    /// Print the admission order without starting anything
    #[arg(long)]
    pub dry_run: bool,
    /// Override max_concurrent_experiments
    #[arg(long, short = 'j')]
    pub max_concurrent: Option<usize>,
    /// Keep running after every experiment has finished
    #[arg(long)]
    pub linger: bool,
}

#[derive(Serialize)]
struct PlanEntry {
    position: usize,
    id: String,
    name: String,
    priority: i32,
    max_retries: u32,
    delay_seconds: f64,
    command: String,
}

impl PlanEntry {
    fn new(position: usize, job: PlannedJob) -> Self {
        Self {
            position,
            id: job.id.to_string(),
            name: job.spec.name,
            priority: job.spec.priority,
            max_retries: job.spec.max_retries,
            delay_seconds: job.spec.delay.as_secs_f64(),
            command: job.spec.command,
        }
    }
}

impl fmt::Display for PlanEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:>3}. {:<24} pri={:<3} retries={:<2} {}",
            self.position,
            output::clip(&self.name, 24),
            self.priority,
            self.max_retries,
            self.command
        )
    }
}

pub async fn handle(mut config: Config, args: RunArgs, format: OutputFormat) -> anyhow::Result<()> {
    if let Some(max_concurrent) = args.max_concurrent {
        config.scheduler.max_concurrent = max_concurrent;
    }
    if args.linger {
        config.scheduler.linger = true;
    }

    let adapter = TracedProcessAdapter::new(LocalProcessAdapter::new());
    let mut scheduler = Scheduler::new(
        adapter,
        SystemClock,
        UuidIdGen,
        config.scheduler,
        config.experiments,
    )?;

    if args.dry_run {
        let plan: Vec<PlanEntry> = scheduler
            .plan()
            .into_iter()
            .enumerate()
            .map(|(i, job)| PlanEntry::new(i + 1, job))
            .collect();
        if plan.is_empty() && format == OutputFormat::Text {
            println!("No experiments configured");
        } else {
            output::print_list(&plan, format);
        }
        return Ok(());
    }

    let summary = scheduler.run_until(shutdown_signal()).await;
    output::print(&summary, format);
    Ok(())
}

/// Resolves on Ctrl-C or SIGTERM
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "cannot listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };
    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                _ = ctrl_c => {}
                _ = terminate.recv() => {}
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "cannot listen for SIGTERM");
            ctrl_c.await;
        }
    }
}
