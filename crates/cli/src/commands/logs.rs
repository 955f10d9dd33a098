// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `em logs`: tail or follow a run log

use crate::output::{self, OutputFormat};
use clap::Args;
use em_core::{RunId, RunStatus};
use em_storage::Observer;
use std::time::Duration;

const FOLLOW_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Args)]
pub struct LogsArgs {
    /// Task id or unique prefix
    pub id: String,
    /// Run to read, e.g. run_0002 (defaults to the current run)
    #[arg(long)]
    pub run: Option<RunId>,
    /// Number of lines to show
    #[arg(long, short = 'n', default_value_t = em_storage::log::DEFAULT_TAIL_LINES)]
    pub lines: usize,
    /// Keep printing new lines until the task stops running
    #[arg(long, short = 'f')]
    pub follow: bool,
}

pub async fn handle(observer: &mut Observer, args: LogsArgs, format: OutputFormat) -> anyhow::Result<()> {
    if !args.follow {
        let tail = observer.read_log(&args.id, args.run, Some(args.lines))?;
        match format {
            OutputFormat::Json => output::print_json(&tail),
            OutputFormat::Text => {
                for line in &tail.lines {
                    println!("{}", line);
                }
            }
        }
        return Ok(());
    }

    let mut feed = observer.log_feed(&args.id, args.run)?;
    let backlog = feed.poll()?;
    let skip = backlog.len().saturating_sub(args.lines);
    for line in &backlog[skip..] {
        println!("{}", line);
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = tokio::time::sleep(FOLLOW_INTERVAL) => {}
        }
        for line in feed.poll()? {
            println!("{}", line);
        }

        let (_, task) = observer.find_task(&args.id)?;
        if args.run.is_none() && task.run_id.is_some() && task.run_id != feed.run_id() {
            // A retry started a new run
            for line in feed.poll()? {
                println!("{}", line);
            }
            feed.follow(task.run_id);
        }
        if !matches!(task.status, RunStatus::Pending | RunStatus::Running) {
            for line in feed.poll()? {
                println!("{}", line);
            }
            break;
        }
    }
    Ok(())
}
