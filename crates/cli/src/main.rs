// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! em - experiment scheduler CLI

mod commands;
mod config;
mod logging;
mod output;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use commands::control::Request;
use commands::{control, logs, metrics, run, show, status};
use config::Config;
use em_storage::{Observer, StateChannel};
use output::OutputFormat;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "em", version, about = "Experiment scheduler")]
struct Cli {
    /// Configuration file
    #[arg(long, short = 'c', global = true, default_value = config::DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Base experiment directory, overriding the configuration file
    #[arg(long, global = true)]
    base: Option<PathBuf>,

    /// Output format
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every configured experiment
    Run(run::RunArgs),
    /// Show the scheduler's queues
    Status,
    /// Show one task with its metadata, logs and metrics
    Show {
        /// Task id or unique prefix
        id: String,
    },
    /// Print a task's run log
    Logs(logs::LogsArgs),
    /// Print a task's metric table
    Metrics(metrics::MetricsArgs),
    /// Move a failed task back to pending
    Retry {
        /// Task id or unique prefix
        id: String,
    },
    /// Remove a pending, finished or failed task
    Remove {
        /// Task id or unique prefix
        id: String,
    },
    /// Stop a running task
    Terminate {
        /// Task id or unique prefix
        id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // The scheduler owns the state directory and logs there as well
    if let Commands::Run(args) = cli.command {
        let mut config = Config::load(&cli.config)?;
        if let Some(base) = cli.base {
            config.scheduler.base_dir = base;
        }
        let log_file = StateChannel::open(&config.scheduler.base_dir)?.log_path();
        let _guard = logging::init(Some(&log_file))?;
        return run::handle(config, args, cli.format).await;
    }

    let _guard = logging::init(None)?;
    let base = resolve_base(&cli.config, cli.base)?;
    let mut observer = Observer::open(&base)?;
    let format = cli.format;

    match cli.command {
        Commands::Status => status::handle(&mut observer, format),
        Commands::Show { id } => show::handle(&mut observer, &id, format),
        Commands::Logs(args) => logs::handle(&mut observer, args, format).await,
        Commands::Metrics(args) => metrics::handle(&mut observer, args, format),
        Commands::Retry { id } => control::handle(&mut observer, Request::Retry, &id, format),
        Commands::Remove { id } => control::handle(&mut observer, Request::Remove, &id, format),
        Commands::Terminate { id } => {
            control::handle(&mut observer, Request::Terminate, &id, format)
        }
        Commands::Run(_) => Ok(()),
    }
}

/// `--base` wins; otherwise the configuration file names the directory
fn resolve_base(config: &Path, base: Option<PathBuf>) -> Result<PathBuf> {
    let base = match base {
        Some(base) => base,
        None => {
            Config::load(config)
                .with_context(|| "pass --base or --config to locate the experiments")?
                .scheduler
                .base_dir
        }
    };
    if !base.is_dir() {
        anyhow::bail!("base experiment directory not found: {}", base.display());
    }
    Ok(base)
}
