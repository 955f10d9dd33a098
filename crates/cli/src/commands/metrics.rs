// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `em metrics`: print a task's metric table

use crate::output::{self, OutputFormat};
use clap::Args;
use em_storage::Observer;

#[derive(Args)]
pub struct MetricsArgs {
    /// Task id or unique prefix
    pub id: String,
    /// Metric file under the run directory's metrics/, e.g. metrics.csv
    #[arg(default_value = "metrics.csv")]
    pub file: String,
    /// Maximum rows to print
    #[arg(long, default_value_t = em_storage::observer::DEFAULT_METRIC_ROWS)]
    pub limit: usize,
}

pub fn handle(observer: &mut Observer, args: MetricsArgs, format: OutputFormat) -> anyhow::Result<()> {
    let table = observer.read_metric(&args.id, &args.file, Some(args.limit))?;
    match format {
        OutputFormat::Json => output::print_json(&table),
        OutputFormat::Text => {
            println!("{}", table.columns.join("\t"));
            for row in &table.rows {
                println!("{}", row.join("\t"));
            }
        }
    }
    Ok(())
}
