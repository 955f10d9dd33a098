// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `em status`: print the published queues

use crate::output::{self, clip, OutputFormat};
use em_core::{SchedulerSnapshot, Section, TaskSummary};
use em_storage::Observer;

pub fn handle(observer: &mut Observer, format: OutputFormat) -> anyhow::Result<()> {
    let snapshot = observer.state();
    match format {
        OutputFormat::Json => output::print_json(&snapshot),
        OutputFormat::Text => print!("{}", render(&snapshot)),
    }
    Ok(())
}

fn render(snapshot: &SchedulerSnapshot) -> String {
    let counts = &snapshot.counts;
    let mut out = format!(
        "Updated: {}\nTotal: {}  pending: {}  running: {}  finished: {}  errors: {}\n",
        snapshot.updated_at.format("%Y-%m-%d %H:%M:%S UTC"),
        counts.total,
        counts.pending,
        counts.running,
        counts.finished,
        counts.errors,
    );
    for section in Section::ALL {
        let tasks = snapshot.section(section);
        if tasks.is_empty() {
            continue;
        }
        out.push_str(&format!("\n{} ({}):\n", section, tasks.len()));
        out.push_str(&format!(
            "  {:<12} {:<24} {:>4} {:>7} {:<8} {:>7}  {}\n",
            "ID", "NAME", "PRI", "ATTEMPT", "RUN", "PID", "DETAIL"
        ));
        for task in tasks {
            out.push_str(&row(task));
        }
    }
    if let Some(summary) = &snapshot.summary {
        out.push('\n');
        out.push_str(&summary.to_string());
    }
    out
}

fn row(task: &TaskSummary) -> String {
    let run = task.run_id.map_or_else(|| "-".to_string(), |r| r.to_string());
    let pid = task.pid.map_or_else(|| "-".to_string(), |p| p.to_string());
    let detail = match &task.error {
        Some(error) => error.to_string(),
        None => task.command.clone(),
    };
    let mut line = format!(
        "  {:<12} {:<24} {:>4} {:>7} {:<8} {:>7}  {}",
        clip(task.id.as_str(), 12),
        clip(&task.name, 24),
        task.priority,
        task.attempt,
        run,
        pid,
        clip(&detail, 60),
    );
    if !task.warnings.is_empty() {
        line.push_str(&format!(" [{}]", task.warnings.join("; ")));
    }
    line.push('\n');
    line
}

#[cfg(test)]
#[path = "status_tests.rs"]
mod tests;
