// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `em show`: details of one task

use crate::output::{self, OutputFormat};
use em_storage::{Observer, TaskDetails};

pub fn handle(observer: &mut Observer, id: &str, format: OutputFormat) -> anyhow::Result<()> {
    let details = observer.task_details(id)?;
    match format {
        OutputFormat::Json => output::print_json(&details),
        OutputFormat::Text => print!("{}", render(&details)),
    }
    Ok(())
}

fn render(details: &TaskDetails) -> String {
    let task = &details.task;
    let mut out = String::new();
    let mut field = |label: &str, value: String| {
        out.push_str(&format!("  {:<12} {}\n", format!("{}:", label), value));
    };
    let opt = |value: Option<String>| value.unwrap_or_else(|| "-".to_string());

    field("Id", task.id.to_string());
    field("Name", task.name.clone());
    field("Section", details.section.to_string());
    field("Status", task.status.to_string());
    field("Command", task.command.clone());
    field("Priority", task.priority.to_string());
    field("Attempt", task.attempt.to_string());
    field("Run", opt(task.run_id.map(|r| r.to_string())));
    field("Pid", opt(task.pid.map(|p| p.to_string())));
    field("Exit code", opt(task.exit_code.map(|c| c.to_string())));
    field("Created", task.created_at.to_rfc3339());
    field("Started", opt(task.started_at.map(|t| t.to_rfc3339())));
    field("Completed", opt(task.completed_at.map(|t| t.to_rfc3339())));
    if let Some(description) = &task.description {
        field("Description", description.clone());
    }
    if let Some(error) = &task.error {
        field("Error", error.to_string());
    }
    for warning in &task.warnings {
        field("Warning", warning.clone());
    }
    match &task.work_dir {
        Some(dir) if details.work_dir_exists => field("Work dir", dir.display().to_string()),
        Some(dir) => field("Work dir", format!("{} (missing)", dir.display())),
        None => field("Work dir", "-".to_string()),
    }

    let mut out = format!("Task {}\n{}", task.id, out);
    if let Some(metadata) = &details.metadata {
        out.push_str("\nMetadata:\n");
        for key in metadata.keys() {
            if let Some(value) = metadata.get(key) {
                out.push_str(&format!("  {}: {}\n", key, value));
            }
        }
    }
    if !details.logs.is_empty() {
        out.push_str("\nLogs:\n");
        for log in &details.logs {
            out.push_str(&format!(
                "  {:<16} {:>10} bytes  {}\n",
                log.name,
                log.size,
                log.updated_at.format("%Y-%m-%d %H:%M:%S")
            ));
        }
    }
    if !details.metrics.is_empty() {
        out.push_str("\nMetrics:\n");
        for metric in &details.metrics {
            out.push_str(&format!(
                "  {} ({} rows): {}\n",
                metric.name,
                metric.rows,
                metric.columns.join(", ")
            ));
        }
    }
    out
}
