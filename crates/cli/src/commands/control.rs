// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `em retry|remove|terminate`: queue commands for the running scheduler

use crate::output::{self, OutputFormat};
use em_core::{Action, Section};
use em_storage::Observer;

/// What the operator asked for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    Retry,
    Remove,
    Terminate,
}

/// The inbox action for `request` against a task in `section`
pub fn action_for(request: Request, section: Section) -> anyhow::Result<Action> {
    let action = match (request, section) {
        (Request::Retry, Section::Errors) => Action::RetryError,
        (Request::Retry, _) => anyhow::bail!("only failed tasks can be retried (task is {})", section),
        (Request::Remove, Section::Pending) => Action::RemovePending,
        (Request::Remove, Section::Finished) => Action::RemoveFinished,
        (Request::Remove, Section::Errors) => Action::RemoveError,
        (Request::Remove, Section::Running) => {
            anyhow::bail!("running tasks cannot be removed; use `em terminate` first")
        }
        (Request::Terminate, Section::Running) => Action::TerminateRunning,
        (Request::Terminate, _) => anyhow::bail!("task is not running (task is {})", section),
    };
    Ok(action)
}

pub fn handle(
    observer: &mut Observer,
    request: Request,
    id: &str,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let (section, task) = observer.find_task(id)?;
    let action = action_for(request, section)?;
    let envelope = observer.send(action, task.id.as_str())?;
    match format {
        OutputFormat::Json => output::print_json(&envelope),
        OutputFormat::Text => println!("Queued {} for {} ({})", action, task.id, task.name),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use yare::parameterized;

    #[parameterized(
        retry_error = { Request::Retry, Section::Errors, Action::RetryError },
        remove_pending = { Request::Remove, Section::Pending, Action::RemovePending },
        remove_finished = { Request::Remove, Section::Finished, Action::RemoveFinished },
        remove_error = { Request::Remove, Section::Errors, Action::RemoveError },
        terminate = { Request::Terminate, Section::Running, Action::TerminateRunning },
    )]
    fn request_maps_to_action(request: Request, section: Section, expected: Action) {
        assert_eq!(action_for(request, section).unwrap(), expected);
    }

    #[parameterized(
        retry_running = { Request::Retry, Section::Running },
        retry_finished = { Request::Retry, Section::Finished },
        remove_running = { Request::Remove, Section::Running },
        terminate_pending = { Request::Terminate, Section::Pending },
        terminate_error = { Request::Terminate, Section::Errors },
    )]
    fn mismatched_section_is_refused(request: Request, section: Section) {
        assert!(action_for(request, section).is_err());
    }
}
