// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Control commands issued by an observer

use crate::job::JobId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Recognized control actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    RetryError,
    RemovePending,
    RemoveFinished,
    RemoveError,
    TerminateRunning,
}

impl Action {
    pub const ALL: [Action; 5] = [
        Action::RetryError,
        Action::RemovePending,
        Action::RemoveFinished,
        Action::RemoveError,
        Action::TerminateRunning,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::RetryError => "retry_error",
            Action::RemovePending => "remove_pending",
            Action::RemoveFinished => "remove_finished",
            Action::RemoveError => "remove_error",
            Action::TerminateRunning => "terminate_running",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Action strings the scheduler refuses
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActionError {
    #[error("running entries cannot be removed; use terminate_running")]
    RemoveRunning,
    #[error("unknown action: {0}")]
    Unknown(String),
}

impl FromStr for Action {
    type Err = ActionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "remove_running" {
            return Err(ActionError::RemoveRunning);
        }
        Action::ALL
            .into_iter()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| ActionError::Unknown(s.to_string()))
    }
}

/// A command entry in the inbox.
///
/// The action is kept as the raw string so entries written by newer or
/// misbehaving observers still parse and can be rejected individually.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    pub id: String,
    pub action: String,
    pub target: JobId,
    pub created_at: DateTime<Utc>,
}

impl CommandEnvelope {
    pub fn new(action: Action, target: JobId) -> Self {
        Self {
            id: uuid::Uuid::new_v4().simple().to_string(),
            action: action.as_str().to_string(),
            target,
            created_at: Utc::now(),
        }
    }

    pub fn action(&self) -> Result<Action, ActionError> {
        self.action.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_action_parses_back() {
        for action in Action::ALL {
            assert_eq!(action.as_str().parse::<Action>(), Ok(action));
        }
    }

    #[test]
    fn remove_running_is_rejected_with_hint() {
        let err = "remove_running".parse::<Action>().unwrap_err();
        assert_eq!(err, ActionError::RemoveRunning);
        assert!(err.to_string().contains("terminate_running"));
    }

    #[test]
    fn envelope_keeps_unknown_action_text() {
        let json = r#"{"id":"c1","action":"reboot","target":"job-1","created_at":"2024-01-01T00:00:00Z"}"#;
        let envelope: CommandEnvelope = serde_json::from_str(json).unwrap();
        assert_eq!(
            envelope.action(),
            Err(ActionError::Unknown("reboot".to_string()))
        );
    }
}
