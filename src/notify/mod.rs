//! Run-completion notifications
//!
//! When a run reaches a terminal state, a short summary is posted to a Slack
//! incoming webhook. The webhook comes from the workflow's `slack_webhook`
//! key, falling back to `SLACK_WEBHOOK_URL`. Delivery problems are logged and
//! never change the outcome of the run.

pub mod slack;

pub use slack::{SlackConfig, SlackNotifier};

use crate::cli::output::format_duration;
use crate::core::state::{RunStatus, WorkflowState};
use thiserror::Error;

/// Errors raised while delivering a notification
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("failed to reach webhook: {0}")]
    Request(#[from] reqwest::Error),

    #[error("webhook rejected notification (status {status}): {body}")]
    Rejected { status: u16, body: String },
}

/// Summary of a finished run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub status: RunStatus,
    pub title: String,
    pub text: String,
}

impl Notification {
    pub fn from_state(state: &WorkflowState) -> Self {
        let elapsed = match (state.started_at, state.ended_at) {
            (Some(start), Some(end)) => (end - start)
                .to_std()
                .map(format_duration)
                .unwrap_or_else(|_| "0s".to_string()),
            _ => "0s".to_string(),
        };
        let text = match state.status {
            RunStatus::Success => format!("Completed successfully in {}", elapsed),
            RunStatus::Stopped => format!("Stopped after {}", elapsed),
            _ => format!(
                "Failed after {}: {}",
                elapsed,
                state.error.as_deref().unwrap_or("unknown error")
            ),
        };
        let title = if state.name.is_empty() {
            "Workflow".to_string()
        } else {
            state.name.clone()
        };

        Self {
            status: state.status,
            title,
            text,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Success
    }
}
