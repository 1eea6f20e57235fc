//! Slack incoming-webhook delivery

use crate::core::state::{RunStatus, WorkflowState};
use crate::notify::{Notification, NotifyError};
use reqwest::Client;
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const WEBHOOK_ENV: &str = "SLACK_WEBHOOK_URL";
pub const CHANNEL_ENV: &str = "SLACK_CHANNEL";
pub const USERNAME_ENV: &str = "SLACK_USERNAME";

pub const NOTIFY_TIMEOUT: Duration = Duration::from_secs(10);

const SUCCESS_COLOR: &str = "#36a64f";
const FAILURE_COLOR: &str = "#dc3545";
const STOPPED_COLOR: &str = "#daa038";

/// Where and as whom to post
#[derive(Clone, PartialEq, Eq)]
pub struct SlackConfig {
    pub webhook_url: String,
    pub channel: Option<String>,
    pub username: Option<String>,
}

impl SlackConfig {
    pub fn new(webhook_url: impl Into<String>) -> Self {
        Self {
            webhook_url: webhook_url.into(),
            channel: None,
            username: None,
        }
    }

    /// The workflow's webhook wins over `SLACK_WEBHOOK_URL`; `None` when neither is set
    pub fn resolve(workflow_webhook: Option<&str>) -> Option<Self> {
        let webhook_url = workflow_webhook
            .filter(|url| !url.is_empty())
            .map(str::to_string)
            .or_else(|| env_value(WEBHOOK_ENV))?;
        Some(Self {
            webhook_url,
            channel: env_value(CHANNEL_ENV),
            username: env_value(USERNAME_ENV),
        })
    }
}

// The webhook URL is a credential
impl fmt::Debug for SlackConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlackConfig")
            .field("webhook_url", &"***")
            .field("channel", &self.channel)
            .field("username", &self.username)
            .finish()
    }
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.is_empty())
}

#[derive(Debug, Serialize)]
struct Attachment<'a> {
    color: &'a str,
    title: &'a str,
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    channel: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    username: Option<&'a str>,
    text: String,
    attachments: Vec<Attachment<'a>>,
}

/// Posts run summaries to one webhook
#[derive(Debug, Clone)]
pub struct SlackNotifier {
    config: SlackConfig,
    client: Client,
}

impl SlackNotifier {
    pub fn new(config: SlackConfig, client: Client) -> Self {
        Self { config, client }
    }

    /// Deliver one notification
    pub async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        let color = match notification.status {
            RunStatus::Success => SUCCESS_COLOR,
            RunStatus::Stopped => STOPPED_COLOR,
            _ => FAILURE_COLOR,
        };
        let message = Message {
            channel: self.config.channel.as_deref(),
            username: self.config.username.as_deref(),
            text: format!("{}: {}", notification.title, notification.text),
            attachments: vec![Attachment {
                color,
                title: &notification.title,
                text: &notification.text,
            }],
        };

        let response = self
            .client
            .post(&self.config.webhook_url)
            .timeout(NOTIFY_TIMEOUT)
            .json(&message)
            .send()
            .await?;

        let status = response.status();
        debug!(status = status.as_u16(), "webhook response");
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }

    /// Summarize a finished run and post it; failures are only logged
    pub async fn notify_run(&self, state: &WorkflowState) {
        let notification = Notification::from_state(state);
        match self.send(&notification).await {
            Ok(()) => info!(status = state.status.as_str(), "Slack notification sent"),
            Err(e) => warn!("Failed to send Slack notification: {}", e),
        }
    }
}
