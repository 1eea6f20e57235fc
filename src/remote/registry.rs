//! Resolves target ids from the instances file into live clients

use crate::core::config::{ConfigError, FlowConfig, GitHubConfig, InstanceConfig};
use crate::remote::error::Result as RemoteResult;
use crate::remote::github::GitHubClient;
use crate::remote::jenkins::{
    http_client, JenkinsClient, DEFAULT_BUILD_POLL, DEFAULT_QUEUE_POLL, DEFAULT_REQUEST_TIMEOUT,
};
use crate::remote::{JobTrigger, TargetResolver};
use reqwest::Client;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Known build server instances plus the review API settings.
///
/// Credentials are resolved when a client is requested, so a workflow that
/// never touches an instance does not need its environment variable set.
#[derive(Debug, Clone)]
pub struct TargetRegistry {
    instances: HashMap<String, InstanceConfig>,
    github: GitHubConfig,
    client: Client,
    queue_poll: Duration,
    build_poll: Duration,
}

impl TargetRegistry {
    pub fn new(
        instances: HashMap<String, InstanceConfig>,
        github: Option<GitHubConfig>,
    ) -> RemoteResult<Self> {
        Ok(Self {
            instances,
            github: github.unwrap_or_default(),
            client: http_client(DEFAULT_REQUEST_TIMEOUT)?,
            queue_poll: DEFAULT_QUEUE_POLL,
            build_poll: DEFAULT_BUILD_POLL,
        })
    }

    pub fn from_config(config: &FlowConfig) -> RemoteResult<Self> {
        Self::new(config.instances.clone(), config.github.clone())
    }

    /// Override poll intervals for every job client handed out
    pub fn with_poll_intervals(mut self, queue_poll: Duration, build_poll: Duration) -> Self {
        self.queue_poll = queue_poll;
        self.build_poll = build_poll;
        self
    }

    /// The pooled HTTP client every handed-out client shares
    pub fn shared_client(&self) -> &Client {
        &self.client
    }

    pub fn contains(&self, target: &str) -> bool {
        self.instances.contains_key(target)
    }

    /// Build the review API client; an absent token is allowed
    pub fn pull_requests(&self) -> Result<GitHubClient, ConfigError> {
        let token = self.github.credential()?;
        let client = GitHubClient::new(token, self.client.clone());
        Ok(match &self.github.api_url {
            Some(api_url) if !api_url.is_empty() => client.with_api_url(api_url.clone()),
            _ => client,
        })
    }
}

impl TargetResolver for TargetRegistry {
    fn client_for(&self, target: &str) -> Result<Arc<dyn JobTrigger>, ConfigError> {
        let instance = self
            .instances
            .get(target)
            .ok_or_else(|| ConfigError::UnknownTarget(target.to_string()))?;
        let credential = instance.credential()?;
        debug!(target, url = %instance.url, "resolved build server");

        let client = JenkinsClient::with_client(&instance.url, &credential, self.client.clone())
            .with_poll_intervals(self.queue_poll, self.build_poll);
        Ok(Arc::new(client))
    }
}
