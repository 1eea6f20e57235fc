//! Clients for the remote systems a pipeline talks to
//!
//! Two leaf clients live here: a job trigger client that submits a build and
//! follows it through the server's queue to a final result, and a
//! pull-request client that resolves and watches a PR until it reaches a
//! target state. The engine only sees them through the traits below, so
//! tests can swap in scripted backends.

pub mod credentials;
pub mod error;
pub mod github;
pub mod jenkins;
pub mod poll;
pub mod registry;

pub use credentials::Credential;
pub use error::RemoteError;
pub use github::{GitHubClient, PrState, PrStatus};
pub use jenkins::JenkinsClient;
pub use registry::TargetRegistry;

use crate::core::config::ConfigError;
use crate::core::pipeline::TargetState;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Submits jobs to one build server and follows them to completion
#[async_trait]
pub trait JobTrigger: Send + Sync {
    /// Submit a job; returns the opaque queue handle
    async fn trigger(
        &self,
        cancel: &CancellationToken,
        job_path: &str,
        params: &HashMap<String, String>,
    ) -> error::Result<String>;

    /// Wait until the queued job starts; returns the build URL
    async fn await_start(&self, cancel: &CancellationToken, queue_handle: &str)
        -> error::Result<String>;

    /// Wait until the build finishes; returns the server's result string verbatim
    async fn await_completion(
        &self,
        cancel: &CancellationToken,
        target_url: &str,
    ) -> error::Result<String>;
}

/// Looks up the job trigger client for a target id
pub trait TargetResolver: Send + Sync {
    fn client_for(&self, target: &str) -> Result<Arc<dyn JobTrigger>, ConfigError>;
}

/// Read access to a source-control review API
#[async_trait]
pub trait PullRequestApi: Send + Sync {
    async fn get_status(
        &self,
        cancel: &CancellationToken,
        owner: &str,
        repo: &str,
        number: u64,
    ) -> error::Result<PrStatus>;

    /// Resolve the single open PR whose head branch matches `branch`
    async fn find_by_branch(
        &self,
        cancel: &CancellationToken,
        owner: &str,
        repo: &str,
        branch: &str,
    ) -> error::Result<PrStatus>;

    /// Poll until the PR reaches `target`, checking once before the first sleep
    async fn await_target_state(
        &self,
        cancel: &CancellationToken,
        owner: &str,
        repo: &str,
        number: u64,
        target: TargetState,
        interval: Duration,
    ) -> error::Result<PrStatus>;
}
