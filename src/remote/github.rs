//! Pull-request client for the GitHub REST API

use crate::core::pipeline::{TargetState, DEFAULT_GATE_POLL};
use crate::remote::error::{RemoteError, Result};
use crate::remote::poll::{tick, until_cancelled};
use crate::remote::PullRequestApi;
use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

pub const DEFAULT_API_URL: &str = "https://api.github.com";
const ACCEPT: &str = "application/vnd.github.v3+json";
const USER_AGENT: &str = concat!("jobflow/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrState {
    #[default]
    Open,
    Closed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrHead {
    #[serde(rename = "ref", default)]
    pub branch: String,
}

/// Snapshot of a pull request as reported by the API
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrStatus {
    pub number: u64,
    #[serde(default)]
    pub state: PrState,
    #[serde(default)]
    pub merged: bool,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub html_url: String,
    #[serde(default)]
    pub head: PrHead,
}

/// Outcome of comparing a PR snapshot against the wanted state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    Reached,
    Waiting,
}

/// Decide whether `pr` satisfies `target`.
///
/// A PR closed without merging can never become merged, so waiting for
/// `merged` on it is a terminal error rather than another poll.
pub fn evaluate(pr: &PrStatus, target: TargetState) -> Result<Progress> {
    match target {
        TargetState::Merged if pr.merged => Ok(Progress::Reached),
        TargetState::Merged if pr.state == PrState::Closed => {
            Err(RemoteError::ClosedWithoutMerge { number: pr.number })
        }
        TargetState::Closed if pr.state == PrState::Closed => Ok(Progress::Reached),
        _ => Ok(Progress::Waiting),
    }
}

/// GitHub REST client; the token is optional for public repositories
#[derive(Debug, Clone)]
pub struct GitHubClient {
    api_url: String,
    token: Option<String>,
    client: Client,
}

impl GitHubClient {
    pub fn new(token: Option<String>, client: Client) -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            token: token.filter(|t| !t.is_empty()),
            client,
        }
    }

    /// Point the client at another API root, e.g. GitHub Enterprise or a mock
    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    async fn get<T: DeserializeOwned>(&self, cancel: &CancellationToken, url: &str) -> Result<Option<T>> {
        let mut request = self
            .client
            .get(url)
            .header(header::ACCEPT, ACCEPT)
            .header(header::USER_AGENT, USER_AGENT);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = until_cancelled(cancel, async {
            request.send().await.map_err(|source| RemoteError::Unreachable {
                url: url.to_string(),
                source,
            })
        })
        .await?;

        let status = response.status();
        trace!(url, status = status.as_u16(), "review API response");

        match status {
            StatusCode::OK => {}
            StatusCode::NOT_FOUND => return Ok(None),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(RemoteError::AuthFailure {
                    status: status.as_u16(),
                })
            }
            _ => {
                let body = response.text().await.unwrap_or_default();
                return Err(RemoteError::UnexpectedStatus {
                    url: url.to_string(),
                    status: status.as_u16(),
                    body,
                });
            }
        }

        let body = until_cancelled(cancel, async {
            response.bytes().await.map_err(|source| RemoteError::Unreachable {
                url: url.to_string(),
                source,
            })
        })
        .await?;
        serde_json::from_slice(&body)
            .map(Some)
            .map_err(|e| RemoteError::Decode {
                url: url.to_string(),
                message: e.to_string(),
            })
    }
}

#[async_trait]
impl PullRequestApi for GitHubClient {
    async fn get_status(
        &self,
        cancel: &CancellationToken,
        owner: &str,
        repo: &str,
        number: u64,
    ) -> Result<PrStatus> {
        let url = format!("{}/repos/{}/{}/pulls/{}", self.api_url, owner, repo, number);
        self.get(cancel, &url)
            .await?
            .ok_or_else(|| RemoteError::PrNotFound {
                owner: owner.to_string(),
                repo: repo.to_string(),
                number,
            })
    }

    async fn find_by_branch(
        &self,
        cancel: &CancellationToken,
        owner: &str,
        repo: &str,
        branch: &str,
    ) -> Result<PrStatus> {
        if branch.is_empty() {
            return Err(RemoteError::InvalidRequest(
                "branch name must be provided".to_string(),
            ));
        }

        let url = format!(
            "{}/repos/{}/{}/pulls?state=open&per_page=100",
            self.api_url, owner, repo
        );
        // A 404 here means the repository itself is unknown, not that no PR matched
        let pulls: Vec<PrStatus> = self
            .get(cancel, &url)
            .await?
            .ok_or_else(|| RemoteError::UnexpectedStatus {
                url: url.clone(),
                status: StatusCode::NOT_FOUND.as_u16(),
                body: format!("repository {}/{} not found", owner, repo),
            })?;

        let mut matches: Vec<PrStatus> = pulls
            .into_iter()
            .filter(|pr| pr.head.branch.eq_ignore_ascii_case(branch))
            .collect();

        match matches.len() {
            0 => Err(RemoteError::NoMatchingPr {
                branch: branch.to_string(),
            }),
            1 => Ok(matches.remove(0)),
            count => Err(RemoteError::MultipleMatchingPrs {
                branch: branch.to_string(),
                count,
            }),
        }
    }

    async fn await_target_state(
        &self,
        cancel: &CancellationToken,
        owner: &str,
        repo: &str,
        number: u64,
        target: TargetState,
        interval: Duration,
    ) -> Result<PrStatus> {
        let interval = if interval.is_zero() {
            DEFAULT_GATE_POLL
        } else {
            interval
        };

        loop {
            let pr = self.get_status(cancel, owner, repo, number).await?;
            if evaluate(&pr, target)? == Progress::Reached {
                info!(number, state = %target, merged = pr.merged, "PR reached target state");
                return Ok(pr);
            }
            debug!(number, "PR still waiting for state {:?}", target.as_str());
            tick(cancel, interval).await?;
        }
    }
}
