//! Job trigger client for Jenkins-style build servers
//!
//! A build goes through two phases on the server: it sits in a queue until an
//! executor picks it up, then it runs. [`JenkinsClient`] follows both phases
//! by polling the queue item and then the build, sleeping before each poll.

use crate::remote::credentials::Credential;
use crate::remote::error::{RemoteError, Result};
use crate::remote::poll::{tick, until_cancelled};
use crate::remote::JobTrigger;
use async_trait::async_trait;
use reqwest::{header, Client, Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

pub const DEFAULT_QUEUE_POLL: Duration = Duration::from_secs(2);
pub const DEFAULT_BUILD_POLL: Duration = Duration::from_secs(5);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct QueueItem {
    #[serde(default)]
    executable: Option<Executable>,
    #[serde(default)]
    cancelled: bool,
}

#[derive(Debug, Deserialize)]
struct Executable {
    #[serde(default)]
    url: String,
}

#[derive(Debug, Deserialize)]
struct BuildInfo {
    #[serde(default)]
    building: bool,
    #[serde(default)]
    result: Option<String>,
}

/// HTTP client with a per-request timeout
pub fn http_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| RemoteError::InvalidRequest(format!("failed to build HTTP client: {}", e)))
}

/// Client for one build server instance
#[derive(Debug, Clone)]
pub struct JenkinsClient {
    base_url: String,
    credential: Credential,
    client: Client,
    queue_poll: Duration,
    build_poll: Duration,
}

impl JenkinsClient {
    /// Create a client with its own HTTP connection pool
    pub fn new(base_url: impl Into<String>, credential: &str) -> Result<Self> {
        let client = http_client(DEFAULT_REQUEST_TIMEOUT)?;
        Ok(Self::with_client(base_url, credential, client))
    }

    /// Create a client sharing an existing HTTP client
    pub fn with_client(base_url: impl Into<String>, credential: &str, client: Client) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            credential: Credential::parse(credential),
            client,
            queue_poll: DEFAULT_QUEUE_POLL,
            build_poll: DEFAULT_BUILD_POLL,
        }
    }

    /// Override the queue and build poll intervals
    pub fn with_poll_intervals(mut self, queue_poll: Duration, build_poll: Duration) -> Self {
        self.queue_poll = queue_poll;
        self.build_poll = build_poll;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn trigger_url(&self, job_path: &str, parameterized: bool) -> String {
        let endpoint = if parameterized {
            "buildWithParameters"
        } else {
            "build"
        };
        let job_path = job_path.trim_end_matches('/');
        if job_path.starts_with('/') {
            format!("{}{}/{}", self.base_url, job_path, endpoint)
        } else {
            format!("{}/{}/{}", self.base_url, job_path, endpoint)
        }
    }

    /// Queue handles are normally absolute; relative ones hang off the base URL
    fn absolute(&self, url: &str) -> String {
        if url.starts_with("http://") || url.starts_with("https://") {
            url.to_string()
        } else if url.starts_with('/') {
            format!("{}{}", self.base_url, url)
        } else {
            format!("{}/{}", self.base_url, url)
        }
    }

    fn api_json_url(&self, url: &str) -> String {
        let mut url = self.absolute(url);
        if !url.ends_with('/') {
            url.push('/');
        }
        url.push_str("api/json");
        url
    }

    async fn send(
        &self,
        cancel: &CancellationToken,
        method: Method,
        url: &str,
        query: Option<&HashMap<String, String>>,
    ) -> Result<Response> {
        let mut request = self
            .client
            .request(method.clone(), url)
            .header(header::AUTHORIZATION, self.credential.header_value());
        if let Some(query) = query {
            let mut pairs: Vec<(&String, &String)> = query.iter().collect();
            pairs.sort();
            request = request.query(&pairs);
        }

        let response = until_cancelled(cancel, async {
            request.send().await.map_err(|source| RemoteError::Unreachable {
                url: url.to_string(),
                source,
            })
        })
        .await?;

        trace!(%method, url, status = response.status().as_u16(), "build server response");

        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(RemoteError::AuthFailure {
                status: response.status().as_u16(),
            }),
            _ => Ok(response),
        }
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        cancel: &CancellationToken,
        url: &str,
    ) -> Result<Option<T>> {
        let response = self.send(cancel, Method::GET, url, None).await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if status != StatusCode::OK {
            return Err(unexpected(url, response).await);
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

async fn unexpected(url: &str, response: Response) -> RemoteError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    RemoteError::UnexpectedStatus {
        url: url.to_string(),
        status,
        body,
    }
}

#[async_trait]
impl JobTrigger for JenkinsClient {
    async fn trigger(
        &self,
        cancel: &CancellationToken,
        job_path: &str,
        params: &HashMap<String, String>,
    ) -> Result<String> {
        let url = self.trigger_url(job_path, !params.is_empty());
        let query = (!params.is_empty()).then_some(params);
        debug!(url = %url, params = params.len(), "triggering job");

        let response = self.send(cancel, Method::POST, &url, query).await?;
        match response.status() {
            StatusCode::CREATED | StatusCode::ACCEPTED => {}
            _ => return Err(unexpected(&url, response).await),
        }

        response
            .headers()
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .ok_or(RemoteError::MissingLocation)
    }

    async fn await_start(&self, cancel: &CancellationToken, queue_handle: &str) -> Result<String> {
        let url = self.api_json_url(queue_handle);
        loop {
            tick(cancel, self.queue_poll).await?;

            let item: QueueItem = self
                .get_json(cancel, &url)
                .await?
                .ok_or(RemoteError::QueueItemNotFound)?;

            if item.cancelled {
                return Err(RemoteError::QueueItemCancelled);
            }
            if let Some(url) = item.executable.map(|e| e.url).filter(|u| !u.is_empty()) {
                return Ok(url);
            }
            debug!(queue = queue_handle, "still queued");
        }
    }

    async fn await_completion(&self, cancel: &CancellationToken, target_url: &str) -> Result<String> {
        let url = self.api_json_url(target_url);
        loop {
            tick(cancel, self.build_poll).await?;

            let build: BuildInfo = match self.get_json(cancel, &url).await? {
                Some(build) => build,
                None => {
                    return Err(RemoteError::UnexpectedStatus {
                        url: url.clone(),
                        status: 404,
                        body: String::new(),
                    })
                }
            };

            if !build.building {
                return Ok(build.result.unwrap_or_default());
            }
            debug!(build = target_url, "still building");
        }
    }
}
