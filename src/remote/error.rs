//! Error types for remote build and review APIs

use thiserror::Error;

/// Errors raised by the job trigger and pull-request clients
#[derive(Debug, Error)]
pub enum RemoteError {
    /// The server rejected the credential
    #[error("authentication failed (status {status})")]
    AuthFailure { status: u16 },

    /// Network-level failure
    #[error("request to {url} failed: {source}")]
    Unreachable {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The server answered with a status the client does not expect
    #[error("unexpected status {status} from {url}: {body}")]
    UnexpectedStatus {
        url: String,
        status: u16,
        body: String,
    },

    /// A trigger was accepted without a queue location
    #[error("no Location header returned from trigger")]
    MissingLocation,

    /// The queue item vanished before a build started
    #[error("queue item not found (cancelled?)")]
    QueueItemNotFound,

    /// The queue item was cancelled on the server
    #[error("job was cancelled in queue")]
    QueueItemCancelled,

    #[error("failed to decode response from {url}: {message}")]
    Decode { url: String, message: String },

    #[error("PR #{number} not found in {owner}/{repo}")]
    PrNotFound {
        owner: String,
        repo: String,
        number: u64,
    },

    #[error("no open PR found for branch {branch:?}")]
    NoMatchingPr { branch: String },

    #[error("multiple open PRs ({count}) found for branch {branch:?}")]
    MultipleMatchingPrs { branch: String, count: usize },

    /// The pull request can never reach the target state
    #[error("PR #{number} was closed without being merged")]
    ClosedWithoutMerge { number: u64 },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The operation observed cancellation
    #[error("operation cancelled")]
    Cancelled,
}

impl RemoteError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RemoteError::Cancelled)
    }
}

/// Result type alias for remote operations
pub type Result<T> = std::result::Result<T, RemoteError>;
