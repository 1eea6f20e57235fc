//! Errors surfaced by the execution engine
//!
//! Every failure is wrapped with the name of the pipeline item it came from,
//! so the top-level message alone identifies which of N items broke.

use crate::core::config::ConfigError;
use crate::remote::RemoteError;
use std::fmt;
use thiserror::Error;

/// Coarse classification used by callers to decide how to react
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ConfigInvalid,
    AuthFailure,
    Unreachable,
    AmbiguousResolution,
    TerminalGateFailure,
    StepFailure,
    Cancelled,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::ConfigInvalid => "config invalid",
            ErrorKind::AuthFailure => "auth failure",
            ErrorKind::Unreachable => "unreachable",
            ErrorKind::AmbiguousResolution => "ambiguous resolution",
            ErrorKind::TerminalGateFailure => "terminal gate failure",
            ErrorKind::StepFailure => "step failure",
            ErrorKind::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// A run-level failure, carrying the failing item's name
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("step {step:?} failed: {source}")]
    Step {
        step: String,
        #[source]
        source: StepError,
    },

    #[error("parallel group {group:?} failed: {source}")]
    Group {
        group: String,
        #[source]
        source: Box<EngineError>,
    },

    #[error("PR wait {gate:?} failed: {source}")]
    Gate {
        gate: String,
        #[source]
        source: GateError,
    },

    /// Cancellation observed between items
    #[error("workflow cancelled")]
    Cancelled,
}

/// Failure inside one job step
#[derive(Debug, Error)]
pub enum StepError {
    #[error(transparent)]
    Target(ConfigError),

    #[error("failed to trigger: {0}")]
    Trigger(#[source] RemoteError),

    #[error("failed waiting for queue: {0}")]
    Queue(#[source] RemoteError),

    #[error("failed waiting for build: {0}")]
    Build(#[source] RemoteError),

    /// The build finished with something other than the success marker
    #[error("failed with result: {0}")]
    Result(String),
}

/// Failure inside one pull-request gate
#[derive(Debug, Error)]
pub enum GateError {
    #[error("review API unavailable: {0}")]
    Unavailable(#[source] ConfigError),

    #[error("failed to resolve branch {branch:?}: {source}")]
    Resolve {
        branch: String,
        #[source]
        source: RemoteError,
    },

    #[error("failed to fetch PR #{number} metadata: {source}")]
    Metadata {
        number: u64,
        #[source]
        source: RemoteError,
    },

    #[error(transparent)]
    Wait(RemoteError),
}

fn remote_kind(err: &RemoteError) -> ErrorKind {
    match err {
        RemoteError::AuthFailure { .. } => ErrorKind::AuthFailure,
        RemoteError::NoMatchingPr { .. } | RemoteError::MultipleMatchingPrs { .. } => {
            ErrorKind::AmbiguousResolution
        }
        RemoteError::ClosedWithoutMerge { .. } => ErrorKind::TerminalGateFailure,
        RemoteError::QueueItemCancelled => ErrorKind::StepFailure,
        RemoteError::Cancelled => ErrorKind::Cancelled,
        RemoteError::Unreachable { .. }
        | RemoteError::UnexpectedStatus { .. }
        | RemoteError::MissingLocation
        | RemoteError::QueueItemNotFound
        | RemoteError::Decode { .. }
        | RemoteError::PrNotFound { .. }
        | RemoteError::InvalidRequest(_) => ErrorKind::Unreachable,
    }
}

fn config_kind(err: &ConfigError) -> ErrorKind {
    match err {
        ConfigError::MissingCredential(_) => ErrorKind::AuthFailure,
        _ => ErrorKind::ConfigInvalid,
    }
}

impl StepError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StepError::Target(err) => config_kind(err),
            StepError::Trigger(err) | StepError::Queue(err) | StepError::Build(err) => {
                remote_kind(err)
            }
            StepError::Result(_) => ErrorKind::StepFailure,
        }
    }
}

impl GateError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GateError::Unavailable(err) => config_kind(err),
            GateError::Resolve { source, .. } | GateError::Metadata { source, .. } => {
                remote_kind(source)
            }
            GateError::Wait(err) => remote_kind(err),
        }
    }
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Step { source, .. } => source.kind(),
            EngineError::Group { source, .. } => source.kind(),
            EngineError::Gate { source, .. } => source.kind(),
            EngineError::Cancelled => ErrorKind::Cancelled,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind() == ErrorKind::Cancelled
    }

    /// Name of the innermost failing step, if a step failed
    pub fn step_name(&self) -> Option<&str> {
        match self {
            EngineError::Step { step, .. } => Some(step),
            EngineError::Group { source, .. } => source.step_name(),
            _ => None,
        }
    }
}
