//! jobflow - runs remote build jobs and pull-request gates as one pipeline

pub mod cli;
pub mod core;
pub mod execution;
pub mod notify;
pub mod persistence;
pub mod remote;

// Re-export commonly used types
pub use core::{ConfigError, FlowConfig, Pipeline, PipelineItem, RunStatus, WorkflowState};
pub use execution::{
    ChannelSink, EngineError, ErrorKind, ExecutionEngine, NoopSink, ProgressEvent, ProgressSink,
    RunHandle,
};
pub use remote::{GitHubClient, JenkinsClient, JobTrigger, PullRequestApi, TargetRegistry, TargetResolver};
