//! Pipeline execution engine

pub mod engine;
pub mod error;
pub mod run;
pub mod sink;

pub use engine::ExecutionEngine;
pub use error::{EngineError, ErrorKind, GateError, StepError};
pub use run::RunHandle;
pub use sink::{ChannelSink, NoopSink, ProgressEvent, ProgressSink};
