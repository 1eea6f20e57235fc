//! Core domain models for jobflow
//!
//! This module defines the pipeline model, its YAML configuration, and the
//! live execution state a run mutates.

pub mod config;
pub mod pipeline;
pub mod state;

pub use config::{ConfigError, FlowConfig};
pub use pipeline::*;
pub use state::*;
