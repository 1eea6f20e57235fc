//! CLI command definitions

use clap::Args;
use std::path::PathBuf;

/// Run a workflow
#[derive(Debug, Args, Clone)]
pub struct RunCommand {
    /// Path to the workflow YAML file
    #[arg(short, long)]
    pub workflow: PathBuf,

    /// Path to the instances YAML file
    #[arg(short, long, default_value = "instances.yaml")]
    pub instances: PathBuf,

    /// Input overrides (key=value), repeatable
    #[arg(long = "input", value_parser = parse_key_value)]
    pub inputs: Vec<(String, String)>,

    /// Treat every PR gate as already satisfied
    #[arg(long)]
    pub skip_pr_gates: bool,

    /// Don't save the run to history
    #[arg(long)]
    pub no_history: bool,

    /// History database path
    #[arg(long)]
    pub db_path: Option<PathBuf>,

    /// Don't send a Slack notification when the run ends
    #[arg(long)]
    pub no_notify: bool,
}

/// Validate workflow and instance configuration
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    /// Path to the workflow YAML file
    #[arg(short, long)]
    pub workflow: PathBuf,

    /// Path to the instances YAML file
    #[arg(short, long, default_value = "instances.yaml")]
    pub instances: PathBuf,

    /// Input overrides (key=value), repeatable
    #[arg(long = "input", value_parser = parse_key_value)]
    pub inputs: Vec<(String, String)>,

    /// Print the resolved pipeline as JSON
    #[arg(long)]
    pub json: bool,
}

/// Show run history
#[derive(Debug, Args, Clone)]
pub struct HistoryCommand {
    /// Workflow name to filter by
    #[arg(short, long)]
    pub workflow: Option<String>,

    /// Number of recent runs to show
    #[arg(short, long, default_value_t = 10)]
    pub limit: usize,

    /// Show a single run
    #[arg(long)]
    pub run_id: Option<String>,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,

    /// History database path
    #[arg(long)]
    pub db_path: Option<PathBuf>,
}

/// Parse key=value pairs
pub fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("Invalid key=value pair: {}", s)),
    }
}
