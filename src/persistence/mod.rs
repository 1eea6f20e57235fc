//! Persistence layer for workflow run history

#[cfg(feature = "sqlite")]
pub mod store;

#[cfg(feature = "sqlite")]
pub use store::SqliteRunStore;

use crate::core::state::{RunStatus, WorkflowState};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

/// Summary of one finished (or interrupted) run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: Uuid,

    pub workflow_name: String,

    /// Workflow file the run was started from
    pub workflow_path: String,

    pub status: RunStatus,

    pub started_at: DateTime<Utc>,

    pub ended_at: Option<DateTime<Utc>>,

    /// Inputs after caller overrides
    pub inputs: BTreeMap<String, String>,

    pub skip_pr_gates: bool,

    pub error: Option<String>,

    pub steps_completed: usize,

    pub steps_total: usize,

    /// Workflow file contents as they were when the run started
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_snapshot: Option<String>,
}

impl RunRecord {
    /// Summarize a run state for history
    pub fn from_state(state: &WorkflowState, workflow_path: &str, skip_pr_gates: bool) -> Self {
        let (steps_completed, steps_total) = state.step_progress();
        Self {
            run_id: state.run_id,
            workflow_name: state.name.clone(),
            workflow_path: workflow_path.to_string(),
            status: state.status,
            started_at: state.started_at.unwrap_or_else(Utc::now),
            ended_at: state.ended_at,
            inputs: state.inputs.clone(),
            skip_pr_gates,
            error: state.error.clone(),
            steps_completed,
            steps_total,
            config_snapshot: None,
        }
    }

    pub fn with_config_snapshot(mut self, snapshot: impl Into<String>) -> Self {
        self.config_snapshot = Some(snapshot.into());
        self
    }

    pub fn duration(&self) -> Option<chrono::Duration> {
        self.ended_at.map(|end| end - self.started_at)
    }
}

/// Trait for persistence backends
#[async_trait::async_trait]
pub trait PersistenceBackend: Send + Sync {
    /// Insert or replace a run
    async fn save_run(&self, run: &RunRecord) -> Result<()>;

    async fn load_run(&self, run_id: Uuid) -> Result<Option<RunRecord>>;

    /// Most recent runs first, optionally for one workflow
    async fn list_runs(&self, workflow_name: Option<&str>, limit: usize) -> Result<Vec<RunRecord>>;

    /// Every workflow name with at least one run
    async fn list_workflows(&self) -> Result<Vec<String>>;
}

/// In-memory persistence (for testing or ephemeral use)
#[derive(Default)]
pub struct InMemoryPersistence {
    runs: tokio::sync::RwLock<HashMap<Uuid, RunRecord>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl PersistenceBackend for InMemoryPersistence {
    async fn save_run(&self, run: &RunRecord) -> Result<()> {
        self.runs.write().await.insert(run.run_id, run.clone());
        Ok(())
    }

    async fn load_run(&self, run_id: Uuid) -> Result<Option<RunRecord>> {
        Ok(self.runs.read().await.get(&run_id).cloned())
    }

    async fn list_runs(&self, workflow_name: Option<&str>, limit: usize) -> Result<Vec<RunRecord>> {
        let runs = self.runs.read().await;
        let mut matching: Vec<RunRecord> = runs
            .values()
            .filter(|r| workflow_name.map_or(true, |name| r.workflow_name == name))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        matching.truncate(limit);
        Ok(matching)
    }

    async fn list_workflows(&self) -> Result<Vec<String>> {
        let runs = self.runs.read().await;
        let mut names: Vec<String> = runs.values().map(|r| r.workflow_name.clone()).collect();
        names.sort();
        names.dedup();
        Ok(names)
    }
}
