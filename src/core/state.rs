//! Execution state models

use crate::core::pipeline::{Pipeline, PipelineItem, PrGate};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Status of a single step, group, or gate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Pending,
    Running,
    Success,
    Failed,
    /// Never ran to completion, e.g. cancelled by a failing sibling
    Skipped,
}

impl ItemStatus {
    /// Check if the status is terminal
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ItemStatus::Success | ItemStatus::Failed | ItemStatus::Skipped
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Pending => "pending",
            ItemStatus::Running => "running",
            ItemStatus::Success => "success",
            ItemStatus::Failed => "failed",
            ItemStatus::Skipped => "skipped",
        }
    }
}

/// Overall workflow status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Running,
    Success,
    Failed,
    /// Cancelled by the caller; not an execution error
    Stopped,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Success => "success",
            RunStatus::Failed => "failed",
            RunStatus::Stopped => "stopped",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Success | RunStatus::Failed | RunStatus::Stopped
        )
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RunStatus::Pending),
            "running" => Ok(RunStatus::Running),
            "success" => Ok(RunStatus::Success),
            "failed" => Ok(RunStatus::Failed),
            "stopped" => Ok(RunStatus::Stopped),
            other => Err(format!("unknown run status {:?}", other)),
        }
    }
}

/// Live state of one job step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepState {
    pub name: String,
    pub target: String,
    pub job: String,
    pub status: ItemStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    /// URL of the remote build, set only once the job actually started
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_url: Option<String>,
}

/// Live state of a parallel group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupState {
    pub name: String,
    pub steps: Vec<StepState>,
    pub status: ItemStatus,
}

impl GroupState {
    /// Recompute the group status from its members
    fn refresh_status(&mut self) {
        let any_failed = self.steps.iter().any(|s| s.status == ItemStatus::Failed);
        let any_running = self.steps.iter().any(|s| s.status == ItemStatus::Running);
        let all_success = self.steps.iter().all(|s| s.status == ItemStatus::Success);

        self.status = if any_failed {
            ItemStatus::Failed
        } else if any_running {
            ItemStatus::Running
        } else if all_success {
            ItemStatus::Success
        } else {
            ItemStatus::Pending
        };
    }
}

/// Live state of a pull-request gate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateState {
    pub name: String,
    pub owner: String,
    pub repo: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub head_branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pr_number: Option<u64>,
    pub wait_for: String,
    pub status: ItemStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl GateState {
    fn from_gate(gate: &PrGate) -> Self {
        Self {
            name: gate.name.clone(),
            owner: gate.owner.clone(),
            repo: gate.repo.clone(),
            head_branch: gate.head_branch().map(str::to_string),
            pr_number: gate.number(),
            wait_for: gate.target_state.to_string(),
            status: ItemStatus::Pending,
            error: None,
            started_at: None,
            ended_at: None,
            html_url: None,
            title: None,
        }
    }

    /// Human-readable description of the pull request being watched
    pub fn describe(&self) -> String {
        match (self.pr_number, &self.head_branch) {
            (Some(number), _) => format!("PR #{}", number),
            (None, Some(branch)) => format!("PR on branch {:?}", branch),
            (None, None) => "PR".to_string(),
        }
    }
}

/// Metadata learned while resolving a gate, merged into state by the engine
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedGate {
    pub number: Option<u64>,
    pub html_url: Option<String>,
    pub title: Option<String>,
}

/// Live state mirroring one pipeline item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ItemState {
    Step(StepState),
    Parallel(GroupState),
    Gate(GateState),
}

impl ItemState {
    pub fn status(&self) -> ItemStatus {
        match self {
            ItemState::Step(step) => step.status,
            ItemState::Parallel(group) => group.status,
            ItemState::Gate(gate) => gate.status,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            ItemState::Step(step) => &step.name,
            ItemState::Parallel(group) => &group.name,
            ItemState::Gate(gate) => &gate.name,
        }
    }
}

/// Complete state of one workflow run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    /// Unique run ID
    pub run_id: Uuid,
    pub name: String,
    pub status: RunStatus,
    pub inputs: BTreeMap<String, String>,
    pub items: Vec<ItemState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WorkflowState {
    /// Fresh state for a pipeline, every item pending
    pub fn new(pipeline: &Pipeline) -> Self {
        let step_state = |step: &crate::core::pipeline::Step| StepState {
            name: step.name.clone(),
            target: step.target.clone(),
            job: step.job.clone(),
            status: ItemStatus::Pending,
            result: None,
            error: None,
            started_at: None,
            ended_at: None,
            target_url: None,
        };

        let items = pipeline
            .items
            .iter()
            .map(|item| match item {
                PipelineItem::Step(step) => ItemState::Step(step_state(step)),
                PipelineItem::Parallel(group) => ItemState::Parallel(GroupState {
                    name: group.name.clone(),
                    steps: group.steps.iter().map(step_state).collect(),
                    status: ItemStatus::Pending,
                }),
                PipelineItem::Gate(gate) => ItemState::Gate(GateState::from_gate(gate)),
            })
            .collect();

        Self {
            run_id: Uuid::new_v4(),
            name: pipeline.name.clone(),
            status: RunStatus::Pending,
            inputs: pipeline.inputs.clone(),
            items,
            started_at: None,
            ended_at: None,
            error: None,
        }
    }

    /// Mark the workflow as started
    pub fn start(&mut self) {
        self.status = RunStatus::Running;
        self.started_at = Some(Utc::now());
        self.ended_at = None;
        self.error = None;
    }

    /// Mark the workflow as finished
    pub fn finish(&mut self, status: RunStatus, error: Option<String>) {
        self.status = status;
        self.error = error;
        self.ended_at = Some(Utc::now());
    }

    /// Step state by position; `step_index` is ignored for single steps
    pub fn step(&self, item_index: usize, step_index: usize) -> Option<&StepState> {
        match self.items.get(item_index)? {
            ItemState::Step(step) => Some(step),
            ItemState::Parallel(group) => group.steps.get(step_index),
            ItemState::Gate(_) => None,
        }
    }

    pub fn gate(&self, item_index: usize) -> Option<&GateState> {
        match self.items.get(item_index)? {
            ItemState::Gate(gate) => Some(gate),
            _ => None,
        }
    }

    /// Record a step transition.
    ///
    /// Entering `Running` always replaces `target_url`, so a fresh attempt
    /// never shows the URL of an earlier build.
    pub fn update_step(
        &mut self,
        item_index: usize,
        step_index: usize,
        status: ItemStatus,
        result: Option<String>,
        error: Option<String>,
        target_url: Option<String>,
    ) {
        match self.items.get_mut(item_index) {
            Some(ItemState::Step(step)) => {
                apply_step_update(step, status, result, error, target_url);
            }
            Some(ItemState::Parallel(group)) => {
                if let Some(step) = group.steps.get_mut(step_index) {
                    apply_step_update(step, status, result, error, target_url);
                }
                group.refresh_status();
            }
            Some(ItemState::Gate(_)) | None => {}
        }
    }

    /// Mark a gate as running
    pub fn start_gate(&mut self, item_index: usize) {
        if let Some(ItemState::Gate(gate)) = self.items.get_mut(item_index) {
            gate.status = ItemStatus::Running;
            gate.error = None;
            gate.ended_at = None;
            if gate.started_at.is_none() {
                gate.started_at = Some(Utc::now());
            }
        }
    }

    /// Merge resolved metadata into a gate without changing its status
    pub fn merge_gate(&mut self, item_index: usize, resolved: &ResolvedGate) {
        if let Some(ItemState::Gate(gate)) = self.items.get_mut(item_index) {
            if let Some(number) = resolved.number.filter(|n| *n > 0) {
                gate.pr_number = Some(number);
            }
            if let Some(url) = resolved.html_url.as_ref().filter(|u| !u.is_empty()) {
                gate.html_url = Some(url.clone());
            }
            if let Some(title) = resolved.title.as_ref().filter(|t| !t.is_empty()) {
                gate.title = Some(title.clone());
            }
            if gate.status == ItemStatus::Pending {
                gate.status = ItemStatus::Running;
            }
        }
    }

    /// Mark a gate as satisfied
    pub fn complete_gate(&mut self, item_index: usize) {
        if let Some(ItemState::Gate(gate)) = self.items.get_mut(item_index) {
            let now = Utc::now();
            gate.status = ItemStatus::Success;
            gate.error = None;
            gate.started_at.get_or_insert(now);
            gate.ended_at = Some(now);
        }
    }

    /// Mark a gate as failed
    pub fn fail_gate(&mut self, item_index: usize, error: String) {
        if let Some(ItemState::Gate(gate)) = self.items.get_mut(item_index) {
            let now = Utc::now();
            gate.status = ItemStatus::Failed;
            gate.error = Some(error);
            gate.started_at.get_or_insert(now);
            gate.ended_at = Some(now);
        }
    }

    /// Count of (finished, total) job steps
    pub fn step_progress(&self) -> (usize, usize) {
        let mut done = 0;
        let mut total = 0;
        for item in &self.items {
            let steps: Vec<&StepState> = match item {
                ItemState::Step(step) => vec![step],
                ItemState::Parallel(group) => group.steps.iter().collect(),
                ItemState::Gate(_) => continue,
            };
            total += steps.len();
            done += steps.iter().filter(|s| s.status.is_terminal()).count();
        }
        (done, total)
    }
}

fn apply_step_update(
    step: &mut StepState,
    status: ItemStatus,
    result: Option<String>,
    error: Option<String>,
    target_url: Option<String>,
) {
    let now = Utc::now();
    step.status = status;
    step.result = result;
    step.error = error;

    match status {
        ItemStatus::Running => {
            step.target_url = target_url;
            step.started_at.get_or_insert(now);
            step.ended_at = None;
        }
        _ if status.is_terminal() => {
            if target_url.is_some() {
                step.target_url = target_url;
            }
            step.ended_at = Some(now);
        }
        _ => {}
    }
}
