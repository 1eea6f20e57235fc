//! Pipeline domain model

use crate::core::config::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::time::Duration;

/// Remote result string that counts as a successful step
pub const SUCCESS_RESULT: &str = "SUCCESS";

/// Default interval between pull-request status checks
pub const DEFAULT_GATE_POLL: Duration = Duration::from_secs(30);

/// A validated pipeline definition, ready to execute
#[derive(Debug, Clone)]
pub struct Pipeline {
    /// Pipeline name
    pub name: String,

    /// Resolved inputs the items were rendered with
    pub inputs: BTreeMap<String, String>,

    /// Items, executed strictly in declaration order
    pub items: Vec<PipelineItem>,
}

/// One entry of the pipeline walk
#[derive(Debug, Clone)]
pub enum PipelineItem {
    /// A single job trigger
    Step(Step),
    /// Steps executed concurrently; succeeds iff every member succeeds
    Parallel(ParallelGroup),
    /// Wait on a pull request reaching a target state
    Gate(PrGate),
}

impl PipelineItem {
    /// Human-readable item name used in logs and error context
    pub fn name(&self) -> &str {
        match self {
            PipelineItem::Step(step) => &step.name,
            PipelineItem::Parallel(group) => &group.name,
            PipelineItem::Gate(gate) => &gate.name,
        }
    }
}

/// A single remote job trigger
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub name: String,

    /// Identifier of the build server in the target registry
    pub target: String,

    /// Job path on the build server, e.g. `/job/deploy/job/api`
    pub job: String,

    /// Job parameters; non-empty selects the parameterized trigger
    pub params: HashMap<String, String>,
}

/// Steps run concurrently with fail-fast semantics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParallelGroup {
    pub name: String,
    pub steps: Vec<Step>,
}

/// How a gate identifies its pull request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrRef {
    /// A known pull-request number
    Number(u64),
    /// Head branch, resolved to exactly one open pull request at run time
    Branch(String),
}

impl fmt::Display for PrRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrRef::Number(number) => write!(f, "PR #{}", number),
            PrRef::Branch(branch) => write!(f, "PR on branch {:?}", branch),
        }
    }
}

/// Pull-request state a gate waits for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetState {
    Merged,
    Closed,
}

impl TargetState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetState::Merged => "merged",
            TargetState::Closed => "closed",
        }
    }
}

impl fmt::Display for TargetState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TargetState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "merged" => Ok(TargetState::Merged),
            "closed" => Ok(TargetState::Closed),
            other => Err(format!(
                "wait_for must be 'merged' or 'closed', got {:?}",
                other
            )),
        }
    }
}

/// Wait condition on a pull request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrGate {
    pub name: String,
    pub owner: String,
    pub repo: String,
    pub pr: PrRef,
    pub target_state: TargetState,
    pub poll_interval: Duration,
}

impl PrGate {
    /// Pull-request number when known up front
    pub fn number(&self) -> Option<u64> {
        match self.pr {
            PrRef::Number(number) => Some(number),
            PrRef::Branch(_) => None,
        }
    }

    /// Head branch when the gate resolves its pull request at run time
    pub fn head_branch(&self) -> Option<&str> {
        match &self.pr {
            PrRef::Branch(branch) => Some(branch),
            PrRef::Number(_) => None,
        }
    }
}

impl Pipeline {
    /// Total number of job steps, counting parallel members individually
    pub fn step_count(&self) -> usize {
        self.items
            .iter()
            .map(|item| match item {
                PipelineItem::Step(_) => 1,
                PipelineItem::Parallel(group) => group.steps.len(),
                PipelineItem::Gate(_) => 0,
            })
            .sum()
    }

    /// Check the model invariants against the set of known targets
    pub fn validate<F>(&self, is_known_target: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> bool,
    {
        if self.items.is_empty() {
            return Err(ConfigError::Invalid("workflow is empty".to_string()));
        }

        for (i, item) in self.items.iter().enumerate() {
            match item {
                PipelineItem::Step(step) => {
                    validate_step(step, &format!("step {}", i), &is_known_target)?
                }
                PipelineItem::Parallel(group) => {
                    if group.steps.is_empty() {
                        return Err(ConfigError::Invalid(format!(
                            "workflow item {}: parallel group is empty",
                            i
                        )));
                    }
                    for (j, step) in group.steps.iter().enumerate() {
                        validate_step(
                            step,
                            &format!("parallel[{}].step[{}]", i, j),
                            &is_known_target,
                        )?;
                    }
                }
                PipelineItem::Gate(gate) => {
                    let location = format!("wait_for_pr[{}] ({:?})", i, gate.name);
                    if gate.name.is_empty() {
                        return Err(ConfigError::Invalid(format!(
                            "wait_for_pr[{}]: missing name",
                            i
                        )));
                    }
                    if gate.owner.is_empty() || gate.repo.is_empty() {
                        return Err(ConfigError::Invalid(format!(
                            "{}: owner and repo are required",
                            location
                        )));
                    }
                    match &gate.pr {
                        PrRef::Number(0) => {
                            return Err(ConfigError::Invalid(format!(
                                "{}: pr_number must be positive",
                                location
                            )))
                        }
                        PrRef::Branch(branch) if branch.is_empty() => {
                            return Err(ConfigError::Invalid(format!(
                                "{}: head_branch is empty",
                                location
                            )))
                        }
                        _ => {}
                    }
                    if gate.poll_interval.is_zero() {
                        return Err(ConfigError::Invalid(format!(
                            "{}: poll interval must be positive",
                            location
                        )));
                    }
                }
            }
        }

        Ok(())
    }
}

fn validate_step<F>(step: &Step, location: &str, is_known_target: &F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> bool,
{
    if step.name.is_empty() {
        return Err(ConfigError::Invalid(format!("{}: missing name", location)));
    }
    if step.target.is_empty() {
        return Err(ConfigError::Invalid(format!(
            "{} ({:?}): missing instance",
            location, step.name
        )));
    }
    if !is_known_target(&step.target) {
        return Err(ConfigError::UnknownTarget(step.target.clone()));
    }
    if step.job.is_empty() {
        return Err(ConfigError::Invalid(format!(
            "{} ({:?}): missing job path",
            location, step.name
        )));
    }
    Ok(())
}
