//! Workflow and instance configuration from YAML
//!
//! A run is described by two files: an instances file naming the build
//! servers (and the optional review API credential), and a workflow file
//! listing the pipeline items. [`FlowConfig::load`] merges and validates them;
//! [`FlowConfig::to_pipeline`] renders inputs into a [`Pipeline`].

use crate::core::pipeline::{
    ParallelGroup, Pipeline, PipelineItem, PrGate, PrRef, Step, TargetState, DEFAULT_GATE_POLL,
};
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {what}: {source}")]
    Parse {
        what: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("{0}")]
    Invalid(String),

    #[error("unknown instance {0:?}")]
    UnknownTarget(String),

    #[error("environment variable {0:?} is not set")]
    MissingCredential(String),
}

/// A build server instance
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstanceConfig {
    pub url: String,

    /// Environment variable holding the credential
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_env: Option<String>,

    /// Inline credential, `user:token` or a bearer token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl InstanceConfig {
    /// Resolve the credential; an inline token wins over the env reference
    pub fn credential(&self) -> Result<String, ConfigError> {
        if let Some(token) = self.token.as_deref().filter(|t| !t.is_empty()) {
            return Ok(token.to_string());
        }
        let var = self.auth_env.as_deref().unwrap_or_default();
        match std::env::var(var) {
            Ok(value) if !value.is_empty() => Ok(value),
            _ => Err(ConfigError::MissingCredential(var.to_string())),
        }
    }
}

/// Review API settings shared by every gate
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GitHubConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_env: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    /// API base URL, defaults to the public API
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,
}

impl GitHubConfig {
    /// Resolve the token. No token at all is valid for public repositories.
    pub fn credential(&self) -> Result<Option<String>, ConfigError> {
        if let Some(token) = self.token.as_deref().filter(|t| !t.is_empty()) {
            return Ok(Some(token.to_string()));
        }
        match self.auth_env.as_deref() {
            Some(var) => match std::env::var(var) {
                Ok(value) if !value.is_empty() => Ok(Some(value)),
                _ => Err(ConfigError::MissingCredential(var.to_string())),
            },
            None => Ok(None),
        }
    }
}

/// Contents of the instances file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstancesConfig {
    #[serde(default)]
    pub instances: HashMap<String, InstanceConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub github: Option<GitHubConfig>,
}

/// Step as written in YAML
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StepConfig {
    pub name: String,
    pub instance: String,
    pub job: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub params: HashMap<String, String>,
}

/// Parallel group as written in YAML
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParallelConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub steps: Vec<StepConfig>,
}

/// Pull-request wait as written in YAML
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PrWaitConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub repo: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pr_number: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub head_branch: Option<String>,
    #[serde(default)]
    pub wait_for: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll_secs: Option<u64>,
}

/// One workflow entry: an inline step, a `parallel` block, or a `wait_for_pr` block
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowItemConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub params: HashMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel: Option<ParallelConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_for_pr: Option<PrWaitConfig>,
}

impl WorkflowItemConfig {
    /// The inline step fields as a step
    pub fn as_step(&self) -> StepConfig {
        StepConfig {
            name: self.name.clone().unwrap_or_default(),
            instance: self.instance.clone().unwrap_or_default(),
            job: self.job.clone().unwrap_or_default(),
            params: self.params.clone(),
        }
    }
}

/// Contents of the workflow file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowConfig {
    #[serde(default)]
    pub name: String,

    /// Incoming webhook notified when a run ends
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slack_webhook: Option<String>,

    #[serde(default)]
    pub inputs: BTreeMap<String, String>,

    #[serde(default)]
    pub workflow: Vec<WorkflowItemConfig>,
}

/// Merged instances and workflow configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowConfig {
    pub name: String,
    pub instances: HashMap<String, InstanceConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub github: Option<GitHubConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slack_webhook: Option<String>,
    pub inputs: BTreeMap<String, String>,
    pub workflow: Vec<WorkflowItemConfig>,
}

impl FlowConfig {
    /// Load and validate an instances file and a workflow file
    pub fn load<P: AsRef<Path>, Q: AsRef<Path>>(
        instances_path: P,
        workflow_path: Q,
    ) -> Result<Self, ConfigError> {
        let instances = read_file(instances_path.as_ref())?;
        let workflow = read_file(workflow_path.as_ref())?;
        Self::from_yaml(&instances, &workflow)
    }

    /// Parse and validate configuration from YAML strings
    pub fn from_yaml(instances_yaml: &str, workflow_yaml: &str) -> Result<Self, ConfigError> {
        let instances: InstancesConfig =
            serde_yaml::from_str(instances_yaml).map_err(|source| ConfigError::Parse {
                what: "instances config".to_string(),
                source,
            })?;
        let workflow: WorkflowConfig =
            serde_yaml::from_str(workflow_yaml).map_err(|source| ConfigError::Parse {
                what: "workflow config".to_string(),
                source,
            })?;

        let config = FlowConfig {
            name: workflow.name,
            instances: instances.instances,
            github: instances.github,
            slack_webhook: workflow.slack_webhook.filter(|url| !url.is_empty()),
            inputs: workflow.inputs,
            workflow: workflow.workflow,
        };
        config.validate()?;
        Ok(config)
    }

    /// Override inputs with caller-supplied values
    pub fn with_inputs<I>(mut self, overrides: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        self.inputs.extend(overrides);
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.instances.is_empty() {
            return Err(ConfigError::Invalid("no instances defined".to_string()));
        }
        if self.workflow.is_empty() {
            return Err(ConfigError::Invalid("workflow is empty".to_string()));
        }

        for (name, instance) in &self.instances {
            if instance.url.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "instance {:?} has empty URL",
                    name
                )));
            }
            let has_env = instance.auth_env.as_deref().is_some_and(|v| !v.is_empty());
            let has_token = instance.token.as_deref().is_some_and(|v| !v.is_empty());
            if !has_env && !has_token {
                return Err(ConfigError::Invalid(format!(
                    "instance {:?} must have either 'auth_env' or 'token' set",
                    name
                )));
            }
        }

        for (i, item) in self.workflow.iter().enumerate() {
            if let Some(pr) = &item.wait_for_pr {
                self.validate_pr_wait(pr, &format!("wait_for_pr[{}]", i))?;
            } else if let Some(group) = &item.parallel {
                if group.steps.is_empty() {
                    return Err(ConfigError::Invalid(format!(
                        "workflow item {}: parallel group is empty",
                        i
                    )));
                }
                for (j, step) in group.steps.iter().enumerate() {
                    self.validate_step(step, &format!("parallel[{}].step[{}]", i, j))?;
                }
            } else {
                self.validate_step(&item.as_step(), &format!("step {}", i))?;
            }
        }

        Ok(())
    }

    fn validate_step(&self, step: &StepConfig, location: &str) -> Result<(), ConfigError> {
        if step.name.is_empty() {
            return Err(ConfigError::Invalid(format!("{}: missing name", location)));
        }
        if step.instance.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "{} ({:?}): missing instance",
                location, step.name
            )));
        }
        if !self.instances.contains_key(&step.instance) {
            return Err(ConfigError::Invalid(format!(
                "{} ({:?}): unknown instance {:?}",
                location, step.name, step.instance
            )));
        }
        if step.job.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "{} ({:?}): missing job path",
                location, step.name
            )));
        }
        Ok(())
    }

    fn validate_pr_wait(&self, pr: &PrWaitConfig, location: &str) -> Result<(), ConfigError> {
        if pr.name.is_empty() {
            return Err(ConfigError::Invalid(format!("{}: missing name", location)));
        }
        if pr.owner.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "{} ({:?}): missing owner",
                location, pr.name
            )));
        }
        if pr.repo.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "{} ({:?}): missing repo",
                location, pr.name
            )));
        }

        let has_number = pr.pr_number.is_some_and(|n| n > 0);
        let has_branch = pr.head_branch.as_deref().is_some_and(|b| !b.is_empty());
        if !has_number && !has_branch {
            return Err(ConfigError::Invalid(format!(
                "{} ({:?}): either pr_number or head_branch must be provided",
                location, pr.name
            )));
        }
        if has_number && has_branch {
            return Err(ConfigError::Invalid(format!(
                "{} ({:?}): pr_number and head_branch are mutually exclusive",
                location, pr.name
            )));
        }

        if pr.wait_for.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "{} ({:?}): missing wait_for",
                location, pr.name
            )));
        }
        // Placeholders are only known once inputs are merged
        if !pr.wait_for.contains('$') {
            pr.wait_for
                .parse::<TargetState>()
                .map_err(|e| ConfigError::Invalid(format!("{} ({:?}): {}", location, pr.name, e)))?;
        }
        Ok(())
    }

    /// Render inputs into the items and build the pipeline model
    pub fn to_pipeline(&self) -> Result<Pipeline, ConfigError> {
        let placeholders = Placeholders::new()?;
        let vars = &self.inputs;

        let render_step = |step: &StepConfig| Step {
            name: step.name.clone(),
            target: step.instance.clone(),
            job: placeholders.substitute(&step.job, vars),
            params: step
                .params
                .iter()
                .map(|(k, v)| (k.clone(), placeholders.substitute(v, vars)))
                .collect(),
        };

        let mut items = Vec::with_capacity(self.workflow.len());
        for (i, item) in self.workflow.iter().enumerate() {
            let rendered = if let Some(pr) = &item.wait_for_pr {
                PipelineItem::Gate(self.render_gate(pr, &placeholders, i)?)
            } else if let Some(group) = &item.parallel {
                PipelineItem::Parallel(ParallelGroup {
                    name: group
                        .name
                        .clone()
                        .filter(|n| !n.is_empty())
                        .unwrap_or_else(|| format!("Parallel Group {}", i + 1)),
                    steps: group.steps.iter().map(&render_step).collect(),
                })
            } else {
                PipelineItem::Step(render_step(&item.as_step()))
            };
            items.push(rendered);
        }

        let pipeline = Pipeline {
            name: self.name.clone(),
            inputs: self.inputs.clone(),
            items,
        };
        pipeline.validate(|target| self.instances.contains_key(target))?;
        Ok(pipeline)
    }

    fn render_gate(
        &self,
        pr: &PrWaitConfig,
        placeholders: &Placeholders,
        index: usize,
    ) -> Result<PrGate, ConfigError> {
        let vars = &self.inputs;
        let name = placeholders.substitute(&pr.name, vars);
        let head_branch = pr
            .head_branch
            .as_deref()
            .map(|b| placeholders.substitute(b, vars))
            .filter(|b| !b.is_empty());

        let pr_ref = match (pr.pr_number.filter(|n| *n > 0), head_branch) {
            (Some(number), None) => PrRef::Number(number),
            (None, Some(branch)) => PrRef::Branch(branch),
            _ => {
                return Err(ConfigError::Invalid(format!(
                    "wait_for_pr[{}] ({:?}): exactly one of pr_number or head_branch is required",
                    index, name
                )))
            }
        };

        let target_state = placeholders
            .substitute(&pr.wait_for, vars)
            .parse::<TargetState>()
            .map_err(|e| ConfigError::Invalid(format!("wait_for_pr[{}] ({:?}): {}", index, name, e)))?;

        let poll_interval = match pr.poll_secs {
            Some(secs) if secs > 0 => Duration::from_secs(secs),
            _ => DEFAULT_GATE_POLL,
        };

        Ok(PrGate {
            owner: placeholders.substitute(&pr.owner, vars),
            repo: placeholders.substitute(&pr.repo, vars),
            name,
            pr: pr_ref,
            target_state,
            poll_interval,
        })
    }
}

/// Expands `${name}` and `$name` placeholders; unknown names expand to ""
struct Placeholders {
    pattern: Regex,
}

impl Placeholders {
    fn new() -> Result<Self, ConfigError> {
        let pattern = Regex::new(r"\$\{([A-Za-z0-9_]+)\}|\$([A-Za-z_][A-Za-z0-9_]*)")
            .map_err(|e| ConfigError::Invalid(format!("placeholder pattern: {}", e)))?;
        Ok(Self { pattern })
    }

    fn substitute(&self, text: &str, vars: &BTreeMap<String, String>) -> String {
        if !text.contains('$') {
            return text.to_string();
        }
        self.pattern
            .replace_all(text, |caps: &Captures| {
                let key = caps
                    .get(1)
                    .or_else(|| caps.get(2))
                    .map(|m| m.as_str())
                    .unwrap_or_default();
                vars.get(key).cloned().unwrap_or_default()
            })
            .into_owned()
    }
}

/// Replace `${var}` and `$var` placeholders in `text` with values from `vars`
pub fn substitute(text: &str, vars: &BTreeMap<String, String>) -> Result<String, ConfigError> {
    Ok(Placeholders::new()?.substitute(text, vars))
}

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })
}
