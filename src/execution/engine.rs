//! Main execution engine - walks the pipeline item by item
//!
//! Items run strictly in declaration order. A single step goes through
//! trigger, queue wait and build wait; a parallel group fans its steps out as
//! tasks sharing one cancellation scope; a PR gate resolves and watches a
//! pull request. The first hard error anywhere stops the run.

use crate::core::config::ConfigError;
use crate::core::pipeline::{ParallelGroup, Pipeline, PipelineItem, PrGate, PrRef, Step, SUCCESS_RESULT};
use crate::core::state::{GateState, ItemStatus, ResolvedGate, RunStatus, WorkflowState};
use crate::execution::error::{EngineError, ErrorKind, GateError, StepError};
use crate::execution::run::RunHandle;
use crate::execution::sink::ProgressSink;
use crate::remote::{PrStatus, PullRequestApi, TargetResolver};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Runs pipelines against a set of build servers and an optional review API
pub struct ExecutionEngine {
    targets: Arc<dyn TargetResolver>,
    pull_requests: Option<Arc<dyn PullRequestApi>>,
    skip_pr_gates: bool,
}

impl ExecutionEngine {
    pub fn new(targets: Arc<dyn TargetResolver>) -> Self {
        Self {
            targets,
            pull_requests: None,
            skip_pr_gates: false,
        }
    }

    pub fn with_pull_requests(mut self, api: Arc<dyn PullRequestApi>) -> Self {
        self.pull_requests = Some(api);
        self
    }

    /// Treat every PR gate as already satisfied
    pub fn skip_pr_gates(mut self, skip: bool) -> Self {
        self.skip_pr_gates = skip;
        self
    }

    /// Execute the pipeline, recording progress in `run` and reporting to `sink`.
    ///
    /// The final status lands in the run state: `success`, `failed` with the
    /// first error's message, or `stopped` when [`RunHandle::stop`] ended it.
    pub async fn execute(
        &self,
        pipeline: &Pipeline,
        run: &RunHandle,
        sink: Arc<dyn ProgressSink>,
    ) -> Result<(), EngineError> {
        let started = Instant::now();
        run.update(WorkflowState::start);
        info!(run_id = %run.run_id(), "Starting workflow {:?}", pipeline.name);

        let outcome = self.walk(pipeline, run, sink).await;

        let (status, message) = match &outcome {
            Ok(()) => (RunStatus::Success, None),
            Err(err) if err.is_cancelled() && run.stop_requested() => {
                (RunStatus::Stopped, Some(err.to_string()))
            }
            Err(err) => (RunStatus::Failed, Some(err.to_string())),
        };
        run.update(|s| s.finish(status, message));

        match (&outcome, status) {
            (Ok(()), _) => info!("Workflow completed successfully in {:?}", started.elapsed()),
            (Err(_), RunStatus::Stopped) => warn!("Workflow stopped after {:?}", started.elapsed()),
            (Err(err), _) => error!("Workflow failed: {}", err),
        }
        outcome
    }

    async fn walk(
        &self,
        pipeline: &Pipeline,
        run: &RunHandle,
        sink: Arc<dyn ProgressSink>,
    ) -> Result<(), EngineError> {
        let cancel = run.cancel_token().clone();
        let runner = StepRunner {
            targets: Arc::clone(&self.targets),
            run: run.clone(),
            sink: Arc::clone(&sink),
        };
        let total = pipeline.items.len();

        for (i, item) in pipeline.items.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }

            match item {
                PipelineItem::Step(step) => {
                    info!(
                        "[{}/{}] Starting step {:?} on instance {:?}",
                        i + 1,
                        total,
                        step.name,
                        step.target
                    );
                    let result = runner.execute_step(&cancel, i, 0, step).await?;
                    info!("[{}/{}] Completed with result {}", i + 1, total, result);
                }
                PipelineItem::Parallel(group) => {
                    info!(
                        "[{}/{}] Starting {} ({} steps)",
                        i + 1,
                        total,
                        group.name,
                        group.steps.len()
                    );
                    run_group(&runner, &cancel, i, group).await?;
                    info!("[{}/{}] {} completed successfully", i + 1, total, group.name);
                }
                PipelineItem::Gate(gate) => {
                    info!(
                        "[{}/{}] Waiting for PR {} ({}/{}) to be {}",
                        i + 1,
                        total,
                        gate.pr,
                        gate.owner,
                        gate.repo,
                        gate.target_state
                    );
                    self.run_gate(run, sink.as_ref(), &cancel, i, gate).await?;
                    info!("[{}/{}] PR is now {}, continuing", i + 1, total, gate.target_state);
                }
            }
        }
        Ok(())
    }

    async fn run_gate(
        &self,
        run: &RunHandle,
        sink: &dyn ProgressSink,
        cancel: &CancellationToken,
        item: usize,
        gate: &PrGate,
    ) -> Result<(), EngineError> {
        let started = gate_snapshot(run, item, |s| s.start_gate(item));
        if let Some(state) = &started {
            sink.on_gate_start(item, state);
        }

        if self.skip_pr_gates {
            info!("Skipping PR check for {:?} as requested", gate.name);
            if let Some(state) = gate_snapshot(run, item, |s| s.complete_gate(item)) {
                sink.on_gate_complete(item, &state);
            }
            return Ok(());
        }

        match self.wait_for_gate(run, sink, cancel, item, gate).await {
            Ok(()) => {
                if let Some(state) = gate_snapshot(run, item, |s| s.complete_gate(item)) {
                    sink.on_gate_complete(item, &state);
                }
                Ok(())
            }
            Err(source) => {
                let message = source.to_string();
                if let Some(state) = gate_snapshot(run, item, |s| s.fail_gate(item, message.clone())) {
                    sink.on_gate_failed(item, &state, &message);
                }
                Err(EngineError::Gate {
                    gate: gate.name.clone(),
                    source,
                })
            }
        }
    }

    /// Branch resolution, metadata fetch, then the wait; each reports progress
    async fn wait_for_gate(
        &self,
        run: &RunHandle,
        sink: &dyn ProgressSink,
        cancel: &CancellationToken,
        item: usize,
        gate: &PrGate,
    ) -> Result<(), GateError> {
        let api = self.pull_requests.as_ref().ok_or_else(|| {
            GateError::Unavailable(ConfigError::Invalid(
                "github configuration is required for wait_for_pr steps".to_string(),
            ))
        })?;

        let mut resolved = ResolvedGate::default();
        let number = match &gate.pr {
            PrRef::Number(number) => *number,
            PrRef::Branch(branch) => {
                let pr = api
                    .find_by_branch(cancel, &gate.owner, &gate.repo, branch)
                    .await
                    .map_err(|source| GateError::Resolve {
                        branch: branch.clone(),
                        source,
                    })?;
                info!("  -> Resolved branch {:?} to PR #{} ({})", branch, pr.number, pr.html_url);
                resolved = resolved_from(&pr);
                report_progress(run, sink, item, &resolved);
                pr.number
            }
        };

        if resolved.html_url.is_none() || resolved.title.is_none() {
            let pr = api
                .get_status(cancel, &gate.owner, &gate.repo, number)
                .await
                .map_err(|source| GateError::Metadata { number, source })?;
            resolved = resolved_from(&pr);
            report_progress(run, sink, item, &resolved);
        }

        let last = api
            .await_target_state(
                cancel,
                &gate.owner,
                &gate.repo,
                number,
                gate.target_state,
                gate.poll_interval,
            )
            .await
            .map_err(GateError::Wait)?;
        report_progress(run, sink, item, &resolved_from(&last));
        Ok(())
    }
}

fn resolved_from(pr: &PrStatus) -> ResolvedGate {
    ResolvedGate {
        number: Some(pr.number),
        html_url: Some(pr.html_url.clone()).filter(|u| !u.is_empty()),
        title: Some(pr.title.clone()).filter(|t| !t.is_empty()),
    }
}

fn gate_snapshot(
    run: &RunHandle,
    item: usize,
    mutate: impl FnOnce(&mut WorkflowState),
) -> Option<GateState> {
    run.update(|s| {
        mutate(s);
        s.gate(item).cloned()
    })
}

fn report_progress(run: &RunHandle, sink: &dyn ProgressSink, item: usize, resolved: &ResolvedGate) {
    if let Some(state) = gate_snapshot(run, item, |s| s.merge_gate(item, resolved)) {
        sink.on_gate_progress(item, &state);
    }
}

/// Runs every member concurrently; the first failure cancels the rest
async fn run_group(
    runner: &StepRunner,
    cancel: &CancellationToken,
    item: usize,
    group: &ParallelGroup,
) -> Result<(), EngineError> {
    let scope = cancel.child_token();
    let first_error: Arc<Mutex<Option<EngineError>>> = Arc::new(Mutex::new(None));
    let mut tasks = JoinSet::new();

    for (index, step) in group.steps.iter().cloned().enumerate() {
        let runner = runner.clone();
        let scope = scope.clone();
        let first_error = Arc::clone(&first_error);
        tasks.spawn(async move {
            if let Err(err) = runner.execute_step(&scope, item, index, &step).await {
                // Record before cancelling so sibling cancellations never win
                {
                    let mut slot = first_error.lock().unwrap_or_else(PoisonError::into_inner);
                    if slot.is_none() {
                        *slot = Some(err);
                    }
                }
                scope.cancel();
            }
        });
    }

    while let Some(joined) = tasks.join_next().await {
        if let Err(join_err) = joined {
            if join_err.is_panic() {
                std::panic::resume_unwind(join_err.into_panic());
            }
        }
    }

    let failure = first_error
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .take();
    match failure {
        Some(source) => Err(EngineError::Group {
            group: group.name.clone(),
            source: Box::new(source),
        }),
        None => Ok(()),
    }
}

/// Everything one step needs; cheap to clone into a spawned task
#[derive(Clone)]
struct StepRunner {
    targets: Arc<dyn TargetResolver>,
    run: RunHandle,
    sink: Arc<dyn ProgressSink>,
}

impl StepRunner {
    /// Run one step to a terminal state, always emitting start and complete
    async fn execute_step(
        &self,
        cancel: &CancellationToken,
        item: usize,
        index: usize,
        step: &Step,
    ) -> Result<String, EngineError> {
        self.run
            .update(|s| s.update_step(item, index, ItemStatus::Running, None, None, None));
        self.sink.on_step_start(item, index, &step.name, None);

        let outcome = self.drive(cancel, item, index, step).await;

        let (status, result, message) = match &outcome {
            Ok(result) if result == SUCCESS_RESULT => (ItemStatus::Success, result.clone(), None),
            Ok(result) => (ItemStatus::Failed, result.clone(), None),
            Err(err) if err.kind() == ErrorKind::Cancelled => {
                (ItemStatus::Skipped, String::new(), Some(err.to_string()))
            }
            Err(err) => (ItemStatus::Failed, String::new(), Some(err.to_string())),
        };
        let stored_result = Some(result.clone()).filter(|r| !r.is_empty());
        let stored_message = message.clone();
        self.run.update(|s| {
            s.update_step(item, index, status, stored_result, stored_message, None)
        });
        self.sink
            .on_step_complete(item, index, &step.name, &result, message.as_deref());

        let wrap = |source: StepError| EngineError::Step {
            step: step.name.clone(),
            source,
        };
        match outcome {
            Ok(result) if result == SUCCESS_RESULT => Ok(result),
            Ok(result) => Err(wrap(StepError::Result(result))),
            Err(err) => Err(wrap(err)),
        }
    }

    async fn drive(
        &self,
        cancel: &CancellationToken,
        item: usize,
        index: usize,
        step: &Step,
    ) -> Result<String, StepError> {
        let client = self
            .targets
            .client_for(&step.target)
            .map_err(StepError::Target)?;

        info!("  -> [{}] Triggering job {}", step.name, step.job);
        let queue = client
            .trigger(cancel, &step.job, &step.params)
            .await
            .map_err(StepError::Trigger)?;
        info!("  -> [{}] Queued. Item: {}", step.name, queue);

        let build_url = client
            .await_start(cancel, &queue)
            .await
            .map_err(StepError::Queue)?;
        info!("  -> [{}] Job started: {}", step.name, build_url);

        let url = build_url.clone();
        self.run.update(|s| {
            s.update_step(item, index, ItemStatus::Running, None, None, Some(url))
        });
        self.sink
            .on_step_start(item, index, &step.name, Some(&build_url));

        let result = client
            .await_completion(cancel, &build_url)
            .await
            .map_err(StepError::Build)?;
        info!("  -> [{}] Build finished with result: {}", step.name, result);
        Ok(result)
    }
}
