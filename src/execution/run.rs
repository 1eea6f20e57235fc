//! Caller-owned handle to one workflow run

use crate::core::pipeline::Pipeline;
use crate::core::state::{RunStatus, WorkflowState};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

struct RunInner {
    state: Mutex<WorkflowState>,
    cancel: CancellationToken,
}

/// Shared handle to a run's live state and its root cancellation.
///
/// The engine is the only writer; everyone else reads through
/// [`RunHandle::snapshot`], which returns a deep copy.
#[derive(Clone)]
pub struct RunHandle {
    inner: Arc<RunInner>,
}

impl RunHandle {
    pub fn new(pipeline: &Pipeline) -> Self {
        Self {
            inner: Arc::new(RunInner {
                state: Mutex::new(WorkflowState::new(pipeline)),
                cancel: CancellationToken::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, WorkflowState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn run_id(&self) -> Uuid {
        self.lock().run_id
    }

    /// Deep copy of the current state
    pub fn snapshot(&self) -> WorkflowState {
        self.lock().clone()
    }

    pub fn status(&self) -> RunStatus {
        self.lock().status
    }

    pub fn is_running(&self) -> bool {
        self.lock().status == RunStatus::Running
    }

    /// Request a stop; in-flight polls observe it within one tick
    pub fn stop(&self) {
        if !self.inner.cancel.is_cancelled() {
            info!(run_id = %self.run_id(), "stop requested");
            self.inner.cancel.cancel();
        }
    }

    pub fn stop_requested(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    pub(crate) fn cancel_token(&self) -> &CancellationToken {
        &self.inner.cancel
    }

    /// Apply one mutation under the state lock
    pub(crate) fn update<R>(&self, f: impl FnOnce(&mut WorkflowState) -> R) -> R {
        f(&mut self.lock())
    }
}

impl std::fmt::Debug for RunHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("RunHandle")
            .field("run_id", &state.run_id)
            .field("status", &state.status)
            .field("stop_requested", &self.inner.cancel.is_cancelled())
            .finish()
    }
}
