//! Observers notified by the engine as a run progresses
//!
//! The engine calls these inline, so an implementation that blocks slows the
//! pipeline down. Keep the work bounded or hand it off to a channel.

use crate::core::state::GateState;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

/// Progress callbacks; every method defaults to a no-op
pub trait ProgressSink: Send + Sync {
    /// A step entered `running`; called again with the build URL once it starts
    fn on_step_start(&self, _item: usize, _step: usize, _name: &str, _target_url: Option<&str>) {}

    /// A step reached a terminal state; `result` is empty if no build finished
    fn on_step_complete(
        &self,
        _item: usize,
        _step: usize,
        _name: &str,
        _result: &str,
        _error: Option<&str>,
    ) {
    }

    fn on_gate_start(&self, _item: usize, _gate: &GateState) {}

    /// Resolved metadata for a gate changed
    fn on_gate_progress(&self, _item: usize, _gate: &GateState) {}

    fn on_gate_complete(&self, _item: usize, _gate: &GateState) {}

    fn on_gate_failed(&self, _item: usize, _gate: &GateState, _error: &str) {}
}

/// Sink that ignores every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl ProgressSink for NoopSink {}

/// One engine callback, as a value
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    StepStarted {
        item: usize,
        step: usize,
        name: String,
        target_url: Option<String>,
    },
    StepCompleted {
        item: usize,
        step: usize,
        name: String,
        result: String,
        error: Option<String>,
    },
    GateStarted {
        item: usize,
        gate: GateState,
    },
    GateProgress {
        item: usize,
        gate: GateState,
    },
    GateCompleted {
        item: usize,
        gate: GateState,
    },
    GateFailed {
        item: usize,
        gate: GateState,
        error: String,
    },
}

impl ProgressEvent {
    pub fn item(&self) -> usize {
        match self {
            ProgressEvent::StepStarted { item, .. }
            | ProgressEvent::StepCompleted { item, .. }
            | ProgressEvent::GateStarted { item, .. }
            | ProgressEvent::GateProgress { item, .. }
            | ProgressEvent::GateCompleted { item, .. }
            | ProgressEvent::GateFailed { item, .. } => *item,
        }
    }
}

/// Forwards every callback as a [`ProgressEvent`] over an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: UnboundedSender<ProgressEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, event: ProgressEvent) {
        // A dropped receiver just means nobody is listening any more
        let _ = self.tx.send(event);
    }
}

impl ProgressSink for ChannelSink {
    fn on_step_start(&self, item: usize, step: usize, name: &str, target_url: Option<&str>) {
        self.send(ProgressEvent::StepStarted {
            item,
            step,
            name: name.to_string(),
            target_url: target_url.map(str::to_string),
        });
    }

    fn on_step_complete(&self, item: usize, step: usize, name: &str, result: &str, error: Option<&str>) {
        self.send(ProgressEvent::StepCompleted {
            item,
            step,
            name: name.to_string(),
            result: result.to_string(),
            error: error.map(str::to_string),
        });
    }

    fn on_gate_start(&self, item: usize, gate: &GateState) {
        self.send(ProgressEvent::GateStarted {
            item,
            gate: gate.clone(),
        });
    }

    fn on_gate_progress(&self, item: usize, gate: &GateState) {
        self.send(ProgressEvent::GateProgress {
            item,
            gate: gate.clone(),
        });
    }

    fn on_gate_complete(&self, item: usize, gate: &GateState) {
        self.send(ProgressEvent::GateCompleted {
            item,
            gate: gate.clone(),
        });
    }

    fn on_gate_failed(&self, item: usize, gate: &GateState, error: &str) {
        self.send(ProgressEvent::GateFailed {
            item,
            gate: gate.clone(),
            error: error.to_string(),
        });
    }
}
