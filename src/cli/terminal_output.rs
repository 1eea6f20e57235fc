//! Terminal progress sink
//!
//! Shows one spinner per running step or gate and replaces it with a
//! finished line when the item completes:
//!
//! ```text
//! ⏳ [2/4] deploy-eu  http://ci.local/job/deploy-eu/41/
//! ✅ [2/4] deploy-us  SUCCESS
//! ```

use crate::cli::output::{style, CHECK, CROSS, SPINNER, WARN};
use crate::core::pipeline::SUCCESS_RESULT;
use crate::core::state::GateState;
use crate::execution::ProgressSink;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Slot {
    Step(usize, usize),
    Gate(usize),
}

/// Progress sink rendering spinners with `indicatif`
pub struct TerminalSink {
    total_items: usize,
    multi: MultiProgress,
    bars: Mutex<HashMap<Slot, ProgressBar>>,
}

impl TerminalSink {
    pub fn new(total_items: usize) -> Self {
        Self {
            total_items,
            multi: MultiProgress::new(),
            bars: Mutex::new(HashMap::new()),
        }
    }

    fn prefix(&self, item: usize) -> String {
        format!("[{}/{}]", item + 1, self.total_items)
    }

    fn spinner_style() -> ProgressStyle {
        ProgressStyle::with_template("{spinner:.green} {prefix:.dim} {msg} {elapsed:.dim}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
    }

    /// Start or update the spinner for a slot
    fn show(&self, slot: Slot, item: usize, message: String) {
        let mut bars = self.bars.lock().unwrap_or_else(PoisonError::into_inner);
        let bar = bars.entry(slot).or_insert_with(|| {
            let bar = self.multi.add(ProgressBar::new_spinner());
            bar.set_style(Self::spinner_style());
            bar.set_prefix(self.prefix(item));
            bar.enable_steady_tick(Duration::from_millis(120));
            bar
        });
        bar.set_message(message);
    }

    /// Replace a slot's spinner with a final line
    fn finish(&self, slot: Slot, item: usize, line: String) {
        let bar = self
            .bars
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&slot);
        if let Some(bar) = bar {
            bar.finish_and_clear();
        }
        let _ = self
            .multi
            .println(format!("{} {}", style(self.prefix(item)).dim(), line));
    }

    fn completion_line(name: &str, result: &str, error: Option<&str>) -> String {
        match (result, error) {
            (SUCCESS_RESULT, None) => format!("{}{} {}", CHECK, style(name).green(), result),
            (_, Some(error)) => format!("{}{}: {}", CROSS, style(name).red(), style(error).dim()),
            (result, None) => format!("{}{} {}", CROSS, style(name).red(), style(result).red()),
        }
    }

    fn gate_label(gate: &GateState) -> String {
        let mut label = format!(
            "{} {}/{} {} to be {}",
            style(&gate.name).bold(),
            gate.owner,
            gate.repo,
            gate.describe(),
            gate.wait_for
        );
        if let Some(title) = &gate.title {
            label.push_str(&format!(" {:?}", title));
        }
        if let Some(url) = &gate.html_url {
            label.push_str(&format!(" {}", style(url).dim()));
        }
        label
    }
}

impl ProgressSink for TerminalSink {
    fn on_step_start(&self, item: usize, step: usize, name: &str, target_url: Option<&str>) {
        let message = match target_url {
            Some(url) => format!("{} {}", style(name).cyan(), style(url).dim()),
            None => format!("{} {}", style(name).cyan(), style("queued").dim()),
        };
        self.show(Slot::Step(item, step), item, message);
    }

    fn on_step_complete(&self, item: usize, step: usize, name: &str, result: &str, error: Option<&str>) {
        let line = Self::completion_line(name, result, error);
        self.finish(Slot::Step(item, step), item, line);
    }

    fn on_gate_start(&self, item: usize, gate: &GateState) {
        self.show(
            Slot::Gate(item),
            item,
            format!("{}Waiting for {}", SPINNER, Self::gate_label(gate)),
        );
    }

    fn on_gate_progress(&self, item: usize, gate: &GateState) {
        self.show(
            Slot::Gate(item),
            item,
            format!("{}Waiting for {}", SPINNER, Self::gate_label(gate)),
        );
    }

    fn on_gate_complete(&self, item: usize, gate: &GateState) {
        self.finish(
            Slot::Gate(item),
            item,
            format!("{}{} is {}", CHECK, gate.describe(), gate.wait_for),
        );
    }

    fn on_gate_failed(&self, item: usize, gate: &GateState, error: &str) {
        self.finish(
            Slot::Gate(item),
            item,
            format!("{}{}: {}", WARN, style(&gate.name).red(), style(error).dim()),
        );
    }
}
