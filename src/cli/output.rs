//! CLI output formatting

use crate::core::state::{ItemState, ItemStatus, RunStatus, StepState, WorkflowState};
use crate::persistence::RunRecord;
use console::Emoji;

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static SPINNER: Emoji<'_, '_> = Emoji("⏳ ", "~ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "!");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");
pub static STOP: Emoji<'_, '_> = Emoji("🛑 ", "# ");

/// Format an item status for display
pub fn format_item_status(status: ItemStatus) -> String {
    match status {
        ItemStatus::Pending => style("PENDING").dim().to_string(),
        ItemStatus::Running => style("RUNNING").yellow().to_string(),
        ItemStatus::Success => style("SUCCESS").green().to_string(),
        ItemStatus::Failed => style("FAILED").red().to_string(),
        ItemStatus::Skipped => style("SKIPPED").dim().to_string(),
    }
}

/// Format a run status for display
pub fn format_status(status: RunStatus) -> String {
    match status {
        RunStatus::Pending => style("PENDING").dim().to_string(),
        RunStatus::Running => style("RUNNING").yellow().to_string(),
        RunStatus::Success => style("SUCCESS").green().to_string(),
        RunStatus::Failed => style("FAILED").red().to_string(),
        RunStatus::Stopped => style("STOPPED").yellow().to_string(),
    }
}

fn status_icon(status: RunStatus) -> Emoji<'static, 'static> {
    match status {
        RunStatus::Success => CHECK,
        RunStatus::Failed => CROSS,
        RunStatus::Running => SPINNER,
        RunStatus::Stopped => STOP,
        RunStatus::Pending => INFO,
    }
}

pub fn format_duration(duration: std::time::Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}

/// One-line history entry
pub fn format_run_record(record: &RunRecord) -> String {
    let run_id = record.run_id.to_string();
    let duration = record
        .duration()
        .and_then(|d| d.to_std().ok())
        .map(format_duration)
        .unwrap_or_else(|| "-".to_string());

    format!(
        "{} {} - {} - {} ({}/{}) - {} - {}",
        status_icon(record.status),
        style(&run_id[..8]).dim(),
        style(&record.workflow_name).bold(),
        format_status(record.status),
        record.steps_completed,
        record.steps_total,
        style(record.started_at.format("%Y-%m-%d %H:%M:%S")).dim(),
        style(duration).cyan()
    )
}

fn format_step_line(step: &StepState, indent: &str) -> String {
    let mut line = format!(
        "{}{} {} on {}",
        indent,
        format_item_status(step.status),
        style(&step.name).bold(),
        style(&step.target).cyan()
    );
    if let Some(result) = &step.result {
        line.push_str(&format!(" [{}]", result));
    }
    if let Some(url) = &step.target_url {
        line.push_str(&format!(" {}", style(url).dim()));
    }
    if let Some(error) = &step.error {
        line.push_str(&format!("\n{}    {}", indent, style(error).red()));
    }
    line
}

/// Multi-line per-item summary of a run
pub fn format_workflow_summary(state: &WorkflowState) -> String {
    let mut lines = Vec::with_capacity(state.items.len());
    for (i, item) in state.items.iter().enumerate() {
        let prefix = format!("  [{}/{}] ", i + 1, state.items.len());
        match item {
            ItemState::Step(step) => lines.push(format_step_line(step, &prefix)),
            ItemState::Parallel(group) => {
                lines.push(format!(
                    "{}{} {}",
                    prefix,
                    format_item_status(group.status),
                    style(&group.name).bold()
                ));
                for step in &group.steps {
                    lines.push(format_step_line(step, "        "));
                }
            }
            ItemState::Gate(gate) => {
                let mut line = format!(
                    "{}{} {} ({}/{} {} {})",
                    prefix,
                    format_item_status(gate.status),
                    style(&gate.name).bold(),
                    gate.owner,
                    gate.repo,
                    gate.describe(),
                    gate.wait_for
                );
                if let Some(url) = &gate.html_url {
                    line.push_str(&format!(" {}", style(url).dim()));
                }
                lines.push(line);
            }
        }
    }
    lines.join("\n")
}

/// Horizontal rule spanning the terminal width
pub fn separator() -> String {
    let width = term_size::dimensions_stdout()
        .map(|(w, _)| w)
        .unwrap_or(80);
    "─".repeat(width.min(120))
}
