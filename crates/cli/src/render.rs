//! Terminal rendering of controller notifications.

use colored::Colorize;
use tw_protocol::ipc::Event;
use tw_protocol::log_models::TerminalStream;
use tw_protocol::task_models::{ExecutionStep, ExecutionTask, Phase};

/// Format one notification as a single printable line.
pub fn render_event(event: &Event) -> String {
    match event {
        Event::PhaseChanged { from, to, .. } => format!(
            "{} {} -> {}",
            "phase".blue().bold(),
            from,
            paint_phase(*to)
        ),
        Event::ToolCall { step, .. } => render_step(step),
        Event::TerminalOutput { line, .. } => match line.stream {
            TerminalStream::Command => format!("{} {}", "$".green().bold(), line.content),
            TerminalStream::Stderr => line.content.red().to_string(),
            TerminalStream::System => line.content.dimmed().to_string(),
            TerminalStream::Stdout => line.content.clone(),
        },
        Event::Completed { task } => render_completion(task),
        Event::Failed { task_id, error } => {
            format!("{} Task {task_id} failed: {error}", "✗".red().bold())
        }
    }
}

fn render_step(step: &ExecutionStep) -> String {
    let mut line = format!(
        "{} #{} {} [{}]",
        "tool".cyan().bold(),
        step.step_number,
        step.tool_name.bold(),
        step.status
    );
    if !step.input.is_null() {
        if let Ok(input) = serde_json::to_string(&step.input) {
            line.push(' ');
            line.push_str(&input.dimmed().to_string());
        }
    }
    line
}

fn render_completion(task: &ExecutionTask) -> String {
    let mut line = format!(
        "{} Task {} finished: {}",
        "✓".green().bold(),
        task.id,
        task.status
    );
    if let Some(summary) = task.result_summary.as_deref() {
        line.push_str("\n  ");
        line.push_str(summary);
    }
    line
}

fn paint_phase(phase: Phase) -> String {
    let name = phase.to_string();
    match phase {
        Phase::Completed => name.green().to_string(),
        Phase::Failed => name.red().to_string(),
        Phase::Stopped | Phase::Paused => name.yellow().to_string(),
        _ => name.normal().to_string(),
    }
}
