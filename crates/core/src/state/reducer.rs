//! Pure state transitions.
//!
//! [`reduce`] folds one [`EventEnvelope`] into an [`ExecutionState`];
//! [`apply_snapshot`] folds in a polled [`TaskSnapshot`]. Neither performs
//! I/O or reads the clock: ids come from a counter in the state and
//! timestamps from the envelope, so replaying the same input always yields
//! the same state.
//!
//! Once the phase is terminal the state is frozen and both functions return
//! it unchanged.

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tw_protocol::envelope::{EventEnvelope, ProgressEvent};
use tw_protocol::log_models::{TerminalLine, ThoughtEntry, ThoughtKind};
use tw_protocol::state_models::ExecutionState;
use tw_protocol::task_models::{ExecutionStep, ExecutionTask, Phase, StepStatus, TaskSnapshot};

const DEFAULT_FAILURE: &str = "Task failed";

pub fn reduce(state: &ExecutionState, envelope: &EventEnvelope) -> ExecutionState {
    if state.task.is_none() || state.is_terminal() {
        return state.clone();
    }

    let mut next = state.clone();
    let at = envelope.received_at;

    match &envelope.event {
        ProgressEvent::Status {
            status,
            current_step,
            total_steps,
            error,
        } => {
            next.phase = Phase::from(*status);
            if let Some(task) = next.task.as_mut() {
                record_counts(task, *current_step, *total_steps);
            }
            if next.phase == Phase::Failed {
                let message = error
                    .clone()
                    .or_else(|| next.error.clone())
                    .unwrap_or_else(|| DEFAULT_FAILURE.to_string());
                fail(&mut next, message, at);
            }
        }
        ProgressEvent::Thinking { content } => {
            next.phase = Phase::Thinking;
            next.thinking.push_str(content);
        }
        ProgressEvent::Reasoning { content } => {
            push_thought(&mut next, ThoughtKind::Reasoning, content.clone(), None, at);
        }
        ProgressEvent::Message { content } => {
            push_thought(&mut next, ThoughtKind::Message, content.clone(), None, at);
        }
        ProgressEvent::ToolSelect {
            step_id,
            tool_name,
            input,
        } => {
            let id = select_step(&mut next, step_id.as_deref(), tool_name, input);
            next.phase = Phase::Selecting;
            push_thought(
                &mut next,
                ThoughtKind::ToolSelection,
                format!("Selected tool: {tool_name}"),
                Some(json!({ "step_id": id, "tool_name": tool_name, "input": input })),
                at,
            );
        }
        ProgressEvent::ToolCall {
            step_id,
            tool_name,
            input,
        } => {
            let id = select_step(&mut next, step_id.as_deref(), tool_name, input);
            advance_step(&mut next, &id, StepStatus::Running);
            next.phase = Phase::Executing;
            push_thought(
                &mut next,
                ThoughtKind::ToolSelection,
                format!("Calling tool: {tool_name}"),
                Some(json!({ "step_id": id, "tool_name": tool_name, "input": input })),
                at,
            );
        }
        ProgressEvent::ToolStart { step_id } => {
            if let Some(id) = resolve_step(&next, step_id.as_deref()) {
                advance_step(&mut next, &id, StepStatus::Running);
            }
            next.phase = Phase::Executing;
        }
        ProgressEvent::ToolComplete { step_id, output } => {
            let id = resolve_step(&next, step_id.as_deref());
            if let Some(id) = id.as_deref() {
                if let Some(step) = advance_step(&mut next, id, StepStatus::Succeeded) {
                    step.output = Some(output.clone());
                }
            }
            next.phase = Phase::Observing;
            push_thought(
                &mut next,
                ThoughtKind::Result,
                display_value(output),
                id.map(|id| json!({ "step_id": id })),
                at,
            );
        }
        ProgressEvent::ToolError { step_id, error } => {
            let id = resolve_step(&next, step_id.as_deref());
            if let Some(id) = id.as_deref() {
                if let Some(step) = advance_step(&mut next, id, StepStatus::Failed) {
                    step.error_message = Some(error.clone());
                }
            }
            push_thought(
                &mut next,
                ThoughtKind::Error,
                error.clone(),
                id.map(|id| json!({ "step_id": id })),
                at,
            );
        }
        ProgressEvent::StepComplete => {
            if let Some(task) = next.task.as_mut() {
                let advanced = task.current_step.saturating_add(1);
                task.current_step = if task.total_steps > 0 {
                    advanced.min(task.total_steps).max(task.current_step)
                } else {
                    advanced
                };
            }
            next.thinking.clear();
        }
        ProgressEvent::Terminal { stream, content } => {
            let id = next_entry_id(&mut next, "line");
            next.logs.push(TerminalLine {
                id,
                stream: *stream,
                content: content.clone(),
                timestamp: at,
            });
        }
        ProgressEvent::Output { output } => {
            if !next.outputs.iter().any(|o| o.id == output.id) {
                next.outputs.push(output.clone());
            }
        }
        ProgressEvent::Sandbox { url } => {
            next.sandbox_url = Some(url.clone());
        }
        ProgressEvent::Complete {
            status,
            summary,
            error,
        } => {
            next.phase = if status.is_terminal() {
                Phase::from(*status)
            } else {
                Phase::Completed
            };
            if let (Some(task), Some(summary)) = (next.task.as_mut(), summary) {
                task.result_summary = Some(summary.clone());
            }
            if next.phase == Phase::Failed {
                let message = error
                    .clone()
                    .or_else(|| next.error.clone())
                    .unwrap_or_else(|| DEFAULT_FAILURE.to_string());
                fail(&mut next, message, at);
            }
        }
        ProgressEvent::Error { message } => {
            next.phase = Phase::Failed;
            fail(&mut next, message.clone(), at);
        }
    }

    sync_task(&mut next, at);
    next
}

/// Fold a polled snapshot into `state`.
///
/// The snapshot replaces the task record, steps and outputs, with two
/// guards: a step never moves backwards relative to what was already
/// observed, and recorded outputs stay as they are. Thoughts and terminal
/// lines are left alone. Snapshots for another task are ignored.
pub fn apply_snapshot(state: &ExecutionState, snapshot: &TaskSnapshot, at: DateTime<Utc>) -> ExecutionState {
    let Some(current) = state.task.as_ref() else {
        return state.clone();
    };
    if state.is_terminal() || current.id != snapshot.task.id {
        return state.clone();
    }

    let mut next = state.clone();
    next.task = Some(merge_task(current, &snapshot.task));
    next.steps = merge_steps(&state.steps, &snapshot.steps);
    for output in &snapshot.outputs {
        if !next.outputs.iter().any(|o| o.id == output.id) {
            next.outputs.push(output.clone());
        }
    }
    if let Some(url) = &snapshot.task.sandbox_url {
        next.sandbox_url = Some(url.clone());
    }

    next.phase = Phase::from(snapshot.task.status);
    if next.phase == Phase::Failed {
        let message = snapshot
            .task
            .error_message
            .clone()
            .unwrap_or_else(|| DEFAULT_FAILURE.to_string());
        fail(&mut next, message, at);
    }

    sync_task(&mut next, at);
    next
}

fn merge_task(current: &ExecutionTask, remote: &ExecutionTask) -> ExecutionTask {
    let mut task = remote.clone();
    if task.prompt.is_empty() {
        task.prompt = current.prompt.clone();
    }
    if task.task_type.is_empty() {
        task.task_type = current.task_type.clone();
    }
    task.current_step = current.current_step;
    task.total_steps = current.total_steps;
    record_counts(&mut task, Some(remote.current_step), Some(remote.total_steps));
    task.result_summary = task.result_summary.or_else(|| current.result_summary.clone());
    task.sandbox_url = task.sandbox_url.or_else(|| current.sandbox_url.clone());
    task.created_at = current.created_at.or(task.created_at);
    task.started_at = current.started_at.or(task.started_at);
    task.completed_at = current.completed_at.or(task.completed_at);
    task
}

fn merge_steps(observed: &[ExecutionStep], remote: &[ExecutionStep]) -> Vec<ExecutionStep> {
    remote
        .iter()
        .enumerate()
        .map(|(index, step)| {
            let mut merged = match observed.iter().find(|s| s.id == step.id) {
                Some(seen) if seen.status != step.status && !seen.status.can_advance_to(step.status) => {
                    seen.clone()
                }
                _ => step.clone(),
            };
            if merged.step_number == 0 {
                merged.step_number = u32::try_from(index + 1).unwrap_or(u32::MAX);
            }
            merged
        })
        .collect()
}

/// Engine-reported counts only ever raise the local ones. A reported
/// current step past the plan means the plan grew.
fn record_counts(task: &mut ExecutionTask, current: Option<u32>, total: Option<u32>) {
    if let Some(total) = total {
        task.total_steps = task.total_steps.max(total);
    }
    if let Some(current) = current {
        task.current_step = task.current_step.max(current);
    }
    if task.total_steps > 0 {
        task.total_steps = task.total_steps.max(task.current_step);
    }
}

/// Create the step for a selection, or refresh it while still pending.
/// Returns the step id.
fn select_step(state: &mut ExecutionState, step_id: Option<&str>, tool_name: &str, input: &Value) -> String {
    let id = step_id
        .map(str::to_string)
        .unwrap_or_else(|| format!("step-{}", state.steps.len() + 1));

    match state.steps.iter_mut().find(|s| s.id == id) {
        Some(step) if step.status == StepStatus::Pending => {
            step.tool_name = tool_name.to_string();
            step.input = input.clone();
        }
        Some(_) => {}
        None => {
            let step_number = u32::try_from(state.steps.len() + 1).unwrap_or(u32::MAX);
            state.steps.push(ExecutionStep {
                id: id.clone(),
                step_number,
                tool_name: tool_name.to_string(),
                input: input.clone(),
                status: StepStatus::Pending,
                output: None,
                error_message: None,
            });
        }
    }
    state.current_tool = Some(id.clone());
    id
}

fn resolve_step(state: &ExecutionState, step_id: Option<&str>) -> Option<String> {
    step_id
        .map(str::to_string)
        .or_else(|| state.current_tool.clone())
        .filter(|id| state.step(id).is_some())
}

/// Move a step forward. Returns the step only when it actually moved.
fn advance_step<'a>(state: &'a mut ExecutionState, id: &str, status: StepStatus) -> Option<&'a mut ExecutionStep> {
    let step = state.steps.iter_mut().find(|s| s.id == id)?;
    if !step.status.can_advance_to(status) {
        return None;
    }
    step.status = status;
    Some(step)
}

fn fail(state: &mut ExecutionState, message: String, at: DateTime<Utc>) {
    state.error = Some(message.clone());
    push_thought(state, ThoughtKind::Error, message, None, at);
}

fn push_thought(
    state: &mut ExecutionState,
    kind: ThoughtKind,
    content: String,
    metadata: Option<Value>,
    at: DateTime<Utc>,
) {
    let id = next_entry_id(state, "thought");
    state.thoughts.push(ThoughtEntry {
        id,
        kind,
        content,
        timestamp: at,
        metadata,
    });
}

fn next_entry_id(state: &mut ExecutionState, prefix: &str) -> String {
    state.next_entry_seq += 1;
    format!("{prefix}-{}", state.next_entry_seq)
}

/// Keep the task record consistent with the phase and the collected state.
fn sync_task(state: &mut ExecutionState, at: DateTime<Utc>) {
    let phase = state.phase;
    let error = state.error.clone();
    let sandbox_url = state.sandbox_url.clone();
    let Some(task) = state.task.as_mut() else {
        return;
    };

    if phase != Phase::Idle {
        task.status = phase.as_status();
    }
    if task.error_message.is_none() {
        task.error_message = error;
    }
    if sandbox_url.is_some() {
        task.sandbox_url = sandbox_url;
    }

    let floor = task.created_at.map_or(at, |created| created.max(at));
    if task.started_at.is_none() && phase.is_active() && phase != Phase::Planning {
        task.started_at = Some(floor);
    }
    if task.completed_at.is_none() && phase.is_terminal() {
        let floor = task.started_at.map_or(floor, |started| started.max(floor));
        task.completed_at = Some(floor);
    }
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
