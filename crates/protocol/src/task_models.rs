//! Task, step and output models.
//!
//! These mirror the records the remote execution engine keeps for one agent
//! run. The controller holds exactly one [`ExecutionTask`] at a time; steps
//! and outputs are collected alongside it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use ts_rs::TS;

/// Status of a task as reported by the remote execution engine.
///
/// This is the engine's vocabulary. The local, coarser [`Phase`] is derived
/// from it with `Phase::from`.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, TS)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Accepted by the engine but not yet picked up by a worker.
    #[serde(alias = "queued")]
    Pending,
    Planning,
    #[serde(alias = "running")]
    Executing,
    Selecting,
    Observing,
    Thinking,
    Paused,
    Completed,
    Failed,
    #[serde(alias = "stopped", alias = "canceled")]
    Cancelled,
}

impl TaskStatus {
    /// Returns true for statuses after which the engine emits nothing more.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// The wire spelling of this status.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Planning => "planning",
            Self::Executing => "executing",
            Self::Selecting => "selecting",
            Self::Observing => "observing",
            Self::Thinking => "thinking",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse execution state of the observed task.
///
/// `Idle` means no task is attached. `Completed`, `Failed` and `Stopped` are
/// terminal: once reached, nothing moves the phase again until the
/// controller is reset or attached to another task.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default, TS)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Idle,
    Planning,
    Executing,
    Selecting,
    Observing,
    Thinking,
    Paused,
    Completed,
    Failed,
    Stopped,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Stopped)
    }

    /// True while the remote worker is actively making progress.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            Self::Planning | Self::Executing | Self::Selecting | Self::Observing | Self::Thinking
        )
    }

    /// The engine status that corresponds to this phase.
    pub fn as_status(self) -> TaskStatus {
        match self {
            Self::Idle => TaskStatus::Pending,
            Self::Planning => TaskStatus::Planning,
            Self::Executing => TaskStatus::Executing,
            Self::Selecting => TaskStatus::Selecting,
            Self::Observing => TaskStatus::Observing,
            Self::Thinking => TaskStatus::Thinking,
            Self::Paused => TaskStatus::Paused,
            Self::Completed => TaskStatus::Completed,
            Self::Failed => TaskStatus::Failed,
            Self::Stopped => TaskStatus::Cancelled,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Stopped => "stopped",
            other => other.as_status().as_str(),
        };
        f.write_str(name)
    }
}

impl From<TaskStatus> for Phase {
    fn from(status: TaskStatus) -> Self {
        match status {
            TaskStatus::Pending | TaskStatus::Planning => Self::Planning,
            TaskStatus::Executing => Self::Executing,
            TaskStatus::Selecting => Self::Selecting,
            TaskStatus::Observing => Self::Observing,
            TaskStatus::Thinking => Self::Thinking,
            TaskStatus::Paused => Self::Paused,
            TaskStatus::Completed => Self::Completed,
            TaskStatus::Failed => Self::Failed,
            TaskStatus::Cancelled => Self::Stopped,
        }
    }
}

/// Identity and summary of one agent run.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, TS)]
pub struct ExecutionTask {
    /// Opaque engine-assigned identifier, stable for the task's lifetime.
    pub id: String,

    #[serde(default)]
    pub prompt: String,

    #[serde(default)]
    pub task_type: String,

    pub status: TaskStatus,

    /// Number of finished steps.
    #[serde(default)]
    pub current_step: u32,

    /// Number of planned steps, or 0 while the plan is unknown.
    #[serde(default)]
    pub total_steps: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_summary: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sandbox_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl ExecutionTask {
    /// A fresh task record for an id that is about to be observed.
    pub fn new(id: impl Into<String>, status: TaskStatus) -> Self {
        Self {
            id: id.into(),
            prompt: String::new(),
            task_type: String::new(),
            status,
            current_step: 0,
            total_steps: 0,
            result_summary: None,
            error_message: None,
            sandbox_url: None,
            created_at: None,
            started_at: None,
            completed_at: None,
        }
    }
}

/// Lifecycle of a single tool call.
///
/// Moves only forward: `Pending -> Running -> Succeeded | Failed`.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default, TS)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    #[default]
    Pending,
    #[serde(alias = "in_progress")]
    Running,
    #[serde(alias = "completed", alias = "success")]
    Succeeded,
    #[serde(alias = "error")]
    Failed,
}

impl StepStatus {
    fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Running => 1,
            Self::Succeeded | Self::Failed => 2,
        }
    }

    pub fn is_terminal(self) -> bool {
        self.rank() == 2
    }

    /// Whether moving from `self` to `next` keeps the lifecycle monotonic.
    ///
    /// Terminal statuses accept nothing, including the other terminal value.
    pub fn can_advance_to(self, next: StepStatus) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// One discrete action (tool call) taken by the agent.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, TS)]
pub struct ExecutionStep {
    /// Unique within the task.
    pub id: String,

    /// 1-based, assigned in order of first sight.
    pub step_number: u32,

    pub tool_name: String,

    #[serde(default)]
    pub input: Value,

    #[serde(default)]
    pub status: StepStatus,

    /// Set only once the step succeeded or failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,

    /// Set only when the step failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// An artifact produced by the task. Immutable once recorded.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, TS)]
pub struct TaskOutput {
    pub id: String,

    #[serde(default)]
    pub output_type: String,

    pub file_name: String,

    pub download_url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview: Option<String>,
}

/// Full task state returned by the engine's snapshot endpoint.
///
/// Collections are complete, not deltas; the poll path replaces its local
/// copies wholesale.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, TS)]
pub struct TaskSnapshot {
    pub task: ExecutionTask,

    #[serde(default)]
    pub steps: Vec<ExecutionStep>,

    #[serde(default)]
    pub outputs: Vec<TaskOutput>,
}
