//! The caller-facing execution state.
//!
//! [`ExecutionState`] is what a UI renders. The controller publishes a new
//! value after every applied event or snapshot.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::log_models::{TerminalLine, ThoughtEntry};
use crate::task_models::{ExecutionStep, ExecutionTask, Phase, TaskOutput};

/// Everything known about the observed task at one point in time.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default, TS)]
pub struct ExecutionState {
    /// The observed task, or `None` while idle.
    pub task: Option<ExecutionTask>,

    pub phase: Phase,

    /// Tool calls in order of first sight.
    pub steps: Vec<ExecutionStep>,

    /// Id of the step the agent is currently working on.
    pub current_tool: Option<String>,

    pub thoughts: Vec<ThoughtEntry>,

    /// Terminal output lines.
    pub logs: Vec<TerminalLine>,

    pub outputs: Vec<TaskOutput>,

    /// Model text streamed since the last finished step.
    pub thinking: String,

    pub sandbox_url: Option<String>,

    /// Last task-level error, kept once the task failed.
    pub error: Option<String>,

    /// Sequence used to mint deterministic thought and line ids.
    #[serde(default)]
    pub next_entry_seq: u64,
}

impl ExecutionState {
    /// State for a task that has just been submitted or attached.
    pub fn planning(task: ExecutionTask) -> Self {
        Self {
            task: Some(task),
            phase: Phase::Planning,
            ..Self::default()
        }
    }

    pub fn task_id(&self) -> Option<&str> {
        self.task.as_ref().map(|t| t.id.as_str())
    }

    pub fn step(&self, id: &str) -> Option<&ExecutionStep> {
        self.steps.iter().find(|s| s.id == id)
    }

    pub fn is_idle(&self) -> bool {
        self.phase == Phase::Idle
    }

    pub fn is_planning(&self) -> bool {
        self.phase == Phase::Planning
    }

    /// True while the remote worker is making progress (any active phase).
    pub fn is_executing(&self) -> bool {
        self.phase.is_active()
    }

    pub fn is_paused(&self) -> bool {
        self.phase == Phase::Paused
    }

    pub fn is_completed(&self) -> bool {
        self.phase == Phase::Completed
    }

    pub fn is_failed(&self) -> bool {
        self.phase == Phase::Failed
    }

    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }
}
