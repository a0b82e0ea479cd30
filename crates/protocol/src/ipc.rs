//! Messages exchanged with callers and with the remote execution engine.
//!
//! - [`Event`]: lifecycle notifications the controller sends to its caller
//! - [`SubmitRequest`] / [`SubmitResponse`]: the task submission exchange
//!
//! Notifications are delivered over a channel in the same step that
//! publishes the state change causing them, so a caller that reads both sees
//! them in a consistent order.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use ts_rs::TS;

use crate::log_models::TerminalLine;
use crate::task_models::{ExecutionStep, ExecutionTask, Phase};

/// Lifecycle notifications sent from the controller to its caller.
///
/// Uses tagged enum serialization for TypeScript compatibility:
/// ```json
/// {
///   "type": "phaseChanged",
///   "payload": { "task_id": "T1", "from": "planning", "to": "executing" }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum Event {
    /// The task's phase moved.
    PhaseChanged {
        task_id: String,
        from: Phase,
        to: Phase,
    },

    /// The agent selected or invoked a tool.
    ToolCall { task_id: String, step: ExecutionStep },

    /// A line of terminal output arrived.
    TerminalOutput { task_id: String, line: TerminalLine },

    /// The task finished without a task-level error.
    ///
    /// Sent at most once per task. Also used when the engine reports that the
    /// task was cancelled remotely; `task.status` tells the two apart.
    Completed { task: ExecutionTask },

    /// The task failed.
    ///
    /// Sent at most once per task, and never together with `Completed`.
    Failed { task_id: String, error: String },
}

impl Event {
    pub fn task_id(&self) -> &str {
        match self {
            Self::PhaseChanged { task_id, .. }
            | Self::ToolCall { task_id, .. }
            | Self::TerminalOutput { task_id, .. }
            | Self::Failed { task_id, .. } => task_id,
            Self::Completed { task } => &task.id,
        }
    }

    /// Whether this is one of the two terminal notifications.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Failed { .. })
    }
}

/// A file handed to the engine along with the prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
pub struct Attachment {
    pub file_name: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// Body of the engine's task submission request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
pub struct SubmitRequest {
    pub prompt: String,

    pub task_type: String,

    /// Execution mode understood by the engine (for example `"agent"`).
    #[serde(default)]
    pub mode: String,

    #[serde(default)]
    pub params: Value,

    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

impl SubmitRequest {
    /// A request with the default `"agent"` mode and no parameters.
    pub fn new(prompt: impl Into<String>, task_type: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            task_type: task_type.into(),
            mode: "agent".to_string(),
            params: Value::Null,
            attachments: Vec::new(),
        }
    }

    pub fn with_mode(mut self, mode: impl Into<String>) -> Self {
        self.mode = mode.into();
        self
    }

    pub fn with_params(mut self, params: Value) -> Self {
        self.params = params;
        self
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }
}

/// The engine's answer to a submission.
///
/// Engines differ in how they name the id field; all spellings are accepted.
/// A missing or empty id means the submission produced no task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
pub struct SubmitResponse {
    #[serde(default, alias = "taskId", alias = "id")]
    pub task_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
