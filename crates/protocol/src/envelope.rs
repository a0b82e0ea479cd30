//! The transport-independent progress event.
//!
//! Every transport (server-push stream, change feed) decodes what it
//! receives into [`EventEnvelope`] values. The reducer consumes nothing else,
//! so it never needs to know where an event came from.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use ts_rs::TS;

use crate::log_models::TerminalStream;
use crate::task_models::{TaskOutput, TaskStatus};

/// One normalized progress update.
///
/// Serialized as `{"type": "tool_select", "payload": {...}}`. Tool events
/// without a `step_id` apply to the step currently in flight.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, TS)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// Authoritative status from the engine; the phase follows it verbatim.
    Status {
        status: TaskStatus,
        #[serde(default)]
        current_step: Option<u32>,
        #[serde(default)]
        total_steps: Option<u32>,
        /// Engine message accompanying a `failed` status.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    /// A chunk of streamed model text.
    Thinking { content: String },

    Reasoning { content: String },

    /// Free-form narration from the agent.
    Message { content: String },

    /// The agent picked a tool but has not invoked it yet.
    ToolSelect {
        #[serde(default)]
        step_id: Option<String>,
        tool_name: String,
        #[serde(default)]
        input: Value,
    },

    /// Selection and invocation in one event.
    ToolCall {
        #[serde(default)]
        step_id: Option<String>,
        tool_name: String,
        #[serde(default)]
        input: Value,
    },

    ToolStart {
        #[serde(default)]
        step_id: Option<String>,
    },

    ToolComplete {
        #[serde(default)]
        step_id: Option<String>,
        #[serde(default)]
        output: Value,
    },

    ToolError {
        #[serde(default)]
        step_id: Option<String>,
        error: String,
    },

    StepComplete,

    Terminal {
        #[serde(default)]
        stream: TerminalStream,
        content: String,
    },

    Output { output: TaskOutput },

    Sandbox { url: String },

    /// The run finished. `status` is expected to be terminal.
    Complete {
        status: TaskStatus,
        #[serde(default)]
        summary: Option<String>,
        #[serde(default)]
        error: Option<String>,
    },

    Error { message: String },
}

impl ProgressEvent {
    /// Wire name of the event, as used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Status { .. } => "status",
            Self::Thinking { .. } => "thinking",
            Self::Reasoning { .. } => "reasoning",
            Self::Message { .. } => "message",
            Self::ToolSelect { .. } => "tool_select",
            Self::ToolCall { .. } => "tool_call",
            Self::ToolStart { .. } => "tool_start",
            Self::ToolComplete { .. } => "tool_complete",
            Self::ToolError { .. } => "tool_error",
            Self::StepComplete => "step_complete",
            Self::Terminal { .. } => "terminal",
            Self::Output { .. } => "output",
            Self::Sandbox { .. } => "sandbox",
            Self::Complete { .. } => "complete",
            Self::Error { .. } => "error",
        }
    }

    /// Whether this event ends the run on its own.
    pub fn is_final(&self) -> bool {
        match self {
            Self::Complete { .. } | Self::Error { .. } => true,
            Self::Status { status, .. } => status.is_terminal(),
            _ => false,
        }
    }
}

/// A [`ProgressEvent`] stamped with the time it was received locally.
///
/// The timestamp travels with the event so that replaying a recorded
/// sequence reproduces the same state.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, TS)]
pub struct EventEnvelope {
    pub received_at: DateTime<Utc>,
    pub event: ProgressEvent,
}

impl EventEnvelope {
    pub fn new(event: ProgressEvent, received_at: DateTime<Utc>) -> Self {
        Self { received_at, event }
    }

    /// Stamp `event` with the current time.
    pub fn now(event: ProgressEvent) -> Self {
        Self::new(event, Utc::now())
    }
}
