//! Append-only narration and terminal output.
//!
//! Both collections only grow while a task is observed. Entries are never
//! edited; the only removal is an explicit clear requested by the caller.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use ts_rs::TS;

/// What a [`ThoughtEntry`] narrates.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, TS)]
#[serde(rename_all = "snake_case")]
pub enum ThoughtKind {
    Reasoning,
    ToolSelection,
    Result,
    Error,
    Message,
}

/// A single narration item shown in arrival order.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, TS)]
pub struct ThoughtEntry {
    pub id: String,

    #[serde(rename = "type")]
    pub kind: ThoughtKind,

    pub content: String,

    pub timestamp: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

/// Which channel a [`TerminalLine`] came from.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default, TS)]
#[serde(rename_all = "snake_case")]
pub enum TerminalStream {
    #[default]
    Stdout,
    Stderr,
    Command,
    System,
}

/// One line of raw output from the remote sandbox.
///
/// The id is generated locally, so it is unique only within the controller
/// that recorded it.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, TS)]
pub struct TerminalLine {
    pub id: String,

    #[serde(rename = "type")]
    pub stream: TerminalStream,

    pub content: String,

    pub timestamp: DateTime<Utc>,
}
