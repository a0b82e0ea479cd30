//! Decoding of raw transport payloads into progress events.
//!
//! Engines are not consistent about field names, so lookups accept a short
//! list of spellings for each field. A payload that cannot be understood is
//! a [`MalformedEvent`]; callers drop it and keep the connection open.

use crate::engine::base::StreamFrame;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use thiserror::Error;
use tw_protocol::envelope::ProgressEvent;
use tw_protocol::log_models::TerminalStream;
use tw_protocol::task_models::{TaskOutput, TaskStatus};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Malformed {event} event: {reason}")]
pub struct MalformedEvent {
    pub event: String,
    pub reason: String,
}

impl MalformedEvent {
    fn new(event: &str, reason: impl Into<String>) -> Self {
        Self {
            event: event.to_string(),
            reason: reason.into(),
        }
    }
}

/// Decode one server-push frame.
///
/// Returns `Ok(None)` for frames outside the progress vocabulary, such as
/// keep-alive pings.
pub fn decode_stream_frame(frame: &StreamFrame) -> Result<Option<ProgressEvent>, MalformedEvent> {
    let name = frame.event.as_str();
    let event = match name {
        "status" | "phase_change" => decode_status(name, &object_payload(name, &frame.data)?)?,
        "thinking" => ProgressEvent::Thinking {
            content: text_payload(name, &frame.data)?,
        },
        "reasoning" => ProgressEvent::Reasoning {
            content: text_payload(name, &frame.data)?,
        },
        "message" => ProgressEvent::Message {
            content: text_payload(name, &frame.data)?,
        },
        "tool_select" | "tool_call" => {
            let payload = object_payload(name, &frame.data)?;
            let step_id = step_id(&payload);
            let tool_name = required(name, &payload, &["tool_name", "name", "tool"])?;
            let input = field(&payload, &["input", "args", "arguments"]).unwrap_or(Value::Null);
            if name == "tool_select" {
                ProgressEvent::ToolSelect { step_id, tool_name, input }
            } else {
                ProgressEvent::ToolCall { step_id, tool_name, input }
            }
        }
        "tool_start" => ProgressEvent::ToolStart {
            step_id: step_id(&object_payload(name, &frame.data)?),
        },
        "tool_complete" => {
            let payload = object_payload(name, &frame.data)?;
            ProgressEvent::ToolComplete {
                step_id: step_id(&payload),
                output: field(&payload, &["output", "result"]).unwrap_or(Value::Null),
            }
        }
        "tool_result" => decode_tool_result(&object_payload(name, &frame.data)?),
        "tool_error" => {
            let payload = object_payload(name, &frame.data)?;
            ProgressEvent::ToolError {
                step_id: step_id(&payload),
                error: required(name, &payload, &["error", "message"])?,
            }
        }
        "step_complete" => ProgressEvent::StepComplete,
        "terminal" => decode_terminal(name, &frame.data)?,
        "sandbox" => ProgressEvent::Sandbox {
            url: required(name, &object_payload(name, &frame.data)?, &["url", "sandbox_url", "sandboxUrl"])?,
        },
        "output" => {
            let payload = Value::Object(object_payload(name, &frame.data)?);
            let raw = payload.get("output").cloned().unwrap_or(payload);
            let output: TaskOutput = serde_json::from_value(raw)
                .map_err(|e| MalformedEvent::new(name, e.to_string()))?;
            ProgressEvent::Output { output }
        }
        "complete" => decode_complete(name, &object_payload(name, &frame.data)?)?,
        "error" => ProgressEvent::Error {
            message: text_payload(name, &frame.data)
                .unwrap_or_else(|_| "Unknown error".to_string()),
        },
        _ => return Ok(None),
    };
    Ok(Some(event))
}

/// A decoded row of the append-only log table.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRow {
    pub id: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub event: ProgressEvent,
}

/// Decode an inserted log row, dispatching on its `log_type` column.
pub fn decode_log_row(row: &Value) -> Result<LogRow, MalformedEvent> {
    let log_type = row
        .get("log_type")
        .and_then(Value::as_str)
        .ok_or_else(|| MalformedEvent::new("log", "missing log_type"))?;
    let content = row.get("content").and_then(as_string).unwrap_or_default();
    let metadata = metadata(row);

    let event = match log_type {
        "phase_change" => {
            let mut fields = metadata.clone();
            if !fields.contains_key("phase") && !fields.contains_key("status") {
                fields.insert("phase".to_string(), Value::String(content.clone()));
            }
            decode_status(log_type, &fields)?
        }
        "thinking" => ProgressEvent::Thinking { content },
        "reasoning" => ProgressEvent::Reasoning { content },
        "tool_select" => ProgressEvent::ToolSelect {
            step_id: step_id(&metadata),
            tool_name: lookup(&metadata, &["tool_name", "tool"])
                .or_else(|| (!content.is_empty()).then(|| content.clone()))
                .ok_or_else(|| MalformedEvent::new(log_type, "missing tool name"))?,
            input: field(&metadata, &["input", "tool_input", "args"]).unwrap_or(Value::Null),
        },
        "tool_start" => ProgressEvent::ToolStart {
            step_id: step_id(&metadata),
        },
        "tool_complete" => ProgressEvent::ToolComplete {
            step_id: step_id(&metadata),
            output: field(&metadata, &["output", "tool_output", "result"])
                .unwrap_or(Value::String(content)),
        },
        "tool_error" => ProgressEvent::ToolError {
            step_id: step_id(&metadata),
            error: lookup(&metadata, &["error", "error_message"]).unwrap_or(content),
        },
        "step_complete" => ProgressEvent::StepComplete,
        other => return Err(MalformedEvent::new(other, "unknown log_type")),
    };

    Ok(LogRow {
        id: row.get("id").and_then(as_string),
        created_at: row
            .get("created_at")
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|t| t.with_timezone(&Utc)),
        event,
    })
}

/// Decode an update of the task's summary row.
///
/// Non-terminal statuses become a `Status` event. A terminal status becomes
/// a `Complete` event carrying the row's summary and error, since nothing is
/// applied after the phase turns terminal.
pub fn decode_summary_row(row: &Value) -> Result<Vec<ProgressEvent>, MalformedEvent> {
    let fields = row
        .as_object()
        .ok_or_else(|| MalformedEvent::new("task_update", "row is not an object"))?;
    let mut events = Vec::new();

    if let Some(url) = lookup(fields, &["sandbox_url"]) {
        events.push(ProgressEvent::Sandbox { url });
    }

    match decode_status("task_update", fields)? {
        ProgressEvent::Status { status, .. } if status.is_terminal() => {
            events.push(ProgressEvent::Complete {
                status,
                summary: lookup(fields, &["result_summary", "summary"]),
                error: lookup(fields, &["error_message", "error"]),
            });
        }
        status => events.push(status),
    }
    Ok(events)
}

fn decode_status(event: &str, payload: &Map<String, Value>) -> Result<ProgressEvent, MalformedEvent> {
    let raw = payload
        .get("status")
        .or_else(|| payload.get("phase"))
        .cloned()
        .ok_or_else(|| MalformedEvent::new(event, "missing status"))?;
    let status: TaskStatus =
        serde_json::from_value(raw).map_err(|e| MalformedEvent::new(event, e.to_string()))?;
    Ok(ProgressEvent::Status {
        status,
        current_step: count(payload, &["current_step", "currentStep"]),
        total_steps: count(payload, &["total_steps", "totalSteps"]),
        error: lookup(payload, &["error", "error_message", "errorMessage"]),
    })
}

fn decode_tool_result(payload: &Map<String, Value>) -> ProgressEvent {
    let step_id = step_id(payload);
    let failed = payload.get("success").and_then(Value::as_bool) == Some(false);
    match lookup(payload, &["error", "error_message"]) {
        Some(error) => ProgressEvent::ToolError { step_id, error },
        None if failed => ProgressEvent::ToolError {
            step_id,
            error: "Tool call failed".to_string(),
        },
        None => ProgressEvent::ToolComplete {
            step_id,
            output: field(payload, &["output", "result"]).unwrap_or(Value::Null),
        },
    }
}

fn decode_complete(event: &str, payload: &Map<String, Value>) -> Result<ProgressEvent, MalformedEvent> {
    let status = match payload.get("status") {
        Some(raw) => serde_json::from_value(raw.clone())
            .map_err(|e| MalformedEvent::new(event, e.to_string()))?,
        None => TaskStatus::Completed,
    };
    Ok(ProgressEvent::Complete {
        status,
        summary: lookup(payload, &["summary", "result_summary", "result"]),
        error: lookup(payload, &["error", "error_message"]),
    })
}

fn decode_terminal(event: &str, data: &str) -> Result<ProgressEvent, MalformedEvent> {
    let Ok(Value::Object(payload)) = serde_json::from_str::<Value>(data) else {
        return Ok(ProgressEvent::Terminal {
            stream: TerminalStream::Stdout,
            content: data.to_string(),
        });
    };
    let stream = payload
        .get("stream")
        .or_else(|| payload.get("type"))
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or_default();
    Ok(ProgressEvent::Terminal {
        stream,
        content: required(event, &payload, &["content", "text", "line", "data"])?,
    })
}

/// Parse a payload that must be a JSON object. Empty data counts as `{}`.
fn object_payload(event: &str, data: &str) -> Result<Map<String, Value>, MalformedEvent> {
    if data.trim().is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_str::<Value>(data) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(MalformedEvent::new(event, "payload is not an object")),
        Err(e) => Err(MalformedEvent::new(event, e.to_string())),
    }
}

/// Text-bearing payloads may be a JSON object, a JSON string or raw text.
fn text_payload(event: &str, data: &str) -> Result<String, MalformedEvent> {
    match serde_json::from_str::<Value>(data) {
        Ok(Value::Object(map)) => required(event, &map, &["content", "text", "delta", "message"]),
        Ok(Value::String(s)) => Ok(s),
        Ok(_) => Err(MalformedEvent::new(event, "payload carries no text")),
        Err(_) if !data.trim().is_empty() => Ok(data.to_string()),
        Err(e) => Err(MalformedEvent::new(event, e.to_string())),
    }
}

fn metadata(row: &Value) -> Map<String, Value> {
    match row.get("metadata") {
        Some(Value::Object(map)) => map.clone(),
        Some(Value::String(s)) => match serde_json::from_str::<Value>(s) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        },
        _ => Map::new(),
    }
}

fn step_id(payload: &Map<String, Value>) -> Option<String> {
    lookup(payload, &["step_id", "tool_call_id", "id"])
}

fn field(payload: &Map<String, Value>, keys: &[&str]) -> Option<Value> {
    keys.iter()
        .find_map(|k| payload.get(*k).filter(|v| !v.is_null()))
        .cloned()
}

fn lookup(payload: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| payload.get(*k).and_then(as_string))
}

fn required(event: &str, payload: &Map<String, Value>, keys: &[&str]) -> Result<String, MalformedEvent> {
    lookup(payload, keys).ok_or_else(|| MalformedEvent::new(event, format!("missing {}", keys[0])))
}

fn count(payload: &Map<String, Value>, keys: &[&str]) -> Option<u32> {
    keys.iter()
        .find_map(|k| payload.get(*k).and_then(Value::as_u64))
        .map(|n| u32::try_from(n).unwrap_or(u32::MAX))
}

fn as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn frame(event: &str, data: Value) -> StreamFrame {
        StreamFrame::new(event, data.to_string())
    }

    #[test]
    fn test_status_with_counts() {
        let event = decode_stream_frame(&frame(
            "status",
            json!({ "status": "executing", "currentStep": 2, "total_steps": 5 }),
        ))
        .unwrap();
        assert_eq!(
            event,
            Some(ProgressEvent::Status {
                status: TaskStatus::Executing,
                current_step: Some(2),
                total_steps: Some(5),
                error: None,
            })
        );
    }

    #[test]
    fn test_failed_status_keeps_engine_message() {
        let event = decode_stream_frame(&frame(
            "status",
            json!({ "status": "failed", "error_message": "oom" }),
        ))
        .unwrap();
        assert!(matches!(
            event,
            Some(ProgressEvent::Status { status: TaskStatus::Failed, error: Some(ref e), .. }) if e == "oom"
        ));
    }

    #[test]
    fn test_tool_call_field_spellings() {
        let event = decode_stream_frame(&frame(
            "tool_call",
            json!({ "tool_call_id": "c1", "name": "search", "arguments": { "q": "x" } }),
        ))
        .unwrap()
        .unwrap();
        match event {
            ProgressEvent::ToolCall { step_id, tool_name, input } => {
                assert_eq!(step_id.as_deref(), Some("c1"));
                assert_eq!(tool_name, "search");
                assert_eq!(input["q"], "x");
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_tool_result_splits_success_and_failure() {
        let ok = decode_stream_frame(&frame("tool_result", json!({ "id": "c1", "output": "ok" })))
            .unwrap()
            .unwrap();
        assert!(matches!(ok, ProgressEvent::ToolComplete { .. }));

        let failed = decode_stream_frame(&frame("tool_result", json!({ "id": "c1", "success": false })))
            .unwrap()
            .unwrap();
        assert!(matches!(failed, ProgressEvent::ToolError { .. }));
    }

    #[test]
    fn test_thinking_accepts_raw_text() {
        let event = decode_stream_frame(&StreamFrame::new("thinking", "pondering"))
            .unwrap()
            .unwrap();
        assert_eq!(
            event,
            ProgressEvent::Thinking {
                content: "pondering".to_string()
            }
        );
    }

    #[test]
    fn test_malformed_payloads_are_errors() {
        assert!(decode_stream_frame(&StreamFrame::new("status", "{not json")).is_err());
        assert!(decode_stream_frame(&frame("status", json!({ "status": "exploded" }))).is_err());
        assert!(decode_stream_frame(&frame("tool_select", json!({ "id": "s1" }))).is_err());
        assert!(decode_stream_frame(&frame("sandbox", json!([1, 2]))).is_err());
    }

    #[test]
    fn test_unknown_event_is_ignored() {
        assert_eq!(decode_stream_frame(&StreamFrame::new("ping", "")).unwrap(), None);
    }

    #[test]
    fn test_complete_defaults_to_completed() {
        let event = decode_stream_frame(&StreamFrame::new("complete", "")).unwrap();
        assert!(matches!(
            event,
            Some(ProgressEvent::Complete {
                status: TaskStatus::Completed,
                ..
            })
        ));
    }

    #[test]
    fn test_log_row_tool_select() {
        let row = decode_log_row(&json!({
            "id": 17,
            "task_id": "T1",
            "log_type": "tool_select",
            "content": "Selecting search",
            "metadata": { "tool_name": "search", "step_id": "s1", "input": { "q": "rust" } },
            "created_at": "2026-01-02T03:04:05Z"
        }))
        .unwrap();

        assert_eq!(row.id.as_deref(), Some("17"));
        assert!(row.created_at.is_some());
        assert_eq!(
            row.event,
            ProgressEvent::ToolSelect {
                step_id: Some("s1".to_string()),
                tool_name: "search".to_string(),
                input: json!({ "q": "rust" }),
            }
        );
    }

    #[test]
    fn test_log_row_phase_change_from_content() {
        let row = decode_log_row(&json!({
            "id": "a",
            "log_type": "phase_change",
            "content": "thinking",
            "metadata": "{\"current_step\": 1}"
        }))
        .unwrap();
        assert_eq!(
            row.event,
            ProgressEvent::Status {
                status: TaskStatus::Thinking,
                current_step: Some(1),
                total_steps: None,
                error: None,
            }
        );
    }

    #[test]
    fn test_log_row_unknown_type_is_malformed() {
        let err = decode_log_row(&json!({ "id": "a", "log_type": "telepathy" })).unwrap_err();
        assert_eq!(err.event, "telepathy");
    }

    #[test]
    fn test_summary_row_terminal_becomes_complete() {
        let events = decode_summary_row(&json!({
            "id": "T1",
            "status": "failed",
            "error_message": "oom"
        }))
        .unwrap();
        assert_eq!(
            events,
            vec![ProgressEvent::Complete {
                status: TaskStatus::Failed,
                summary: None,
                error: Some("oom".to_string()),
            }]
        );
    }

    #[test]
    fn test_summary_row_progress() {
        let events = decode_summary_row(&json!({
            "id": "T1",
            "status": "executing",
            "current_step": 1,
            "total_steps": 4,
            "sandbox_url": "https://sandbox.example/T1"
        }))
        .unwrap();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], ProgressEvent::Sandbox { .. }));
        assert!(matches!(
            events[1],
            ProgressEvent::Status {
                status: TaskStatus::Executing,
                total_steps: Some(4),
                ..
            }
        ));
    }
}
