use serde_json::json;
use tw_protocol::*;

#[test]
fn test_progress_event_wire_shape() {
    let event = ProgressEvent::ToolSelect {
        step_id: Some("s1".to_string()),
        tool_name: "search".to_string(),
        input: json!({ "query": "rust" }),
    };

    let value = serde_json::to_value(&event).expect("Failed to serialize ProgressEvent");
    assert_eq!(value["type"], "tool_select");
    assert_eq!(value["payload"]["tool_name"], "search");
    assert_eq!(value["payload"]["input"]["query"], "rust");
}

#[test]
fn test_progress_event_optional_fields_default() {
    let event: ProgressEvent = serde_json::from_value(json!({
        "type": "tool_start",
        "payload": {}
    }))
    .expect("Failed to deserialize tool_start");
    assert_eq!(event, ProgressEvent::ToolStart { step_id: None });

    let event: ProgressEvent = serde_json::from_value(json!({ "type": "step_complete" }))
        .expect("Failed to deserialize step_complete");
    assert_eq!(event, ProgressEvent::StepComplete);
    assert_eq!(event.name(), "step_complete");
}

#[test]
fn test_complete_event_is_final() {
    let event: ProgressEvent = serde_json::from_value(json!({
        "type": "complete",
        "payload": { "status": "completed", "summary": "done" }
    }))
    .expect("Failed to deserialize complete");

    assert!(event.is_final());
    match event {
        ProgressEvent::Complete { status, summary, error } => {
            assert_eq!(status, TaskStatus::Completed);
            assert_eq!(summary.as_deref(), Some("done"));
            assert!(error.is_none());
        }
        other => panic!("Wrong variant: {other:?}"),
    }
}

#[test]
fn test_failed_status_carries_error() {
    let event: ProgressEvent = serde_json::from_value(json!({
        "type": "status",
        "payload": { "status": "failed", "error": "oom" }
    }))
    .expect("Failed to deserialize status");

    assert!(event.is_final());
    assert_eq!(
        event,
        ProgressEvent::Status {
            status: TaskStatus::Failed,
            current_step: None,
            total_steps: None,
            error: Some("oom".to_string()),
        }
    );

    let running: ProgressEvent = serde_json::from_value(json!({
        "type": "status",
        "payload": { "status": "executing" }
    }))
    .expect("Failed to deserialize status");
    assert!(!running.is_final());
    let value = serde_json::to_value(&running).expect("Failed to serialize status");
    assert!(value["payload"].get("error").is_none());
}

#[test]
fn test_snapshot_from_engine_json() {
    let snapshot: TaskSnapshot = serde_json::from_value(json!({
        "task": {
            "id": "T1",
            "prompt": "summarize doc",
            "task_type": "research",
            "status": "running",
            "current_step": 1,
            "total_steps": 3
        },
        "steps": [
            { "id": "s1", "step_number": 1, "tool_name": "search", "status": "completed" }
        ]
    }))
    .expect("Failed to deserialize TaskSnapshot");

    assert_eq!(snapshot.task.status, TaskStatus::Executing);
    assert_eq!(snapshot.task.total_steps, 3);
    assert_eq!(snapshot.steps[0].status, StepStatus::Succeeded);
    assert!(snapshot.outputs.is_empty());
}

#[test]
fn test_submit_response_accepts_id_spellings() {
    let camel: SubmitResponse = serde_json::from_str(r#"{"taskId":"T1"}"#).unwrap();
    assert_eq!(camel.task_id.as_deref(), Some("T1"));

    let bare: SubmitResponse = serde_json::from_str(r#"{"id":"T2"}"#).unwrap();
    assert_eq!(bare.task_id.as_deref(), Some("T2"));

    let missing: SubmitResponse = serde_json::from_str(r#"{"error":"quota"}"#).unwrap();
    assert!(missing.task_id.is_none());
    assert_eq!(missing.error.as_deref(), Some("quota"));
}

#[test]
fn test_event_enum_serialization() {
    let event = Event::PhaseChanged {
        task_id: "T1".to_string(),
        from: Phase::Planning,
        to: Phase::Executing,
    };

    let json = serde_json::to_value(&event).expect("Failed to serialize Event");
    assert_eq!(json["type"], "phaseChanged");
    assert_eq!(json["payload"]["to"], "executing");
    assert_eq!(event.task_id(), "T1");
    assert!(!event.is_terminal());

    let failed = Event::Failed {
        task_id: "T1".to_string(),
        error: "oom".to_string(),
    };
    assert!(failed.is_terminal());
}

#[test]
fn test_tracker_config_partial_toml_shape() {
    let config: TrackerConfig = serde_json::from_value(json!({
        "transport": "poll",
        "retry": { "max_attempts": 3 }
    }))
    .expect("Failed to deserialize TrackerConfig");

    assert_eq!(config.transport, TransportKind::Poll);
    assert_eq!(config.poll_interval_ms, 2000);
    assert_eq!(config.retry.max_attempts, 3);
    assert_eq!(config.retry.initial_backoff_ms, 500);
    assert_eq!(config.change_feed.log_table, "agent_logs");
}
