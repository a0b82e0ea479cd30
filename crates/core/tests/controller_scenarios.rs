//! End-to-end controller scenarios against a scripted engine.

mod common;

use common::*;
use serde_json::json;
use tw_core::engine::{EngineCall, ScriptedEngine};
use tw_protocol::config_models::TransportKind;
use tw_protocol::ipc::{Event, SubmitRequest};
use tw_protocol::log_models::ThoughtKind;
use tw_protocol::task_models::{Phase, StepStatus, TaskStatus};

#[tokio::test]
async fn test_streamed_task_runs_to_completion() {
    let mut h = harness(ScriptedEngine::with_task_id("T1"), fast_config(TransportKind::Stream));
    let stream = h.engine.push_stream();

    let task = h
        .controller
        .start(SubmitRequest::new("summarize doc", "research"))
        .await
        .expect("submission should succeed");
    assert_eq!(task.id, "T1");
    assert_eq!(task.prompt, "summarize doc");
    assert!(h.controller.state().is_planning());

    stream.send("tool_select", json!({ "id": "s1", "tool_name": "search", "input": { "q": "doc" } }));
    stream.send("tool_start", json!({ "id": "s1" }));
    stream.send("tool_complete", json!({ "id": "s1", "output": "ok" }));
    stream.send("step_complete", json!({}));
    stream.send("complete", json!({ "status": "completed", "summary": "All done" }));

    let events = wait_for_event(&mut h.events, Event::is_terminal).await;
    let state = h.controller.state();

    assert_eq!(state.phase, Phase::Completed);
    assert_eq!(state.steps.len(), 1);
    assert_eq!(state.steps[0].status, StepStatus::Succeeded);
    assert_eq!(state.steps[0].output, Some(json!("ok")));
    let task = state.task.as_ref().unwrap();
    assert_eq!(task.current_step, 1);
    assert_eq!(task.result_summary.as_deref(), Some("All done"));

    assert_single_terminal(&events);
    assert_eq!(
        phase_changes(&events),
        vec![Phase::Selecting, Phase::Executing, Phase::Observing, Phase::Completed]
    );
    assert!(events
        .iter()
        .any(|e| matches!(e, Event::ToolCall { step, .. } if step.tool_name == "search")));
    assert!(matches!(
        events.last(),
        Some(Event::Completed { task }) if task.status == TaskStatus::Completed
    ));
    assert_eq!(h.controller.active_transport(), None);
    assert_eq!(
        h.engine.calls()[..2],
        [
            EngineCall::Submit {
                prompt: "summarize doc".to_string()
            },
            EngineCall::OpenStream {
                task_id: "T1".to_string()
            },
        ]
    );
}

#[tokio::test]
async fn test_abnormal_stream_close_falls_back_to_polling() {
    let mut h = harness(ScriptedEngine::with_task_id("T1"), fast_config(TransportKind::Stream));
    h.engine.push_snapshot(snapshot("T1", TaskStatus::Executing));
    let stream = h.engine.push_stream();

    h.controller
        .start(SubmitRequest::new("summarize doc", "research"))
        .await
        .unwrap();
    stream.send("thinking", json!({ "content": "Reading the document" }));
    wait_for_state(&h.controller, |s| s.phase == Phase::Thinking).await;
    drop(stream);

    eventually(|| h.controller.active_transport() == Some(TransportKind::Poll)).await;
    eventually(|| h.engine.snapshot_calls() >= 1).await;
    let state = wait_for_state(&h.controller, |s| s.phase == Phase::Executing).await;

    assert!(state.is_executing());
    assert!(state.error.is_none());
    assert_eq!(state.thinking, "Reading the document");
    assert_eq!(h.controller.metrics().fallbacks, 1);
    assert_eq!(terminal_count(&drain(&mut h.events)), 0);
}

#[tokio::test]
async fn test_failed_snapshot_fails_task_once() {
    let mut h = harness(ScriptedEngine::with_task_id("T1"), fast_config(TransportKind::Poll));
    let mut failed = snapshot("T1", TaskStatus::Failed);
    failed.task.error_message = Some("oom".to_string());
    h.engine.push_snapshot(failed);

    h.controller
        .start(SubmitRequest::new("train model", "compute"))
        .await
        .unwrap();

    let events = wait_for_event(&mut h.events, Event::is_terminal).await;
    assert_single_terminal(&events);
    assert_eq!(failure_message(&events), Some("oom"));

    let state = h.controller.state();
    assert!(state.is_failed());
    assert_eq!(state.error.as_deref(), Some("oom"));
    assert_eq!(h.controller.active_transport(), None);

    let polls = h.engine.snapshot_calls();
    settle().await;
    assert_eq!(h.engine.snapshot_calls(), polls, "polling should have stopped");
    assert_eq!(terminal_count(&drain(&mut h.events)), 0);
}

#[tokio::test]
async fn test_stop_while_executing_ignores_late_events() {
    let mut h = harness(ScriptedEngine::with_task_id("T1"), fast_config(TransportKind::Stream));
    let stream = h.engine.push_stream();

    h.controller
        .start(SubmitRequest::new("long job", "compute"))
        .await
        .unwrap();
    stream.send("tool_call", json!({ "id": "c1", "name": "shell", "arguments": { "cmd": "make" } }));
    wait_for_state(&h.controller, |s| s.phase == Phase::Executing).await;

    h.controller.stop();
    let stopped = h.controller.state();
    assert_eq!(stopped.phase, Phase::Stopped);
    assert_eq!(h.controller.active_transport(), None);

    eventually(|| !stream.is_open()).await;
    assert!(!stream.send("terminal", json!({ "content": "late line" })));
    settle().await;
    assert_eq!(h.controller.state(), stopped);

    eventually(|| h.engine.calls().contains(&EngineCall::Cancel { task_id: "T1".to_string() })).await;
    let events = drain(&mut h.events);
    assert_eq!(terminal_count(&events), 0);
    assert_eq!(phase_changes(&events).last(), Some(&Phase::Stopped));
}

#[tokio::test]
async fn test_terminal_seen_twice_notifies_once() {
    let mut h = harness(ScriptedEngine::with_task_id("T1"), fast_config(TransportKind::Stream));
    h.engine.push_snapshot(snapshot("T1", TaskStatus::Completed));
    let stream = h.engine.push_stream();

    h.controller
        .start(SubmitRequest::new("quick", "research"))
        .await
        .unwrap();
    stream.send("message", json!({ "content": "finishing" }));
    stream.send("complete", json!({ "status": "completed" }));
    stream.send("complete", json!({ "status": "completed" }));
    drop(stream);

    let mut events = wait_for_event(&mut h.events, Event::is_terminal).await;
    settle().await;
    events.extend(drain(&mut h.events));

    assert_eq!(terminal_count(&events), 1);
    assert_eq!(h.engine.snapshot_calls(), 0);
    assert_eq!(h.controller.metrics().fallbacks, 0);
}

#[tokio::test]
async fn test_fallback_poll_completion_notifies_once() {
    let mut h = harness(ScriptedEngine::with_task_id("T1"), fast_config(TransportKind::Stream));
    h.engine.push_snapshot(snapshot("T1", TaskStatus::Completed));
    let stream = h.engine.push_stream();

    h.controller
        .start(SubmitRequest::new("quick", "research"))
        .await
        .unwrap();
    stream.send("status", json!({ "status": "executing" }));
    wait_for_state(&h.controller, |s| s.phase == Phase::Executing).await;
    drop(stream);

    let mut events = wait_for_event(&mut h.events, Event::is_terminal).await;
    settle().await;
    events.extend(drain(&mut h.events));

    assert_eq!(terminal_count(&events), 1);
    assert!(h.controller.state().is_completed());
    assert_eq!(h.controller.metrics().fallbacks, 1);
}

#[tokio::test]
async fn test_failed_status_surfaces_engine_message() {
    let mut h = harness(ScriptedEngine::with_task_id("T1"), fast_config(TransportKind::Stream));
    let stream = h.engine.push_stream();

    h.controller
        .start(SubmitRequest::new("train model", "compute"))
        .await
        .unwrap();
    stream.send("reasoning", json!({ "content": "loading weights" }));
    stream.send("status", json!({ "status": "failed", "error": "oom" }));

    let events = wait_for_event(&mut h.events, Event::is_terminal).await;
    assert_single_terminal(&events);
    assert_eq!(failure_message(&events), Some("oom"));

    let state = h.controller.state();
    assert!(state.is_failed());
    assert_eq!(state.error.as_deref(), Some("oom"));
    let last = state.thoughts.last().unwrap();
    assert_eq!(last.kind, ThoughtKind::Error);
    assert_eq!(last.content, "oom");
    assert_eq!(state.thoughts.len(), 2);
    assert_eq!(h.controller.active_transport(), None);
    assert_eq!(h.controller.metrics().fallbacks, 0);
}
