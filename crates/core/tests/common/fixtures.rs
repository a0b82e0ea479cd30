//! Test fixtures and waiting helpers.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tw_core::engine::{ScriptedEngine, StaticCredentials};
use tw_core::ExecutionController;
use tw_protocol::config_models::{RetryPolicy, TrackerConfig, TransportKind};
use tw_protocol::ipc::Event;
use tw_protocol::state_models::ExecutionState;
use tw_protocol::task_models::{ExecutionTask, TaskSnapshot, TaskStatus};

const WAIT_LIMIT: Duration = Duration::from_secs(5);

/// A controller wired to a scripted engine, plus its notification channel.
pub struct Harness {
    pub engine: Arc<ScriptedEngine>,
    pub controller: ExecutionController,
    pub events: mpsc::UnboundedReceiver<Event>,
}

/// Tracker settings with short timings so tests finish quickly.
pub fn fast_config(transport: TransportKind) -> TrackerConfig {
    TrackerConfig {
        transport,
        poll_interval_ms: 20,
        retry: RetryPolicy {
            max_attempts: 3,
            initial_backoff_ms: 5,
            max_backoff_ms: 20,
        },
        ..TrackerConfig::default()
    }
}

pub fn harness(engine: ScriptedEngine, config: TrackerConfig) -> Harness {
    let engine = Arc::new(engine);
    let (events_tx, events) = mpsc::unbounded_channel();
    let controller = ExecutionController::builder(
        engine.clone(),
        Arc::new(StaticCredentials::new("test-token")),
    )
    .config(config)
    .events(events_tx)
    .build();
    Harness {
        engine,
        controller,
        events,
    }
}

pub fn snapshot(task_id: &str, status: TaskStatus) -> TaskSnapshot {
    TaskSnapshot {
        task: ExecutionTask::new(task_id, status),
        steps: Vec::new(),
        outputs: Vec::new(),
    }
}

/// Wait until the published state satisfies `predicate`.
pub async fn wait_for_state<F>(controller: &ExecutionController, mut predicate: F) -> ExecutionState
where
    F: FnMut(&ExecutionState) -> bool,
{
    let mut rx = controller.subscribe();
    tokio::time::timeout(WAIT_LIMIT, async {
        loop {
            {
                let state = rx.borrow_and_update();
                if predicate(&state) {
                    return state.clone();
                }
            }
            rx.changed().await.expect("controller dropped");
        }
    })
    .await
    .expect("timed out waiting for state")
}

/// Poll `condition` until it holds.
pub async fn eventually<F>(mut condition: F)
where
    F: FnMut() -> bool,
{
    tokio::time::timeout(WAIT_LIMIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition never became true");
}

/// Receive notifications until one matches `predicate`; returns everything
/// received up to and including it.
pub async fn wait_for_event<F>(events: &mut mpsc::UnboundedReceiver<Event>, predicate: F) -> Vec<Event>
where
    F: Fn(&Event) -> bool,
{
    tokio::time::timeout(WAIT_LIMIT, async {
        let mut seen = Vec::new();
        loop {
            let event = events.recv().await.expect("event channel closed");
            let done = predicate(&event);
            seen.push(event);
            if done {
                return seen;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

/// Everything currently queued on the channel.
pub fn drain(events: &mut mpsc::UnboundedReceiver<Event>) -> Vec<Event> {
    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    seen
}

/// Let spawned tasks run for a while.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}
