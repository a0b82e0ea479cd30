//! Scripted in-process engine for tests and demos.
//!
//! Submissions, event streams and snapshots are all driven by the caller:
//! each [`ScriptedEngine::push_stream`] call queues one stream that
//! `open_stream` will hand out, and the returned [`StreamScript`] feeds it.
//! Dropping a `StreamScript` ends its stream without a final event, which is
//! exactly what an abnormal server disconnect looks like to a transport.

use crate::engine::base::{EngineError, ExecutionEngine, FrameStream, StreamFrame};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tw_protocol::ipc::{SubmitRequest, SubmitResponse};
use tw_protocol::task_models::TaskSnapshot;

/// A call the engine received, in order of arrival.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    Submit { prompt: String },
    OpenStream { task_id: String },
    Snapshot { task_id: String },
    Cancel { task_id: String },
    Pause { task_id: String },
    Resume { task_id: String },
}

type FrameSender = mpsc::UnboundedSender<Result<StreamFrame, EngineError>>;
type FrameReceiver = mpsc::UnboundedReceiver<Result<StreamFrame, EngineError>>;

#[derive(Default)]
struct Script {
    submit: Option<Result<SubmitResponse, EngineError>>,
    streams: VecDeque<FrameReceiver>,
    snapshots: VecDeque<Result<TaskSnapshot, EngineError>>,
    last_snapshot: Option<TaskSnapshot>,
    calls: Vec<EngineCall>,
}

#[derive(Default)]
pub struct ScriptedEngine {
    script: Mutex<Script>,
}

/// Feeds frames into one scripted event stream.
pub struct StreamScript {
    tx: FrameSender,
}

impl StreamScript {
    /// Send a named event with a JSON payload.
    ///
    /// Returns false once the consumer has dropped the stream.
    pub fn send(&self, event: &str, data: Value) -> bool {
        self.send_raw(event, &data.to_string())
    }

    /// Send a named event with an arbitrary (possibly malformed) payload.
    pub fn send_raw(&self, event: &str, data: &str) -> bool {
        self.tx.send(Ok(StreamFrame::new(event, data))).is_ok()
    }

    pub fn send_frame(&self, frame: StreamFrame) -> bool {
        self.tx.send(Ok(frame)).is_ok()
    }

    /// Deliver a transport error to the consumer.
    pub fn fail(&self, error: EngineError) -> bool {
        self.tx.send(Err(error)).is_ok()
    }

    /// Whether the consumer still holds the stream.
    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }
}

impl ScriptedEngine {
    /// An engine that accepts submissions as task `T1`.
    pub fn new() -> Self {
        Self::with_task_id("T1")
    }

    pub fn with_task_id(task_id: &str) -> Self {
        let engine = Self::default();
        engine.lock().submit = Some(Ok(SubmitResponse {
            task_id: Some(task_id.to_string()),
            error: None,
        }));
        engine
    }

    /// An engine that rejects every submission with `error`.
    pub fn rejecting(error: EngineError) -> Self {
        let engine = Self::default();
        engine.lock().submit = Some(Err(error));
        engine
    }

    /// An engine whose submissions succeed but carry no task id.
    pub fn without_task_id() -> Self {
        let engine = Self::default();
        engine.lock().submit = Some(Ok(SubmitResponse {
            task_id: None,
            error: Some("no worker available".to_string()),
        }));
        engine
    }

    /// Queue an event stream for the next `open_stream` call.
    pub fn push_stream(&self) -> StreamScript {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().streams.push_back(rx);
        StreamScript { tx }
    }

    /// Queue a snapshot. Once the queue drains, the last successful
    /// snapshot is served again.
    pub fn push_snapshot(&self, snapshot: TaskSnapshot) {
        self.lock().snapshots.push_back(Ok(snapshot));
    }

    pub fn push_snapshot_error(&self, error: EngineError) {
        self.lock().snapshots.push_back(Err(error));
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        self.lock().calls.clone()
    }

    /// Number of snapshot fetches served so far.
    pub fn snapshot_calls(&self) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| matches!(c, EngineCall::Snapshot { .. }))
            .count()
    }

    fn lock(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, call: EngineCall) {
        self.lock().calls.push(call);
    }
}

#[async_trait]
impl ExecutionEngine for ScriptedEngine {
    async fn submit(
        &self,
        request: &SubmitRequest,
        _token: &str,
    ) -> Result<SubmitResponse, EngineError> {
        self.record(EngineCall::Submit {
            prompt: request.prompt.clone(),
        });
        self.lock()
            .submit
            .clone()
            .unwrap_or_else(|| Err(EngineError::Request("no submission scripted".to_string())))
    }

    async fn open_stream(&self, task_id: &str, _token: &str) -> Result<FrameStream, EngineError> {
        self.record(EngineCall::OpenStream {
            task_id: task_id.to_string(),
        });
        let rx = self.lock().streams.pop_front().ok_or_else(|| {
            EngineError::StreamUnavailable("no stream scripted".to_string())
        })?;
        Ok(Box::pin(UnboundedReceiverStream::new(rx)))
    }

    async fn snapshot(&self, task_id: &str, _token: &str) -> Result<TaskSnapshot, EngineError> {
        self.record(EngineCall::Snapshot {
            task_id: task_id.to_string(),
        });
        let mut script = self.lock();
        match script.snapshots.pop_front() {
            Some(Ok(snapshot)) => {
                script.last_snapshot = Some(snapshot.clone());
                Ok(snapshot)
            }
            Some(Err(e)) => Err(e),
            None => script
                .last_snapshot
                .clone()
                .ok_or_else(|| EngineError::Status {
                    status: 404,
                    message: format!("task {task_id} not found"),
                }),
        }
    }

    async fn cancel(&self, task_id: &str, _token: &str) -> Result<(), EngineError> {
        self.record(EngineCall::Cancel {
            task_id: task_id.to_string(),
        });
        Ok(())
    }

    async fn pause(&self, task_id: &str, _token: &str) -> Result<(), EngineError> {
        self.record(EngineCall::Pause {
            task_id: task_id.to_string(),
        });
        Ok(())
    }

    async fn resume(&self, task_id: &str, _token: &str) -> Result<(), EngineError> {
        self.record(EngineCall::Resume {
            task_id: task_id.to_string(),
        });
        Ok(())
    }
}
