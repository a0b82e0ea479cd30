//! Remote execution engine trait and supporting types.

use async_trait::async_trait;
use std::pin::Pin;
use thiserror::Error;
use tokio_stream::Stream;
use tw_protocol::ipc::{SubmitRequest, SubmitResponse};
use tw_protocol::task_models::TaskSnapshot;

/// One named message from the engine's server-push stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamFrame {
    /// Delivery id, when the server assigns one.
    pub id: Option<String>,
    /// Event name (`status`, `tool_call`, ...). `message` when unnamed.
    pub event: String,
    /// Raw payload, normally JSON.
    pub data: String,
}

impl StreamFrame {
    pub fn new(event: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            id: None,
            event: event.into(),
            data: data.into(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

pub type FrameStream = Pin<Box<dyn Stream<Item = Result<StreamFrame, EngineError>> + Send>>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("Not authenticated with the execution engine")]
    Unauthorized,
    #[error("Engine responded with {status}: {message}")]
    Status { status: u16, message: String },
    #[error("Request failed: {0}")]
    Request(String),
    #[error("Failed to decode engine response: {0}")]
    Decode(String),
    #[error("Event stream unavailable: {0}")]
    StreamUnavailable(String),
}

/// The remote service that runs agent tasks.
///
/// Every call carries the bearer token explicitly; implementations never
/// look credentials up on their own.
#[async_trait]
pub trait ExecutionEngine: Send + Sync {
    async fn submit(
        &self,
        request: &SubmitRequest,
        token: &str,
    ) -> Result<SubmitResponse, EngineError>;

    /// Open the task's event stream. Dropping the returned stream closes it.
    async fn open_stream(&self, task_id: &str, token: &str) -> Result<FrameStream, EngineError>;

    async fn snapshot(&self, task_id: &str, token: &str) -> Result<TaskSnapshot, EngineError>;

    async fn cancel(&self, task_id: &str, token: &str) -> Result<(), EngineError>;

    async fn pause(&self, task_id: &str, token: &str) -> Result<(), EngineError>;

    async fn resume(&self, task_id: &str, token: &str) -> Result<(), EngineError>;
}
