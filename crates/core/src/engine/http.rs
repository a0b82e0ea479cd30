//! HTTP implementation of [`ExecutionEngine`].
//!
//! Endpoints, relative to the configured base URL:
//!
//! | Operation | Request |
//! |---|---|
//! | submit | `POST /tasks` |
//! | stream | `GET /tasks/{id}/events` (`text/event-stream`) |
//! | snapshot | `GET /tasks/{id}` |
//! | cancel / pause / resume | `POST /tasks/{id}/{action}` |

use crate::engine::base::{EngineError, ExecutionEngine, FrameStream};
use crate::engine::sse::SseDecoder;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use std::time::Duration;
use tokio_stream::StreamExt;
use tw_protocol::config_models::TrackerConfig;
use tw_protocol::ipc::{SubmitRequest, SubmitResponse};
use tw_protocol::task_models::TaskSnapshot;

pub struct HttpEngine {
    base_url: String,
    /// Client with a request timeout, for ordinary calls.
    client: Client,
    /// Client without a total timeout, since event streams stay open for the
    /// whole run. Its read timeout bounds the silence between chunks.
    stream_client: Client,
}

impl HttpEngine {
    /// Create an engine client for `base_url`.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Request` if the HTTP client cannot be built
    /// (for example when no TLS backend is available).
    pub fn new(
        base_url: &str,
        request_timeout: Duration,
        stream_idle_timeout: Duration,
    ) -> Result<Self, EngineError> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| EngineError::Request(e.to_string()))?;
        let stream_client = Client::builder()
            .connect_timeout(request_timeout)
            .read_timeout(stream_idle_timeout)
            .build()
            .map_err(|e| EngineError::Request(e.to_string()))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            stream_client,
        })
    }

    /// Create an engine client from the tracker settings.
    pub fn from_config(config: &TrackerConfig) -> Result<Self, EngineError> {
        Self::new(
            &config.engine_url,
            config.request_timeout(),
            config.stream_idle_timeout(),
        )
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send(&self, request: RequestBuilder, token: &str) -> Result<Response, EngineError> {
        let response = request
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| EngineError::Request(e.to_string()))?;
        check_status(response).await
    }

    async fn post_action(&self, task_id: &str, action: &str, token: &str) -> Result<(), EngineError> {
        let url = self.url(&format!("/tasks/{task_id}/{action}"));
        tracing::debug!(task_id, action, "Sending task action");
        self.send(self.client.post(url), token).await?;
        Ok(())
    }
}

async fn check_status(response: Response) -> Result<Response, EngineError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(EngineError::Unauthorized);
    }
    let body = response.text().await.unwrap_or_default();
    Err(EngineError::Status {
        status: status.as_u16(),
        message: error_message(&body).unwrap_or_else(|| status.to_string()),
    })
}

/// Pull a human-readable message out of an error body.
fn error_message(body: &str) -> Option<String> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }
    let parsed: Option<serde_json::Value> = serde_json::from_str(trimmed).ok();
    let from_json = parsed.as_ref().and_then(|v| {
        ["error", "message", "detail"]
            .iter()
            .find_map(|key| v.get(key).and_then(|m| m.as_str()))
            .map(str::to_string)
    });
    Some(from_json.unwrap_or_else(|| trimmed.to_string()))
}

/// Accumulates bytes and yields only complete UTF-8 text, so a multi-byte
/// character split across chunks is not mangled.
#[derive(Default)]
struct Utf8Buffer {
    pending: Vec<u8>,
}

impl Utf8Buffer {
    fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        match std::str::from_utf8(&self.pending) {
            Ok(text) => {
                let text = text.to_string();
                self.pending.clear();
                text
            }
            Err(e) if e.error_len().is_none() => {
                let valid = e.valid_up_to();
                let text = String::from_utf8_lossy(&self.pending[..valid]).into_owned();
                self.pending.drain(..valid);
                text
            }
            Err(_) => {
                let text = String::from_utf8_lossy(&self.pending).into_owned();
                self.pending.clear();
                text
            }
        }
    }
}

#[async_trait]
impl ExecutionEngine for HttpEngine {
    async fn submit(
        &self,
        request: &SubmitRequest,
        token: &str,
    ) -> Result<SubmitResponse, EngineError> {
        let response = self
            .send(self.client.post(self.url("/tasks")).json(request), token)
            .await?;
        response
            .json::<SubmitResponse>()
            .await
            .map_err(|e| EngineError::Decode(e.to_string()))
    }

    async fn open_stream(&self, task_id: &str, token: &str) -> Result<FrameStream, EngineError> {
        let url = self.url(&format!("/tasks/{task_id}/events"));
        tracing::debug!(task_id, %url, "Opening event stream");

        let request = self
            .stream_client
            .get(url)
            .header("Accept", "text/event-stream");
        let response = self.send(request, token).await.map_err(|e| match e {
            EngineError::Request(msg) => EngineError::StreamUnavailable(msg),
            other => other,
        })?;

        let bytes = response.bytes_stream();
        let stream = async_stream::stream! {
            tokio::pin!(bytes);
            let mut text = Utf8Buffer::default();
            let mut decoder = SseDecoder::new();
            while let Some(chunk) = bytes.next().await {
                match chunk {
                    Ok(chunk) => {
                        for frame in decoder.push(&text.push(&chunk)) {
                            yield Ok(frame);
                        }
                    }
                    Err(e) => {
                        yield Err(EngineError::Request(e.to_string()));
                        break;
                    }
                }
            }
            if decoder.has_pending() {
                tracing::warn!("Event stream ended inside a frame; the partial frame is dropped");
            }
            tracing::debug!("Event stream body ended");
        };
        Ok(Box::pin(stream))
    }

    async fn snapshot(&self, task_id: &str, token: &str) -> Result<TaskSnapshot, EngineError> {
        let url = self.url(&format!("/tasks/{task_id}"));
        let response = self.send(self.client.get(url), token).await?;
        response
            .json::<TaskSnapshot>()
            .await
            .map_err(|e| EngineError::Decode(e.to_string()))
    }

    async fn cancel(&self, task_id: &str, token: &str) -> Result<(), EngineError> {
        self.post_action(task_id, "cancel", token).await
    }

    async fn pause(&self, task_id: &str, token: &str) -> Result<(), EngineError> {
        self.post_action(task_id, "pause", token).await
    }

    async fn resume(&self, task_id: &str, token: &str) -> Result<(), EngineError> {
        self.post_action(task_id, "resume", token).await
    }
}
