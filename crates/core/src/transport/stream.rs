//! Server-push transport over the engine's event stream.

use crate::engine::base::ExecutionEngine;
use crate::engine::credentials::CredentialProvider;
use crate::transport::base::{Session, Transport, TransportError, TransportItem, TransportStream};
use crate::transport::decode::decode_stream_frame;
use crate::transport::metrics::TransportMetrics;
use async_stream::stream;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tokio_stream::StreamExt;
use tw_protocol::config_models::TransportKind;
use tw_protocol::envelope::EventEnvelope;

pub struct StreamTransport {
    engine: Arc<dyn ExecutionEngine>,
    credentials: Arc<dyn CredentialProvider>,
    metrics: Arc<TransportMetrics>,
}

impl StreamTransport {
    pub fn new(
        engine: Arc<dyn ExecutionEngine>,
        credentials: Arc<dyn CredentialProvider>,
        metrics: Arc<TransportMetrics>,
    ) -> Self {
        Self {
            engine,
            credentials,
            metrics,
        }
    }
}

#[async_trait]
impl Transport for StreamTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Stream
    }

    async fn connect(&self, session: &Session) -> Result<TransportStream, TransportError> {
        let token = self
            .credentials
            .bearer_token()
            .ok_or(TransportError::Unauthenticated)?;
        let mut frames = self.engine.open_stream(&session.task_id, &token).await?;
        tracing::debug!(session = %session, "Event stream opened");

        let metrics = Arc::clone(&self.metrics);
        let session = session.clone();
        let items = stream! {
            let mut seen_ids = HashSet::new();
            loop {
                let frame = match frames.next().await {
                    Some(Ok(frame)) => frame,
                    Some(Err(e)) => {
                        tracing::warn!(session = %session, error = %e, "Event stream failed");
                        yield TransportItem::Failed(e.into());
                        break;
                    }
                    None => {
                        tracing::warn!(session = %session, "Event stream closed before a final event");
                        yield TransportItem::Failed(TransportError::ClosedUnexpectedly);
                        break;
                    }
                };

                if let Some(id) = &frame.id {
                    if !seen_ids.insert(id.clone()) {
                        metrics.record_duplicate();
                        continue;
                    }
                }

                match decode_stream_frame(&frame) {
                    Ok(Some(event)) => {
                        let is_final = event.is_final();
                        yield TransportItem::Event(EventEnvelope::now(event));
                        if is_final {
                            break;
                        }
                    }
                    Ok(None) => {
                        tracing::debug!(event = %frame.event, "Ignoring unrecognized stream event");
                    }
                    Err(e) => {
                        metrics.record_malformed();
                        tracing::warn!(session = %session, error = %e, "Dropping malformed event");
                    }
                }
            }
        };
        Ok(Box::pin(items))
    }
}
