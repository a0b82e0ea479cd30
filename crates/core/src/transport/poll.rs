//! Periodic snapshot polling.
//!
//! The fallback of last resort: every interval the full task snapshot is
//! fetched. Consecutive failures back off exponentially and, after
//! `max_attempts` of them, polling gives up.

use crate::engine::base::{EngineError, ExecutionEngine};
use crate::engine::credentials::CredentialProvider;
use crate::transport::base::{Session, Transport, TransportError, TransportItem, TransportStream};
use crate::transport::metrics::TransportMetrics;
use async_stream::stream;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{self, MissedTickBehavior};
use tw_protocol::config_models::{RetryPolicy, TransportKind};

pub struct PollTransport {
    engine: Arc<dyn ExecutionEngine>,
    credentials: Arc<dyn CredentialProvider>,
    interval: Duration,
    retry: RetryPolicy,
    metrics: Arc<TransportMetrics>,
}

impl PollTransport {
    pub fn new(
        engine: Arc<dyn ExecutionEngine>,
        credentials: Arc<dyn CredentialProvider>,
        interval: Duration,
        retry: RetryPolicy,
        metrics: Arc<TransportMetrics>,
    ) -> Self {
        Self {
            engine,
            credentials,
            interval,
            retry,
            metrics,
        }
    }
}

#[async_trait]
impl Transport for PollTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Poll
    }

    async fn connect(&self, session: &Session) -> Result<TransportStream, TransportError> {
        if self.credentials.bearer_token().is_none() {
            return Err(TransportError::Unauthenticated);
        }

        let engine = Arc::clone(&self.engine);
        let credentials = Arc::clone(&self.credentials);
        let metrics = Arc::clone(&self.metrics);
        let retry = self.retry.clone();
        let period = self.interval;
        let session = session.clone();

        let items = stream! {
            let mut ticker = time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut failures: u32 = 0;

            loop {
                ticker.tick().await;

                let Some(token) = credentials.bearer_token() else {
                    yield TransportItem::Failed(TransportError::Unauthenticated);
                    break;
                };

                match engine.snapshot(&session.task_id, &token).await {
                    Ok(snapshot) => {
                        failures = 0;
                        let finished = snapshot.task.status.is_terminal();
                        yield TransportItem::Snapshot(snapshot);
                        if finished {
                            tracing::debug!(session = %session, "Polled task reached a terminal status");
                            break;
                        }
                    }
                    Err(EngineError::Unauthorized) => {
                        yield TransportItem::Failed(TransportError::Engine(EngineError::Unauthorized));
                        break;
                    }
                    Err(e) => {
                        failures += 1;
                        metrics.record_failed_poll();
                        if failures >= retry.max_attempts {
                            tracing::warn!(session = %session, attempts = failures, error = %e, "Polling gave up");
                            yield TransportItem::Failed(TransportError::RetriesExhausted {
                                attempts: failures,
                                last_error: e.to_string(),
                            });
                            break;
                        }
                        let delay = retry.backoff(failures);
                        tracing::warn!(
                            session = %session,
                            attempt = failures,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "Snapshot fetch failed, backing off"
                        );
                        time::sleep(delay).await;
                    }
                }
            }
        };
        Ok(Box::pin(items))
    }
}
