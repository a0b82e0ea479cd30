//! Transport over database row notifications.
//!
//! Each progress event is an inserted row of the log table, and task status
//! lives in the task's summary row. Both are subscribed per session and
//! merged into one item stream.

use crate::feed::base::{ChangeFeed, ChannelFilter, RowChange, RowEvent};
use crate::transport::base::{Session, Transport, TransportError, TransportItem, TransportStream};
use crate::transport::decode::{decode_log_row, decode_summary_row};
use crate::transport::metrics::TransportMetrics;
use async_stream::stream;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio_stream::StreamExt;
use tw_protocol::config_models::{ChangeFeedConfig, TransportKind};
use tw_protocol::envelope::EventEnvelope;

type Registry = Arc<Mutex<HashMap<Session, Vec<String>>>>;

pub struct ChangeFeedTransport {
    feed: Arc<dyn ChangeFeed>,
    tables: ChangeFeedConfig,
    metrics: Arc<TransportMetrics>,
    subscriptions: Registry,
}

impl ChangeFeedTransport {
    pub fn new(feed: Arc<dyn ChangeFeed>, tables: ChangeFeedConfig, metrics: Arc<TransportMetrics>) -> Self {
        Self {
            feed,
            tables,
            metrics,
            subscriptions: Arc::default(),
        }
    }
}

fn lock(registry: &Registry) -> MutexGuard<'_, HashMap<Session, Vec<String>>> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The feed subscriptions held for one session.
///
/// Every id is registered as soon as its subscribe call returns, so a
/// `disconnect` racing with `connect` still finds it. Dropping the guard
/// (connect cancelled half-way, or the item stream dropped) releases
/// whatever is left. Unsubscribing an id twice is harmless.
struct SessionSubscriptions {
    feed: Arc<dyn ChangeFeed>,
    registry: Registry,
    session: Session,
    ids: Vec<String>,
}

impl SessionSubscriptions {
    fn new(feed: Arc<dyn ChangeFeed>, registry: Registry, session: Session) -> Self {
        Self {
            feed,
            registry,
            session,
            ids: Vec::new(),
        }
    }

    fn hold(&mut self, id: &str) {
        self.ids.push(id.to_string());
        lock(&self.registry).insert(self.session.clone(), self.ids.clone());
    }
}

impl Drop for SessionSubscriptions {
    fn drop(&mut self) {
        lock(&self.registry).remove(&self.session);
        for id in self.ids.drain(..) {
            self.feed.unsubscribe(&id);
        }
    }
}

#[async_trait]
impl Transport for ChangeFeedTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::ChangeFeed
    }

    async fn connect(&self, session: &Session) -> Result<TransportStream, TransportError> {
        let mut held = SessionSubscriptions::new(
            Arc::clone(&self.feed),
            Arc::clone(&self.subscriptions),
            session.clone(),
        );
        let logs = self
            .feed
            .subscribe(ChannelFilter::new(
                &self.tables.log_table,
                RowEvent::Insert,
                "task_id",
                &session.task_id,
            ))
            .await?;
        held.hold(&logs.id);
        let summary = self
            .feed
            .subscribe(ChannelFilter::new(
                &self.tables.task_table,
                RowEvent::Update,
                "id",
                &session.task_id,
            ))
            .await?;
        held.hold(&summary.id);
        tracing::debug!(session = %session, "Subscribed to task change feed");

        let log_table = self.tables.log_table.clone();
        let metrics = Arc::clone(&self.metrics);
        let session = session.clone();
        let mut rows = logs.rows.merge(summary.rows);

        let items = stream! {
            let _held = held;
            let mut seen_rows = HashSet::new();
            'rows: loop {
                let Some(change) = rows.next().await else {
                    yield TransportItem::Failed(TransportError::ClosedUnexpectedly);
                    break;
                };

                for envelope in decode_change(&change, &log_table, &mut seen_rows, &metrics, &session) {
                    let is_final = envelope.event.is_final();
                    yield TransportItem::Event(envelope);
                    if is_final {
                        break 'rows;
                    }
                }
            }
        };
        Ok(Box::pin(items))
    }

    fn disconnect(&self, session: &Session) {
        let ids = lock(&self.subscriptions).remove(session).unwrap_or_default();
        for id in ids {
            self.feed.unsubscribe(&id);
        }
    }
}

fn decode_change(
    change: &RowChange,
    log_table: &str,
    seen_rows: &mut HashSet<String>,
    metrics: &TransportMetrics,
    session: &Session,
) -> Vec<EventEnvelope> {
    if change.table == log_table {
        match decode_log_row(&change.row) {
            Ok(row) => {
                if let Some(id) = &row.id {
                    if !seen_rows.insert(id.clone()) {
                        metrics.record_duplicate();
                        return Vec::new();
                    }
                }
                let at = row.created_at.unwrap_or_else(Utc::now);
                vec![EventEnvelope::new(row.event, at)]
            }
            Err(e) => {
                metrics.record_malformed();
                tracing::warn!(session = %session, error = %e, "Dropping malformed log row");
                Vec::new()
            }
        }
    } else {
        match decode_summary_row(&change.row) {
            Ok(events) => events.into_iter().map(EventEnvelope::now).collect(),
            Err(e) => {
                metrics.record_malformed();
                tracing::warn!(session = %session, error = %e, "Dropping malformed task row");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::base::{FeedError, FeedSubscription};
    use crate::feed::memory::MemoryFeed;
    use serde_json::json;
    use tw_protocol::envelope::ProgressEvent;

    async fn next_event(items: &mut TransportStream) -> ProgressEvent {
        match items.next().await {
            Some(TransportItem::Event(envelope)) => envelope.event,
            other => panic!("unexpected item {other:?}"),
        }
    }

    fn transport(feed: &Arc<MemoryFeed>) -> (ChangeFeedTransport, Arc<TransportMetrics>) {
        let metrics = Arc::new(TransportMetrics::default());
        (
            ChangeFeedTransport::new(feed.clone(), ChangeFeedConfig::default(), metrics.clone()),
            metrics,
        )
    }

    #[tokio::test]
    async fn test_log_rows_and_summary_updates_are_merged() {
        let feed = Arc::new(MemoryFeed::new());
        let (transport, metrics) = transport(&feed);
        let session = Session::new("T1", 1);
        let mut items = transport.connect(&session).await.unwrap();
        assert_eq!(feed.subscription_count(), 2);

        let thought = json!({ "id": 1, "task_id": "T1", "log_type": "thinking", "content": "hm" });
        feed.insert("agent_logs", thought.clone());
        feed.insert("agent_logs", thought);
        feed.insert(
            "agent_logs",
            json!({ "id": 2, "task_id": "T2", "log_type": "thinking", "content": "other task" }),
        );
        assert!(matches!(next_event(&mut items).await, ProgressEvent::Thinking { .. }));

        feed.insert("agent_logs", json!({ "id": 3, "task_id": "T1", "log_type": "step_complete" }));
        assert_eq!(next_event(&mut items).await, ProgressEvent::StepComplete);
        assert_eq!(metrics.snapshot().duplicate_events, 1);

        feed.update("agent_tasks", json!({ "id": "T1", "status": "completed", "result_summary": "done" }));
        assert!(matches!(next_event(&mut items).await, ProgressEvent::Complete { .. }));
        assert!(items.next().await.is_none());

        transport.disconnect(&session);
        assert_eq!(feed.subscription_count(), 0);
    }

    #[tokio::test]
    async fn test_malformed_row_is_skipped() {
        let feed = Arc::new(MemoryFeed::new());
        let (transport, metrics) = transport(&feed);
        let mut items = transport.connect(&Session::new("T1", 1)).await.unwrap();

        feed.insert("agent_logs", json!({ "id": 1, "task_id": "T1", "log_type": "bogus" }));
        feed.insert("agent_logs", json!({ "id": 2, "task_id": "T1", "log_type": "step_complete" }));

        assert_eq!(next_event(&mut items).await, ProgressEvent::StepComplete);
        assert_eq!(metrics.snapshot().malformed_events, 1);
    }

    struct HalfBrokenFeed {
        inner: MemoryFeed,
    }

    #[async_trait]
    impl ChangeFeed for HalfBrokenFeed {
        async fn subscribe(&self, filter: ChannelFilter) -> Result<FeedSubscription, FeedError> {
            if filter.kind == RowEvent::Update {
                return Err(FeedError::Rejected {
                    channel: filter.to_string(),
                    reason: "not allowed".to_string(),
                });
            }
            self.inner.subscribe(filter).await
        }

        fn unsubscribe(&self, subscription_id: &str) {
            self.inner.unsubscribe(subscription_id);
        }
    }

    #[tokio::test]
    async fn test_partial_subscription_is_rolled_back() {
        let feed = Arc::new(HalfBrokenFeed {
            inner: MemoryFeed::new(),
        });
        let transport = ChangeFeedTransport::new(
            feed.clone(),
            ChangeFeedConfig::default(),
            Arc::new(TransportMetrics::default()),
        );

        let result = transport.connect(&Session::new("T1", 1)).await;
        assert!(matches!(result, Err(TransportError::Feed(FeedError::Rejected { .. }))));
        assert_eq!(feed.inner.subscription_count(), 0);
    }

    struct SlowFeed {
        inner: MemoryFeed,
    }

    #[async_trait]
    impl ChangeFeed for SlowFeed {
        async fn subscribe(&self, filter: ChannelFilter) -> Result<FeedSubscription, FeedError> {
            if filter.kind == RowEvent::Update {
                tokio::time::sleep(std::time::Duration::from_millis(300)).await;
            }
            self.inner.subscribe(filter).await
        }

        fn unsubscribe(&self, subscription_id: &str) {
            self.inner.unsubscribe(subscription_id);
        }
    }

    #[tokio::test]
    async fn test_disconnect_during_connect_releases_subscriptions() {
        let feed = Arc::new(SlowFeed {
            inner: MemoryFeed::new(),
        });
        let transport = Arc::new(ChangeFeedTransport::new(
            feed.clone(),
            ChangeFeedConfig::default(),
            Arc::new(TransportMetrics::default()),
        ));
        let session = Session::new("T1", 1);

        let connecting = {
            let transport = Arc::clone(&transport);
            let session = session.clone();
            tokio::spawn(async move { transport.connect(&session).await.map(|_| ()) })
        };
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(feed.inner.subscription_count(), 1);

        transport.disconnect(&session);
        connecting.abort();
        assert_eq!(feed.inner.subscription_count(), 0);

        tokio::time::sleep(std::time::Duration::from_millis(400)).await;
        assert_eq!(feed.inner.subscription_count(), 0);
        assert!(lock(&transport.subscriptions).is_empty());
    }

    #[tokio::test]
    async fn test_dropping_item_stream_releases_subscriptions() {
        let feed = Arc::new(MemoryFeed::new());
        let (transport, _) = transport(&feed);
        let items = transport.connect(&Session::new("T1", 1)).await.unwrap();
        assert_eq!(feed.subscription_count(), 2);

        drop(items);
        assert_eq!(feed.subscription_count(), 0);
        assert!(lock(&transport.subscriptions).is_empty());
    }
}
