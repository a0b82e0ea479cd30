//! In-process change feed.
//!
//! Rows published with [`MemoryFeed::publish`] are delivered to every
//! matching subscription in publish order. Used by tests and by embedding
//! applications that already receive row notifications some other way.

use crate::feed::base::{
    ChangeFeed, ChannelFilter, FeedError, FeedSubscription, RowChange, RowEvent,
};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use uuid::Uuid;

struct Subscriber {
    filter: ChannelFilter,
    tx: mpsc::UnboundedSender<RowChange>,
}

#[derive(Default)]
pub struct MemoryFeed {
    subscribers: Mutex<HashMap<String, Subscriber>>,
}

impl MemoryFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `row` to all matching subscriptions. Returns how many got it.
    pub fn publish(&self, table: &str, kind: RowEvent, row: Value) -> usize {
        let change = RowChange {
            table: table.to_string(),
            kind,
            row,
        };
        let mut subscribers = self.lock();
        subscribers.retain(|_, s| !s.tx.is_closed());
        subscribers
            .values()
            .filter(|s| s.filter.matches(&change))
            .filter(|s| s.tx.send(change.clone()).is_ok())
            .count()
    }

    pub fn insert(&self, table: &str, row: Value) -> usize {
        self.publish(table, RowEvent::Insert, row)
    }

    pub fn update(&self, table: &str, row: Value) -> usize {
        self.publish(table, RowEvent::Update, row)
    }

    pub fn subscription_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Subscriber>> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl ChangeFeed for MemoryFeed {
    async fn subscribe(&self, filter: ChannelFilter) -> Result<FeedSubscription, FeedError> {
        let id = Uuid::new_v4().to_string();
        let (tx, rx) = mpsc::unbounded_channel();
        tracing::debug!(subscription = %id, channel = %filter, "Subscribed to change feed");
        self.lock().insert(id.clone(), Subscriber { filter, tx });
        Ok(FeedSubscription {
            id,
            rows: Box::pin(UnboundedReceiverStream::new(rx)),
        })
    }

    fn unsubscribe(&self, subscription_id: &str) {
        if self.lock().remove(subscription_id).is_some() {
            tracing::debug!(subscription = subscription_id, "Unsubscribed from change feed");
        }
    }
}
