//! Change-feed provider trait and row payloads.

use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::pin::Pin;
use thiserror::Error;
use tokio_stream::Stream;

/// Kind of row notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RowEvent {
    Insert,
    Update,
}

/// One notification from the feed.
#[derive(Debug, Clone, PartialEq)]
pub struct RowChange {
    pub table: String,
    pub kind: RowEvent,
    /// The new row, as an opaque JSON object.
    pub row: Value,
}

/// Selects the notifications a subscription receives: rows of `table`
/// affected by `kind` whose `column` equals `value`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelFilter {
    pub table: String,
    pub kind: RowEvent,
    pub column: String,
    pub value: String,
}

impl ChannelFilter {
    pub fn new(table: &str, kind: RowEvent, column: &str, value: &str) -> Self {
        Self {
            table: table.to_string(),
            kind,
            column: column.to_string(),
            value: value.to_string(),
        }
    }

    pub fn matches(&self, change: &RowChange) -> bool {
        if change.table != self.table || change.kind != self.kind {
            return false;
        }
        match change.row.get(&self.column) {
            Some(Value::String(s)) => *s == self.value,
            Some(Value::Null) | None => false,
            Some(other) => other.to_string() == self.value,
        }
    }
}

impl fmt::Display for ChannelFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            RowEvent::Insert => "INSERT",
            RowEvent::Update => "UPDATE",
        };
        write!(f, "{}:{}:{}=eq.{}", kind, self.table, self.column, self.value)
    }
}

pub type RowStream = Pin<Box<dyn Stream<Item = RowChange> + Send>>;

/// A live subscription. The stream ends once the subscription is removed.
pub struct FeedSubscription {
    pub id: String,
    pub rows: RowStream,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FeedError {
    #[error("Subscription to {channel} rejected: {reason}")]
    Rejected { channel: String, reason: String },
    #[error("Change feed unavailable: {0}")]
    Unavailable(String),
}

/// A provider of row-level change notifications.
///
/// Subscribing may involve I/O; unsubscribing is synchronous so teardown
/// never has to wait.
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    async fn subscribe(&self, filter: ChannelFilter) -> Result<FeedSubscription, FeedError>;

    fn unsubscribe(&self, subscription_id: &str);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_filter_matches_table_kind_and_column() {
        let filter = ChannelFilter::new("agent_logs", RowEvent::Insert, "task_id", "T1");
        let change = RowChange {
            table: "agent_logs".to_string(),
            kind: RowEvent::Insert,
            row: json!({ "task_id": "T1" }),
        };
        assert!(filter.matches(&change));

        let other_task = RowChange {
            row: json!({ "task_id": "T2" }),
            ..change.clone()
        };
        assert!(!filter.matches(&other_task));

        let update = RowChange {
            kind: RowEvent::Update,
            ..change
        };
        assert!(!filter.matches(&update));
    }

    #[test]
    fn test_filter_numeric_column() {
        let filter = ChannelFilter::new("agent_tasks", RowEvent::Update, "id", "42");
        let change = RowChange {
            table: "agent_tasks".to_string(),
            kind: RowEvent::Update,
            row: json!({ "id": 42 }),
        };
        assert!(filter.matches(&change));
        assert_eq!(filter.to_string(), "UPDATE:agent_tasks:id=eq.42");
    }
}
