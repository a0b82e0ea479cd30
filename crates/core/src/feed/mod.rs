//! Change-feed providers.
//!
//! A change feed delivers insert/update notifications for database rows.
//! The change-feed transport subscribes to a task's log rows and its summary
//! row through the [`ChangeFeed`](base::ChangeFeed) trait.

pub mod base;
pub mod memory;

pub use base::{ChangeFeed, ChannelFilter, FeedError, FeedSubscription, RowChange, RowEvent};
pub use memory::MemoryFeed;
