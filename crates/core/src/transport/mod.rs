//! Delivery of task progress to the controller.
//!
//! Three interchangeable transports implement [`Transport`](base::Transport):
//! - [`StreamTransport`]: the engine's server-push event stream
//! - [`ChangeFeedTransport`]: row notifications from a change feed
//! - [`PollTransport`]: periodic full snapshots, the universal fallback
//!
//! Every transport yields [`TransportItem`](base::TransportItem)s tagged with
//! nothing but their payload; the controller knows which session a stream
//! belongs to and discards items from stale sessions.

pub mod base;
pub mod change_feed;
pub mod decode;
pub mod metrics;
pub mod poll;
pub mod stream;

pub use base::{Session, Transport, TransportError, TransportItem, TransportStream};
pub use change_feed::ChangeFeedTransport;
pub use decode::{decode_log_row, decode_stream_frame, decode_summary_row, LogRow, MalformedEvent};
pub use metrics::{MetricsSnapshot, TransportMetrics};
pub use poll::PollTransport;
pub use stream::StreamTransport;
