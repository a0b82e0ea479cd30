//! Transport trait and the items transports deliver.

use crate::engine::base::EngineError;
use crate::feed::base::FeedError;
use async_trait::async_trait;
use std::fmt;
use std::pin::Pin;
use thiserror::Error;
use tokio_stream::Stream;
use tw_protocol::config_models::TransportKind;
use tw_protocol::envelope::EventEnvelope;
use tw_protocol::task_models::TaskSnapshot;

/// Identity of one connection attempt: the observed task plus a generation
/// number that the controller bumps on every attach.
///
/// Items tagged with a session that is no longer current are stale and get
/// discarded, however late they arrive.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Session {
    pub task_id: String,
    pub generation: u64,
}

impl Session {
    pub fn new(task_id: impl Into<String>, generation: u64) -> Self {
        Self {
            task_id: task_id.into(),
            generation,
        }
    }
}

impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.task_id, self.generation)
    }
}

/// What a transport delivers.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportItem {
    /// An incremental progress event, to be reduced.
    Event(EventEnvelope),
    /// A full task snapshot, replacing local collections.
    Snapshot(TaskSnapshot),
    /// The transport can no longer deliver. Always the last item.
    Failed(TransportError),
}

pub type TransportStream = Pin<Box<dyn Stream<Item = TransportItem> + Send>>;

/// Transport-level failure. Recovered by falling back when a fallback
/// exists; never a verdict on the task itself.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("No credential available")]
    Unauthenticated,
    #[error("Connection closed before the task finished")]
    ClosedUnexpectedly,
    #[error("Gave up after {attempts} consecutive failed fetches: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Feed(#[from] FeedError),
}

/// A live delivery mechanism for one task's progress.
///
/// The controller owns the lifecycle: it calls `connect` once per session,
/// drops the returned stream to close it and calls `disconnect` to release
/// anything the stream does not own. Transports never reconnect on their
/// own.
#[async_trait]
pub trait Transport: Send + Sync {
    fn kind(&self) -> TransportKind;

    async fn connect(&self, session: &Session) -> Result<TransportStream, TransportError>;

    /// Release resources held for `session`. Must not block.
    fn disconnect(&self, _session: &Session) {}
}
