use thiserror::Error;

/// Errors returned by [`ExecutionController`](super::controller::ExecutionController)
/// operations.
///
/// Task-level failures are not errors here: they are published as state and
/// as an `Event::Failed` notification.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ControllerError {
    #[error("Task submission failed: {0}")]
    Submission(String),

    #[error("Not authenticated: no credential available for the execution engine")]
    Auth,

    /// `stop`, `reset` or another `start` landed while a submission was in flight.
    #[error("Submission was superseded before the engine answered")]
    Superseded,

    #[error("Failed to open {url}: {reason}")]
    Download { url: String, reason: String },
}
