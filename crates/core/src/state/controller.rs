//! The execution controller.
//!
//! [`ExecutionController`] owns everything about the observed task: the
//! published [`ExecutionState`], the single active connection and the
//! caller notifications. Transports run in a spawned pump task that feeds
//! items back through the controller's lock, where each item is checked
//! against the active [`Session`] before it is applied. Anything from an
//! older session is discarded.

use crate::engine::base::{EngineError, ExecutionEngine};
use crate::engine::credentials::CredentialProvider;
use crate::feed::base::ChangeFeed;
use crate::state::error::ControllerError;
use crate::state::reducer::{apply_snapshot, reduce};
use crate::transport::{
    ChangeFeedTransport, MetricsSnapshot, PollTransport, Session, StreamTransport, Transport,
    TransportError, TransportItem, TransportMetrics,
};
use chrono::Utc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_stream::StreamExt;
use tw_protocol::config_models::{TrackerConfig, TransportKind};
use tw_protocol::envelope::{EventEnvelope, ProgressEvent};
use tw_protocol::ipc::{Event, SubmitRequest, SubmitResponse};
use tw_protocol::state_models::ExecutionState;
use tw_protocol::task_models::{ExecutionTask, Phase, TaskOutput, TaskStatus};

/// Builds an [`ExecutionController`].
pub struct ControllerBuilder {
    engine: Arc<dyn ExecutionEngine>,
    credentials: Arc<dyn CredentialProvider>,
    config: TrackerConfig,
    change_feed: Option<Arc<dyn ChangeFeed>>,
    events_tx: Option<mpsc::UnboundedSender<Event>>,
}

impl ControllerBuilder {
    pub fn new(engine: Arc<dyn ExecutionEngine>, credentials: Arc<dyn CredentialProvider>) -> Self {
        Self {
            engine,
            credentials,
            config: TrackerConfig::default(),
            change_feed: None,
            events_tx: None,
        }
    }

    pub fn config(mut self, config: TrackerConfig) -> Self {
        self.config = config;
        self
    }

    /// Provider used when the change-feed transport is selected. Without
    /// one, that selection falls back to the event stream.
    pub fn change_feed(mut self, feed: Arc<dyn ChangeFeed>) -> Self {
        self.change_feed = Some(feed);
        self
    }

    /// Channel receiving lifecycle notifications.
    pub fn events(mut self, events_tx: mpsc::UnboundedSender<Event>) -> Self {
        self.events_tx = Some(events_tx);
        self
    }

    pub fn build(self) -> ExecutionController {
        let (state_tx, _) = watch::channel(ExecutionState::default());
        ExecutionController {
            shared: Arc::new(Shared {
                engine: self.engine,
                credentials: self.credentials,
                config: self.config,
                change_feed: self.change_feed,
                metrics: Arc::new(TransportMetrics::default()),
                events_tx: self.events_tx,
                state_tx,
                inner: Mutex::new(Inner::default()),
            }),
        }
    }
}

/// Observes one remote agent task at a time.
///
/// Operations that attach a transport (`start`, `load`, `resume`) must be
/// called from within a Tokio runtime.
pub struct ExecutionController {
    shared: Arc<Shared>,
}

struct Shared {
    engine: Arc<dyn ExecutionEngine>,
    credentials: Arc<dyn CredentialProvider>,
    config: TrackerConfig,
    change_feed: Option<Arc<dyn ChangeFeed>>,
    metrics: Arc<TransportMetrics>,
    events_tx: Option<mpsc::UnboundedSender<Event>>,
    state_tx: watch::Sender<ExecutionState>,
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    state: ExecutionState,
    /// Bumped by every attach, stop and reset.
    generation: u64,
    connection: Option<Connection>,
    terminal_notified: bool,
    deadline: Option<Instant>,
}

/// The single live transport of a controller.
struct Connection {
    session: Session,
    transport: Arc<dyn Transport>,
    handle: JoinHandle<()>,
}

impl Inner {
    fn is_current(&self, session: &Session) -> bool {
        self.connection
            .as_ref()
            .is_some_and(|c| c.session == *session)
    }

    /// Close the active connection, if any. Never waits.
    fn teardown(&mut self) {
        if let Some(connection) = self.connection.take() {
            tracing::debug!(
                task_id = %connection.session.task_id,
                generation = connection.session.generation,
                transport = %connection.transport.kind(),
                "Closing connection"
            );
            connection.transport.disconnect(&connection.session);
            connection.handle.abort();
        }
    }
}

impl ExecutionController {
    pub fn builder(
        engine: Arc<dyn ExecutionEngine>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> ControllerBuilder {
        ControllerBuilder::new(engine, credentials)
    }

    /// Receiver that sees every published state.
    pub fn subscribe(&self) -> watch::Receiver<ExecutionState> {
        self.shared.state_tx.subscribe()
    }

    pub fn state(&self) -> ExecutionState {
        self.shared.lock().state.clone()
    }

    /// Kind of the live connection, if one is open.
    pub fn active_transport(&self) -> Option<TransportKind> {
        self.shared
            .lock()
            .connection
            .as_ref()
            .map(|c| c.transport.kind())
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.shared.metrics.snapshot()
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.shared.config
    }

    /// Submit a new task and start observing it.
    ///
    /// The state moves to `planning` before the request is sent. A rejected
    /// submission returns the controller to `idle` with the engine's message
    /// recorded as the error.
    pub async fn start(&self, request: SubmitRequest) -> Result<ExecutionTask, ControllerError> {
        let token = self
            .shared
            .credentials
            .bearer_token()
            .ok_or(ControllerError::Auth)?;

        let generation = {
            let mut inner = self.shared.lock();
            inner.teardown();
            inner.generation += 1;
            inner.terminal_notified = false;
            inner.deadline = None;
            inner.state = ExecutionState {
                phase: Phase::Planning,
                ..ExecutionState::default()
            };
            self.shared.publish(&inner);
            inner.generation
        };

        tracing::info!(task_type = %request.task_type, mode = %request.mode, "Submitting task");
        let response = self.shared.engine.submit(&request, &token).await;

        let mut inner = self.shared.lock();
        if inner.generation != generation {
            if let Ok(SubmitResponse {
                task_id: Some(task_id),
                ..
            }) = response
            {
                tracing::info!(task_id = %task_id, "Cancelling task whose submission was superseded");
                self.shared.cancel_remote(task_id);
            }
            return Err(ControllerError::Superseded);
        }

        let task_id = match response {
            Ok(SubmitResponse {
                task_id: Some(task_id),
                ..
            }) if !task_id.trim().is_empty() => task_id,
            Ok(SubmitResponse { error, .. }) => {
                let message = error.unwrap_or_else(|| "Engine returned no task id".to_string());
                self.shared.reject(&mut inner, message.clone());
                return Err(ControllerError::Submission(message));
            }
            Err(EngineError::Unauthorized) => {
                self.shared
                    .reject(&mut inner, EngineError::Unauthorized.to_string());
                return Err(ControllerError::Auth);
            }
            Err(e) => {
                let message = e.to_string();
                self.shared.reject(&mut inner, message.clone());
                return Err(ControllerError::Submission(message));
            }
        };

        let mut task = ExecutionTask::new(task_id, TaskStatus::Planning);
        task.prompt = request.prompt;
        task.task_type = request.task_type;
        task.created_at = Some(Utc::now());
        tracing::info!(task_id = %task.id, "Task submitted");
        self.shared.begin(&mut inner, task.clone());
        Ok(task)
    }

    /// Observe an existing task without submitting anything.
    pub fn load(&self, task_id: &str) -> Result<(), ControllerError> {
        if self.shared.credentials.bearer_token().is_none() {
            return Err(ControllerError::Auth);
        }
        let mut inner = self.shared.lock();
        tracing::info!(task_id, "Loading task");
        self.shared
            .begin(&mut inner, ExecutionTask::new(task_id, TaskStatus::Planning));
        Ok(())
    }

    /// Stop observing and ask the engine to cancel the task.
    ///
    /// The phase becomes `stopped` immediately and nothing from the old
    /// connection is applied afterwards. Calling it again, or while idle, is
    /// a no-op.
    pub fn stop(&self) {
        let mut inner = self.shared.lock();
        inner.teardown();
        inner.generation += 1;
        inner.deadline = None;

        if inner.state.is_terminal() || inner.state.is_idle() {
            return;
        }

        // A local stop is not a task outcome; no terminal notification.
        inner.terminal_notified = true;
        let task_id = inner.state.task_id().map(str::to_string);
        let mut next = reduce(
            &inner.state,
            &EventEnvelope::now(ProgressEvent::Complete {
                status: TaskStatus::Cancelled,
                summary: None,
                error: None,
            }),
        );
        next.phase = Phase::Stopped;
        tracing::info!(task_id = ?task_id, "Stopped");
        self.shared.commit(&mut inner, next, None);
        drop(inner);

        if let Some(task_id) = task_id {
            self.shared.cancel_remote(task_id);
        }
    }

    /// Pause the task: the connection is closed and the phase becomes
    /// `paused`. The remote pause is best-effort.
    pub async fn pause(&self) -> Result<(), ControllerError> {
        let token = self
            .shared
            .credentials
            .bearer_token()
            .ok_or(ControllerError::Auth)?;

        let task_id = {
            let mut inner = self.shared.lock();
            if !inner.state.is_executing() {
                return Ok(());
            }
            let Some(task_id) = inner.state.task_id().map(str::to_string) else {
                return Ok(());
            };
            inner.teardown();
            inner.generation += 1;
            let next = reduce(&inner.state, &status_event(TaskStatus::Paused));
            self.shared.commit(&mut inner, next, None);
            task_id
        };

        if let Err(e) = self.shared.engine.pause(&task_id, &token).await {
            tracing::warn!(task_id = %task_id, error = %e, "Remote pause failed");
        }
        Ok(())
    }

    /// Resume a paused task and re-attach a transport the way `load` does.
    pub async fn resume(&self) -> Result<(), ControllerError> {
        let token = self
            .shared
            .credentials
            .bearer_token()
            .ok_or(ControllerError::Auth)?;

        let task_id = {
            let inner = self.shared.lock();
            if !inner.state.is_paused() {
                return Ok(());
            }
            let task_id = inner.state.task_id().map(str::to_string);
            task_id
        };
        let Some(task_id) = task_id else {
            return Ok(());
        };

        if let Err(e) = self.shared.engine.resume(&task_id, &token).await {
            tracing::warn!(task_id = %task_id, error = %e, "Remote resume failed");
        }

        let mut inner = self.shared.lock();
        if !inner.state.is_paused() || inner.state.task_id() != Some(task_id.as_str()) {
            return Ok(());
        }
        let next = reduce(&inner.state, &status_event(TaskStatus::Executing));
        self.shared.commit(&mut inner, next, None);
        self.shared.attach(&mut inner, self.shared.config.transport);
        Ok(())
    }

    /// Drop the task and return to `idle` with every collection cleared.
    pub fn reset(&self) {
        let mut inner = self.shared.lock();
        inner.teardown();
        inner.generation += 1;
        inner.terminal_notified = false;
        inner.deadline = None;
        inner.state = ExecutionState::default();
        self.shared.publish(&inner);
    }

    pub fn clear_thoughts(&self) {
        let mut inner = self.shared.lock();
        inner.state.thoughts.clear();
        self.shared.publish(&inner);
    }

    pub fn clear_logs(&self) {
        let mut inner = self.shared.lock();
        inner.state.logs.clear();
        self.shared.publish(&inner);
    }

    /// Open an output's download URL with the system handler.
    pub fn download_output(&self, output: &TaskOutput) -> Result<(), ControllerError> {
        if output.download_url.trim().is_empty() {
            return Err(ControllerError::Download {
                url: output.download_url.clone(),
                reason: "output has no download URL".to_string(),
            });
        }
        open::that(&output.download_url).map_err(|e| ControllerError::Download {
            url: output.download_url.clone(),
            reason: e.to_string(),
        })
    }
}

impl Drop for ExecutionController {
    fn drop(&mut self) {
        let mut inner = self.shared.lock();
        inner.teardown();
        inner.generation += 1;
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, inner: &Inner) {
        self.state_tx.send_replace(inner.state.clone());
    }

    fn emit(&self, event: Event) {
        if let Some(tx) = &self.events_tx {
            let _ = tx.send(event);
        }
    }

    fn transport(&self, kind: TransportKind) -> Arc<dyn Transport> {
        match (kind, &self.change_feed) {
            (TransportKind::ChangeFeed, Some(feed)) => Arc::new(ChangeFeedTransport::new(
                Arc::clone(feed),
                self.config.change_feed.clone(),
                Arc::clone(&self.metrics),
            )),
            (TransportKind::Poll, _) => Arc::new(PollTransport::new(
                Arc::clone(&self.engine),
                Arc::clone(&self.credentials),
                self.config.poll_interval(),
                self.config.retry.clone(),
                Arc::clone(&self.metrics),
            )),
            (kind, _) => {
                if kind == TransportKind::ChangeFeed {
                    tracing::warn!("No change feed configured, using the event stream");
                }
                Arc::new(StreamTransport::new(
                    Arc::clone(&self.engine),
                    Arc::clone(&self.credentials),
                    Arc::clone(&self.metrics),
                ))
            }
        }
    }

    /// Replace the state with a fresh `planning` state for `task` and attach
    /// the preferred transport.
    fn begin(self: &Arc<Self>, inner: &mut Inner, task: ExecutionTask) {
        inner.teardown();
        inner.terminal_notified = false;
        inner.deadline = self.config.task_timeout().map(|t| Instant::now() + t);
        self.commit(inner, ExecutionState::planning(task), None);
        self.attach(inner, self.config.transport);
    }

    /// Open a new connection of `kind` for the current task. Any previous
    /// connection is closed first.
    fn attach(self: &Arc<Self>, inner: &mut Inner, kind: TransportKind) {
        inner.teardown();
        let Some(task_id) = inner.state.task_id().map(str::to_string) else {
            return;
        };
        inner.generation += 1;
        let session = Session::new(task_id, inner.generation);
        let transport = self.transport(kind);
        tracing::debug!(
            task_id = %session.task_id,
            generation = session.generation,
            transport = %transport.kind(),
            "Attaching transport"
        );
        let handle = tokio::spawn(pump(
            Arc::clone(self),
            session.clone(),
            Arc::clone(&transport),
            inner.deadline,
        ));
        inner.connection = Some(Connection {
            session,
            transport,
            handle,
        });
    }

    /// Install `next`, publish it and send the notifications it implies.
    fn commit(&self, inner: &mut Inner, next: ExecutionState, cause: Option<&ProgressEvent>) {
        let previous = std::mem::replace(&mut inner.state, next);
        let notifications = notifications(&previous, &inner.state, cause);
        self.publish(inner);
        for event in notifications {
            self.emit(event);
        }
        if inner.state.is_terminal() && !previous.is_terminal() {
            self.finish(inner);
        }
    }

    /// The phase turned terminal: close the connection and notify once.
    fn finish(&self, inner: &mut Inner) {
        inner.teardown();
        inner.deadline = None;
        if inner.terminal_notified {
            return;
        }
        inner.terminal_notified = true;

        let Some(task) = inner.state.task.clone() else {
            return;
        };
        let event = if inner.state.phase == Phase::Failed {
            let error = inner
                .state
                .error
                .clone()
                .unwrap_or_else(|| "Task failed".to_string());
            tracing::warn!(task_id = %task.id, error = %error, "Task failed");
            Event::Failed {
                task_id: task.id,
                error,
            }
        } else {
            tracing::info!(task_id = %task.id, status = ?task.status, "Task finished");
            Event::Completed { task }
        };
        self.emit(event);
    }

    /// Fail the current task locally with `message`.
    fn fail(&self, inner: &mut Inner, message: String) {
        let next = reduce(&inner.state, &EventEnvelope::now(ProgressEvent::Error { message }));
        self.commit(inner, next, None);
    }

    /// A submission was rejected: back to `idle`, keeping the message.
    fn reject(&self, inner: &mut Inner, message: String) {
        tracing::warn!(error = %message, "Task submission rejected");
        inner.state = ExecutionState {
            error: Some(message),
            ..ExecutionState::default()
        };
        self.publish(inner);
    }

    /// Apply one transport item. Returns false when the pump should stop.
    fn apply(&self, session: &Session, item: TransportItem) -> bool {
        let mut inner = self.lock();
        if !inner.is_current(session) {
            tracing::debug!(session = %session, "Discarding item from stale session");
            return false;
        }

        match item {
            TransportItem::Event(envelope) => {
                let next = reduce(&inner.state, &envelope);
                self.commit(&mut inner, next, Some(&envelope.event));
            }
            TransportItem::Snapshot(snapshot) => {
                let next = apply_snapshot(&inner.state, &snapshot, Utc::now());
                self.commit(&mut inner, next, None);
            }
            TransportItem::Failed(_) => return false,
        }
        inner.is_current(session)
    }

    /// The connection for `session` failed or ended before the task did.
    ///
    /// Push transports fall back to polling. Polling has nothing to fall
    /// back to, so its failure fails the task.
    fn on_failure(self: &Arc<Self>, session: &Session, error: TransportError) {
        let mut inner = self.lock();
        if !inner.is_current(session) {
            return;
        }
        let kind = inner
            .connection
            .as_ref()
            .map_or(TransportKind::Poll, |c| c.transport.kind());

        if kind == TransportKind::Poll {
            tracing::warn!(session = %session, error = %error, "Polling failed");
            inner.teardown();
            self.fail(&mut inner, error.to_string());
            return;
        }

        self.metrics.record_fallback();
        tracing::info!(
            task_id = %session.task_id,
            generation = session.generation,
            transport = %kind,
            error = %error,
            "Transport failed, falling back to polling"
        );
        self.attach(&mut inner, TransportKind::Poll);
    }

    fn on_timeout(&self, session: &Session) {
        let mut inner = self.lock();
        if !inner.is_current(session) {
            return;
        }
        let secs = self.config.task_timeout_secs.unwrap_or_default();
        tracing::warn!(session = %session, timeout_secs = secs, "Task timed out");
        inner.teardown();
        self.fail(&mut inner, format!("Task timed out after {secs} s"));
    }

    /// Ask the engine to cancel `task_id` without waiting for the answer.
    fn cancel_remote(&self, task_id: String) {
        let Some(token) = self.credentials.bearer_token() else {
            tracing::warn!(task_id = %task_id, "No credential, skipping remote cancel");
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(task_id = %task_id, "No runtime, skipping remote cancel");
            return;
        };
        let engine = Arc::clone(&self.engine);
        runtime.spawn(async move {
            if let Err(e) = engine.cancel(&task_id, &token).await {
                tracing::warn!(task_id = %task_id, error = %e, "Remote cancel failed");
            }
        });
    }
}

/// Drive one connection until it ends, fails or is aborted.
async fn pump(
    shared: Arc<Shared>,
    session: Session,
    transport: Arc<dyn Transport>,
    deadline: Option<Instant>,
) {
    let mut items = match transport.connect(&session).await {
        Ok(items) => items,
        Err(error) => {
            shared.on_failure(&session, error);
            return;
        }
    };

    loop {
        let item = match deadline {
            Some(deadline) => match tokio::time::timeout_at(deadline, items.next()).await {
                Ok(item) => item,
                Err(_) => {
                    shared.on_timeout(&session);
                    return;
                }
            },
            None => items.next().await,
        };

        match item {
            Some(TransportItem::Failed(error)) => {
                shared.on_failure(&session, error);
                return;
            }
            Some(item) => {
                if !shared.apply(&session, item) {
                    return;
                }
            }
            None => {
                shared.on_failure(&session, TransportError::ClosedUnexpectedly);
                return;
            }
        }
    }
}

fn status_event(status: TaskStatus) -> EventEnvelope {
    EventEnvelope::now(ProgressEvent::Status {
        status,
        current_step: None,
        total_steps: None,
        error: None,
    })
}

/// Notifications implied by moving from `previous` to `next`.
fn notifications(
    previous: &ExecutionState,
    next: &ExecutionState,
    cause: Option<&ProgressEvent>,
) -> Vec<Event> {
    let Some(task_id) = next.task_id() else {
        return Vec::new();
    };
    let mut events = Vec::new();

    if previous.phase != next.phase {
        events.push(Event::PhaseChanged {
            task_id: task_id.to_string(),
            from: previous.phase,
            to: next.phase,
        });
    }

    let invoked = match cause {
        Some(ProgressEvent::ToolCall { .. }) => next.current_tool.as_deref(),
        _ => None,
    };
    for step in &next.steps {
        let is_new = previous.step(&step.id).is_none();
        if is_new || invoked == Some(step.id.as_str()) {
            events.push(Event::ToolCall {
                task_id: task_id.to_string(),
                step: step.clone(),
            });
        }
    }

    for line in next.logs.iter().skip(previous.logs.len()) {
        events.push(Event::TerminalOutput {
            task_id: task_id.to_string(),
            line: line.clone(),
        });
    }
    events
}
