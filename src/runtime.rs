//! Runtime for executing dialogue sessions
//!
//! Each session runs its own event loop; the manager keeps a handle per
//! session for the API layer.

mod executor;
pub mod traits;

#[cfg(test)]
pub(crate) mod testing;

pub use executor::SessionRuntime;
pub use traits::*;

use crate::dialogue::{Context, DialogueState, Event, Statechart, TransitionError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, watch, RwLock};
use tokio_util::sync::CancellationToken;

/// Type alias for the production runtime
pub type ProductionRuntime = SessionRuntime<Arc<dyn TaskGateway>>;

/// Point-in-time view of a session
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub session_id: String,
    /// Dotted path of the active leaf
    pub active: String,
    pub context: Context,
    pub generation: u64,
    pub task_pending: bool,
    pub updated_at: DateTime<Utc>,
}

impl SessionSnapshot {
    pub fn capture(session_id: &str, chart: &Statechart, state: &DialogueState) -> Self {
        Self {
            session_id: session_id.to_string(),
            active: state.active_path(chart).to_string(),
            context: state.context.clone(),
            generation: state.generation,
            task_pending: state.pending_task.is_some(),
            updated_at: Utc::now(),
        }
    }
}

/// Events sent to SSE clients
#[derive(Debug, Clone)]
pub enum SseEvent {
    Init { snapshot: SessionSnapshot },
    Speak { value: String },
    Listen,
    StateChange { snapshot: SessionSnapshot },
    Error { message: String },
}

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("session not found: {0}")]
    SessionNotFound(String),
    #[error("session {0} has stopped")]
    SessionClosed(String),
    #[error("event {0} cannot be sent from outside a session")]
    InternalEvent(String),
    #[error("failed to start session: {0}")]
    Start(#[from] TransitionError),
}

/// Handle to interact with a running session
#[derive(Clone)]
pub struct SessionHandle {
    pub event_tx: mpsc::Sender<Event>,
    pub broadcast_tx: broadcast::Sender<SseEvent>,
    snapshot_rx: watch::Receiver<SessionSnapshot>,
    shutdown: CancellationToken,
}

impl SessionHandle {
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot_rx.borrow().clone()
    }
}

/// Manager for all session runtimes
pub struct RuntimeManager {
    chart: Arc<Statechart>,
    gateway: Arc<dyn TaskGateway>,
    listen_timeout: Option<Duration>,
    sessions: RwLock<HashMap<String, SessionHandle>>,
}

impl RuntimeManager {
    pub fn new(
        chart: Arc<Statechart>,
        gateway: Arc<dyn TaskGateway>,
        listen_timeout: Option<Duration>,
    ) -> Self {
        Self {
            chart,
            gateway,
            listen_timeout,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Start a new session and return its id
    pub async fn create_session(&self) -> Result<String, RuntimeError> {
        let session_id = uuid::Uuid::new_v4().to_string();

        let (event_tx, event_rx) = mpsc::channel(32);
        let (broadcast_tx, _) = broadcast::channel(128);
        let shutdown = CancellationToken::new();

        let (runtime, snapshot_rx): (ProductionRuntime, _) = SessionRuntime::new(
            session_id.clone(),
            self.chart.clone(),
            self.gateway.clone(),
            event_rx,
            event_tx.clone(),
            broadcast_tx.clone(),
            shutdown.clone(),
            self.listen_timeout,
        )?;

        self.sessions.write().await.insert(
            session_id.clone(),
            SessionHandle {
                event_tx,
                broadcast_tx,
                snapshot_rx,
                shutdown,
            },
        );

        let id = session_id.clone();
        tokio::spawn(async move {
            runtime.run().await;
            tracing::info!(session_id = %id, "Session runtime finished");
        });

        let active_sessions = self.session_count().await;
        tracing::info!(session_id = %session_id, active_sessions, "Session created");
        Ok(session_id)
    }

    async fn handle(&self, session_id: &str) -> Result<SessionHandle, RuntimeError> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .cloned()
            .ok_or_else(|| RuntimeError::SessionNotFound(session_id.to_string()))
    }

    /// Send an external event to a session
    pub async fn send_event(&self, session_id: &str, event: Event) -> Result<(), RuntimeError> {
        if !event.is_external() {
            return Err(RuntimeError::InternalEvent(format!("{:?}", event.kind())));
        }
        let handle = self.handle(session_id).await?;
        handle
            .event_tx
            .send(event)
            .await
            .map_err(|_| RuntimeError::SessionClosed(session_id.to_string()))
    }

    /// Subscribe to session updates, together with the current snapshot
    pub async fn subscribe(
        &self,
        session_id: &str,
    ) -> Result<(broadcast::Receiver<SseEvent>, SessionSnapshot), RuntimeError> {
        let handle = self.handle(session_id).await?;
        let rx = handle.broadcast_tx.subscribe();
        Ok((rx, handle.snapshot()))
    }

    pub async fn snapshot(&self, session_id: &str) -> Result<SessionSnapshot, RuntimeError> {
        Ok(self.handle(session_id).await?.snapshot())
    }

    /// Stop a session and cancel its running task
    pub async fn close_session(&self, session_id: &str) -> Result<(), RuntimeError> {
        let handle = self
            .sessions
            .write()
            .await
            .remove(session_id)
            .ok_or_else(|| RuntimeError::SessionNotFound(session_id.to_string()))?;
        handle.shutdown.cancel();
        tracing::info!(session_id = %session_id, "Session closed");
        Ok(())
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}
