//! Session runtime executor

use super::traits::TaskGateway;
use super::{SessionSnapshot, SseEvent};

use crate::dialogue::{start, transition, DialogueState, Effect, Event, Statechart, TransitionError};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;

/// One dialogue session: owns the state and executes effects
pub struct SessionRuntime<G>
where
    G: TaskGateway + 'static,
{
    session_id: String,
    chart: Arc<Statechart>,
    state: DialogueState,
    gateway: Arc<G>,
    event_rx: mpsc::Receiver<Event>,
    event_tx: mpsc::Sender<Event>,
    broadcast_tx: broadcast::Sender<SseEvent>,
    snapshot_tx: watch::Sender<SessionSnapshot>,
    /// Effects of entering the initial configuration, run first thing
    startup_effects: Vec<Effect>,
    /// Generation -> token of the running task
    task_tokens: HashMap<u64, CancellationToken>,
    shutdown: CancellationToken,
    listen_timeout: Option<Duration>,
    deadline_tx: mpsc::Sender<u64>,
    deadline_rx: mpsc::Receiver<u64>,
    listen_epoch: u64,
    /// Epoch of the deadline that may still fire
    armed_deadline: Option<u64>,
}

impl<G> SessionRuntime<G>
where
    G: TaskGateway + 'static,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        session_id: String,
        chart: Arc<Statechart>,
        gateway: G,
        event_rx: mpsc::Receiver<Event>,
        event_tx: mpsc::Sender<Event>,
        broadcast_tx: broadcast::Sender<SseEvent>,
        shutdown: CancellationToken,
        listen_timeout: Option<Duration>,
    ) -> Result<(Self, watch::Receiver<SessionSnapshot>), TransitionError> {
        let started = start(&chart)?;
        let snapshot = SessionSnapshot::capture(&session_id, &chart, &started.new_state);
        let (snapshot_tx, snapshot_rx) = watch::channel(snapshot);
        let (deadline_tx, deadline_rx) = mpsc::channel(8);

        let runtime = Self {
            session_id,
            chart,
            state: started.new_state,
            gateway: Arc::new(gateway),
            event_rx,
            event_tx,
            broadcast_tx,
            snapshot_tx,
            startup_effects: started.effects,
            task_tokens: HashMap::new(),
            shutdown,
            listen_timeout,
            deadline_tx,
            deadline_rx,
            listen_epoch: 0,
            armed_deadline: None,
        };
        Ok((runtime, snapshot_rx))
    }

    pub async fn run(mut self) {
        tracing::info!(session_id = %self.session_id, "Starting session runtime");

        for effect in std::mem::take(&mut self.startup_effects) {
            self.execute_effect(effect);
        }

        // Process events in a loop, one at a time to completion
        loop {
            tokio::select! {
                () = self.shutdown.cancelled() => break,
                Some(event) = self.event_rx.recv() => {
                    self.handle(event);
                }
                Some(epoch) = self.deadline_rx.recv() => {
                    if self.armed_deadline == Some(epoch) {
                        tracing::debug!(session_id = %self.session_id, "Listen deadline expired");
                        self.handle(Event::Timeout);
                    }
                }
                else => break,
            }
        }

        for (_, token) in self.task_tokens.drain() {
            token.cancel();
        }
        tracing::info!(session_id = %self.session_id, "Session runtime stopped");
    }

    fn handle(&mut self, event: Event) {
        if let Err(e) = self.process_event(event) {
            tracing::error!(session_id = %self.session_id, error = %e, "Error handling event");
            let _ = self.broadcast_tx.send(SseEvent::Error {
                message: e.to_string(),
            });
        }
    }

    fn process_event(&mut self, event: Event) -> Result<(), TransitionError> {
        let is_completion =
            if let Event::TaskDone { generation, .. } | Event::TaskError { generation, .. } = &event {
                self.task_tokens.remove(generation);
                true
            } else {
                false
            };

        let result = match transition(&self.chart, &self.state, event) {
            Ok(r) => r,
            Err(e) if e.is_benign() => {
                tracing::debug!(
                    session_id = %self.session_id,
                    state = %self.state.active_path(&self.chart),
                    reason = %e,
                    "Event ignored"
                );
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        // A handled speech-side event supersedes the pending listen deadline;
        // ignored ones leave it armed
        if !is_completion {
            self.armed_deadline = None;
        }

        self.state = result.new_state;
        for effect in result.effects {
            self.execute_effect(effect);
        }
        Ok(())
    }

    fn execute_effect(&mut self, effect: Effect) {
        match effect {
            Effect::Speak { utterance } => {
                let value = utterance.choose(&mut rand::thread_rng());
                tracing::info!(session_id = %self.session_id, text = %value, "Speak");
                let _ = self.broadcast_tx.send(SseEvent::Speak { value });
            }

            Effect::Listen => {
                tracing::info!(session_id = %self.session_id, "Listen");
                let _ = self.broadcast_tx.send(SseEvent::Listen);
                self.arm_deadline();
            }

            Effect::InvokeTask {
                generation,
                request,
            } => {
                let cancel_token = self.shutdown.child_token();
                self.task_tokens.insert(generation, cancel_token.clone());

                let gateway = self.gateway.clone();
                let event_tx = self.event_tx.clone();
                let session_id = self.session_id.clone();

                tracing::info!(
                    session_id = %session_id,
                    generation,
                    task = ?request.kind(),
                    "Invoking task (background)"
                );

                tokio::spawn(async move {
                    // Race the task against cancellation
                    tokio::select! {
                        biased;

                        () = cancel_token.cancelled() => {
                            tracing::info!(session_id = %session_id, generation, "Task cancelled");
                        }

                        result = gateway.run(&request) => {
                            let event = match result {
                                Ok(payload) => Event::TaskDone { generation, payload },
                                Err(e) => Event::TaskError { generation, reason: e.message },
                            };
                            let _ = event_tx.send(event).await;
                        }
                    }
                });
            }

            Effect::CancelTask { generation } => {
                if let Some(token) = self.task_tokens.remove(&generation) {
                    token.cancel();
                }
            }

            Effect::PublishState => {
                let snapshot = SessionSnapshot::capture(&self.session_id, &self.chart, &self.state);
                tracing::info!(
                    session_id = %self.session_id,
                    state = %snapshot.active,
                    "State changed"
                );
                let _ = self.broadcast_tx.send(SseEvent::StateChange {
                    snapshot: snapshot.clone(),
                });
                self.snapshot_tx.send_replace(snapshot);
            }
        }
    }

    fn arm_deadline(&mut self) {
        let Some(timeout) = self.listen_timeout else {
            return;
        };
        self.listen_epoch += 1;
        let epoch = self.listen_epoch;
        self.armed_deadline = Some(epoch);

        let deadline_tx = self.deadline_tx.clone();
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = shutdown.cancelled() => {}
                () = tokio::time::sleep(timeout) => {
                    let _ = deadline_tx.send(epoch).await;
                }
            }
        });
    }
}
