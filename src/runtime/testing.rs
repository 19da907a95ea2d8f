//! Mock gateways and runtime tests
//!
//! Sessions run on the real executor; only the task gateway is faked.

use super::traits::TaskGateway;
use super::{RuntimeError, RuntimeManager, SessionRuntime, SessionSnapshot, SseEvent};
use crate::dialogue::task::{TaskPayload, TaskRequest};
use crate::dialogue::{appointment_chart, ChartOptions, Event, Grammar, GrammarConfig, PromptCatalog, Statechart};
use crate::services::ServiceError;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;

const WAIT: Duration = Duration::from_secs(2);

// ============================================================================
// Mock Gateways
// ============================================================================

/// Gateway that returns queued responses
#[derive(Default)]
pub struct MockGateway {
    responses: Mutex<VecDeque<Result<TaskPayload, ServiceError>>>,
    /// Record of all requests made
    pub requests: Mutex<Vec<TaskRequest>>,
}

impl MockGateway {
    pub fn queue_response(&self, payload: TaskPayload) {
        self.responses.lock().unwrap().push_back(Ok(payload));
    }

    pub fn queue_error(&self, error: ServiceError) {
        self.responses.lock().unwrap().push_back(Err(error));
    }

    pub fn recorded_requests(&self) -> Vec<TaskRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl TaskGateway for MockGateway {
    async fn run(&self, request: &TaskRequest) -> Result<TaskPayload, ServiceError> {
        self.requests.lock().unwrap().push(request.clone());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ServiceError::network("No mock response queued")))
    }
}

/// Sets its flag when dropped
struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Gateway whose tasks never finish; records when a task is abandoned
#[derive(Default)]
pub struct StalledGateway {
    started: AtomicBool,
    dropped: Arc<AtomicBool>,
}

#[async_trait]
impl TaskGateway for StalledGateway {
    async fn run(&self, _request: &TaskRequest) -> Result<TaskPayload, ServiceError> {
        let _guard = DropFlag(self.dropped.clone());
        self.started.store(true, Ordering::SeqCst);
        std::future::pending::<()>().await;
        Err(ServiceError::unknown("unreachable"))
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn test_chart() -> Arc<Statechart> {
    let grammar = Grammar::compile(&GrammarConfig::default()).unwrap();
    Arc::new(appointment_chart(grammar, PromptCatalog::default(), ChartOptions::default()).unwrap())
}

struct TestSession {
    event_tx: mpsc::Sender<Event>,
    events: broadcast::Receiver<SseEvent>,
    snapshot: watch::Receiver<SessionSnapshot>,
    shutdown: CancellationToken,
}

impl TestSession {
    fn spawn<G: TaskGateway + 'static>(gateway: G, listen_timeout: Option<Duration>) -> Self {
        let (event_tx, event_rx) = mpsc::channel(32);
        let (broadcast_tx, events) = broadcast::channel(128);
        let shutdown = CancellationToken::new();
        let (runtime, snapshot) = SessionRuntime::new(
            "test-session".to_string(),
            test_chart(),
            gateway,
            event_rx,
            event_tx.clone(),
            broadcast_tx,
            shutdown.clone(),
            listen_timeout,
        )
        .unwrap();
        tokio::spawn(runtime.run());
        Self {
            event_tx,
            events,
            snapshot,
            shutdown,
        }
    }

    async fn send(&self, event: Event) {
        self.event_tx.send(event).await.unwrap();
    }

    async fn say(&self, utterance: &str) {
        self.send(Event::recognised(utterance)).await;
    }

    /// Drive the session to the welcome question as user "Ada"
    async fn welcome(&mut self) {
        self.send(Event::Click).await;
        self.send(Event::TtsReady).await;
        self.send(Event::EndSpeech).await;
        self.say("Ada").await;
        self.send(Event::EndSpeech).await;
        self.wait_for_state("dialogue.welcome.ask").await;
    }

    async fn expect_speech(&mut self, expected: &str) {
        let found = tokio::time::timeout(WAIT, async {
            loop {
                match self.events.recv().await {
                    Ok(SseEvent::Speak { value }) if value == expected => return,
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => panic!("session closed"),
                }
            }
        })
        .await;
        assert!(found.is_ok(), "never heard {expected:?}");
    }

    async fn wait_for_state(&mut self, path: &str) {
        let reached = tokio::time::timeout(WAIT, async {
            loop {
                if self.snapshot.borrow_and_update().active == path {
                    return;
                }
                self.snapshot.changed().await.unwrap();
            }
        })
        .await;
        assert!(
            reached.is_ok(),
            "stuck in {} waiting for {path}",
            self.snapshot.borrow().active
        );
    }
}

impl Drop for TestSession {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn wait_until(flag: &AtomicBool) {
    let set = tokio::time::timeout(WAIT, async {
        while !flag.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(set.is_ok(), "flag never set");
}

// ============================================================================
// Runtime Tests
// ============================================================================

#[tokio::test]
async fn test_knowledge_lookup_round_trip() {
    let gateway = Arc::new(MockGateway::default());
    gateway.queue_response(TaskPayload::Knowledge {
        abstract_text: "Ada Lovelace was an English mathematician. She wrote notes.".to_string(),
    });

    let mut session = TestSession::spawn(gateway.clone(), None);
    session.welcome().await;
    session.say("Who is Ada Lovelace?").await;

    session
        .expect_speech("Ada Lovelace was an English mathematician")
        .await;
    session.wait_for_state("dialogue.infoCelebrity").await;
    assert_eq!(
        gateway.recorded_requests(),
        vec![TaskRequest::KnowledgeLookup {
            subject: "Ada Lovelace".to_string()
        }]
    );

    let snapshot = session.snapshot.borrow().clone();
    assert!(!snapshot.task_pending);
    assert_eq!(
        snapshot.context.celebrity_info.as_deref(),
        Some("Ada Lovelace was an English mathematician")
    );
}

#[tokio::test]
async fn test_task_failure_becomes_apology() {
    let gateway = Arc::new(MockGateway::default());
    gateway.queue_error(ServiceError::network("connection refused"));

    let mut session = TestSession::spawn(gateway, None);
    session.welcome().await;
    session.say("Who is Ada Lovelace?").await;

    session
        .expect_speech("Sorry, I didn't get any info about Ada Lovelace.")
        .await;
}

#[tokio::test]
async fn test_interrupt_cancels_running_task() {
    let gateway = Arc::new(StalledGateway::default());
    let mut session = TestSession::spawn(gateway.clone(), None);
    session.welcome().await;

    session.say("Who is Ada Lovelace?").await;
    session.wait_for_state("dialogue.askForCelebrity").await;
    wait_until(&gateway.started).await;

    session.say("Help.").await;
    session
        .expect_speech("I can help you to create meetings in your calendar.")
        .await;
    session.wait_for_state("help").await;
    wait_until(&gateway.dropped).await;

    let snapshot = session.snapshot.borrow().clone();
    assert!(!snapshot.task_pending);
    assert_eq!(snapshot.context.celebrity_info, None);
}

#[tokio::test]
async fn test_stale_completion_is_ignored() {
    let gateway = Arc::new(StalledGateway::default());
    let mut session = TestSession::spawn(gateway, None);
    session.welcome().await;
    session.say("Who is Ada Lovelace?").await;
    session.wait_for_state("dialogue.askForCelebrity").await;
    let generation = session.snapshot.borrow().generation;

    session.say("Help.").await;
    session.wait_for_state("help").await;
    session
        .send(Event::TaskDone {
            generation,
            payload: TaskPayload::Knowledge {
                abstract_text: "Too late.".to_string(),
            },
        })
        .await;
    session.send(Event::EndSpeech).await;

    // Resuming re-invokes the lookup with a fresh generation
    session.wait_for_state("dialogue.askForCelebrity").await;
    let snapshot = session.snapshot.borrow().clone();
    assert!(snapshot.generation > generation);
    assert_eq!(snapshot.context.celebrity_info, None);
}

#[tokio::test]
async fn test_listen_deadline_reprompts() {
    let mut session = TestSession::spawn(MockGateway::default(), Some(Duration::from_millis(100)));
    session.welcome().await;

    // Nobody answers: the second phrasing follows
    session.expect_speech("What can I do for you?").await;
    session.wait_for_state("dialogue.welcome.prompt").await;
}

#[tokio::test]
async fn test_answer_disarms_listen_deadline() {
    let mut session = TestSession::spawn(MockGateway::default(), Some(Duration::from_millis(150)));
    session.welcome().await;
    session.say("Create a meeting.").await;
    session.expect_speech("Let's create a meeting.").await;

    tokio::time::sleep(Duration::from_millis(300)).await;
    // The deadline armed in welcome.ask must not have fired
    assert_eq!(session.snapshot.borrow().active, "dialogue.meeting.createMeeting");
}

#[tokio::test]
async fn test_ignored_event_keeps_listen_deadline() {
    let mut session = TestSession::spawn(MockGateway::default(), Some(Duration::from_millis(100)));
    session.welcome().await;

    // ENDSPEECH has no handler in welcome.ask
    session.send(Event::EndSpeech).await;

    session.expect_speech("What can I do for you?").await;
    session.wait_for_state("dialogue.welcome.prompt").await;
}

// ============================================================================
// Manager Tests
// ============================================================================

fn test_manager() -> RuntimeManager {
    let gateway: Arc<dyn TaskGateway> = Arc::new(MockGateway::default());
    RuntimeManager::new(test_chart(), gateway, None)
}

#[tokio::test]
async fn test_manager_session_lifecycle() {
    let manager = test_manager();
    let id = manager.create_session().await.unwrap();
    assert_eq!(manager.session_count().await, 1);

    let (_rx, snapshot) = manager.subscribe(&id).await.unwrap();
    assert_eq!(snapshot.session_id, id);
    assert_eq!(snapshot.active, "idle");

    manager.send_event(&id, Event::Click).await.unwrap();

    manager.close_session(&id).await.unwrap();
    assert_eq!(manager.session_count().await, 0);
    assert!(matches!(
        manager.send_event(&id, Event::Click).await,
        Err(RuntimeError::SessionNotFound(_))
    ));
}

#[tokio::test]
async fn test_manager_rejects_internal_events() {
    let manager = test_manager();
    let id = manager.create_session().await.unwrap();

    assert!(matches!(
        manager.send_event(&id, Event::FormComplete).await,
        Err(RuntimeError::InternalEvent(_))
    ));
    assert!(matches!(
        manager
            .send_event(
                &id,
                Event::TaskError {
                    generation: 1,
                    reason: "forged".to_string()
                }
            )
            .await,
        Err(RuntimeError::InternalEvent(_))
    ));
}

#[tokio::test]
async fn test_manager_unknown_session() {
    let manager = test_manager();
    assert!(matches!(
        manager.snapshot("missing").await,
        Err(RuntimeError::SessionNotFound(_))
    ));
    assert!(matches!(
        manager.close_session("missing").await,
        Err(RuntimeError::SessionNotFound(_))
    ));
}
