//! End-to-end orchestrator tests over an in-memory backend.
//!
//! The backend scripts one stream per submission: either a fixed list of
//! chunks, or a channel the test feeds byte-by-byte to exercise pause and
//! cancellation mid-stream.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;

use campanile::consumer::STOP_MARKER;
use campanile::{
    ByteStream, ChatEvent, ChatOrchestrator, ClientConfig, ConsumerState, DeliveryState, Error,
    Message, MessageId, Result, Role, Session, SessionId, SessionStore, StreamTransport,
};

enum Script {
    Chunks(Vec<Bytes>),
    Channel(mpsc::UnboundedReceiver<Result<Bytes>>),
}

#[derive(Default)]
struct TestBackend {
    counter: AtomicU64,
    scripts: Mutex<VecDeque<Script>>,
    remote_messages: Mutex<HashMap<String, Vec<Message>>>,
    deleted: Mutex<Vec<SessionId>>,
}

impl TestBackend {
    fn push_chunks(&self, chunks: &[Bytes]) {
        self.scripts
            .lock()
            .expect("lock")
            .push_back(Script::Chunks(chunks.to_vec()));
    }

    fn push_channel(&self) -> mpsc::UnboundedSender<Result<Bytes>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.scripts
            .lock()
            .expect("lock")
            .push_back(Script::Channel(rx));
        tx
    }

    fn seed_remote(&self, session_id: &SessionId, messages: Vec<Message>) {
        self.remote_messages
            .lock()
            .expect("lock")
            .insert(session_id.as_str().to_string(), messages);
    }
}

#[async_trait]
impl StreamTransport for TestBackend {
    async fn open_stream(&self, _session_id: &SessionId, _text: &str) -> Result<ByteStream> {
        let script = self.scripts.lock().expect("lock").pop_front();
        match script {
            Some(Script::Chunks(chunks)) => {
                Ok(Box::pin(futures::stream::iter(chunks.into_iter().map(Ok))))
            }
            Some(Script::Channel(rx)) => {
                Ok(Box::pin(futures::stream::unfold(rx, |mut rx| async move {
                    rx.recv().await.map(|item| (item, rx))
                })))
            }
            None => Err(Error::transport("no stream scripted for this call", None)),
        }
    }
}

#[async_trait]
impl SessionStore for TestBackend {
    async fn create_session(&self) -> Result<Session> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        Ok(Session {
            id: SessionId::new(format!("session-{n}")),
            created_at: time::OffsetDateTime::from_unix_timestamp(1_700_000_000 + n as i64)
                .expect("valid timestamp"),
            message_count: 0,
        })
    }

    async fn list_sessions(&self) -> Result<Vec<Session>> {
        Ok(Vec::new())
    }

    async fn fetch_messages(&self, session_id: &SessionId) -> Result<Vec<Message>> {
        Ok(self
            .remote_messages
            .lock()
            .expect("lock")
            .get(session_id.as_str())
            .cloned()
            .unwrap_or_default())
    }

    async fn delete_session(&self, session_id: &SessionId) -> Result<()> {
        self.deleted.lock().expect("lock").push(session_id.clone());
        Ok(())
    }
}

fn orchestrator(backend: Arc<TestBackend>) -> ChatOrchestrator {
    let config = ClientConfig::new("test-token");
    ChatOrchestrator::new(backend.clone(), backend, &config)
}

fn progress_line(text: &str, progress: u32) -> Bytes {
    Bytes::from(format!(
        "data: {}\n",
        serde_json::json!({"response": text, "progress": progress})
    ))
}

fn complete_line(text: &str) -> Bytes {
    Bytes::from(format!(
        "data: {}\n",
        serde_json::json!({"response": text, "progress": 100, "complete": true})
    ))
}

fn sentinel_line() -> Bytes {
    Bytes::from_static(b"data: [DONE]\n")
}

/// Waits until `message_id` reaches a terminal state and returns it.
async fn wait_terminal(events: &mut broadcast::Receiver<ChatEvent>, id: MessageId) -> Message {
    timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await.expect("event channel open") {
                ChatEvent::MessageUpdated(m) if m.id == id && m.state.is_terminal() => return m,
                _ => {}
            }
        }
    })
    .await
    .expect("reply should reach a terminal state")
}

/// Waits until `message_id` carries exactly `content`.
async fn wait_content(events: &mut broadcast::Receiver<ChatEvent>, id: MessageId, content: &str) {
    timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await.expect("event channel open") {
                ChatEvent::MessageUpdated(m) if m.id == id && m.content == content => return,
                _ => {}
            }
        }
    })
    .await
    .expect("expected content update never arrived")
}

/// Waits until the active consumer reports `state`.
async fn wait_state(orch: &ChatOrchestrator, state: ConsumerState) {
    timeout(Duration::from_secs(5), async {
        loop {
            if orch.active_state() == Some(state) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("consumer never reached the expected state")
}

#[tokio::test]
async fn new_session_seeds_welcome() {
    let backend = Arc::new(TestBackend::default());
    let mut orch = orchestrator(backend);

    let session_id = orch.new_session().await.unwrap();
    assert_eq!(orch.current_session(), Some(&session_id));

    let messages = orch.messages().await;
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].role, Role::Assistant);
    assert_eq!(messages[0].state, DeliveryState::Complete);
    assert!(!messages[0].content.is_empty());
    assert_eq!(orch.sessions()[0].message_count, 1);
}

#[tokio::test]
async fn submit_streams_reply_to_completion() {
    let backend = Arc::new(TestBackend::default());
    backend.push_chunks(&[
        progress_line("The campus has", 40),
        complete_line("The campus has 12 departments."),
        sentinel_line(),
    ]);
    let mut orch = orchestrator(backend);
    orch.new_session().await.unwrap();

    let mut events = orch.subscribe();
    let id = orch.submit("How many departments are there?").await.unwrap();
    let reply = wait_terminal(&mut events, id).await;

    assert_eq!(reply.state, DeliveryState::Complete);
    assert_eq!(reply.content, "The campus has 12 departments.");

    let messages = orch.messages().await;
    assert_eq!(messages.len(), 3);
    assert_eq!(messages[1].role, Role::User);
    assert_eq!(messages[1].content, "How many departments are there?");
    assert_eq!(messages[2].id, id);
    // Welcome, user message, reply.
    assert_eq!(orch.sessions()[0].message_count, 3);
}

#[tokio::test]
async fn submit_rejects_empty_text_and_missing_session() {
    let backend = Arc::new(TestBackend::default());
    let mut orch = orchestrator(backend);

    let err = orch.submit("hello").await.unwrap_err();
    assert!(err.is_validation());

    orch.new_session().await.unwrap();
    let err = orch.submit("   ").await.unwrap_err();
    assert!(err.is_validation());
    assert_eq!(orch.messages().await.len(), 1);
}

#[tokio::test]
async fn submit_rejects_while_reply_is_streaming() {
    let backend = Arc::new(TestBackend::default());
    let tx = backend.push_channel();
    backend.push_chunks(&[complete_line("second answer"), sentinel_line()]);
    let mut orch = orchestrator(backend);
    orch.new_session().await.unwrap();

    let mut events = orch.subscribe();
    let id = orch.submit("first question").await.unwrap();

    let err = orch.submit("second question").await.unwrap_err();
    assert!(err.is_validation());

    tx.send(Ok(complete_line("first answer"))).unwrap();
    drop(tx);
    wait_terminal(&mut events, id).await;

    // Once the first reply is terminal, submission is allowed again.
    let id = orch.submit("second question").await.unwrap();
    let reply = wait_terminal(&mut events, id).await;
    assert_eq!(reply.content, "second answer");
}

#[tokio::test]
async fn pause_holds_updates_until_resume() {
    let backend = Arc::new(TestBackend::default());
    let tx = backend.push_channel();
    let mut orch = orchestrator(backend);
    orch.new_session().await.unwrap();

    let mut events = orch.subscribe();
    let id = orch.submit("question").await.unwrap();

    tx.send(Ok(progress_line("Hel", 20))).unwrap();
    wait_content(&mut events, id, "Hel").await;

    orch.pause_active().unwrap();
    wait_state(&orch, ConsumerState::Paused).await;

    // Deliveries while paused are buffered, not applied.
    tx.send(Ok(progress_line("Hello wor", 70))).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    let messages = orch.messages().await;
    assert_eq!(messages.last().unwrap().content, "Hel");
    assert_eq!(orch.active_state(), Some(ConsumerState::Paused));

    // Resume applies the buffered update in order.
    orch.resume_active().unwrap();
    wait_content(&mut events, id, "Hello wor").await;

    tx.send(Ok(complete_line("Hello world"))).unwrap();
    let reply = wait_terminal(&mut events, id).await;
    assert_eq!(reply.content, "Hello world");
    assert_eq!(reply.state, DeliveryState::Complete);
}

#[tokio::test]
async fn pause_and_resume_reject_when_nothing_is_streaming() {
    let backend = Arc::new(TestBackend::default());
    let mut orch = orchestrator(backend);
    orch.new_session().await.unwrap();

    assert!(orch.pause_active().unwrap_err().is_validation());
    assert!(orch.resume_active().unwrap_err().is_validation());
}

#[tokio::test]
async fn cancel_freezes_partial_content_and_discards_late_bytes() {
    let backend = Arc::new(TestBackend::default());
    let tx = backend.push_channel();
    backend.push_chunks(&[complete_line("fresh answer"), sentinel_line()]);
    let mut orch = orchestrator(backend);
    orch.new_session().await.unwrap();

    let mut events = orch.subscribe();
    let id = orch.submit("question").await.unwrap();
    tx.send(Ok(progress_line("Partial ans", 60))).unwrap();
    wait_content(&mut events, id, "Partial ans").await;

    orch.cancel_active().await;

    let messages = orch.messages().await;
    let reply = messages.iter().find(|m| m.id == id).unwrap();
    assert_eq!(reply.state, DeliveryState::Aborted);
    assert_eq!(reply.content, format!("Partial ans{STOP_MARKER}"));

    // The transport side was dropped; late bytes have nowhere to go.
    assert!(tx.send(Ok(progress_line("Partial answer", 90))).is_err());
    let messages = orch.messages().await;
    assert_eq!(
        messages.iter().find(|m| m.id == id).unwrap().content,
        format!("Partial ans{STOP_MARKER}")
    );

    // A new submission on the same session works immediately.
    let id = orch.submit("another question").await.unwrap();
    let reply = wait_terminal(&mut events, id).await;
    assert_eq!(reply.content, "fresh answer");
}

#[tokio::test]
async fn switch_session_loads_remote_history() {
    let backend = Arc::new(TestBackend::default());
    let mut orch = orchestrator(backend.clone());

    let first = orch.new_session().await.unwrap();
    let second = orch.new_session().await.unwrap();
    assert_eq!(orch.current_session(), Some(&second));

    backend.seed_remote(
        &first,
        vec![
            Message::user(first.clone(), "earlier question"),
            Message::assistant(first.clone(), "earlier answer"),
        ],
    );

    let mut events = orch.subscribe();
    orch.switch_session(&first).await.unwrap();
    assert_eq!(orch.current_session(), Some(&first));

    let messages = orch.messages().await;
    assert_eq!(messages.len(), 2);
    assert!(messages.iter().all(|m| m.session_id == first));
    assert_eq!(messages[0].content, "earlier question");
    assert_eq!(messages[1].content, "earlier answer");

    match timeout(Duration::from_secs(1), events.recv()).await {
        Ok(Ok(ChatEvent::SessionChanged(id))) => assert_eq!(id, first),
        other => panic!("expected SessionChanged, got {other:?}"),
    }
}

#[tokio::test]
async fn switch_to_unknown_session_is_rejected() {
    let backend = Arc::new(TestBackend::default());
    let mut orch = orchestrator(backend);
    orch.new_session().await.unwrap();

    let err = orch
        .switch_session(&SessionId::new("no-such-session"))
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn switch_session_cancels_inflight_reply() {
    let backend = Arc::new(TestBackend::default());
    let mut orch = orchestrator(backend.clone());

    let first = orch.new_session().await.unwrap();
    let second = orch.new_session().await.unwrap();
    orch.switch_session(&first).await.unwrap();

    let tx = backend.push_channel();
    let mut events = orch.subscribe();
    let id = orch.submit("question").await.unwrap();
    tx.send(Ok(progress_line("Hel", 20))).unwrap();
    wait_content(&mut events, id, "Hel").await;

    orch.switch_session(&second).await.unwrap();
    assert!(orch.active_state().is_none());
    assert!(tx.send(Ok(progress_line("Hello", 50))).is_err());
    assert_eq!(orch.current_session(), Some(&second));
}

#[tokio::test]
async fn delete_current_session_falls_back_to_a_fresh_one() {
    let backend = Arc::new(TestBackend::default());
    let mut orch = orchestrator(backend.clone());
    let doomed = orch.new_session().await.unwrap();

    let mut events = orch.subscribe();
    orch.delete_session(&doomed).await.unwrap();

    let current = orch.current_session().cloned().expect("fallback session");
    assert_ne!(current, doomed);
    assert!(orch.sessions().iter().all(|s| s.id != doomed));
    assert_eq!(backend.deleted.lock().unwrap().as_slice(), &[doomed.clone()]);

    // Fallback session starts with its welcome message.
    let messages = orch.messages().await;
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].role, Role::Assistant);

    match timeout(Duration::from_secs(1), events.recv()).await {
        Ok(Ok(ChatEvent::SessionDeleted(id))) => assert_eq!(id, doomed),
        other => panic!("expected SessionDeleted, got {other:?}"),
    }
}

#[tokio::test]
async fn delete_other_session_keeps_current() {
    let backend = Arc::new(TestBackend::default());
    let mut orch = orchestrator(backend);
    let first = orch.new_session().await.unwrap();
    let second = orch.new_session().await.unwrap();

    orch.delete_session(&first).await.unwrap();
    assert_eq!(orch.current_session(), Some(&second));
    assert_eq!(orch.sessions().len(), 1);
    assert_eq!(orch.messages().await.len(), 1);
}

#[tokio::test]
async fn transport_failure_surfaces_as_errored_message() {
    let backend = Arc::new(TestBackend::default());
    // No script pushed: open_stream fails.
    let mut orch = orchestrator(backend);
    orch.new_session().await.unwrap();

    let mut events = orch.subscribe();
    let id = orch.submit("question").await.unwrap();
    let reply = wait_terminal(&mut events, id).await;
    assert_eq!(reply.state, DeliveryState::Errored);
    assert!(reply.content.contains("could not be opened"));

    // The failure is confined to the message; the session still works.
    assert!(orch.pause_active().unwrap_err().is_validation());
}
