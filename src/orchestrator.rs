//! Top-level coordination of sessions, submissions, and consumer lifecycle.
//!
//! The orchestrator is the only surface the UI collaborator talks to. It
//! enforces the one-live-consumer invariant: any existing consumer is
//! cancelled and awaited before a new stream starts, a session switches, or
//! a session is created or deleted. Consumer failures never propagate past
//! this boundary; they surface only as the terminal state of the affected
//! message.

use std::sync::Arc;

use tokio::sync::{Mutex, broadcast};

use crate::config::ClientConfig;
use crate::consumer::StreamConsumer;
use crate::directory::{SessionDirectory, unknown_session};
use crate::error::{Error, Result};
use crate::log::MessageLog;
use crate::transport::{SessionStore, StreamTransport};
use crate::types::{ChatEvent, Message, MessageId, Session, SessionId};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Coordinates session selection, message submission, and streaming.
pub struct ChatOrchestrator {
    transport: Arc<dyn StreamTransport>,
    store: Arc<dyn SessionStore>,
    directory: SessionDirectory,
    log: Arc<Mutex<MessageLog>>,
    events: broadcast::Sender<ChatEvent>,
    active: Option<StreamConsumer>,
    current: Option<SessionId>,
    welcome_text: String,
}

impl ChatOrchestrator {
    /// Creates an orchestrator over the given transport and store.
    pub fn new(
        transport: Arc<dyn StreamTransport>,
        store: Arc<dyn SessionStore>,
        config: &ClientConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            transport,
            store: store.clone(),
            directory: SessionDirectory::new(store),
            log: Arc::new(Mutex::new(MessageLog::new())),
            events,
            active: None,
            current: None,
            welcome_text: config.welcome_text.clone(),
        }
    }

    /// Subscribes to message and session change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.events.subscribe()
    }

    /// The currently selected session, if any.
    pub fn current_session(&self) -> Option<&SessionId> {
        self.current.as_ref()
    }

    /// Known sessions, newest first.
    pub fn sessions(&self) -> &[Session] {
        self.directory.sessions()
    }

    /// Reloads the session list from the backend.
    pub async fn refresh_sessions(&mut self) -> Result<&[Session]> {
        self.directory.refresh().await
    }

    /// Messages of the current session, oldest first.
    pub async fn messages(&self) -> Vec<Message> {
        match &self.current {
            Some(session_id) => self.log.lock().await.messages(session_id),
            None => Vec::new(),
        }
    }

    /// Submits user text to the active session and starts streaming the
    /// reply. Returns the identifier of the assistant message being filled
    /// in; updates arrive asynchronously through [`subscribe`].
    ///
    /// Rejects empty text, a missing active session, and submission while a
    /// previous reply is still streaming (callers wait or cancel first).
    ///
    /// [`subscribe`]: ChatOrchestrator::subscribe
    pub async fn submit(&mut self, text: &str) -> Result<MessageId> {
        let text = text.trim();
        if text.is_empty() {
            return Err(Error::validation(
                "message text must not be empty",
                Some("text".to_string()),
            ));
        }
        let Some(session_id) = self.current.clone() else {
            return Err(Error::validation("no active session", None));
        };
        match &self.active {
            Some(consumer) if !consumer.is_terminal() => {
                return Err(Error::validation(
                    "a reply is still streaming; wait or cancel it first",
                    None,
                ));
            }
            _ => self.active = None,
        }

        let message = Message::user(session_id.clone(), text);
        {
            let mut log = self.log.lock().await;
            log.append(message.clone());
        }
        self.directory.note_message(&session_id);
        let _ = self.events.send(ChatEvent::MessageUpdated(message));

        let consumer = StreamConsumer::start(
            self.transport.clone(),
            self.log.clone(),
            self.events.clone(),
            session_id.clone(),
            text.to_string(),
        )
        .await;
        self.directory.note_message(&session_id);
        let message_id = consumer.message_id();
        self.active = Some(consumer);
        Ok(message_id)
    }

    /// Makes another session current, cancelling any in-flight reply first
    /// and loading the target's messages from the backend.
    pub async fn switch_session(&mut self, session_id: &SessionId) -> Result<()> {
        if !self.directory.contains(session_id) {
            return Err(unknown_session(session_id));
        }
        self.cancel_active().await;

        let messages = self.store.fetch_messages(session_id).await?;
        {
            let mut log = self.log.lock().await;
            log.replace_session(session_id, messages);
        }
        self.current = Some(session_id.clone());
        let _ = self.events.send(ChatEvent::SessionChanged(session_id.clone()));
        Ok(())
    }

    /// Creates a session, seeds it with a welcome message, and makes it
    /// current. Any in-flight reply is cancelled first.
    pub async fn new_session(&mut self) -> Result<SessionId> {
        self.cancel_active().await;

        let session = self.directory.create().await?;
        let welcome = Message::assistant(session.id.clone(), self.welcome_text.clone());
        {
            let mut log = self.log.lock().await;
            log.append(welcome.clone());
        }
        self.directory.note_message(&session.id);
        self.current = Some(session.id.clone());
        let _ = self.events.send(ChatEvent::MessageUpdated(welcome));
        let _ = self.events.send(ChatEvent::SessionChanged(session.id.clone()));
        Ok(session.id)
    }

    /// Deletes a session. If it was current, falls back to a fresh session.
    pub async fn delete_session(&mut self, session_id: &SessionId) -> Result<()> {
        if self
            .active
            .as_ref()
            .is_some_and(|c| c.session_id() == session_id)
        {
            self.cancel_active().await;
        }
        self.directory.delete(session_id).await?;
        {
            let mut log = self.log.lock().await;
            log.remove_session(session_id);
        }
        let _ = self.events.send(ChatEvent::SessionDeleted(session_id.clone()));

        if self.current.as_ref() == Some(session_id) {
            self.current = None;
            self.new_session().await?;
        }
        Ok(())
    }

    /// Pauses the in-flight reply.
    pub fn pause_active(&self) -> Result<()> {
        match &self.active {
            Some(consumer) if !consumer.is_terminal() => {
                consumer.pause();
                Ok(())
            }
            _ => Err(Error::validation("no reply is streaming", None)),
        }
    }

    /// Resumes a paused reply.
    pub fn resume_active(&self) -> Result<()> {
        match &self.active {
            Some(consumer) if !consumer.is_terminal() => {
                consumer.resume();
                Ok(())
            }
            _ => Err(Error::validation("no reply is streaming", None)),
        }
    }

    /// Cancels the in-flight reply, if any, and waits for its read loop to
    /// stop. Safe to call when nothing is streaming.
    pub async fn cancel_active(&mut self) {
        if let Some(consumer) = self.active.take() {
            consumer.shutdown().await;
        }
    }

    /// State of the in-flight consumer, for diagnostics.
    pub fn active_state(&self) -> Option<crate::consumer::ConsumerState> {
        self.active.as_ref().map(|c| c.state())
    }
}

impl std::fmt::Debug for ChatOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatOrchestrator")
            .field("current", &self.current)
            .field("active", &self.active)
            .finish()
    }
}
