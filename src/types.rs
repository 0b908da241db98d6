//! Core data types for the streaming conversation client.
//!
//! Sessions are owned by the [`SessionDirectory`](crate::SessionDirectory),
//! messages by the [`MessageLog`](crate::MessageLog); everything else holds
//! identifiers, never the records themselves.

use std::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// Opaque, server-assigned identifier for a conversation session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Create a session identifier from a server-assigned string.
    pub fn new(id: impl Into<String>) -> Self {
        SessionId(id.into())
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        SessionId::new(id)
    }
}

impl From<String> for SessionId {
    fn from(id: String) -> Self {
        SessionId::new(id)
    }
}

/// Locally generated identifier for a message.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(Uuid);

impl MessageId {
    /// Generate a fresh random identifier.
    pub fn generate() -> Self {
        MessageId(Uuid::new_v4())
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Role of a message author.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The dashboard user.
    User,

    /// The remote assistant.
    Assistant,
}

/// Delivery state of a message.
///
/// Content is mutable only while `Streaming`; the other three states are
/// terminal and freeze the content the instant they are entered.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryState {
    /// The message is still being reconstructed from the wire.
    Streaming,

    /// The full response was delivered.
    Complete,

    /// Delivery was cancelled by the user or orchestrator.
    Aborted,

    /// Delivery failed; partial content, if any, is preserved.
    Errored,
}

impl DeliveryState {
    /// Returns true once the state can no longer change.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, DeliveryState::Streaming)
    }
}

/// One message in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Identifier of this message.
    pub id: MessageId,

    /// The session this message belongs to.
    pub session_id: SessionId,

    /// Who authored the message.
    pub role: Role,

    /// The message text. Cumulative while streaming, frozen afterwards.
    pub content: String,

    /// When the message was created.
    #[serde(with = "crate::utils::time")]
    pub created_at: OffsetDateTime,

    /// Delivery state of the message.
    pub state: DeliveryState,
}

impl Message {
    /// Create a completed user message.
    pub fn user(session_id: SessionId, content: impl Into<String>) -> Self {
        Message {
            id: MessageId::generate(),
            session_id,
            role: Role::User,
            content: content.into(),
            created_at: OffsetDateTime::now_utc(),
            state: DeliveryState::Complete,
        }
    }

    /// Create a completed assistant message, e.g. a locally seeded greeting.
    pub fn assistant(session_id: SessionId, content: impl Into<String>) -> Self {
        Message {
            id: MessageId::generate(),
            session_id,
            role: Role::Assistant,
            content: content.into(),
            created_at: OffsetDateTime::now_utc(),
            state: DeliveryState::Complete,
        }
    }

    /// Create the empty assistant placeholder a stream fills in.
    pub fn streaming_placeholder(session_id: SessionId) -> Self {
        Message {
            id: MessageId::generate(),
            session_id,
            role: Role::Assistant,
            content: String::new(),
            created_at: OffsetDateTime::now_utc(),
            state: DeliveryState::Streaming,
        }
    }

    /// Returns true once the content can no longer change.
    pub fn is_frozen(&self) -> bool {
        self.state.is_terminal()
    }
}

/// Metadata for a known conversation session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Server-assigned identifier.
    pub id: SessionId,

    /// When the session was created.
    #[serde(with = "crate::utils::time")]
    pub created_at: OffsetDateTime,

    /// Number of messages exchanged in the session.
    pub message_count: usize,
}

/// Outward change notification for the UI collaborator.
///
/// Fired on every message content or state transition of the current
/// session, and on session lifecycle changes.
#[derive(Debug, Clone)]
pub enum ChatEvent {
    /// A message was appended or its content/state changed.
    MessageUpdated(Message),

    /// The current session changed.
    SessionChanged(SessionId),

    /// A session was deleted.
    SessionDeleted(SessionId),
}
