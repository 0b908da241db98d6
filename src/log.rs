//! Ordered, per-session record of exchanged messages.
//!
//! The log is the single place message content mutates. Update-in-place is
//! allowed only for a message that is still streaming; a write against a
//! missing or frozen message is reported to the caller as a logic error and
//! never silently applied.

use crate::error::{Error, Result};
use crate::observability::STALE_WRITES;
use crate::types::{DeliveryState, Message, MessageId, SessionId};

/// Ordered record of messages across sessions.
#[derive(Debug, Default)]
pub struct MessageLog {
    entries: Vec<Message>,
}

impl MessageLog {
    /// Creates an empty log.
    pub fn new() -> Self {
        MessageLog::default()
    }

    /// Appends a message, returning its identifier.
    pub fn append(&mut self, message: Message) -> MessageId {
        let id = message.id;
        self.entries.push(message);
        id
    }

    /// Looks up a message by identifier.
    pub fn get(&self, id: &MessageId) -> Option<&Message> {
        self.entries.iter().find(|m| m.id == *id)
    }

    /// Replaces the content of the streaming message `id` with new
    /// cumulative text.
    ///
    /// Returns `Ok(true)` when the content changed, `Ok(false)` when the
    /// update was an idempotent re-delivery (identical text, or a shorter
    /// prefix of what is already applied). Errors when the message does not
    /// exist or is no longer streaming; the caller decides how loudly to
    /// treat that.
    pub fn update_streaming(&mut self, id: &MessageId, content: &str) -> Result<bool> {
        let Some(entry) = self.entries.iter_mut().find(|m| m.id == *id) else {
            STALE_WRITES.click();
            return Err(Error::validation(
                "update for unknown message",
                Some(id.to_string()),
            ));
        };
        if entry.state != DeliveryState::Streaming {
            STALE_WRITES.click();
            return Err(Error::validation(
                "update for message that is no longer streaming",
                Some(id.to_string()),
            ));
        }
        if content == entry.content {
            return Ok(false);
        }
        // A duplicate frame may re-deliver an older cumulative prefix.
        if content.len() < entry.content.len() && entry.content.starts_with(content) {
            return Ok(false);
        }
        entry.content = content.to_string();
        Ok(true)
    }

    /// Freezes the streaming message `id` into a terminal state, optionally
    /// replacing its content one last time.
    ///
    /// Returns the frozen message. Errors on a missing message, a
    /// non-terminal target state, or a message that is already frozen.
    pub fn finalize(
        &mut self,
        id: &MessageId,
        state: DeliveryState,
        content: Option<String>,
    ) -> Result<Message> {
        if !state.is_terminal() {
            return Err(Error::validation(
                "finalize requires a terminal state",
                Some("state".to_string()),
            ));
        }
        let Some(entry) = self.entries.iter_mut().find(|m| m.id == *id) else {
            STALE_WRITES.click();
            return Err(Error::validation(
                "finalize for unknown message",
                Some(id.to_string()),
            ));
        };
        if entry.state != DeliveryState::Streaming {
            STALE_WRITES.click();
            return Err(Error::validation(
                "finalize for message that is already frozen",
                Some(id.to_string()),
            ));
        }
        if let Some(content) = content {
            entry.content = content;
        }
        entry.state = state;
        Ok(entry.clone())
    }

    /// Returns the messages of one session, oldest first.
    pub fn messages(&self, session_id: &SessionId) -> Vec<Message> {
        self.entries
            .iter()
            .filter(|m| m.session_id == *session_id)
            .cloned()
            .collect()
    }

    /// Number of messages recorded for one session.
    pub fn message_count(&self, session_id: &SessionId) -> usize {
        self.entries
            .iter()
            .filter(|m| m.session_id == *session_id)
            .count()
    }

    /// Replaces a session's messages with a list fetched from the backend.
    pub fn replace_session(&mut self, session_id: &SessionId, messages: Vec<Message>) {
        self.entries.retain(|m| m.session_id != *session_id);
        self.entries.extend(messages);
    }

    /// Drops all messages of a session.
    pub fn remove_session(&mut self, session_id: &SessionId) {
        self.entries.retain(|m| m.session_id != *session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> SessionId {
        SessionId::new("s-1")
    }

    #[test]
    fn append_and_ordered_retrieval() {
        let mut log = MessageLog::new();
        log.append(Message::user(session(), "first"));
        log.append(Message::assistant(session(), "second"));
        log.append(Message::user(SessionId::new("other"), "elsewhere"));

        let messages = log.messages(&session());
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content, "first");
        assert_eq!(messages[1].content, "second");
        assert_eq!(log.message_count(&session()), 2);
    }

    #[test]
    fn update_streaming_replaces_cumulative_text() {
        let mut log = MessageLog::new();
        let id = log.append(Message::streaming_placeholder(session()));

        assert!(log.update_streaming(&id, "Hel").unwrap());
        assert!(log.update_streaming(&id, "Hello").unwrap());
        assert_eq!(log.get(&id).unwrap().content, "Hello");
    }

    #[test]
    fn duplicate_delivery_is_idempotent() {
        let mut log = MessageLog::new();
        let id = log.append(Message::streaming_placeholder(session()));

        assert!(log.update_streaming(&id, "Hello there").unwrap());
        assert!(!log.update_streaming(&id, "Hello there").unwrap());
        // A stale shorter prefix does not shrink the content.
        assert!(!log.update_streaming(&id, "Hello").unwrap());
        assert_eq!(log.get(&id).unwrap().content, "Hello there");
    }

    #[test]
    fn update_on_unknown_message_is_an_error() {
        let mut log = MessageLog::new();
        let err = log
            .update_streaming(&MessageId::generate(), "x")
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn update_on_frozen_message_is_an_error() {
        let mut log = MessageLog::new();
        let id = log.append(Message::streaming_placeholder(session()));
        log.finalize(&id, DeliveryState::Complete, None).unwrap();

        let err = log.update_streaming(&id, "more").unwrap_err();
        assert!(err.is_validation());
        assert_eq!(log.get(&id).unwrap().content, "");
    }

    #[test]
    fn finalize_freezes_content() {
        let mut log = MessageLog::new();
        let id = log.append(Message::streaming_placeholder(session()));
        log.update_streaming(&id, "partial answ").unwrap();

        let frozen = log
            .finalize(
                &id,
                DeliveryState::Aborted,
                Some("partial answ [stopped]".to_string()),
            )
            .unwrap();
        assert_eq!(frozen.state, DeliveryState::Aborted);
        assert_eq!(frozen.content, "partial answ [stopped]");

        // Double finalize is rejected, content stays frozen.
        assert!(
            log.finalize(&id, DeliveryState::Complete, Some("overwrite".to_string()))
                .is_err()
        );
        assert_eq!(log.get(&id).unwrap().content, "partial answ [stopped]");
    }

    #[test]
    fn finalize_rejects_non_terminal_state() {
        let mut log = MessageLog::new();
        let id = log.append(Message::streaming_placeholder(session()));
        assert!(log.finalize(&id, DeliveryState::Streaming, None).is_err());
    }

    #[test]
    fn replace_and_remove_session() {
        let mut log = MessageLog::new();
        log.append(Message::user(session(), "old"));
        log.replace_session(
            &session(),
            vec![Message::assistant(session(), "from backend")],
        );
        let messages = log.messages(&session());
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "from backend");

        log.remove_session(&session());
        assert!(log.messages(&session()).is_empty());
    }
}
