//! Directory of known conversation sessions.
//!
//! Owns the local [`Session`] records exclusively; other components hold
//! identifiers only. Creation and deletion go through the remote
//! [`SessionStore`]; a failed remote call is reported to the caller, never
//! retried here.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::transport::SessionStore;
use crate::types::{Session, SessionId};

/// Tracks conversation sessions and their metadata.
pub struct SessionDirectory {
    store: Arc<dyn SessionStore>,
    sessions: Vec<Session>,
}

impl SessionDirectory {
    /// Creates an empty directory backed by the given store.
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self {
            store,
            sessions: Vec::new(),
        }
    }

    /// Creates a session remotely and records it locally.
    pub async fn create(&mut self) -> Result<Session> {
        let session = self.store.create_session().await?;
        self.sessions.insert(0, session.clone());
        self.sort();
        Ok(session)
    }

    /// Reloads the session list from the store.
    pub async fn refresh(&mut self) -> Result<&[Session]> {
        self.sessions = self.store.list_sessions().await?;
        self.sort();
        Ok(&self.sessions)
    }

    /// Deletes a session remotely and removes the local entry.
    ///
    /// If the deleted session was the active one, the caller must select or
    /// create a replacement.
    pub async fn delete(&mut self, session_id: &SessionId) -> Result<()> {
        self.store.delete_session(session_id).await?;
        self.sessions.retain(|s| s.id != *session_id);
        Ok(())
    }

    /// Known sessions, newest first.
    pub fn sessions(&self) -> &[Session] {
        &self.sessions
    }

    /// Looks up a session by identifier.
    pub fn get(&self, session_id: &SessionId) -> Option<&Session> {
        self.sessions.iter().find(|s| s.id == *session_id)
    }

    /// Returns true if the directory knows this session.
    pub fn contains(&self, session_id: &SessionId) -> bool {
        self.get(session_id).is_some()
    }

    /// Bumps the message count of a session after an append.
    pub fn note_message(&mut self, session_id: &SessionId) {
        if let Some(session) = self.sessions.iter_mut().find(|s| s.id == *session_id) {
            session.message_count += 1;
        }
    }

    fn sort(&mut self) {
        self.sessions
            .sort_by(|a, b| b.created_at.cmp(&a.created_at));
    }
}

impl std::fmt::Debug for SessionDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionDirectory")
            .field("sessions", &self.sessions)
            .finish()
    }
}

/// Shorthand for the common "unknown session" rejection.
pub(crate) fn unknown_session(session_id: &SessionId) -> Error {
    Error::not_found("unknown session", Some(session_id.to_string()))
}
