//! External interface contracts and their HTTP implementation.
//!
//! Two seams separate the protocol core from the rest of the dashboard:
//! [`StreamTransport`] opens the authenticated event stream for one reply,
//! and [`SessionStore`] covers session/message persistence. Both are traits
//! so the consumer and orchestrator are testable without a running backend.
//!
//! [`HttpTransport`] implements both against the dashboard API with an
//! explicit bearer token injected at construction. The token is deliberately
//! a constructor parameter, not ambient state.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Client as ReqwestClient, Response, header};
use serde::{Deserialize, Serialize};

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::types::{DeliveryState, Message, MessageId, Role, Session, SessionId};
use crate::utils::time::parse_timestamp;

/// A stream of raw bytes from an open reply stream.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Opens the long-lived reply stream for one submitted message.
#[async_trait]
pub trait StreamTransport: Send + Sync {
    /// Open a single-direction, ordered byte stream carrying the assistant's
    /// reply to `text` within `session_id`. The stream ends with the
    /// terminal sentinel line or connection close.
    async fn open_stream(&self, session_id: &SessionId, text: &str) -> Result<ByteStream>;
}

/// Session and message persistence, served by the dashboard backend.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Create a session; the backend assigns the identifier.
    async fn create_session(&self) -> Result<Session>;

    /// List known sessions. Order is unspecified; the directory sorts.
    async fn list_sessions(&self) -> Result<Vec<Session>>;

    /// Fetch a session's messages, oldest first.
    async fn fetch_messages(&self, session_id: &SessionId) -> Result<Vec<Message>>;

    /// Delete a session. Idempotent: deleting an unknown session succeeds.
    async fn delete_session(&self, session_id: &SessionId) -> Result<()>;
}

/// HTTP client for the dashboard backend.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: ReqwestClient,
    base_url: String,
    auth_token: String,
    timeout: Duration,
}

impl HttpTransport {
    /// Create a transport from a client configuration.
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let client = ReqwestClient::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| {
                Error::http_client(
                    format!("Failed to build HTTP client: {e}"),
                    Some(Box::new(e)),
                )
            })?;

        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            auth_token: config.auth_token.clone(),
            timeout: config.timeout,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Create and return default headers for API requests.
    fn default_headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));
        let bearer = format!("Bearer {}", self.auth_token);
        let mut auth = HeaderValue::from_str(&bearer)
            .map_err(|_| Error::authentication("auth token contains invalid header bytes"))?;
        auth.set_sensitive(true);
        headers.insert(header::AUTHORIZATION, auth);
        Ok(headers)
    }

    fn request_error(&self, e: reqwest::Error) -> Error {
        if e.is_timeout() {
            Error::timeout(
                format!("Request timed out: {e}"),
                Some(self.timeout.as_secs_f64()),
            )
        } else if e.is_connect() {
            Error::transport(format!("Connection error: {e}"), Some(Box::new(e)))
        } else {
            Error::http_client(format!("Request failed: {e}"), Some(Box::new(e)))
        }
    }

    /// Map a non-success API response to our error type.
    async fn process_error_response(response: Response) -> Error {
        let status_code = response.status().as_u16();

        #[derive(Deserialize)]
        struct ErrorResponse {
            detail: Option<String>,
        }

        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                return Error::http_client(
                    format!("Failed to read error response: {e}"),
                    Some(Box::new(e)),
                );
            }
        };
        let message = serde_json::from_str::<ErrorResponse>(&body)
            .ok()
            .and_then(|e| e.detail)
            .unwrap_or(body);

        match status_code {
            401 | 403 => Error::authentication(message),
            404 => Error::not_found(message, None),
            408 => Error::timeout(message, None),
            422 => Error::validation(message, None),
            _ => Error::api(status_code, message),
        }
    }

    async fn check(response: Response) -> Result<Response> {
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(Self::process_error_response(response).await)
        }
    }
}

#[derive(Serialize)]
struct StreamRequest<'a> {
    message: &'a str,
    session_id: &'a str,
}

#[derive(Deserialize)]
struct SessionCreated {
    session_id: String,
    created_at: String,
}

#[derive(Deserialize)]
struct SessionListing {
    sessions: Vec<SessionEntry>,
}

#[derive(Deserialize)]
struct SessionEntry {
    session_id: String,
    created_at: String,
    #[serde(default)]
    message_count: usize,
}

#[derive(Deserialize)]
struct MessageListing {
    messages: Vec<MessageEntry>,
}

#[derive(Deserialize)]
struct MessageEntry {
    // Older backend rows say "message_type", newer ones "role".
    #[serde(alias = "role")]
    message_type: String,
    content: String,
    #[serde(alias = "timestamp")]
    created_at: Option<String>,
}

impl SessionEntry {
    fn into_session(self) -> Result<Session> {
        Ok(Session {
            id: SessionId::new(self.session_id),
            created_at: parse_timestamp(&self.created_at)?,
            message_count: self.message_count,
        })
    }
}

impl MessageEntry {
    fn into_message(self, session_id: &SessionId) -> Result<Message> {
        // The backend stores assistant rows as "ai".
        let role = match self.message_type.as_str() {
            "ai" | "assistant" => Role::Assistant,
            _ => Role::User,
        };
        let created_at = match self.created_at {
            Some(ref raw) => parse_timestamp(raw)?,
            None => time::OffsetDateTime::now_utc(),
        };
        Ok(Message {
            id: MessageId::generate(),
            session_id: session_id.clone(),
            role,
            content: self.content,
            created_at,
            state: DeliveryState::Complete,
        })
    }
}

#[async_trait]
impl StreamTransport for HttpTransport {
    async fn open_stream(&self, session_id: &SessionId, text: &str) -> Result<ByteStream> {
        let mut headers = self.default_headers()?;
        headers.insert(
            header::ACCEPT,
            HeaderValue::from_static("text/event-stream"),
        );

        let response = self
            .client
            .post(self.url("chat/stream"))
            .headers(headers)
            .json(&StreamRequest {
                message: text,
                session_id: session_id.as_str(),
            })
            .send()
            .await
            .map_err(|e| self.request_error(e))?;
        let response = Self::check(response).await?;

        let stream = response.bytes_stream().map(|result| {
            result.map_err(|e| {
                Error::transport(format!("Error in HTTP stream: {e}"), Some(Box::new(e)))
            })
        });
        Ok(Box::pin(stream))
    }
}

#[async_trait]
impl SessionStore for HttpTransport {
    async fn create_session(&self) -> Result<Session> {
        let response = self
            .client
            .post(self.url("sessions"))
            .headers(self.default_headers()?)
            .send()
            .await
            .map_err(|e| self.request_error(e))?;
        let response = Self::check(response).await?;

        let created: SessionCreated = response.json().await.map_err(|e| {
            Error::serialization(
                format!("Failed to parse session response: {e}"),
                Some(Box::new(e)),
            )
        })?;
        Ok(Session {
            id: SessionId::new(created.session_id),
            created_at: parse_timestamp(&created.created_at)?,
            message_count: 0,
        })
    }

    async fn list_sessions(&self) -> Result<Vec<Session>> {
        let response = self
            .client
            .get(self.url("sessions"))
            .headers(self.default_headers()?)
            .send()
            .await
            .map_err(|e| self.request_error(e))?;
        let response = Self::check(response).await?;

        let listing: SessionListing = response.json().await.map_err(|e| {
            Error::serialization(
                format!("Failed to parse session list: {e}"),
                Some(Box::new(e)),
            )
        })?;
        listing
            .sessions
            .into_iter()
            .map(SessionEntry::into_session)
            .collect()
    }

    async fn fetch_messages(&self, session_id: &SessionId) -> Result<Vec<Message>> {
        let response = self
            .client
            .get(self.url(&format!("messages/{session_id}")))
            .headers(self.default_headers()?)
            .send()
            .await
            .map_err(|e| self.request_error(e))?;
        let response = Self::check(response).await?;

        let listing: MessageListing = response.json().await.map_err(|e| {
            Error::serialization(
                format!("Failed to parse message list: {e}"),
                Some(Box::new(e)),
            )
        })?;
        listing
            .messages
            .into_iter()
            .map(|entry| entry.into_message(session_id))
            .collect()
    }

    async fn delete_session(&self, session_id: &SessionId) -> Result<()> {
        let response = self
            .client
            .delete(self.url(&format!("sessions/{session_id}")))
            .headers(self.default_headers()?)
            .send()
            .await
            .map_err(|e| self.request_error(e))?;
        // Idempotent removal: an already-deleted session is fine.
        if response.status().as_u16() == 404 {
            return Ok(());
        }
        Self::check(response).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_entry_maps_backend_roles() {
        let session = SessionId::new("s-1");
        let entry = MessageEntry {
            message_type: "ai".to_string(),
            content: "hello".to_string(),
            created_at: Some("2025-03-01T10:30:00Z".to_string()),
        };
        let message = entry.into_message(&session).unwrap();
        assert_eq!(message.role, Role::Assistant);
        assert_eq!(message.state, DeliveryState::Complete);

        let entry = MessageEntry {
            message_type: "user".to_string(),
            content: "hi".to_string(),
            created_at: None,
        };
        assert_eq!(entry.into_message(&session).unwrap().role, Role::User);
    }

    #[test]
    fn session_entry_defaults_message_count() {
        let entry: SessionEntry = serde_json::from_str(
            r#"{"session_id":"abc","created_at":"2025-03-01T10:30:00Z"}"#,
        )
        .unwrap();
        let session = entry.into_session().unwrap();
        assert_eq!(session.message_count, 0);
        assert_eq!(session.id.as_str(), "abc");
    }

    #[test]
    fn message_listing_accepts_role_alias() {
        let listing: MessageListing = serde_json::from_str(
            r#"{"messages":[{"role":"assistant","content":"x","timestamp":"2025-03-01T10:30:00Z"}]}"#,
        )
        .unwrap();
        assert_eq!(listing.messages.len(), 1);
        assert_eq!(listing.messages[0].message_type, "assistant");
    }
}
