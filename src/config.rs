//! Configuration for the campanile client.
//!
//! [`ClientConfig`] carries the backend address and the authentication token
//! as explicit values; nothing in the crate reads ambient auth state. The
//! `ChatArgs` struct provides `arrrg` CLI parsing for the bundled binary.

use std::env;
use std::time::Duration;

use arrrg_derive::CommandLine;

use crate::error::{Error, Result};

const DEFAULT_BASE_URL: &str = "http://localhost:8000/";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_WELCOME: &str =
    "Hello! I'm your campus assistant. Ask me about students, departments, or analytics.";

/// Command-line arguments for the campanile-chat tool.
#[derive(CommandLine, Debug, Default, PartialEq, Eq)]
pub struct ChatArgs {
    /// Backend base URL.
    #[arrrg(optional, "Dashboard backend URL (default: http://localhost:8000/)", "URL")]
    pub base_url: Option<String>,

    /// Bearer token for the backend.
    #[arrrg(optional, "Auth token (default: CAMPANILE_TOKEN env var)", "TOKEN")]
    pub token: Option<String>,

    /// Request timeout in seconds.
    #[arrrg(optional, "Request timeout in seconds (default: 60)", "SECONDS")]
    pub timeout: Option<u64>,
}

/// Resolved configuration for a client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the dashboard backend, with a trailing slash.
    pub base_url: String,

    /// Bearer token presented on every request.
    pub auth_token: String,

    /// Per-request timeout. Streams are exempt once open.
    pub timeout: Duration,

    /// Locally seeded greeting for freshly created sessions.
    pub welcome_text: String,
}

impl ClientConfig {
    /// Creates a configuration with the given token and defaults elsewhere.
    pub fn new(auth_token: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            auth_token: auth_token.into(),
            timeout: DEFAULT_TIMEOUT,
            welcome_text: DEFAULT_WELCOME.to_string(),
        }
    }

    /// Creates a configuration from the CAMPANILE_TOKEN and
    /// CAMPANILE_BASE_URL environment variables.
    pub fn from_env() -> Result<Self> {
        let token = env::var("CAMPANILE_TOKEN").map_err(|_| {
            Error::authentication(
                "auth token not provided and CAMPANILE_TOKEN environment variable not set",
            )
        })?;
        let mut config = Self::new(token);
        if let Ok(base_url) = env::var("CAMPANILE_BASE_URL") {
            config = config.with_base_url(base_url);
        }
        Ok(config)
    }

    /// Sets the backend base URL, normalizing the trailing slash.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        self.base_url = base_url;
        self
    }

    /// Sets the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the greeting seeded into new sessions.
    pub fn with_welcome_text(mut self, welcome_text: impl Into<String>) -> Self {
        self.welcome_text = welcome_text.into();
        self
    }

    /// Applies command-line overrides on top of this configuration.
    pub fn apply_args(mut self, args: &ChatArgs) -> Self {
        if let Some(base_url) = &args.base_url {
            self = self.with_base_url(base_url.clone());
        }
        if let Some(token) = &args.token {
            self.auth_token = token.clone();
        }
        if let Some(timeout) = args.timeout {
            self.timeout = Duration::from_secs(timeout);
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ClientConfig::new("tok");
        assert_eq!(config.base_url, "http://localhost:8000/");
        assert_eq!(config.auth_token, "tok");
        assert_eq!(config.timeout, Duration::from_secs(60));
        assert!(!config.welcome_text.is_empty());
    }

    #[test]
    fn base_url_gets_trailing_slash() {
        let config = ClientConfig::new("tok").with_base_url("https://campus.example.edu/api");
        assert_eq!(config.base_url, "https://campus.example.edu/api/");
    }

    #[test]
    fn args_override_config() {
        let args = ChatArgs {
            base_url: Some("http://10.0.0.5:9000".to_string()),
            token: Some("other".to_string()),
            timeout: Some(5),
        };
        let config = ClientConfig::new("tok").apply_args(&args);
        assert_eq!(config.base_url, "http://10.0.0.5:9000/");
        assert_eq!(config.auth_token, "other");
        assert_eq!(config.timeout, Duration::from_secs(5));
    }
}
