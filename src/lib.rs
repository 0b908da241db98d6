// Public modules
pub mod config;
pub mod consumer;
pub mod directory;
pub mod error;
pub mod frame;
pub mod log;
pub mod observability;
pub mod orchestrator;
pub mod transport;
pub mod types;
pub mod utils;

// Re-exports
pub use config::{ChatArgs, ClientConfig};
pub use consumer::{ConsumerState, StreamConsumer};
pub use directory::SessionDirectory;
pub use error::{Error, Result};
pub use frame::{Frame, ParseOutput, parse_chunk};
pub use log::MessageLog;
pub use orchestrator::ChatOrchestrator;
pub use transport::{ByteStream, HttpTransport, SessionStore, StreamTransport};
pub use types::*;
