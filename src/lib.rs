pub mod api;
pub mod config;
pub mod data;
pub mod engine;
pub mod session;
pub mod stream;
pub mod transcript;
pub mod util;

pub use api::{ApiClient, ApiError, ByteStream, ChatTransport, StreamRequest};
pub use config::Settings;
pub use data::{Database, SessionStore, TranscriptStore};
pub use engine::{ChatEngine, EngineError, TranscriptObserver};
pub use session::{MemoryTranscriptCache, SessionCache, TranscriptCache};
pub use transcript::types::{Block, Message, SessionId, SessionInfo, ToolCallStatus};
