//! Chat engine: connection lifecycle, stream task, cancellation, recovery

pub mod chat;
pub mod error;
pub mod observer;

pub use chat::{ChatEngine, DEFAULT_RECOVERY_DELAY};
pub use error::EngineError;
pub use observer::{NoopObserver, TranscriptObserver};
