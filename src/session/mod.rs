//! Session loading, caching, and backend reconciliation

pub mod cache;
pub mod convert;
pub mod reconcile;

pub use cache::{CacheError, MemoryTranscriptCache, SessionCache, TranscriptCache};
pub use convert::{convert_raw_messages, RawMessage, RawToolCall};
pub use reconcile::{merge_ephemeral, transcripts_equivalent};
