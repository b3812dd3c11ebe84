//! Two-tier session transcript cache
//!
//! Fast in-memory tier in front of a durable keyed cache. The durable tier
//! is a contract, not a technology: anything that can get/set/delete a full
//! transcript array by session id qualifies. The sqlite-backed
//! [`TranscriptStore`](crate::data::TranscriptStore) is the production
//! implementation; tests use the in-memory one.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;

use crate::transcript::types::{Message, SessionId};

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("durable cache failure: {0}")]
    Storage(String),
    #[error("serialization failure: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Contract the durable persistence collaborator must satisfy: full-array
/// get/set/delete keyed by session id. Writes replace the whole transcript;
/// there is no incremental patching.
#[async_trait]
pub trait TranscriptCache: Send + Sync {
    async fn get(&self, session_id: &SessionId) -> Result<Option<Vec<Message>>, CacheError>;
    async fn set(&self, session_id: &SessionId, transcript: &[Message]) -> Result<(), CacheError>;
    async fn delete(&self, session_id: &SessionId) -> Result<(), CacheError>;
}

/// In-memory implementation of the durable contract, for tests and for
/// running without local persistence.
#[derive(Default)]
pub struct MemoryTranscriptCache {
    map: Mutex<HashMap<SessionId, Vec<Message>>>,
}

#[async_trait]
impl TranscriptCache for MemoryTranscriptCache {
    async fn get(&self, session_id: &SessionId) -> Result<Option<Vec<Message>>, CacheError> {
        Ok(self.map.lock().get(session_id).cloned())
    }

    async fn set(&self, session_id: &SessionId, transcript: &[Message]) -> Result<(), CacheError> {
        self.map
            .lock()
            .insert(session_id.clone(), transcript.to_vec());
        Ok(())
    }

    async fn delete(&self, session_id: &SessionId) -> Result<(), CacheError> {
        self.map.lock().remove(session_id);
        Ok(())
    }
}

/// Memory tier + durable tier, keyed by session id.
pub struct SessionCache {
    memory: Mutex<HashMap<SessionId, Vec<Message>>>,
    durable: Arc<dyn TranscriptCache>,
}

impl SessionCache {
    pub fn new(durable: Arc<dyn TranscriptCache>) -> Self {
        Self {
            memory: Mutex::new(HashMap::new()),
            durable,
        }
    }

    /// Memory-tier hit, no IO
    pub fn get_memory(&self, session_id: &SessionId) -> Option<Vec<Message>> {
        self.memory.lock().get(session_id).cloned()
    }

    pub fn put_memory(&self, session_id: &SessionId, transcript: Vec<Message>) {
        self.memory.lock().insert(session_id.clone(), transcript);
    }

    /// Durable-tier read; populates the memory tier on hit.
    pub async fn get_durable(&self, session_id: &SessionId) -> Option<Vec<Message>> {
        match self.durable.get(session_id).await {
            Ok(Some(transcript)) => {
                self.put_memory(session_id, transcript.clone());
                Some(transcript)
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(session = %session_id, error = %e, "durable cache read failed");
                None
            }
        }
    }

    /// Write-through persist to both tiers. Durable failures are logged,
    /// not propagated: the in-memory view stays authoritative.
    pub async fn persist(&self, session_id: &SessionId, transcript: &[Message]) {
        self.put_memory(session_id, transcript.to_vec());
        if let Err(e) = self.durable.set(session_id, transcript).await {
            tracing::warn!(session = %session_id, error = %e, "durable cache write failed");
        }
    }

    pub async fn evict(&self, session_id: &SessionId) {
        self.memory.lock().remove(session_id);
        if let Err(e) = self.durable.delete(session_id).await {
            tracing::warn!(session = %session_id, error = %e, "durable cache delete failed");
        }
    }
}
