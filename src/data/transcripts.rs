//! Durable transcript cache DAO
//!
//! One row per session: the full transcript serialized as JSON, replaced
//! wholesale on every persist. No incremental patching on disk.

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, Result as SqliteResult};
use std::sync::{Arc, Mutex};

use crate::session::cache::{CacheError, TranscriptCache};
use crate::transcript::types::{Message, SessionId};

/// Data access object for persisted transcripts
#[derive(Clone)]
pub struct TranscriptStore {
    conn: Arc<Mutex<Connection>>,
}

impl TranscriptStore {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    pub fn get(&self, session_id: &SessionId) -> SqliteResult<Option<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT payload FROM transcripts WHERE session_id = ?1")?;
        let mut rows = stmt.query(params![session_id.as_str()])?;

        if let Some(row) = rows.next()? {
            Ok(Some(row.get(0)?))
        } else {
            Ok(None)
        }
    }

    pub fn set(&self, session_id: &SessionId, payload: &str) -> SqliteResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO transcripts (session_id, payload, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(session_id) DO UPDATE SET payload = ?2, updated_at = ?3",
            params![session_id.as_str(), payload, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn delete(&self, session_id: &SessionId) -> SqliteResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM transcripts WHERE session_id = ?1",
            params![session_id.as_str()],
        )?;
        Ok(())
    }
}

#[async_trait]
impl TranscriptCache for TranscriptStore {
    async fn get(&self, session_id: &SessionId) -> Result<Option<Vec<Message>>, CacheError> {
        let payload = TranscriptStore::get(self, session_id)
            .map_err(|e| CacheError::Storage(e.to_string()))?;
        match payload {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn set(&self, session_id: &SessionId, transcript: &[Message]) -> Result<(), CacheError> {
        let payload = serde_json::to_string(transcript)?;
        TranscriptStore::set(self, session_id, &payload)
            .map_err(|e| CacheError::Storage(e.to_string()))
    }

    async fn delete(&self, session_id: &SessionId) -> Result<(), CacheError> {
        TranscriptStore::delete(self, session_id).map_err(|e| CacheError::Storage(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Database;
    use crate::transcript::types::Block;
    use tempfile::tempdir;

    fn setup_db() -> (tempfile::TempDir, Database, TranscriptStore) {
        let dir = tempdir().unwrap();
        let db = Database::open(dir.path().join("test.db")).unwrap();
        let dao = TranscriptStore::new(db.connection());
        (dir, db, dao)
    }

    #[tokio::test]
    async fn test_round_trip_transcript() {
        let (_dir, _db, dao) = setup_db();
        let id = SessionId::from("s1");

        let mut assistant = Message::assistant();
        if let Message::Assistant { blocks, .. } = &mut assistant {
            blocks.push(Block::Text {
                content: "Hello world".to_string(),
            });
        }
        let transcript = vec![Message::user("hi", None), assistant];

        TranscriptCache::set(&dao, &id, &transcript).await.unwrap();
        let loaded = TranscriptCache::get(&dao, &id).await.unwrap().unwrap();
        assert_eq!(loaded, transcript);
    }

    #[tokio::test]
    async fn test_full_array_replacement() {
        let (_dir, _db, dao) = setup_db();
        let id = SessionId::from("s1");

        TranscriptCache::set(&dao, &id, &[Message::user("one", None)])
            .await
            .unwrap();
        TranscriptCache::set(&dao, &id, &[Message::user("two", None)])
            .await
            .unwrap();

        let loaded = TranscriptCache::get(&dao, &id).await.unwrap().unwrap();
        assert_eq!(loaded.len(), 1);
        assert!(matches!(&loaded[0], Message::User { content, .. } if content == "two"));
    }

    #[tokio::test]
    async fn test_get_missing_and_delete() {
        let (_dir, _db, dao) = setup_db();
        let id = SessionId::from("nope");

        assert!(TranscriptCache::get(&dao, &id).await.unwrap().is_none());

        TranscriptCache::set(&dao, &id, &[]).await.unwrap();
        TranscriptCache::delete(&dao, &id).await.unwrap();
        assert!(TranscriptCache::get(&dao, &id).await.unwrap().is_none());
    }
}
