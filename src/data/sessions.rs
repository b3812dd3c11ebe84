//! Session directory DAO

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Result as SqliteResult};
use std::sync::{Arc, Mutex};

use crate::transcript::types::{SessionId, SessionInfo, SessionStatus};

/// Data access object for the session directory
#[derive(Clone)]
pub struct SessionStore {
    conn: Arc<Mutex<Connection>>,
}

impl SessionStore {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// Insert a new session row
    pub fn create(&self, info: &SessionInfo) -> SqliteResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO sessions (id, title, message_count, in_flight, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                info.id.as_str(),
                info.title,
                info.message_count as i64,
                info.in_flight as i32,
                info.status.as_str(),
                info.created_at.to_rfc3339(),
                info.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn get(&self, id: &SessionId) -> SqliteResult<Option<SessionInfo>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, title, message_count, in_flight, status, created_at, updated_at
             FROM sessions WHERE id = ?1",
        )?;
        let mut rows = stmt.query(params![id.as_str()])?;
        if let Some(row) = rows.next()? {
            Ok(Some(Self::row_to_info(row)?))
        } else {
            Ok(None)
        }
    }

    /// All sessions, most recently updated first
    pub fn get_all(&self) -> SqliteResult<Vec<SessionInfo>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, title, message_count, in_flight, status, created_at, updated_at
             FROM sessions ORDER BY updated_at DESC",
        )?;
        let sessions = stmt
            .query_map([], Self::row_to_info)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(sessions)
    }

    /// Refresh message count and in-flight flag after a persist
    pub fn touch(&self, id: &SessionId, message_count: usize, in_flight: bool) -> SqliteResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE sessions SET message_count = ?2, in_flight = ?3, updated_at = ?4
             WHERE id = ?1",
            params![
                id.as_str(),
                message_count as i64,
                in_flight as i32,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn set_status(&self, id: &SessionId, status: SessionStatus) -> SqliteResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE sessions SET status = ?2, updated_at = ?3 WHERE id = ?1",
            params![id.as_str(), status.as_str(), Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn delete(&self, id: &SessionId) -> SqliteResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM sessions WHERE id = ?1", params![id.as_str()])?;
        Ok(())
    }

    fn row_to_info(row: &rusqlite::Row) -> SqliteResult<SessionInfo> {
        let id: String = row.get(0)?;
        let message_count: i64 = row.get(2)?;
        let in_flight: i32 = row.get(3)?;
        let status: String = row.get(4)?;
        let created_at: String = row.get(5)?;
        let updated_at: String = row.get(6)?;

        Ok(SessionInfo {
            id: SessionId(id),
            title: row.get(1)?,
            message_count: message_count.max(0) as usize,
            in_flight: in_flight != 0,
            status: SessionStatus::parse(&status),
            created_at: DateTime::parse_from_rfc3339(&created_at)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
            updated_at: DateTime::parse_from_rfc3339(&updated_at)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
        })
    }
}
