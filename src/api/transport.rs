//! Transport seam between the chat engine and the backend
//!
//! The engine drives turns through this trait rather than a concrete HTTP
//! client, so tests can script a backend from canned byte chunks. The
//! production implementation is [`ApiClient`](crate::api::ApiClient).

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::api::error::ApiError;
use crate::session::convert::RawMessage;
use crate::transcript::types::SessionId;

/// Raw bytes of a framed event stream, chunked however the transport
/// delivers them. Frame boundaries are not aligned to chunk boundaries.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, ApiError>> + Send>>;

/// How a stream is opened: a fresh turn, a resumed suspension, or an
/// attach to a turn already running server-side.
#[derive(Debug, Clone)]
pub enum StreamRequest {
    /// Start a new turn with a user message. `session_id` is `None` for
    /// the first message of a brand new session.
    Send {
        session_id: Option<SessionId>,
        content: String,
        attachments: Vec<String>,
    },
    /// Resume a turn suspended on an approval or question.
    Continue { session_id: SessionId },
    /// Attach to an in-flight turn without sending anything.
    Resubscribe { session_id: SessionId },
}

#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Open a framed event stream for a turn.
    async fn open_stream(&self, request: StreamRequest) -> Result<ByteStream, ApiError>;

    /// Ask the backend to stop the in-flight turn.
    async fn abort(&self, session_id: &SessionId) -> Result<(), ApiError>;

    /// Resolve a pending tool-call approval.
    async fn submit_approval(&self, approval_id: &str, approved: bool) -> Result<(), ApiError>;

    /// Answer a pending question from the agent.
    async fn answer_question(&self, question_id: &str, answers: &[String]) -> Result<(), ApiError>;

    /// Roll the session back to just before the given message.
    async fn rollback(&self, session_id: &SessionId, message_id: &str) -> Result<(), ApiError>;

    /// Page of the session's canonical message log, newest-aware offset.
    async fn fetch_messages(
        &self,
        session_id: &SessionId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<RawMessage>, ApiError>;

    /// Workbook diff records recorded for the session.
    async fn fetch_workbook_events(
        &self,
        session_id: &SessionId,
    ) -> Result<serde_json::Value, ApiError>;
}
