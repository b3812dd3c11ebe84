//! Scripted backend transport
//!
//! Each `open_stream` call pops the next script: a list of byte chunks
//! delivered as-is, so tests control exactly where frame boundaries fall.
//! Outbound collaborator calls are recorded for assertions.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;

use gridchat::api::{ApiError, ByteStream, ChatTransport, StreamRequest};
use gridchat::session::convert::RawMessage;
use gridchat::transcript::types::SessionId;
use gridchat::ChatEngine;

/// One scripted stream element
pub enum Chunk {
    Data(Vec<u8>),
    /// Simulated mid-stream transport failure
    Fail,
    /// A stream that never completes (for cancellation tests)
    Hang,
}

#[derive(Default)]
pub struct ScriptedTransport {
    scripts: Mutex<VecDeque<Vec<Chunk>>>,
    canned_messages: Mutex<HashMap<String, Vec<RawMessage>>>,
    canned_workbook: Mutex<HashMap<String, Value>>,
    fail_opens: Mutex<usize>,
    pub opened: Mutex<Vec<String>>,
    pub fetches: Mutex<Vec<String>>,
    pub aborts: Mutex<Vec<String>>,
    pub approvals: Mutex<Vec<(String, bool)>>,
    pub answers: Mutex<Vec<(String, Vec<String>)>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the next stream's chunks.
    pub fn push_script(&self, chunks: Vec<Chunk>) {
        self.scripts.lock().unwrap().push_back(chunks);
    }

    /// Set the canonical message log returned for a session.
    pub fn set_messages(&self, session: &str, raw: Vec<RawMessage>) {
        self.canned_messages
            .lock()
            .unwrap()
            .insert(session.to_string(), raw);
    }

    pub fn set_workbook_events(&self, session: &str, events: Value) {
        self.canned_workbook
            .lock()
            .unwrap()
            .insert(session.to_string(), events);
    }

    /// Make the next `open_stream` call fail outright.
    pub fn fail_next_open(&self) {
        *self.fail_opens.lock().unwrap() += 1;
    }
}

#[async_trait]
impl ChatTransport for ScriptedTransport {
    async fn open_stream(&self, request: StreamRequest) -> Result<ByteStream, ApiError> {
        let kind = match &request {
            StreamRequest::Send { .. } => "send",
            StreamRequest::Continue { .. } => "continue",
            StreamRequest::Resubscribe { .. } => "resubscribe",
        };
        self.opened.lock().unwrap().push(kind.to_string());

        {
            let mut fail = self.fail_opens.lock().unwrap();
            if *fail > 0 {
                *fail -= 1;
                return Err(ApiError::Attachment(std::io::Error::other(
                    "scripted open failure",
                )));
            }
        }

        let chunks = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_default();
        let stream = futures::stream::iter(chunks).flat_map(|chunk| match chunk {
            Chunk::Data(bytes) => futures::stream::iter(vec![Ok(bytes)]).boxed(),
            Chunk::Fail => futures::stream::iter(vec![Err(ApiError::Attachment(
                std::io::Error::other("scripted failure"),
            ))])
            .boxed(),
            Chunk::Hang => futures::stream::pending().boxed(),
        });
        Ok(Box::pin(stream))
    }

    async fn abort(&self, session_id: &SessionId) -> Result<(), ApiError> {
        self.aborts
            .lock()
            .unwrap()
            .push(session_id.as_str().to_string());
        Ok(())
    }

    async fn submit_approval(&self, approval_id: &str, approved: bool) -> Result<(), ApiError> {
        self.approvals
            .lock()
            .unwrap()
            .push((approval_id.to_string(), approved));
        Ok(())
    }

    async fn answer_question(&self, question_id: &str, answers: &[String]) -> Result<(), ApiError> {
        self.answers
            .lock()
            .unwrap()
            .push((question_id.to_string(), answers.to_vec()));
        Ok(())
    }

    async fn rollback(&self, _session_id: &SessionId, _message_id: &str) -> Result<(), ApiError> {
        Ok(())
    }

    async fn fetch_messages(
        &self,
        session_id: &SessionId,
        _limit: usize,
        _offset: usize,
    ) -> Result<Vec<RawMessage>, ApiError> {
        self.fetches
            .lock()
            .unwrap()
            .push(session_id.as_str().to_string());
        Ok(self
            .canned_messages
            .lock()
            .unwrap()
            .get(session_id.as_str())
            .cloned()
            .unwrap_or_default())
    }

    async fn fetch_workbook_events(&self, session_id: &SessionId) -> Result<Value, ApiError> {
        Ok(self
            .canned_workbook
            .lock()
            .unwrap()
            .get(session_id.as_str())
            .cloned()
            .unwrap_or(Value::Null))
    }
}

/// Encode one wire frame.
pub fn frame(event: &str, payload: &Value) -> String {
    format!("event: {event}\ndata: {payload}\n\n")
}

/// Join frames into a single data chunk.
pub fn script(frames: &[String]) -> Vec<Chunk> {
    vec![Chunk::Data(frames.concat().into_bytes())]
}

/// Join frames and split the bytes into fixed-size chunks, so frame and
/// UTF-8 boundaries land mid-chunk.
pub fn script_chunked(frames: &[String], size: usize) -> Vec<Chunk> {
    frames
        .concat()
        .into_bytes()
        .chunks(size)
        .map(|c| Chunk::Data(c.to_vec()))
        .collect()
}

pub fn raw_user(content: &str) -> RawMessage {
    RawMessage {
        role: "user".to_string(),
        content: Some(content.to_string()),
        tool_calls: Vec::new(),
        tool_call_id: None,
        created_at: None,
    }
}

pub fn raw_assistant(content: &str) -> RawMessage {
    RawMessage {
        role: "assistant".to_string(),
        content: Some(content.to_string()),
        tool_calls: Vec::new(),
        tool_call_id: None,
        created_at: None,
    }
}

/// Poll until no turn is streaming.
pub async fn wait_idle(engine: &ChatEngine) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if !engine.is_streaming() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("engine did not go idle in time");
}
