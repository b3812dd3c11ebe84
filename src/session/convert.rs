//! Backend canonical transcript conversion
//!
//! The backend persists sessions in a flat role-based message format (user /
//! assistant / tool rows, tool results matched to calls by id). This module
//! converts that shape into the block-based transcript: consecutive
//! assistant turns and their tool results collapse into one logical
//! assistant message, tool results decide success vs inferred error, and
//! file-affecting calls are scanned to recover the affected-files tag and
//! any embedded diff records.
//!
//! Historical timestamps are not preserved server-side for diffs; "now" is
//! used as a synthetic timestamp when reconstructing them.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use crate::transcript::effects::{DiffKind, WorkspaceEffects};
use crate::transcript::types::{Block, Message, ToolCallStatus};
use crate::util::file_paths::extract_file_paths;

/// One row of the backend's canonical message format
#[derive(Debug, Clone, Deserialize)]
pub struct RawMessage {
    pub role: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Vec<RawToolCall>,
    /// Set on `tool` rows: the call this result answers
    #[serde(default)]
    pub tool_call_id: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawToolCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

/// Convert the backend's canonical rows into block-based messages,
/// recording recovered diffs into the effects store.
pub fn convert_raw_messages(raw: &[RawMessage], effects: &mut WorkspaceEffects) -> Vec<Message> {
    let mut messages: Vec<Message> = Vec::new();
    let mut open_assistant: Option<OpenAssistant> = None;

    for row in raw {
        match row.role.as_str() {
            "user" => {
                if let Some(open) = open_assistant.take() {
                    messages.push(open.finish());
                }
                messages.push(Message::User {
                    id: Uuid::new_v4().to_string(),
                    content: row.content.clone().unwrap_or_default(),
                    attachments: None,
                    timestamp: row.created_at.unwrap_or_else(Utc::now),
                });
            }
            "assistant" => {
                let open = open_assistant.get_or_insert_with(|| OpenAssistant::new(row.created_at));
                if let Some(content) = row.content.as_deref() {
                    if !content.is_empty() {
                        open.blocks.push(Block::Text {
                            content: content.to_string(),
                        });
                    }
                }
                for call in &row.tool_calls {
                    open.push_tool_call(call, effects);
                }
            }
            "tool" => {
                // A tool result outside an assistant run is backend noise.
                if let Some(open) = open_assistant.as_mut() {
                    open.attach_result(row, effects);
                }
            }
            other => {
                tracing::debug!(role = other, "skipping unknown backend message role");
            }
        }
    }
    if let Some(open) = open_assistant.take() {
        messages.push(open.finish());
    }
    messages
}

/// Assistant message under construction while collapsing a run of
/// assistant + tool rows
struct OpenAssistant {
    blocks: Vec<Block>,
    affected_files: Vec<String>,
    timestamp: DateTime<Utc>,
}

impl OpenAssistant {
    fn new(timestamp: Option<DateTime<Utc>>) -> Self {
        Self {
            blocks: Vec::new(),
            affected_files: Vec::new(),
            timestamp: timestamp.unwrap_or_else(Utc::now),
        }
    }

    fn push_tool_call(&mut self, call: &RawToolCall, effects: &mut WorkspaceEffects) {
        // Until a result row claims otherwise, a persisted call succeeded.
        self.blocks.push(Block::ToolCall {
            tool_call_id: Some(call.id.clone()),
            name: call.name.clone(),
            args: call.arguments.clone(),
            status: ToolCallStatus::Success,
            result: None,
            error: None,
            iteration: None,
        });
        let args_text = call.arguments.to_string();
        self.scan_paths(&args_text, effects);
    }

    fn attach_result(&mut self, row: &RawMessage, effects: &mut WorkspaceEffects) {
        let Some(call_id) = row.tool_call_id.as_deref() else {
            return;
        };
        let content = row.content.clone().unwrap_or_default();
        let failed = result_is_error(&content);

        if let Some(Block::ToolCall {
            status,
            result,
            error,
            ..
        }) = self.blocks.iter_mut().rev().find(|b| {
            matches!(b, Block::ToolCall { tool_call_id: Some(id), .. } if id == call_id)
        }) {
            if failed {
                *status = ToolCallStatus::Error;
                *error = Some(content.clone());
            } else {
                *result = Some(content.clone());
            }
        }

        self.scan_paths(&content, effects);
        self.recover_diff(&content, effects);
    }

    /// Recover affected-file tags via the path heuristic
    fn scan_paths(&mut self, text: &str, effects: &mut WorkspaceEffects) {
        for path in extract_file_paths(text) {
            effects.touch_file(&path);
            if !self.affected_files.contains(&path) {
                self.affected_files.push(path);
            }
        }
    }

    /// A tool result may embed a structured diff; rebuild the diff record
    /// with a synthetic timestamp.
    fn recover_diff(&mut self, content: &str, effects: &mut WorkspaceEffects) {
        let Ok(Value::Object(obj)) = serde_json::from_str::<Value>(content) else {
            return;
        };
        let Some(diff) = obj.get("diff") else {
            return;
        };
        let file_path = obj
            .get("file_path")
            .and_then(|v| v.as_str())
            .map(String::from)
            .or_else(|| self.affected_files.last().cloned());
        if let Some(file_path) = file_path {
            let kind = if diff.is_string() {
                DiffKind::Text
            } else {
                DiffKind::Excel
            };
            effects.record_diff(file_path, kind, diff.clone());
        }
    }

    fn finish(self) -> Message {
        Message::Assistant {
            id: Uuid::new_v4().to_string(),
            blocks: self.blocks,
            affected_files: (!self.affected_files.is_empty()).then_some(self.affected_files),
            timestamp: self.timestamp,
        }
    }
}

/// Error inference over a persisted tool result: a JSON object carrying a
/// top-level error-status field.
fn result_is_error(content: &str) -> bool {
    match serde_json::from_str::<Value>(content) {
        Ok(Value::Object(obj)) => {
            obj.get("status").and_then(|v| v.as_str()) == Some("error")
                || obj.get("error").map(|v| !v.is_null()).unwrap_or(false)
        }
        _ => false,
    }
}
