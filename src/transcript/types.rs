//! Transcript data model
//!
//! A session transcript is an ordered, append-only sequence of messages.
//! User messages are plain text; assistant messages carry an ordered list of
//! typed blocks, each with its own state machine. History is never mutated in
//! place except for the most recent still-open assistant message, which the
//! stream reducer appends into.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Session identifier assigned by the backend
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Session lifecycle status in the directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Archived,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Archived => "archived",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "archived" => SessionStatus::Archived,
            _ => SessionStatus::Active,
        }
    }
}

/// Session directory row (transcript is loaded lazily)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: SessionId,
    pub title: String,
    pub message_count: usize,
    pub in_flight: bool,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One entry in a session transcript
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Message {
    User {
        id: String,
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        attachments: Option<Vec<String>>,
        timestamp: DateTime<Utc>,
    },
    Assistant {
        id: String,
        blocks: Vec<Block>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        affected_files: Option<Vec<String>>,
        timestamp: DateTime<Utc>,
    },
}

impl Message {
    pub fn user(content: impl Into<String>, attachments: Option<Vec<String>>) -> Self {
        Message::User {
            id: Uuid::new_v4().to_string(),
            content: content.into(),
            attachments,
            timestamp: Utc::now(),
        }
    }

    pub fn assistant() -> Self {
        Message::Assistant {
            id: Uuid::new_v4().to_string(),
            blocks: Vec::new(),
            affected_files: None,
            timestamp: Utc::now(),
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Message::User { id, .. } | Message::Assistant { id, .. } => id,
        }
    }

    pub fn is_assistant(&self) -> bool {
        matches!(self, Message::Assistant { .. })
    }

    /// Blocks of an assistant message, empty slice for user messages
    pub fn blocks(&self) -> &[Block] {
        match self {
            Message::Assistant { blocks, .. } => blocks,
            Message::User { .. } => &[],
        }
    }
}

/// Tool call lifecycle status.
///
/// Transitions are monotone: `streaming → running → {success|error}` or
/// `streaming/running → pending → {success|error}`. A terminal status is
/// never left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    Streaming,
    Running,
    Pending,
    Success,
    Error,
}

impl ToolCallStatus {
    /// Position in the status partial order, used to reject regressions
    pub fn rank(&self) -> u8 {
        match self {
            ToolCallStatus::Streaming => 0,
            ToolCallStatus::Running => 1,
            ToolCallStatus::Pending => 2,
            ToolCallStatus::Success | ToolCallStatus::Error => 3,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ToolCallStatus::Success | ToolCallStatus::Error)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubagentStatus {
    Running,
    Done,
}

/// Summary of one tool call executed inside a sub-agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubToolCall {
    pub name: String,
    pub running: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Done,
}

/// One item of a task list block, addressed by index in patches
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskItem {
    pub content: String,
    pub status: TaskStatus,
    pub index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusVariant {
    Info,
    Progress,
    Warning,
    Stopped,
}

impl StatusVariant {
    /// Wire values are free-form strings; anything unrecognized is info
    pub fn parse(s: &str) -> Self {
        match s {
            "progress" => StatusVariant::Progress,
            "warning" => StatusVariant::Warning,
            "stopped" => StatusVariant::Stopped,
            _ => StatusVariant::Info,
        }
    }
}

/// Token usage accounting for one completed turn
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenStats {
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub total_tokens: i64,
    pub iterations: u32,
}

impl TokenStats {
    /// Field-by-field sum, used when a deferred turn merges into the next
    pub fn merged_with(&self, other: &TokenStats) -> TokenStats {
        TokenStats {
            prompt_tokens: self.prompt_tokens + other.prompt_tokens,
            completion_tokens: self.completion_tokens + other.completion_tokens,
            total_tokens: self.total_tokens + other.total_tokens,
            iterations: self.iterations + other.iterations,
        }
    }
}

/// One typed, independently evolving unit of assistant output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Block {
    Text {
        content: String,
    },
    Thinking {
        content: String,
        started_at: DateTime<Utc>,
        /// None while the block is still open
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duration_ms: Option<u64>,
    },
    ToolCall {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool_call_id: Option<String>,
        name: String,
        args: Value,
        status: ToolCallStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        iteration: Option<u32>,
    },
    Subagent {
        name: String,
        reason: String,
        status: SubagentStatus,
        iterations: u32,
        tool_calls: u32,
        tools: Vec<SubToolCall>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        summary: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        conversation_id: Option<String>,
    },
    TaskList {
        items: Vec<TaskItem>,
    },
    Iteration {
        iteration: u32,
    },
    Status {
        label: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
        variant: StatusVariant,
    },
    ApprovalAction {
        approval_id: String,
        tool_name: String,
        success: bool,
        undoable: bool,
        has_changes: bool,
    },
    TokenStats {
        #[serde(flatten)]
        stats: TokenStats,
    },
    MemoryExtracted {
        entries: Vec<String>,
        trigger: String,
        count: u32,
    },
    FileDownload {
        file_path: String,
        filename: String,
        #[serde(default)]
        description: String,
    },
    Error {
        message: String,
    },
}

impl Block {
    /// Block kinds that exist only because they were observed live over the
    /// stream. The backend never persists these; a refresh must re-insert
    /// them from the previously visible transcript.
    pub fn is_ephemeral(&self) -> bool {
        matches!(
            self,
            Block::Thinking { .. }
                | Block::Iteration { .. }
                | Block::ApprovalAction { .. }
                | Block::Subagent { .. }
                | Block::Status { .. }
        )
    }

    /// An open thinking block (no duration stamped yet)
    pub fn is_open_thinking(&self) -> bool {
        matches!(self, Block::Thinking { duration_ms: None, .. })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Block::Text { .. } => "text",
            Block::Thinking { .. } => "thinking",
            Block::ToolCall { .. } => "tool_call",
            Block::Subagent { .. } => "subagent",
            Block::TaskList { .. } => "task_list",
            Block::Iteration { .. } => "iteration",
            Block::Status { .. } => "status",
            Block::ApprovalAction { .. } => "approval_action",
            Block::TokenStats { .. } => "token_stats",
            Block::MemoryExtracted { .. } => "memory_extracted",
            Block::FileDownload { .. } => "file_download",
            Block::Error { .. } => "error",
        }
    }
}

/// Suspension state: a tool call waiting on a human approve/reject decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingApproval {
    pub approval_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    pub tool_name: String,
    #[serde(default)]
    pub args: Value,
    #[serde(default)]
    pub undoable: bool,
}

/// Suspension state: the agent asked the user a question mid-turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingQuestion {
    pub question_id: String,
    pub question: String,
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default)]
    pub multi_select: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_call_status_ranks_are_monotone() {
        assert!(ToolCallStatus::Streaming.rank() < ToolCallStatus::Running.rank());
        assert!(ToolCallStatus::Running.rank() < ToolCallStatus::Pending.rank());
        assert!(ToolCallStatus::Pending.rank() < ToolCallStatus::Success.rank());
        assert_eq!(ToolCallStatus::Success.rank(), ToolCallStatus::Error.rank());
        assert!(ToolCallStatus::Success.is_terminal());
        assert!(!ToolCallStatus::Pending.is_terminal());
    }

    #[test]
    fn block_serde_round_trip_uses_type_tag() {
        let block = Block::ToolCall {
            tool_call_id: Some("t1".to_string()),
            name: "write_cells".to_string(),
            args: serde_json::json!({"range": "A1:B2"}),
            status: ToolCallStatus::Running,
            result: None,
            error: None,
            iteration: Some(2),
        };
        let json = serde_json::to_value(&block).unwrap();
        assert_eq!(json["type"], "tool_call");
        assert_eq!(json["status"], "running");
        let back: Block = serde_json::from_value(json).unwrap();
        assert_eq!(back, block);
    }

    #[test]
    fn ephemeral_kinds() {
        assert!(Block::Iteration { iteration: 1 }.is_ephemeral());
        assert!(!Block::Text {
            content: "x".to_string()
        }
        .is_ephemeral());
        assert!(!Block::TokenStats {
            stats: TokenStats::default()
        }
        .is_ephemeral());
    }

    #[test]
    fn merged_token_stats_sum_field_by_field() {
        let a = TokenStats {
            prompt_tokens: 10,
            completion_tokens: 40,
            total_tokens: 50,
            iterations: 2,
        };
        let b = TokenStats {
            prompt_tokens: 5,
            completion_tokens: 25,
            total_tokens: 30,
            iterations: 1,
        };
        let m = a.merged_with(&b);
        assert_eq!(m.total_tokens, 80);
        assert_eq!(m.iterations, 3);
    }
}
