//! Typed progress events consumed from the agent event stream
//!
//! The wire carries `(event name, JSON payload)` pairs. [`StreamEvent::decode`]
//! maps the finite set of known names onto a closed union so the reducer's
//! match is compiler-checked; unknown names decode to `None` and are ignored.

use serde::Deserialize;
use serde_json::Value;

/// Closed union over every event name the backend emits
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    SessionInit(SessionInitEvent),
    PipelineProgress(PipelineProgressEvent),
    RouteStart,
    RouteEnd(RouteEndEvent),
    IterationStart(IterationStartEvent),
    ThinkingDelta(DeltaEvent),
    Thinking(ThinkingEvent),
    RetractThinking,
    TextDelta(DeltaEvent),
    ToolCallArgsDelta(ToolCallArgsDeltaEvent),
    ToolCallStart(ToolCallStartEvent),
    ToolCallEnd(ToolCallEndEvent),
    SubagentStart(SubagentStartEvent),
    SubagentIteration(SubagentIterationEvent),
    SubagentToolStart(SubagentToolEvent),
    SubagentToolEnd(SubagentToolEvent),
    SubagentSummary(SubagentSummaryEvent),
    SubagentEnd(SubagentEndEvent),
    UserQuestion(UserQuestionEvent),
    PendingApproval(PendingApprovalEvent),
    ApprovalResolved(ApprovalResolvedEvent),
    TaskUpdate(TaskUpdateEvent),
    ExcelPreview(ExcelPreviewEvent),
    ExcelDiff(ExcelDiffEvent),
    TextDiff(TextDiffEvent),
    FilesChanged(FilesChangedEvent),
    MemoryExtracted(MemoryExtractedEvent),
    FileDownload(FileDownloadEvent),
    ModeChanged(ModeChangedEvent),
    Reply(ReplyEvent),
    Done,
    Error(ErrorEvent),
}

impl StreamEvent {
    /// Decode a named frame payload. Returns `None` for unknown event names
    /// and for payloads that fail to deserialize (logged, never fatal).
    pub fn decode(name: &str, payload: Value) -> Option<StreamEvent> {
        fn parse<T: for<'de> Deserialize<'de>>(name: &str, payload: Value) -> Option<T> {
            match serde_json::from_value(payload) {
                Ok(v) => Some(v),
                Err(e) => {
                    tracing::warn!(event = name, error = %e, "dropping undecodable event payload");
                    None
                }
            }
        }

        let event = match name {
            "session_init" => StreamEvent::SessionInit(parse(name, payload)?),
            "pipeline_progress" => StreamEvent::PipelineProgress(parse(name, payload)?),
            "route_start" => StreamEvent::RouteStart,
            "route_end" => StreamEvent::RouteEnd(parse(name, payload)?),
            "iteration_start" => StreamEvent::IterationStart(parse(name, payload)?),
            "thinking_delta" => StreamEvent::ThinkingDelta(parse(name, payload)?),
            "thinking" => StreamEvent::Thinking(parse(name, payload)?),
            "retract_thinking" => StreamEvent::RetractThinking,
            "text_delta" => StreamEvent::TextDelta(parse(name, payload)?),
            "tool_call_args_delta" => StreamEvent::ToolCallArgsDelta(parse(name, payload)?),
            "tool_call_start" => StreamEvent::ToolCallStart(parse(name, payload)?),
            "tool_call_end" => StreamEvent::ToolCallEnd(parse(name, payload)?),
            "subagent_start" => StreamEvent::SubagentStart(parse(name, payload)?),
            "subagent_iteration" => StreamEvent::SubagentIteration(parse(name, payload)?),
            "subagent_tool_start" => StreamEvent::SubagentToolStart(parse(name, payload)?),
            "subagent_tool_end" => StreamEvent::SubagentToolEnd(parse(name, payload)?),
            "subagent_summary" => StreamEvent::SubagentSummary(parse(name, payload)?),
            "subagent_end" => StreamEvent::SubagentEnd(parse(name, payload)?),
            "user_question" => StreamEvent::UserQuestion(parse(name, payload)?),
            "pending_approval" => StreamEvent::PendingApproval(parse(name, payload)?),
            "approval_resolved" => StreamEvent::ApprovalResolved(parse(name, payload)?),
            "task_update" => StreamEvent::TaskUpdate(parse(name, payload)?),
            "excel_preview" => StreamEvent::ExcelPreview(parse(name, payload)?),
            "excel_diff" => StreamEvent::ExcelDiff(parse(name, payload)?),
            "text_diff" => StreamEvent::TextDiff(parse(name, payload)?),
            "files_changed" => StreamEvent::FilesChanged(parse(name, payload)?),
            "memory_extracted" => StreamEvent::MemoryExtracted(parse(name, payload)?),
            "file_download" => StreamEvent::FileDownload(parse(name, payload)?),
            "mode_changed" => StreamEvent::ModeChanged(parse(name, payload)?),
            "reply" => StreamEvent::Reply(parse(name, payload)?),
            "done" => StreamEvent::Done,
            "error" => StreamEvent::Error(parse(name, payload)?),
            _ => return None,
        };
        Some(event)
    }

    /// Delta events batch through the [`DeltaBatcher`](crate::stream::DeltaBatcher);
    /// everything else forces a flush first so block ordering is preserved.
    /// Tool argument deltas mutate their block directly and are not batched.
    pub fn is_delta(&self) -> bool {
        matches!(self, StreamEvent::TextDelta(_) | StreamEvent::ThinkingDelta(_))
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SessionInitEvent {
    #[serde(alias = "session_id")]
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PipelineProgressEvent {
    pub stage: String,
    #[serde(default)]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RouteEndEvent {
    pub route: String,
    #[serde(default)]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct IterationStartEvent {
    pub iteration: u32,
}

/// Incremental text fragment (text or thinking)
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DeltaEvent {
    #[serde(alias = "content", alias = "text")]
    pub delta: String,
}

/// A complete, pre-finalized thinking block
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ThinkingEvent {
    pub content: String,
    #[serde(default)]
    pub duration_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ToolCallArgsDeltaEvent {
    pub tool_call_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(alias = "args_delta")]
    pub delta: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ToolCallStartEvent {
    #[serde(default)]
    pub tool_call_id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub args: Value,
    #[serde(default)]
    pub iteration: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ToolCallEndEvent {
    #[serde(default)]
    pub tool_call_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SubagentStartEvent {
    pub name: String,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SubagentIterationEvent {
    pub name: String,
    pub iteration: u32,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SubagentToolEvent {
    pub name: String,
    pub tool: String,
    #[serde(default)]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SubagentSummaryEvent {
    pub name: String,
    pub summary: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SubagentEndEvent {
    pub name: String,
    #[serde(default)]
    pub summary: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UserQuestionEvent {
    pub question_id: String,
    pub question: String,
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default)]
    pub multi_select: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PendingApprovalEvent {
    pub approval_id: String,
    #[serde(default)]
    pub tool_call_id: Option<String>,
    pub tool_name: String,
    #[serde(default)]
    pub args: Value,
    #[serde(default)]
    pub undoable: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ApprovalResolvedEvent {
    pub approval_id: String,
    #[serde(default)]
    pub tool_call_id: Option<String>,
    pub success: bool,
    #[serde(default)]
    pub undoable: bool,
    #[serde(default)]
    pub has_changes: bool,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TaskUpdateEvent {
    pub index: usize,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub verification: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ExcelPreviewEvent {
    pub file_path: String,
    pub preview: Value,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ExcelDiffEvent {
    pub file_path: String,
    pub diff: Value,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TextDiffEvent {
    pub file_path: String,
    pub diff: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FilesChangedEvent {
    pub files: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MemoryExtractedEvent {
    #[serde(default)]
    pub entries: Vec<String>,
    #[serde(default)]
    pub trigger: String,
    #[serde(default)]
    pub count: u32,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FileDownloadEvent {
    pub file_path: String,
    pub filename: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ModeChangedEvent {
    pub mode: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ReplyEvent {
    #[serde(default)]
    pub prompt_tokens: i64,
    #[serde(default)]
    pub completion_tokens: i64,
    #[serde(default)]
    pub total_tokens: i64,
    #[serde(default)]
    pub iterations: u32,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ErrorEvent {
    pub message: String,
    #[serde(default)]
    pub code: Option<String>,
}
