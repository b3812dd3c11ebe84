//! Event-to-transcript reducer
//!
//! Applies decoded stream events, in arrival order, to a session's
//! in-memory state. All block state transitions live here: thinking blocks
//! open and close, tool calls move monotonically through their status
//! lattice, sub-agent blocks accumulate nested tool activity, and
//! interactive pauses suspend token-stat accounting.
//!
//! Delta events batch through the [`DeltaBatcher`]; every non-delta event
//! flushes pending deltas first so interleaved block kinds never appear out
//! of order relative to the text around them.

use chrono::Utc;
use serde_json::Value;

use crate::stream::batcher::{BatchedDeltas, DeltaBatcher};
use crate::stream::events::*;
use crate::transcript::effects::{valid_workspace_path, DiffKind, WorkspaceEffects};
use crate::transcript::types::{
    Block, Message, PendingApproval, PendingQuestion, SessionId, StatusVariant, SubToolCall,
    SubagentStatus, TaskItem, TaskStatus, TokenStats, ToolCallStatus,
};

/// In-memory state of one session while its stream is (or was) live
#[derive(Debug, Clone)]
pub struct SessionState {
    pub id: SessionId,
    pub messages: Vec<Message>,
    pub streaming: bool,
    pub pending_approval: Option<PendingApproval>,
    pub pending_question: Option<PendingQuestion>,
    /// Single-slot accumulator for token stats deferred by an interactive
    /// pause; merged into the next completion's stats.
    pub deferred_stats: Option<TokenStats>,
    /// Transient "current activity" line, not part of the transcript
    pub activity: Option<String>,
    /// Set when an `error` event was observed on the current stream
    pub error_seen: bool,
}

impl SessionState {
    pub fn new(id: SessionId) -> Self {
        Self {
            id,
            messages: Vec::new(),
            streaming: false,
            pending_approval: None,
            pending_question: None,
            deferred_stats: None,
            activity: None,
            error_seen: false,
        }
    }

    /// True while a pause is waiting on a human decision
    pub fn paused(&self) -> bool {
        self.pending_approval.is_some() || self.pending_question.is_some()
    }

    /// Blocks of the trailing assistant message, creating one if the
    /// transcript does not end with an assistant message.
    fn open_blocks(&mut self) -> &mut Vec<Block> {
        if !matches!(self.messages.last(), Some(Message::Assistant { .. })) {
            self.messages.push(Message::assistant());
        }
        match self.messages.last_mut() {
            Some(Message::Assistant { blocks, .. }) => blocks,
            _ => unreachable!("trailing assistant message was just ensured"),
        }
    }

    fn has_open_thinking(&self) -> bool {
        match self.messages.last() {
            Some(Message::Assistant { blocks, .. }) => {
                blocks.iter().any(|b| b.is_open_thinking())
            }
            _ => false,
        }
    }

    /// Append an inline error block outside of event dispatch, for
    /// transport-level failures the stream never got to report.
    pub fn record_error(&mut self, message: impl Into<String>) {
        self.error_seen = true;
        self.open_blocks().push(Block::Error {
            message: message.into(),
        });
    }

    /// Tag the trailing assistant message with an affected file path,
    /// deduplicated and shape-validated.
    fn tag_affected_file(&mut self, path: &str) {
        if !valid_workspace_path(path) {
            return;
        }
        if !matches!(self.messages.last(), Some(Message::Assistant { .. })) {
            self.messages.push(Message::assistant());
        }
        if let Some(Message::Assistant { affected_files, .. }) = self.messages.last_mut() {
            let files = affected_files.get_or_insert_with(Vec::new);
            if !files.iter().any(|f| f == path) {
                files.push(path.to_string());
            }
        }
    }
}

/// Apply one decoded event to the session state and collaborator stores.
pub fn apply_event(
    state: &mut SessionState,
    batcher: &mut DeltaBatcher,
    effects: &mut WorkspaceEffects,
    event: StreamEvent,
) {
    if !event.is_delta() {
        flush_deltas(state, batcher);
        // Any non-thinking event closes an open thinking block. Retraction
        // removes it instead of closing it.
        if !matches!(event, StreamEvent::RetractThinking) {
            close_open_thinking(state);
        }
    }

    match event {
        StreamEvent::SessionInit(e) => {
            // Confirm or assign the id without discarding in-progress
            // messages (the sender already appended optimistically).
            state.id = SessionId(e.id);
        }

        StreamEvent::PipelineProgress(e) => {
            state.activity = Some(match e.detail {
                Some(detail) => format!("{}: {}", e.stage, detail),
                None => e.stage,
            });
        }
        StreamEvent::RouteStart => {}
        StreamEvent::RouteEnd(e) => {
            state.activity = None;
            state.open_blocks().push(Block::Status {
                label: e.route,
                detail: e.detail,
                variant: StatusVariant::Info,
            });
        }
        StreamEvent::IterationStart(e) => {
            state.activity = Some(format!("Iteration {}", e.iteration));
            state.open_blocks().push(Block::Iteration {
                iteration: e.iteration,
            });
        }

        StreamEvent::ThinkingDelta(e) => {
            if !state.has_open_thinking() {
                // Preserve ordering: pending text must land before the new
                // thinking block opens.
                flush_deltas(state, batcher);
                state.open_blocks().push(Block::Thinking {
                    content: String::new(),
                    started_at: Utc::now(),
                    duration_ms: None,
                });
            }
            batcher.push_thinking(&e.delta);
        }
        StreamEvent::Thinking(e) => {
            state.open_blocks().push(Block::Thinking {
                content: e.content,
                started_at: Utc::now(),
                duration_ms: Some(e.duration_ms.unwrap_or(0)),
            });
        }
        StreamEvent::RetractThinking => {
            retract_thinking(state);
        }

        StreamEvent::TextDelta(e) => {
            if state.has_open_thinking() {
                flush_deltas(state, batcher);
                close_open_thinking(state);
            }
            let blocks = state.open_blocks();
            if !matches!(blocks.last(), Some(Block::Text { .. })) {
                blocks.push(Block::Text {
                    content: String::new(),
                });
            }
            batcher.push_text(&e.delta);
        }

        StreamEvent::ToolCallArgsDelta(e) => {
            let blocks = state.open_blocks();
            match find_tool_call(blocks, Some(&e.tool_call_id), None) {
                Some(idx) => {
                    if let Block::ToolCall { args, .. } = &mut blocks[idx] {
                        if let Value::String(s) = args {
                            s.push_str(&e.delta);
                        }
                    }
                }
                None => {
                    // Pre-create a streaming block before the call is
                    // confirmed by tool_call_start.
                    blocks.push(Block::ToolCall {
                        tool_call_id: Some(e.tool_call_id),
                        name: e.name.unwrap_or_default(),
                        args: Value::String(e.delta),
                        status: ToolCallStatus::Streaming,
                        result: None,
                        error: None,
                        iteration: None,
                    });
                }
            }
        }
        StreamEvent::ToolCallStart(e) => {
            let blocks = state.open_blocks();
            match find_tool_call(blocks, e.tool_call_id.as_deref(), None) {
                Some(idx) => {
                    if let Block::ToolCall {
                        name,
                        args,
                        status,
                        iteration,
                        ..
                    } = &mut blocks[idx]
                    {
                        *name = e.name;
                        if !e.args.is_null() {
                            *args = e.args;
                        } else if let Value::String(streamed) = &*args {
                            // Streamed argument text may already be complete JSON.
                            if let Ok(parsed) = serde_json::from_str::<Value>(streamed) {
                                *args = parsed;
                            }
                        }
                        if ToolCallStatus::Running.rank() > status.rank() {
                            *status = ToolCallStatus::Running;
                        }
                        if e.iteration.is_some() {
                            *iteration = e.iteration;
                        }
                    }
                }
                None => {
                    blocks.push(Block::ToolCall {
                        tool_call_id: e.tool_call_id,
                        name: e.name,
                        args: e.args,
                        status: ToolCallStatus::Running,
                        result: None,
                        error: None,
                        iteration: e.iteration,
                    });
                }
            }
        }
        StreamEvent::ToolCallEnd(e) => {
            let blocks = state.open_blocks();
            if let Some(idx) = find_tool_call(blocks, e.tool_call_id.as_deref(), e.name.as_deref())
            {
                if let Block::ToolCall {
                    status,
                    result,
                    error,
                    ..
                } = &mut blocks[idx]
                {
                    if e.result.is_some() {
                        *result = e.result;
                    }
                    if e.error.is_some() {
                        *error = e.error;
                    }
                    match *status {
                        // A pending approval owns the final status; only the
                        // result text is attached until it resolves.
                        ToolCallStatus::Pending => {}
                        s if s.is_terminal() => {}
                        _ => {
                            *status = if e.success {
                                ToolCallStatus::Success
                            } else {
                                ToolCallStatus::Error
                            };
                        }
                    }
                }
            }
        }

        StreamEvent::SubagentStart(e) => {
            state.open_blocks().push(Block::Subagent {
                name: e.name,
                reason: e.reason,
                status: SubagentStatus::Running,
                iterations: 0,
                tool_calls: 0,
                tools: Vec::new(),
                summary: None,
                conversation_id: e.conversation_id,
            });
        }
        StreamEvent::SubagentIteration(e) => {
            let blocks = state.open_blocks();
            if let Some(idx) = find_running_subagent(blocks, &e.name) {
                if let Block::Subagent { iterations, .. } = &mut blocks[idx] {
                    *iterations = e.iteration;
                }
            }
        }
        StreamEvent::SubagentToolStart(e) => {
            let blocks = state.open_blocks();
            if let Some(idx) = find_running_subagent(blocks, &e.name) {
                if let Block::Subagent {
                    tool_calls, tools, ..
                } = &mut blocks[idx]
                {
                    *tool_calls += 1;
                    tools.push(SubToolCall {
                        name: e.tool,
                        running: true,
                        detail: e.detail,
                    });
                }
            }
        }
        StreamEvent::SubagentToolEnd(e) => {
            let blocks = state.open_blocks();
            if let Some(idx) = find_running_subagent(blocks, &e.name) {
                if let Block::Subagent { tools, .. } = &mut blocks[idx] {
                    // Most-recent-first match on name + running status.
                    if let Some(tool) = tools
                        .iter_mut()
                        .rev()
                        .find(|t| t.name == e.tool && t.running)
                    {
                        tool.running = false;
                        if e.detail.is_some() {
                            tool.detail = e.detail;
                        }
                    }
                }
            }
        }
        StreamEvent::SubagentSummary(e) => {
            let blocks = state.open_blocks();
            if let Some(idx) = find_running_subagent(blocks, &e.name) {
                if let Block::Subagent { summary, .. } = &mut blocks[idx] {
                    *summary = Some(e.summary);
                }
            }
        }
        StreamEvent::SubagentEnd(e) => {
            let blocks = state.open_blocks();
            if let Some(idx) = find_running_subagent(blocks, &e.name) {
                if let Block::Subagent {
                    status, summary, ..
                } = &mut blocks[idx]
                {
                    *status = SubagentStatus::Done;
                    if e.summary.is_some() {
                        *summary = e.summary;
                    }
                }
            }
        }

        StreamEvent::UserQuestion(e) => {
            state.pending_question = Some(PendingQuestion {
                question_id: e.question_id,
                question: e.question,
                options: e.options,
                multi_select: e.multi_select,
            });
        }
        StreamEvent::PendingApproval(e) => {
            let blocks = state.open_blocks();
            if let Some(idx) = find_tool_call(blocks, e.tool_call_id.as_deref(), Some(&e.tool_name))
            {
                if let Block::ToolCall { status, .. } = &mut blocks[idx] {
                    if !status.is_terminal() {
                        *status = ToolCallStatus::Pending;
                    }
                }
            }
            state.pending_approval = Some(PendingApproval {
                approval_id: e.approval_id,
                tool_call_id: e.tool_call_id,
                tool_name: e.tool_name,
                args: e.args,
                undoable: e.undoable,
            });
        }
        StreamEvent::ApprovalResolved(e) => {
            let resolved = state.pending_approval.take();
            let blocks = state.open_blocks();
            let mut tool_name = String::new();
            if let Some(idx) = find_tool_call(blocks, e.tool_call_id.as_deref(), None) {
                if let Block::ToolCall { name, status, error, .. } = &mut blocks[idx] {
                    tool_name = name.clone();
                    if !status.is_terminal() {
                        *status = if e.success {
                            ToolCallStatus::Success
                        } else {
                            ToolCallStatus::Error
                        };
                        if e.error.is_some() {
                            *error = e.error.clone();
                        }
                    }
                }
            }
            if tool_name.is_empty() {
                if let Some(pending) = resolved {
                    tool_name = pending.tool_name;
                }
            }
            blocks.push(Block::ApprovalAction {
                approval_id: e.approval_id,
                tool_name,
                success: e.success,
                undoable: e.undoable,
                has_changes: e.has_changes,
            });
        }

        StreamEvent::TaskUpdate(e) => {
            apply_task_update(state.open_blocks(), e);
        }

        StreamEvent::ExcelPreview(e) => {
            state.tag_affected_file(&e.file_path);
            effects.record_preview(e.file_path, e.preview);
        }
        StreamEvent::ExcelDiff(e) => {
            state.tag_affected_file(&e.file_path);
            effects.record_diff(e.file_path, DiffKind::Excel, e.diff);
        }
        StreamEvent::TextDiff(e) => {
            state.tag_affected_file(&e.file_path);
            effects.record_diff(e.file_path, DiffKind::Text, Value::String(e.diff));
        }
        StreamEvent::FilesChanged(e) => {
            for file in e.files {
                state.tag_affected_file(&file);
                effects.touch_file(&file);
            }
        }

        StreamEvent::MemoryExtracted(e) => {
            state.open_blocks().push(Block::MemoryExtracted {
                entries: e.entries,
                trigger: e.trigger,
                count: e.count,
            });
        }
        StreamEvent::FileDownload(e) => {
            state.tag_affected_file(&e.file_path);
            state.open_blocks().push(Block::FileDownload {
                file_path: e.file_path,
                filename: e.filename,
                description: e.description,
            });
        }
        StreamEvent::ModeChanged(e) => {
            effects.set_mode(e.mode);
        }

        StreamEvent::Reply(e) => {
            let stats = TokenStats {
                prompt_tokens: e.prompt_tokens,
                completion_tokens: e.completion_tokens,
                total_tokens: e.total_tokens,
                iterations: e.iterations,
            };
            if state.paused() {
                // A paused turn is followed by a continuation that belongs
                // to the same user-visible turn; hold the stats until it
                // completes. Single slot: a second pause overwrites.
                state.deferred_stats = Some(stats);
            } else {
                let merged = match state.deferred_stats.take() {
                    Some(deferred) => deferred.merged_with(&stats),
                    None => stats,
                };
                state.open_blocks().push(Block::TokenStats { stats: merged });
            }
        }

        StreamEvent::Done => {
            state.activity = None;
            state.streaming = false;
        }
        StreamEvent::Error(e) => {
            // Visible inline error; the stream itself keeps going until the
            // transport closes.
            state.error_seen = true;
            state.open_blocks().push(Block::Error { message: e.message });
        }
    }
}

/// Apply batched text/thinking deltas to their target blocks.
pub fn flush_deltas(state: &mut SessionState, batcher: &mut DeltaBatcher) {
    if let Some(deltas) = batcher.flush() {
        apply_flush(state, deltas);
    }
}

/// Dispose the batcher on stream teardown, applying any trailing content.
pub fn dispose_batcher(state: &mut SessionState, batcher: &mut DeltaBatcher) {
    if let Some(deltas) = batcher.dispose() {
        apply_flush(state, deltas);
    }
}

fn apply_flush(state: &mut SessionState, deltas: BatchedDeltas) {
    if !deltas.thinking.is_empty() {
        let blocks = state.open_blocks();
        if !blocks.iter().any(|b| b.is_open_thinking()) {
            blocks.push(Block::Thinking {
                content: String::new(),
                started_at: Utc::now(),
                duration_ms: None,
            });
        }
        if let Some(Block::Thinking { content, .. }) =
            blocks.iter_mut().rev().find(|b| b.is_open_thinking())
        {
            content.push_str(&deltas.thinking);
        }
    }
    if !deltas.text.is_empty() {
        let blocks = state.open_blocks();
        if !matches!(blocks.last(), Some(Block::Text { .. })) {
            blocks.push(Block::Text {
                content: String::new(),
            });
        }
        if let Some(Block::Text { content }) = blocks.last_mut() {
            content.push_str(&deltas.text);
        }
    }
}

/// Stamp the open thinking block's duration, closing it.
pub fn close_open_thinking(state: &mut SessionState) {
    if let Some(Message::Assistant { blocks, .. }) = state.messages.last_mut() {
        for block in blocks.iter_mut() {
            if let Block::Thinking {
                started_at,
                duration_ms: duration_ms @ None,
                ..
            } = block
            {
                let elapsed = Utc::now().signed_duration_since(*started_at);
                *duration_ms = Some(elapsed.num_milliseconds().max(0) as u64);
            }
        }
    }
}

/// Remove the still-open thinking block, plus a bare iteration marker that
/// would be left trailing by the removal.
fn retract_thinking(state: &mut SessionState) {
    if let Some(Message::Assistant { blocks, .. }) = state.messages.last_mut() {
        if let Some(idx) = blocks.iter().rposition(|b| b.is_open_thinking()) {
            blocks.remove(idx);
            if idx == blocks.len() && matches!(blocks.last(), Some(Block::Iteration { .. })) {
                blocks.pop();
            }
        }
    }
}

/// Patch `running`/`streaming`/`pending` blocks of the trailing assistant
/// message to a terminal "stopped by user" state and append one stopped
/// status block. Used on cooperative cancellation.
pub fn mark_stopped(state: &mut SessionState) {
    close_open_thinking(state);
    if let Some(Message::Assistant { blocks, .. }) = state.messages.last_mut() {
        for block in blocks.iter_mut() {
            match block {
                Block::ToolCall { status, error, .. } if !status.is_terminal() => {
                    *status = ToolCallStatus::Error;
                    *error = Some("stopped by user".to_string());
                }
                Block::Subagent { status, .. } if *status == SubagentStatus::Running => {
                    *status = SubagentStatus::Done;
                }
                _ => {}
            }
        }
    }
    state.open_blocks().push(Block::Status {
        label: "Stopped by user".to_string(),
        detail: None,
        variant: StatusVariant::Stopped,
    });
    state.activity = None;
    state.streaming = false;
}

/// Locate a tool call block, by id when available, otherwise by name among
/// non-terminal calls (most recent first). Returns the block index so the
/// caller can decide to mutate or to push a new block.
fn find_tool_call(blocks: &[Block], id: Option<&str>, name: Option<&str>) -> Option<usize> {
    match (id, name) {
        (Some(id), _) => blocks.iter().rposition(|b| {
            matches!(b, Block::ToolCall { tool_call_id: Some(cid), .. } if cid == id)
        }),
        (None, Some(name)) => blocks.iter().rposition(|b| {
            matches!(b, Block::ToolCall { name: n, status, .. } if n == name && !status.is_terminal())
        }),
        (None, None) => None,
    }
}

fn find_running_subagent(blocks: &[Block], name: &str) -> Option<usize> {
    blocks.iter().rposition(|b| {
        matches!(b, Block::Subagent { name: n, status: SubagentStatus::Running, .. } if n == name)
    })
}

fn apply_task_update(blocks: &mut Vec<Block>, e: TaskUpdateEvent) {
    let idx = blocks
        .iter()
        .rposition(|b| matches!(b, Block::TaskList { .. }));
    let items = match idx {
        Some(i) => match &mut blocks[i] {
            Block::TaskList { items } => items,
            _ => return,
        },
        None => {
            blocks.push(Block::TaskList { items: Vec::new() });
            match blocks.last_mut() {
                Some(Block::TaskList { items }) => items,
                _ => return,
            }
        }
    };
    // Index-addressed patch; grow the list with placeholders when the
    // backend references an index we have not seen yet.
    while items.len() <= e.index {
        items.push(TaskItem {
            content: String::new(),
            status: TaskStatus::Pending,
            index: items.len(),
            verification: None,
        });
    }
    let item = &mut items[e.index];
    if let Some(content) = e.content {
        item.content = content;
    }
    if let Some(status) = e.status.as_deref() {
        item.status = match status {
            "in_progress" => TaskStatus::InProgress,
            "done" => TaskStatus::Done,
            _ => TaskStatus::Pending,
        };
    }
    if e.verification.is_some() {
        item.verification = e.verification;
    }
}
