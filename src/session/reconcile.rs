//! Backend reconciliation of a visible transcript
//!
//! A refresh replaces the visible transcript with the backend's canonical
//! view, but the canonical view is lossy: ephemeral block kinds (thinking,
//! iteration markers, approval actions, sub-agent panels, status lines) are
//! never persisted server-side, and a tool call the user rejected locally
//! may still read as a success in the backend's log. Reconciliation walks
//! the previously visible transcript alongside the refreshed one,
//! re-inserting ephemeral blocks at their anchored positions and keeping
//! locally observed tool-call failures.

use crate::transcript::types::{Block, Message, ToolCallStatus};

/// Cheap structural equivalence check between the visible transcript and a
/// refreshed one. Equivalent transcripts skip the visible replacement
/// entirely, so in-progress UI state is not disturbed by a no-op refresh.
pub fn transcripts_equivalent(a: &[Message], b: &[Message]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).all(|(ma, mb)| match (ma, mb) {
        (Message::User { content: ca, .. }, Message::User { content: cb, .. }) => ca == cb,
        (Message::Assistant { blocks: ba, .. }, Message::Assistant { blocks: bb, .. }) => {
            blocks_equivalent(ba, bb)
        }
        _ => false,
    })
}

fn blocks_equivalent(a: &[Block], b: &[Block]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).all(|(x, y)| match (x, y) {
        (Block::Text { content: ca }, Block::Text { content: cb }) => ca == cb,
        (
            Block::ToolCall {
                name: na,
                status: sa,
                ..
            },
            Block::ToolCall {
                name: nb,
                status: sb,
                ..
            },
        ) => na == nb && sa == sb,
        _ => x.kind() == y.kind(),
    })
}

/// Merge the previously visible transcript into a refreshed one.
///
/// Assistant messages pair up by ordinal. Within a pair, ephemeral blocks
/// from the previous view are re-inserted positionally: the walk keeps a
/// cursor into the refreshed block list, advancing it past each durable
/// block the previous view also had, and splicing ephemeral blocks in at
/// the cursor. Tool calls matched between the two views keep the previous
/// state when it is strictly richer (a locally observed error beats a
/// refreshed success; an unresolved pending status defers to it).
pub fn merge_ephemeral(previous: &[Message], refreshed: Vec<Message>) -> Vec<Message> {
    let prev_assistants: Vec<&Message> =
        previous.iter().filter(|m| m.is_assistant()).collect();

    let mut ordinal = 0usize;
    refreshed
        .into_iter()
        .map(|message| match message {
            Message::Assistant {
                id,
                blocks,
                affected_files,
                timestamp,
            } => {
                let merged = match prev_assistants.get(ordinal) {
                    Some(Message::Assistant {
                        blocks: prev_blocks,
                        ..
                    }) => merge_blocks(prev_blocks, blocks),
                    _ => blocks,
                };
                ordinal += 1;
                Message::Assistant {
                    id,
                    blocks: merged,
                    affected_files,
                    timestamp,
                }
            }
            user => user,
        })
        .collect()
}

fn merge_blocks(previous: &[Block], refreshed: Vec<Block>) -> Vec<Block> {
    let mut out = refreshed;
    let mut cursor = 0usize;

    for prev in previous {
        if prev.is_ephemeral() {
            out.insert(cursor, prev.clone());
            cursor += 1;
            continue;
        }
        // Advance past the refreshed counterpart of this durable block,
        // patching tool-call state along the way. Blocks present only in
        // the refreshed view are skipped over, not disturbed.
        if let Some(offset) = out[cursor..].iter().position(|b| durable_match(prev, b)) {
            let idx = cursor + offset;
            patch_tool_call(prev, &mut out[idx]);
            cursor = idx + 1;
        }
    }
    out
}

fn durable_match(prev: &Block, refreshed: &Block) -> bool {
    match (prev, refreshed) {
        (
            Block::ToolCall {
                tool_call_id: Some(a),
                ..
            },
            Block::ToolCall {
                tool_call_id: Some(b),
                ..
            },
        ) => a == b,
        (Block::ToolCall { name: a, .. }, Block::ToolCall { name: b, .. }) => a == b,
        _ => prev.kind() == refreshed.kind(),
    }
}

/// Keep the richer locally observed tool-call state: an error the stream
/// reported must not be papered over by the backend's optimistic success
/// row. A still-pending status is not richer; the refreshed result stands.
fn patch_tool_call(prev: &Block, refreshed: &mut Block) {
    let Block::ToolCall {
        status: prev_status,
        error: prev_error,
        ..
    } = prev
    else {
        return;
    };
    let Block::ToolCall { status, error, .. } = refreshed else {
        return;
    };
    if *prev_status == ToolCallStatus::Error && *status == ToolCallStatus::Success {
        *status = ToolCallStatus::Error;
        if error.is_none() {
            *error = prev_error.clone();
        }
    }
}
