pub mod effects;
pub mod reducer;
pub mod types;

pub use effects::{DiffKind, DiffRecord, PreviewRecord, WorkspaceEffects};
pub use reducer::{apply_event, SessionState};
pub use types::{
    Block, Message, PendingApproval, PendingQuestion, SessionId, SessionInfo, SessionStatus,
    StatusVariant, SubToolCall, SubagentStatus, TaskItem, TaskStatus, TokenStats, ToolCallStatus,
};
