//! Workspace effect collaborator store
//!
//! The reducer forwards structured file/diff payloads here instead of
//! holding them in the transcript: previews, diffs, and the set of affected
//! files are keyed per session and consumed by whatever renders the
//! workspace. UI mode flags land here too.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Maximum accepted path length; anything longer is treated as noise
pub const MAX_PATH_LEN: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffKind {
    Excel,
    Text,
}

/// One recorded diff against a workspace file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffRecord {
    pub file_path: String,
    pub kind: DiffKind,
    pub diff: Value,
    pub timestamp: DateTime<Utc>,
}

/// One recorded spreadsheet preview
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreviewRecord {
    pub file_path: String,
    pub preview: Value,
    pub timestamp: DateTime<Utc>,
}

/// Per-session store of workspace side effects observed over the stream
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceEffects {
    pub diffs: Vec<DiffRecord>,
    pub previews: Vec<PreviewRecord>,
    pub affected_files: Vec<String>,
    /// Last mode announced by a `mode_changed` event
    pub mode: Option<String>,
}

impl WorkspaceEffects {
    pub fn record_preview(&mut self, file_path: String, preview: Value) {
        self.touch_file(&file_path);
        self.previews.push(PreviewRecord {
            file_path,
            preview,
            timestamp: Utc::now(),
        });
    }

    pub fn record_diff(&mut self, file_path: String, kind: DiffKind, diff: Value) {
        self.touch_file(&file_path);
        self.diffs.push(DiffRecord {
            file_path,
            kind,
            diff,
            timestamp: Utc::now(),
        });
    }

    /// Track an affected file, deduplicated, rejecting malformed paths
    pub fn touch_file(&mut self, path: &str) {
        if !valid_workspace_path(path) {
            return;
        }
        if !self.affected_files.iter().any(|p| p == path) {
            self.affected_files.push(path.to_string());
        }
    }

    pub fn set_mode(&mut self, mode: String) {
        self.mode = Some(mode);
    }

    pub fn clear(&mut self) {
        self.diffs.clear();
        self.previews.clear();
        self.affected_files.clear();
        self.mode = None;
    }
}

/// Shape check applied before a path is accepted as an affected file
pub fn valid_workspace_path(path: &str) -> bool {
    !path.is_empty()
        && path.len() <= MAX_PATH_LEN
        && !path.chars().any(|c| c.is_control())
}
