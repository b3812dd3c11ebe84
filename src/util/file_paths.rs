//! Best-effort file path recovery from free text
//!
//! Historical tool calls persisted by the backend do not carry a structured
//! affected-files list; this module recovers workbook paths from argument
//! and result text with a heuristic scan. It is intentionally isolated:
//! false negatives here never affect the live event-driven path, which is
//! authoritative when available.

use std::sync::OnceLock;

use regex::Regex;

use crate::transcript::effects::valid_workspace_path;

const EXTENSIONS: &str = "xlsx|xlsm|xls|csv|txt|md|json";

/// Quoted paths may contain spaces
fn quoted_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(&format!(r#"["']([^"'\n]+?\.(?:{EXTENSIONS}))["']"#)).expect("static pattern")
    })
}

/// Bare tokens stop at whitespace
fn bare_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(&format!(r"[\w\-./\\]+\.(?:{EXTENSIONS})\b")).expect("static pattern")
    })
}

/// Extract candidate file paths from free text, deduplicated in order of
/// first appearance. Quoted (exact) forms win over bare fragments; each
/// candidate is also tried in a loosely sanitized form (trimmed,
/// backslashes normalized) so Windows-style paths still match.
pub fn extract_file_paths(text: &str) -> Vec<String> {
    let mut found: Vec<String> = Vec::new();

    for cap in quoted_pattern().captures_iter(text) {
        if let Some(m) = cap.get(1) {
            accept(&mut found, m.as_str());
        }
    }
    for m in bare_pattern().find_iter(text) {
        // Skip fragments of an already-captured quoted path.
        if found.iter().any(|p| p.contains(m.as_str())) {
            continue;
        }
        accept(&mut found, m.as_str());
    }
    found
}

fn accept(found: &mut Vec<String>, raw: &str) {
    for candidate in [raw.to_string(), sanitize(raw)] {
        if valid_workspace_path(&candidate) && !found.contains(&candidate) {
            found.push(candidate);
            return;
        }
    }
}

fn sanitize(raw: &str) -> String {
    raw.trim().replace('\\', "/")
}
