//! Framed-event transport reader
//!
//! Decodes the backend's server-sent event framing into discrete
//! `(event name, payload)` frames. The decoder is push-based and tolerant of
//! arbitrary chunk boundaries: bytes are buffered until a full line is
//! available, so a multi-byte UTF-8 character or a line split across two
//! network reads never corrupts a frame.
//!
//! A malformed JSON payload drops that one frame with a warning; the read
//! loop is never killed by a single bad frame.

use serde_json::Value;

/// One decoded frame: event name plus raw payload text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub event: String,
    pub data: String,
}

impl Frame {
    /// Parse the payload as JSON. An absent payload is `null` (marker
    /// events carry no data); `None` (with a warning) on malformed data.
    pub fn json(&self) -> Option<Value> {
        if self.data.is_empty() {
            return Some(Value::Null);
        }
        match serde_json::from_str(&self.data) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(event = %self.event, error = %e, "dropping frame with malformed payload");
                None
            }
        }
    }
}

/// Incremental decoder for the event-stream framing.
///
/// Feed raw byte chunks with [`push`](Self::push); call
/// [`finish`](Self::finish) at end-of-stream to emit a trailing frame whose
/// source did not terminate with a blank line.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    /// Undecoded bytes carried over between chunks (partial line)
    carry: Vec<u8>,
    event: Option<String>,
    data: String,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume one chunk of bytes, returning every frame it completes.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Frame> {
        self.carry.extend_from_slice(chunk);

        let mut frames = Vec::new();
        // Process only complete lines; keep the partial tail for later.
        while let Some(pos) = self.carry.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.carry.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line[..pos]);
            let line = line.strip_suffix('\r').unwrap_or(&line);
            if let Some(frame) = self.take_line(line) {
                frames.push(frame);
            }
        }
        frames
    }

    /// Final emit at end of stream, in case the source did not terminate
    /// with a blank line.
    pub fn finish(&mut self) -> Option<Frame> {
        if !self.carry.is_empty() {
            let tail = std::mem::take(&mut self.carry);
            let line = String::from_utf8_lossy(&tail).to_string();
            let line = line.strip_suffix('\r').unwrap_or(&line).to_string();
            if let Some(frame) = self.take_line(&line) {
                return Some(frame);
            }
        }
        self.emit()
    }

    fn take_line(&mut self, line: &str) -> Option<Frame> {
        if line.is_empty() {
            return self.emit();
        }
        if let Some(name) = line.strip_prefix("event:") {
            self.event = Some(dedent(name).to_string());
        } else if let Some(payload) = line.strip_prefix("data:") {
            if !self.data.is_empty() {
                self.data.push('\n');
            }
            self.data.push_str(dedent(payload));
        }
        // Comment lines (":keepalive") and anything else are ignored.
        None
    }

    fn emit(&mut self) -> Option<Frame> {
        if self.event.is_none() && self.data.is_empty() {
            return None;
        }
        let frame = Frame {
            event: self.event.take().unwrap_or_else(|| "message".to_string()),
            data: std::mem::take(&mut self.data),
        };
        Some(frame)
    }
}

/// Strip exactly one leading space after the field marker
fn dedent(s: &str) -> &str {
    s.strip_prefix(' ').unwrap_or(s)
}
