//! Per-frame delta batching
//!
//! The backend can emit several hundred text increments per second; applying
//! each one to the transcript individually would thrash every observer. The
//! batcher buffers text and thinking fragments and arms a single flush
//! deadline per frame interval. The stream task sleeps until
//! [`deadline`](DeltaBatcher::deadline) in its select loop and flushes; the
//! reducer also flushes synchronously before every non-delta event so block
//! ordering is preserved.

use tokio::time::{Duration, Instant};

/// Default flush interval, roughly one rendering frame
pub const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_millis(16);

/// Accumulated text taken out of the batcher by a flush
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchedDeltas {
    pub text: String,
    pub thinking: String,
}

impl BatchedDeltas {
    pub fn is_empty(&self) -> bool {
        self.text.is_empty() && self.thinking.is_empty()
    }
}

/// Coalesces high-frequency delta events into at most one flush per frame.
///
/// Owned by exactly one stream; [`dispose`](Self::dispose) performs the final
/// flush on teardown and ignores pushes afterwards, so trailing content is
/// never lost on any exit path.
#[derive(Debug)]
pub struct DeltaBatcher {
    text: String,
    thinking: String,
    deadline: Option<Instant>,
    interval: Duration,
    disposed: bool,
}

impl Default for DeltaBatcher {
    fn default() -> Self {
        Self::new(DEFAULT_FRAME_INTERVAL)
    }
}

impl DeltaBatcher {
    pub fn new(interval: Duration) -> Self {
        Self {
            text: String::new(),
            thinking: String::new(),
            deadline: None,
            interval,
            disposed: false,
        }
    }

    pub fn push_text(&mut self, delta: &str) {
        if self.disposed {
            return;
        }
        self.text.push_str(delta);
        self.arm();
    }

    pub fn push_thinking(&mut self, delta: &str) {
        if self.disposed {
            return;
        }
        self.thinking.push_str(delta);
        self.arm();
    }

    /// The armed flush deadline, if any content is pending
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn has_pending(&self) -> bool {
        !self.text.is_empty() || !self.thinking.is_empty()
    }

    /// Take everything buffered and disarm the deadline. `None` when there
    /// is nothing pending.
    pub fn flush(&mut self) -> Option<BatchedDeltas> {
        self.deadline = None;
        if !self.has_pending() {
            return None;
        }
        Some(BatchedDeltas {
            text: std::mem::take(&mut self.text),
            thinking: std::mem::take(&mut self.thinking),
        })
    }

    /// Final flush; the batcher ignores all pushes afterwards.
    pub fn dispose(&mut self) -> Option<BatchedDeltas> {
        let out = self.flush();
        self.disposed = true;
        out
    }

    fn arm(&mut self) {
        if self.deadline.is_none() {
            self.deadline = Some(Instant::now() + self.interval);
        }
    }
}
