//! Observer seam for transcript revisions
//!
//! A front end registers one observer and gets called on every committed
//! revision instead of polling. Callbacks run under the engine state lock,
//! so implementations must be cheap and must not call back into the engine.

use crate::transcript::reducer::SessionState;

pub trait TranscriptObserver: Send + Sync {
    /// The visible transcript (or its activity line) changed.
    fn revision(&self, state: &SessionState);
}

/// Default observer for headless use
pub struct NoopObserver;

impl TranscriptObserver for NoopObserver {
    fn revision(&self, _state: &SessionState) {}
}
