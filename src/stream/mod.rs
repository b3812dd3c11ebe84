pub mod batcher;
pub mod events;
pub mod frame;

pub use batcher::{BatchedDeltas, DeltaBatcher, DEFAULT_FRAME_INTERVAL};
pub use events::StreamEvent;
pub use frame::{Frame, FrameDecoder};
