//! Backend HTTP client and the transport seam the engine drives

pub mod client;
pub mod error;
pub mod transport;

pub use client::{ApiClient, UploadResponse};
pub use error::ApiError;
pub use transport::{ByteStream, ChatTransport, StreamRequest};
