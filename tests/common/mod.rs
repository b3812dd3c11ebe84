//! Shared test utilities
//!
//! Scripted transport and frame builders for driving the chat engine
//! without a backend.

pub mod transport;
