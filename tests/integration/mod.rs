//! Integration tests driving the chat engine over a scripted transport

#[path = "../common/mod.rs"]
pub mod common;

pub mod chat_flow;
pub mod session_reload;
