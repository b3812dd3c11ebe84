//! Data persistence layer using SQLite

pub mod database;
pub mod migrations;
pub mod sessions;
pub mod transcripts;

pub use database::{Database, DatabaseError};
pub use sessions::SessionStore;
pub use transcripts::TranscriptStore;
