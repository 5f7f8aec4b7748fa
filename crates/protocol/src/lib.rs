//! wabridge Protocol
//!
//! Shared types for communication between the wabridge relay and its
//! dashboards. Every frame is a JSON object tagged by its `event` name and
//! sent as a WebSocket text frame.

pub mod client;
pub mod server;
pub mod types;

pub use client::{ClientMessage, DEFAULT_HISTORY_LIMIT};
pub use server::ServerMessage;
pub use types::*;
