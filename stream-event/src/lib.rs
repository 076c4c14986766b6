//! Client stream protocol: the wire shape of every event the gateway sends.
//!
//! This crate defines the typed SSE events (`thinking | tool_call | action |
//! message | todo_update | error`) and the `data: <json>\n\n` framing. It does
//! not depend on the core crate; the orchestrator enqueues these events on its
//! state and the gateway serializes them.

pub mod event;

pub use event::{ClientEvent, ErrorCode, TodoView};
