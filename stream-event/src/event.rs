//! Typed SSE events: one JSON object per event, tagged by `type`.
//!
//! The taxonomy is a wire contract: clients switch on `type` and the set of
//! variants is stable. Each event is framed as `data: <json>` followed by a
//! blank line, per the SSE format.

use serde::{Deserialize, Serialize};

/// Stable error codes carried by [`ClientEvent::Error`] so programmatic
/// clients can distinguish failure classes without parsing the message text.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Malformed request or missing/invalid credentials.
    InvalidRequest,
    /// The agent loop did not terminate within the turn budget.
    TurnBudgetExceeded,
    /// Store, LLM, or another upstream dependency failed.
    Upstream,
}

/// A todo item as shown to the client in `todo_update` events.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TodoView {
    pub id: String,
    pub task: String,
    /// `"pending"` or `"done"`.
    pub status: String,
}

/// One event on the client stream.
///
/// Serialized with `type` as the tag, snake_case payload fields:
/// `{"type":"tool_call","name":"read_context",...}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Emitted immediately after the request is accepted, before any work.
    Thinking,
    /// A tool the agent invoked this turn.
    ToolCall {
        name: String,
        call_id: String,
        summary: String,
    },
    /// A durable mutation the agent performed (mirrors the action log).
    Action {
        action_type: String,
        entity_type: String,
        entity_id: String,
        description: String,
    },
    /// Assistant text. The final event of a successful turn has `done = true`.
    Message { content: String, done: bool },
    /// Snapshot of the todo list after a `manage_todos` mutation.
    TodoUpdate { todos: Vec<TodoView> },
    /// Terminal failure; exactly one per failed turn, then the stream closes.
    Error { code: ErrorCode, message: String },
}

impl ClientEvent {
    /// Serializes this event as one SSE frame: `data: <json>\n\n`.
    pub fn to_sse_frame(&self) -> Result<String, serde_json::Error> {
        let json = serde_json::to_string(self)?;
        Ok(format!("data: {}\n\n", json))
    }

    /// Short label used in logs (`tool_call`, `message`, ...).
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Thinking => "thinking",
            Self::ToolCall { .. } => "tool_call",
            Self::Action { .. } => "action",
            Self::Message { .. } => "message",
            Self::TodoUpdate { .. } => "todo_update",
            Self::Error { .. } => "error",
        }
    }
}
