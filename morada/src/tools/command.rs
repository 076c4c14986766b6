//! Commands: what a tool hands back to the tools node.
//!
//! A tool never mutates state or the store directly. It returns a command
//! describing the tool message for the model, the state deltas, and the
//! durable effects; the tools node applies them atomically.

use stream_event::ClientEvent;

use crate::kb::KnowledgeBase;
use crate::state::{CurrentFocus, ExecutedAction, TodoItem};
use crate::store::DurableEffect;

/// State deltas carried by a successful command. `None` fields are left
/// untouched; event and action lists are appended.
#[derive(Debug, Clone, Default)]
pub struct StateUpdates {
    pub knowledge: Option<KnowledgeBase>,
    pub todos: Option<Vec<TodoItem>>,
    /// `Some(inner)` replaces the focus; `Some(None)` clears it.
    pub current_focus: Option<Option<CurrentFocus>>,
    pub stream_events: Vec<ClientEvent>,
    pub executed_actions: Vec<ExecutedAction>,
    /// Knowledge keys this tool loaded or wrote (feeds stale demotion).
    pub touched_keys: Vec<String>,
}

/// Tool return value.
#[derive(Debug, Clone)]
pub enum Command {
    /// The tool succeeded; apply effects transactionally, then state deltas,
    /// then append `response_text` as the tool message.
    Success {
        response_text: String,
        updates: StateUpdates,
        effects: Vec<DurableEffect>,
    },
    /// Tool-level failure: becomes an ordinary tool message so the agent can
    /// react. No state deltas, no durable effects.
    Error { message: String },
}

impl Command {
    /// Success with no deltas or effects (read-only tools).
    pub fn text(response_text: impl Into<String>) -> Self {
        Command::Success {
            response_text: response_text.into(),
            updates: StateUpdates::default(),
            effects: vec![],
        }
    }

    pub fn success(
        response_text: impl Into<String>,
        updates: StateUpdates,
        effects: Vec<DurableEffect>,
    ) -> Self {
        Command::Success {
            response_text: response_text.into(),
            updates,
            effects,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Command::Error {
            message: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Command::Error { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_command_has_no_effects() {
        match Command::text("ok") {
            Command::Success {
                response_text,
                updates,
                effects,
            } => {
                assert_eq!(response_text, "ok");
                assert!(updates.knowledge.is_none());
                assert!(effects.is_empty());
            }
            _ => panic!("expected success"),
        }
    }

    #[test]
    fn error_command_flags() {
        assert!(Command::error("bad").is_error());
        assert!(!Command::text("ok").is_error());
    }
}
