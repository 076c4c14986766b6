//! Orchestrator state: the single record flowing through all turn nodes.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use stream_event::ClientEvent;

use crate::kb::KnowledgeBase;
use crate::llm::LlmUsage;
use crate::message::{Message, ToolCall};

/// Todo lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TodoStatus {
    Pending,
    Done,
}

impl TodoStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TodoStatus::Pending => "pending",
            TodoStatus::Done => "done",
        }
    }
}

/// One item on the agent's working todo list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TodoItem {
    pub id: String,
    pub task: String,
    pub status: TodoStatus,
}

/// What the conversation is currently about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentFocus {
    /// Portfolio item id of the active property.
    pub property_id: String,
    pub topic: String,
    pub depth: u32,
}

/// A durable mutation performed by a tool this turn; written to the action
/// log at post-process and mirrored to the client as an `action` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutedAction {
    pub action_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub field_changed: Option<String>,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub confidence: f64,
    pub confirmed_by_user: bool,
    /// Short human-readable description for the client event.
    pub description: String,
}

/// State for one turn of the orchestrator graph.
///
/// Reconstituted from the store on every request by the hydrate node; tools
/// mutate it within the turn; post-process writes durable facts back.
#[derive(Debug, Clone)]
pub struct TurnState {
    /// Conversation so far: persona + context refresh + chat history.
    pub messages: Vec<Message>,
    pub user_id: String,
    /// Filled by hydrate (created when the request carries none).
    pub conversation_id: String,
    /// The incoming user text; consumed by hydrate when building messages.
    pub incoming: String,
    pub knowledge: KnowledgeBase,
    pub todos: Vec<TodoItem>,
    pub current_focus: Option<CurrentFocus>,
    /// Actions accumulated this turn; cleared at post-process.
    pub executed_actions: Vec<ExecutedAction>,
    /// Append-only queue of client events; the gateway diffs it per chunk.
    pub stream_events: Vec<ClientEvent>,
    /// Keys loaded or written this turn; feeds stale-entry demotion.
    pub touched_keys: BTreeSet<String>,
    /// Agent cycles completed; bounded by the turn budget.
    pub cycles: u32,
    /// Token usage summed over this turn's LLM calls, when reported.
    pub total_usage: Option<LlmUsage>,
}

impl TurnState {
    pub fn new(
        user_id: impl Into<String>,
        conversation_id: Option<String>,
        incoming: impl Into<String>,
    ) -> Self {
        Self {
            messages: Vec::new(),
            user_id: user_id.into(),
            conversation_id: conversation_id.unwrap_or_default(),
            incoming: incoming.into(),
            knowledge: KnowledgeBase::default(),
            todos: Vec::new(),
            current_focus: None,
            executed_actions: Vec::new(),
            stream_events: Vec::new(),
            touched_keys: BTreeSet::new(),
            cycles: 0,
            total_usage: None,
        }
    }

    /// Tool calls on the most recent assistant message, if any.
    pub fn pending_tool_calls(&self) -> &[ToolCall] {
        match self.messages.last() {
            Some(Message::Assistant { tool_calls, .. }) => tool_calls,
            _ => &[],
        }
    }

    /// Content of the chronologically last assistant message.
    pub fn last_assistant_reply(&self) -> Option<&str> {
        self.messages.iter().rev().find_map(|m| match m {
            Message::Assistant { content, .. } => Some(content.as_str()),
            _ => None,
        })
    }

    /// Appends a client event to the stream queue.
    pub fn push_event(&mut self, event: ClientEvent) {
        self.stream_events.push(event);
    }

    /// Marks a knowledge key as referenced this turn.
    pub fn touch_key(&mut self, key: impl Into<String>) {
        self.touched_keys.insert(key.into());
    }
}
