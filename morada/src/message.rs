//! Chat message types for the orchestrator state.
//!
//! Roles: System (persona and the context-refresh projection), User, Assistant
//! (optionally carrying tool calls), Tool (one result per tool call). The
//! context-refresh message is tagged so reflect can replace it in place and
//! post-process can skip it when persisting.

use serde::{Deserialize, Serialize};

/// A single tool invocation produced by the LLM and consumed by the tools node.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolCall {
    /// Correlation id; echoed back in the matching [`Message::Tool`].
    pub id: String,
    /// Tool name as registered in the registry.
    pub name: String,
    /// Arguments as a JSON string; parsed and schema-validated before dispatch.
    pub arguments: String,
}

/// Marker on system messages distinguishing the persona prompt from the
/// regenerated context block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SystemTag {
    /// The persistent system prompt; first message of every turn.
    Persona,
    /// The rendered knowledge projection; replaced after every tool round.
    ContextRefresh,
}

/// A single message in the conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Message {
    System {
        content: String,
        tag: SystemTag,
    },
    User(String),
    Assistant {
        content: String,
        tool_calls: Vec<ToolCall>,
    },
    /// Result of one tool execution, correlated by `call_id`.
    Tool {
        call_id: String,
        name: String,
        content: String,
    },
}

impl Message {
    /// Creates the persona system message.
    pub fn persona(content: impl Into<String>) -> Self {
        Self::System {
            content: content.into(),
            tag: SystemTag::Persona,
        }
    }

    /// Creates (or recreates) the context-refresh system message.
    pub fn context_refresh(content: impl Into<String>) -> Self {
        Self::System {
            content: content.into(),
            tag: SystemTag::ContextRefresh,
        }
    }

    /// Creates a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::User(content.into())
    }

    /// Creates a plain assistant message (final text, no tool calls).
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::Assistant {
            content: content.into(),
            tool_calls: vec![],
        }
    }

    /// Creates an assistant message carrying tool calls.
    pub fn assistant_with_tools(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self::Assistant {
            content: content.into(),
            tool_calls,
        }
    }

    /// Creates a tool-result message.
    pub fn tool(
        call_id: impl Into<String>,
        name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self::Tool {
            call_id: call_id.into(),
            name: name.into(),
            content: content.into(),
        }
    }

    /// True for the single context-refresh system message.
    pub fn is_context_refresh(&self) -> bool {
        matches!(
            self,
            Message::System {
                tag: SystemTag::ContextRefresh,
                ..
            }
        )
    }

    /// True for any system message (persona or context refresh).
    pub fn is_system(&self) -> bool {
        matches!(self, Message::System { .. })
    }

    /// Role string as persisted and sent over the chat-completions wire.
    pub fn role(&self) -> &'static str {
        match self {
            Message::System { .. } => "system",
            Message::User(_) => "user",
            Message::Assistant { .. } => "assistant",
            Message::Tool { .. } => "tool",
        }
    }

    /// Text content of this message.
    pub fn content(&self) -> &str {
        match self {
            Message::System { content, .. } => content,
            Message::User(content) => content,
            Message::Assistant { content, .. } => content,
            Message::Tool { content, .. } => content,
        }
    }
}
