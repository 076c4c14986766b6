//! LLM client abstraction for the agent node and the pipeline summarizer.
//!
//! The agent node depends on a callable that returns assistant text and
//! optional tool calls; this module defines the trait, the OpenAI-backed
//! implementation, and a scripted mock for tests.

mod mock;
mod openai;

pub use mock::MockLlm;
pub use openai::ChatOpenAI;

use async_trait::async_trait;

use crate::error::AgentError;
use crate::message::{Message, ToolCall};

/// Token usage for one LLM call.
#[derive(Clone, Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct LlmUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl LlmUsage {
    /// Sums another call's usage into this one (per-turn accumulation).
    pub fn add(&mut self, other: &LlmUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// Response from one completion: assistant text and optional tool calls.
#[derive(Clone, Debug, Default)]
pub struct LlmResponse {
    /// Assistant message content (plain text; may be empty on tool-call turns).
    pub content: String,
    /// Tool calls for this turn; empty means final text.
    pub tool_calls: Vec<ToolCall>,
    /// Token usage, when the provider reports it.
    pub usage: Option<LlmUsage>,
}

impl LlmResponse {
    /// A plain-text response.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }

    /// A response invoking one tool with the given JSON arguments.
    pub fn tool_call(name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            content: String::new(),
            tool_calls: vec![ToolCall {
                id: format!("tc-{}", uuid::Uuid::new_v4()),
                name: name.into(),
                arguments: arguments.to_string(),
            }],
            usage: None,
        }
    }
}

/// LLM client: given messages, returns assistant text and optional tool calls.
///
/// Implementations: [`MockLlm`] (scripted) and [`ChatOpenAI`] (real API).
/// Tool specs are supplied at construction so the LLM and the tools node see
/// the same registry.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// One turn: read messages, return assistant content and optional tool calls.
    async fn invoke(&self, messages: &[Message]) -> Result<LlmResponse, AgentError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_accumulates() {
        let mut total = LlmUsage::default();
        total.add(&LlmUsage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        });
        total.add(&LlmUsage {
            prompt_tokens: 1,
            completion_tokens: 2,
            total_tokens: 3,
        });
        assert_eq!(total.prompt_tokens, 11);
        assert_eq!(total.total_tokens, 18);
    }

    #[test]
    fn tool_call_helper_builds_one_call() {
        let r = LlmResponse::tool_call("read_context", serde_json::json!({"key": "user/fiscal"}));
        assert_eq!(r.tool_calls.len(), 1);
        assert_eq!(r.tool_calls[0].name, "read_context");
        assert!(r.tool_calls[0].id.starts_with("tc-"));
        let args: serde_json::Value = serde_json::from_str(&r.tool_calls[0].arguments).unwrap();
        assert_eq!(args["key"], "user/fiscal");
    }
}
