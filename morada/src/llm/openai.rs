//! OpenAI Chat Completions client implementing [`LlmClient`].
//!
//! Uses the real Chat Completions API via `async-openai`. Requires
//! `OPENAI_API_KEY` (or explicit config). Tool specs are set at construction;
//! when present the API may return `tool_calls` in the response.

use async_trait::async_trait;
use tracing::{debug, trace};

use crate::error::AgentError;
use crate::message::{Message, ToolCall};
use crate::tools::ToolSpec;

use super::{LlmClient, LlmResponse, LlmUsage};

use async_openai::{
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionMessageToolCalls, ChatCompletionRequestAssistantMessageArgs,
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessage,
        ChatCompletionRequestToolMessageArgs, ChatCompletionRequestUserMessage,
        ChatCompletionTool, ChatCompletionToolChoiceOption, ChatCompletionTools,
        CreateChatCompletionRequestArgs, FunctionObject, ToolChoiceOptions,
    },
    Client,
};

/// OpenAI Chat Completions client.
///
/// Uses `OPENAI_API_KEY` from the environment by default; or provide config
/// via [`ChatOpenAI::with_config`]. Set tools from the registry so the model
/// and the tools node see the same surface.
pub struct ChatOpenAI {
    client: Client<OpenAIConfig>,
    model: String,
    tools: Option<Vec<ToolSpec>>,
    temperature: Option<f32>,
}

impl ChatOpenAI {
    /// Client with default config (API key from `OPENAI_API_KEY`).
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            model: model.into(),
            tools: None,
            temperature: None,
        }
    }

    /// Client with custom config (e.g. custom API key or base URL).
    pub fn with_config(config: OpenAIConfig, model: impl Into<String>) -> Self {
        Self {
            client: Client::with_config(config),
            model: model.into(),
            tools: None,
            temperature: None,
        }
    }

    /// Sets tools for completions (enables `tool_calls` in responses).
    pub fn with_tools(mut self, tools: Vec<ToolSpec>) -> Self {
        self.tools = Some(tools);
        self
    }

    /// Sets temperature (0–2); lower is more deterministic.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Converts our messages to request messages, including assistant
    /// tool-call turns and tool results.
    fn messages_to_request(
        messages: &[Message],
    ) -> Result<Vec<ChatCompletionRequestMessage>, AgentError> {
        messages
            .iter()
            .map(|m| match m {
                Message::System { content, .. } => Ok(ChatCompletionRequestMessage::System(
                    ChatCompletionRequestSystemMessage::from(content.as_str()),
                )),
                Message::User(content) => Ok(ChatCompletionRequestMessage::User(
                    ChatCompletionRequestUserMessage::from(content.as_str()),
                )),
                Message::Assistant {
                    content,
                    tool_calls,
                } if tool_calls.is_empty() => {
                    Ok(ChatCompletionRequestMessage::Assistant((content.as_str()).into()))
                }
                Message::Assistant {
                    content,
                    tool_calls,
                } => {
                    // Tool calls are deserialized from the wire shape so the
                    // request matches what the API previously returned.
                    let calls_json: Vec<serde_json::Value> = tool_calls
                        .iter()
                        .map(|tc| {
                            serde_json::json!({
                                "id": tc.id,
                                "type": "function",
                                "function": {"name": tc.name, "arguments": tc.arguments},
                            })
                        })
                        .collect();
                    let calls: Vec<ChatCompletionMessageToolCalls> =
                        serde_json::from_value(serde_json::Value::Array(calls_json)).map_err(
                            |e| AgentError::Llm(format!("tool_calls request build failed: {}", e)),
                        )?;
                    let mut args = ChatCompletionRequestAssistantMessageArgs::default();
                    if !content.is_empty() {
                        args.content(content.as_str());
                    }
                    let msg = args.tool_calls(calls).build().map_err(|e| {
                        AgentError::Llm(format!("assistant message build failed: {}", e))
                    })?;
                    Ok(ChatCompletionRequestMessage::Assistant(msg))
                }
                Message::Tool {
                    call_id, content, ..
                } => {
                    let msg = ChatCompletionRequestToolMessageArgs::default()
                        .content(content.as_str())
                        .tool_call_id(call_id.clone())
                        .build()
                        .map_err(|e| {
                            AgentError::Llm(format!("tool message build failed: {}", e))
                        })?;
                    Ok(ChatCompletionRequestMessage::Tool(msg))
                }
            })
            .collect()
    }
}

#[async_trait]
impl LlmClient for ChatOpenAI {
    async fn invoke(&self, messages: &[Message]) -> Result<LlmResponse, AgentError> {
        let request_messages = Self::messages_to_request(messages)?;
        let mut args = CreateChatCompletionRequestArgs::default();
        args.model(self.model.clone());
        args.messages(request_messages);

        if let Some(ref tools) = self.tools {
            let chat_tools: Vec<ChatCompletionTools> = tools
                .iter()
                .map(|t| {
                    ChatCompletionTools::Function(ChatCompletionTool {
                        function: FunctionObject {
                            name: t.name.clone(),
                            description: t.description.clone(),
                            parameters: Some(t.input_schema.clone()),
                            ..Default::default()
                        },
                    })
                })
                .collect();
            args.tools(chat_tools);
            args.tool_choice(ChatCompletionToolChoiceOption::Mode(ToolChoiceOptions::Auto));
        }

        if let Some(t) = self.temperature {
            args.temperature(t);
        }

        let request = args
            .build()
            .map_err(|e| AgentError::Llm(format!("request build failed: {}", e)))?;

        debug!(
            model = %self.model,
            message_count = messages.len(),
            tools_count = self.tools.as_ref().map(|t| t.len()).unwrap_or(0),
            "chat completions create"
        );
        if let Ok(js) = serde_json::to_string(&request) {
            trace!(request = %js, "chat completions request body");
        }

        let response = self.client.chat().create(request).await.map_err(|e| match &e {
            async_openai::error::OpenAIError::Reqwest(_) => {
                AgentError::Transient(format!("api transport: {}", e))
            }
            _ => AgentError::Llm(format!("api error: {}", e)),
        })?;

        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| AgentError::Llm("no choices in response".to_string()))?;

        let msg = choice.message;
        let content = msg.content.unwrap_or_default();
        let tool_calls: Vec<ToolCall> = msg
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .filter_map(|tc| {
                if let ChatCompletionMessageToolCalls::Function(f) = tc {
                    Some(ToolCall {
                        id: f.id,
                        name: f.function.name,
                        arguments: f.function.arguments,
                    })
                } else {
                    None
                }
            })
            .collect();

        let usage = response.usage.map(|u| LlmUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        });

        Ok(LlmResponse {
            content,
            tool_calls,
            usage,
        })
    }
}
