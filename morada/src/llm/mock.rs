//! Scripted LLM for tests: plays back a fixed sequence of responses.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::AgentError;
use crate::message::Message;

use super::{LlmClient, LlmResponse};

/// Plays back scripted responses in order; when the script is exhausted the
/// optional fallback repeats forever (useful for non-terminating-loop tests).
pub struct MockLlm {
    script: Mutex<VecDeque<LlmResponse>>,
    fallback: Option<LlmResponse>,
    invocations: Mutex<Vec<Vec<Message>>>,
}

impl MockLlm {
    /// Responses played in order; erroring once exhausted.
    pub fn scripted(responses: Vec<LlmResponse>) -> Self {
        Self {
            script: Mutex::new(responses.into()),
            fallback: None,
            invocations: Mutex::new(vec![]),
        }
    }

    /// Scripted responses, then `fallback` repeated forever.
    pub fn scripted_with_fallback(responses: Vec<LlmResponse>, fallback: LlmResponse) -> Self {
        Self {
            script: Mutex::new(responses.into()),
            fallback: Some(fallback),
            invocations: Mutex::new(vec![]),
        }
    }

    /// The same response on every call.
    pub fn always(response: LlmResponse) -> Self {
        Self::scripted_with_fallback(vec![], response)
    }

    /// Number of calls made so far.
    pub fn call_count(&self) -> usize {
        self.invocations.lock().unwrap().len()
    }

    /// Message lists this mock was invoked with (cloned).
    pub fn invocations(&self) -> Vec<Vec<Message>> {
        self.invocations.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmClient for MockLlm {
    async fn invoke(&self, messages: &[Message]) -> Result<LlmResponse, AgentError> {
        self.invocations.lock().unwrap().push(messages.to_vec());
        if let Some(next) = self.script.lock().unwrap().pop_front() {
            return Ok(next);
        }
        match &self.fallback {
            Some(f) => Ok(f.clone()),
            None => Err(AgentError::Llm("mock script exhausted".to_string())),
        }
    }
}
