//! Agent: one tool-capable LLM call per cycle, bounded by the turn budget.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::AgentError;
use crate::graph::{Next, Node, RunContext};
use crate::message::Message;
use crate::retry::{run_with_retry, RetryPolicy};
use crate::services::Services;
use crate::state::TurnState;

/// Calls the LLM with the persona prompt, the latest context refresh, and the
/// chat history. The response is either tool calls (routed to the tools node)
/// or final text (routed to post-process).
pub struct AgentNode {
    services: Services,
}

impl AgentNode {
    pub fn new(services: Services) -> Self {
        Self { services }
    }
}

#[async_trait]
impl Node<TurnState> for AgentNode {
    fn id(&self) -> &str {
        "agent"
    }

    async fn run(&self, state: TurnState) -> Result<(TurnState, Next), AgentError> {
        let mut state = state;
        if state.cycles >= self.services.config.max_cycles {
            return Err(AgentError::TurnBudgetExceeded(state.cycles));
        }
        state.cycles += 1;

        // Timeouts and transport failures are transient; retried with backoff
        // within a bounded budget before the turn fails.
        let llm_timeout = self.services.config.llm_timeout;
        let retry = RetryPolicy::exponential(
            2,
            Duration::from_secs(1),
            Duration::from_secs(10),
            2.0,
        );
        let response = run_with_retry(&retry, || async {
            tokio::time::timeout(llm_timeout, self.services.llm.invoke(&state.messages))
                .await
                .map_err(|_| {
                    AgentError::Transient(format!("llm call timed out after {:?}", llm_timeout))
                })?
        })
        .await?;

        if let Some(usage) = &response.usage {
            let mut total = state.total_usage.take().unwrap_or_default();
            total.add(usage);
            state.total_usage = Some(total);
        }

        tracing::debug!(
            cycle = state.cycles,
            tool_calls = response.tool_calls.len(),
            "agent responded"
        );
        state.messages.push(Message::assistant_with_tools(
            response.content,
            response.tool_calls,
        ));
        Ok((state, Next::Continue))
    }

    /// Races the LLM call against the run's cancellation token so a client
    /// disconnect does not wait out the full call timeout.
    async fn run_with_context(
        &self,
        state: TurnState,
        ctx: &RunContext<TurnState>,
    ) -> Result<(TurnState, Next), AgentError> {
        tokio::select! {
            result = self.run(state) => result,
            _ = ctx.cancel.cancelled() => Err(AgentError::Cancelled),
        }
    }
}
