//! Turn runner: one request in, one graph run out.

use std::collections::HashSet;

use tokio_stream::StreamExt;

use crate::error::AgentError;
use crate::graph::{CompiledStateGraph, GraphStream};
use crate::services::Services;
use crate::state::TurnState;
use crate::stream::{StreamEvent, StreamMode};
use crate::tools::ToolRegistry;

/// One incoming client turn.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub user_id: String,
    pub conversation_id: Option<String>,
    pub message: String,
}

/// Owns the compiled turn graph and per-process services; invoked once per
/// request on an independent state.
pub struct TurnRunner {
    graph: CompiledStateGraph<TurnState>,
    services: Services,
}

impl TurnRunner {
    pub fn new(services: Services, registry: ToolRegistry) -> Result<Self, AgentError> {
        let graph = super::build_turn_graph(services.clone(), registry)?;
        Ok(Self { graph, services })
    }

    pub fn initial_state(request: &TurnRequest) -> TurnState {
        TurnState::new(
            request.user_id.clone(),
            request.conversation_id.clone(),
            request.message.clone(),
        )
    }

    /// Starts a streamed run with a per-request cancellation token; the
    /// gateway consumes `Updates` chunks.
    pub fn stream(&self, request: &TurnRequest, services: &Services) -> GraphStream<TurnState> {
        self.graph.stream(
            Self::initial_state(request),
            HashSet::from([StreamMode::Updates]),
            services.cancel.clone(),
        )
    }

    /// Runs a whole turn to completion. On budget exhaustion the user turn is
    /// still persisted (count +1) before the error is returned.
    pub async fn run(&self, request: &TurnRequest) -> Result<TurnState, AgentError> {
        let services = self.services.for_request();
        let run = self.stream(request, &services);
        let mut events = run.events;

        let mut observed_conversation = request.conversation_id.clone();
        while let Some(event) = events.next().await {
            if let StreamEvent::Updates { state, .. } = event {
                if !state.conversation_id.is_empty() {
                    observed_conversation = Some(state.conversation_id);
                }
            }
        }

        let result = run
            .handle
            .await
            .map_err(|e| AgentError::ExecutionFailed(format!("turn task join: {}", e)))?;
        match result {
            Ok(state) => Ok(state),
            Err(e @ AgentError::TurnBudgetExceeded(_)) => {
                self.persist_user_turn_after_failure(request, observed_conversation.as_deref())
                    .await;
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Persists the user turn (and only it) when the agent loop never reached
    /// post-process. Returns the conversation id used.
    pub async fn persist_user_turn_after_failure(
        &self,
        request: &TurnRequest,
        observed_conversation: Option<&str>,
    ) -> Option<String> {
        let store = &self.services.store;
        let conversation_id = match observed_conversation {
            Some(id) => id.to_string(),
            None => match store.create_conversation(&request.user_id).await {
                Ok(c) => c.id,
                Err(e) => {
                    tracing::warn!(error = %e, "could not create conversation for failed turn");
                    return None;
                }
            },
        };
        if let Err(e) = store
            .append_message(&conversation_id, "user", &request.message, None, None)
            .await
        {
            tracing::warn!(error = %e, "could not persist user turn after failure");
            return Some(conversation_id);
        }
        if let Err(e) = store.increment_message_count(&conversation_id, 1).await {
            tracing::warn!(error = %e, "could not bump message count after failure");
        }
        Some(conversation_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LlmResponse, MockLlm};
    use crate::store::AdvisorStore;
    use crate::testutil::test_services_with_llm;
    use crate::tools::default_registry;
    use std::sync::Arc;

    /// **Scenario**: a plain greeting turn runs hydrate → agent →
    /// post-process; user and assistant messages persist, zero actions logged.
    #[tokio::test]
    async fn greeting_turn_persists_messages() {
        let llm = Arc::new(MockLlm::scripted(vec![LlmResponse::text(
            "Olá! Em que posso ajudar na procura de casa?",
        )]));
        let (_dir, services) = test_services_with_llm(llm).await;
        let runner = TurnRunner::new(services.clone(), default_registry()).unwrap();

        let state = runner
            .run(&TurnRequest {
                user_id: "u1".into(),
                conversation_id: None,
                message: "Olá".into(),
            })
            .await
            .unwrap();

        let msgs = services
            .store
            .list_messages(&state.conversation_id)
            .await
            .unwrap();
        let roles: Vec<_> = msgs.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["user", "assistant"]);

        let actions = services
            .store
            .list_actions("u1", &state.conversation_id)
            .await
            .unwrap();
        assert!(actions.is_empty());
    }

    /// **Scenario**: an agent that never stops calling tools hits the cycle
    /// ceiling; the error is TurnBudgetExceeded and only the user turn is
    /// persisted.
    #[tokio::test]
    async fn budget_exceeded_persists_user_turn_only() {
        let llm = Arc::new(MockLlm::always(LlmResponse::tool_call(
            "manage_todos",
            serde_json::json!({"action": "list"}),
        )));
        let (_dir, mut services_base) = test_services_with_llm(llm).await;
        services_base.config.max_cycles = 3;
        let services = services_base.clone();
        let runner = TurnRunner::new(services.clone(), default_registry()).unwrap();

        let conv = services.store.create_conversation("u1").await.unwrap();
        let err = runner
            .run(&TurnRequest {
                user_id: "u1".into(),
                conversation_id: Some(conv.id.clone()),
                message: "entra em loop".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::TurnBudgetExceeded(_)));

        // Only the user turn was persisted; the count reflects exactly it.
        let msgs = services.store.list_messages(&conv.id).await.unwrap();
        let roles: Vec<_> = msgs.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["user"]);
        let conv = services
            .store
            .get_conversation("u1", &conv.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(conv.message_count, 1);
    }
}
