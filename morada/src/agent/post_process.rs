//! Post-process: persist the turn, log actions, demote stale knowledge.

use async_trait::async_trait;
use stream_event::ClientEvent;
use uuid::Uuid;

use crate::error::AgentError;
use crate::graph::{Next, Node};
use crate::message::Message;
use crate::services::Services;
use crate::state::TurnState;
use crate::store::ActionLogEntry;

/// Terminal node of a successful turn: appends every non-system message to
/// the message store, writes executed actions to the action log (queueing for
/// retry instead of failing the turn), demotes unreferenced knowledge, bumps
/// the conversation message count, clears the turn's action list, and emits
/// the final `message` event.
pub struct PostProcessNode {
    services: Services,
}

impl PostProcessNode {
    pub fn new(services: Services) -> Self {
        Self { services }
    }
}

#[async_trait]
impl Node<TurnState> for PostProcessNode {
    fn id(&self) -> &str {
        "post_process"
    }

    async fn run(&self, state: TurnState) -> Result<(TurnState, Next), AgentError> {
        let mut state = state;
        let store = &self.services.store;

        let mut persisted = 0i64;
        let mut last_message_id: Option<String> = None;
        for message in &state.messages {
            if message.is_system() {
                continue;
            }
            let (tool_calls, tool_call_id) = match message {
                Message::Assistant { tool_calls, .. } if !tool_calls.is_empty() => (
                    Some(serde_json::to_string(tool_calls).map_err(|e| {
                        AgentError::ExecutionFailed(format!("tool_calls encode: {}", e))
                    })?),
                    None,
                ),
                Message::Tool { call_id, .. } => (None, Some(call_id.clone())),
                _ => (None, None),
            };
            let id = store
                .append_message(
                    &state.conversation_id,
                    message.role(),
                    message.content(),
                    tool_calls,
                    tool_call_id,
                )
                .await?;
            last_message_id = Some(id);
            persisted += 1;
        }
        store
            .increment_message_count(&state.conversation_id, persisted)
            .await?;

        for action in &state.executed_actions {
            let entry = ActionLogEntry {
                id: format!("act-{}", Uuid::new_v4()),
                user_id: state.user_id.clone(),
                conversation_id: state.conversation_id.clone(),
                message_id: last_message_id.clone(),
                action_type: action.action_type.clone(),
                entity_type: action.entity_type.clone(),
                entity_id: action.entity_id.clone(),
                field_changed: action.field_changed.clone(),
                old_value: action.old_value.clone(),
                new_value: action.new_value.clone(),
                trigger_message: Some(state.incoming.clone()),
                confidence: action.confidence,
                confirmed_by_user: action.confirmed_by_user,
                timestamp: chrono::Utc::now().to_rfc3339(),
            };
            // The mutation already committed; a failed log is retried once
            // and then queued, never failing the turn.
            if let Err(first) = store.log_action(&entry).await {
                tracing::warn!(error = %first, action = %entry.action_type, "action log failed, retrying");
                if let Err(second) = store.log_action(&entry).await {
                    tracing::warn!(error = %second, action = %entry.action_type, "action log retry failed, queueing");
                    self.services.action_retries.push(entry).await;
                }
            }
        }

        let protected = state.knowledge.protected_set();
        let referenced = state.touched_keys.clone();
        state.knowledge.demote_stale(&referenced, &protected);
        state.executed_actions.clear();

        let final_text = state.last_assistant_reply().unwrap_or_default().to_string();
        state.push_event(ClientEvent::Message {
            content: final_text,
            done: true,
        });

        tracing::debug!(
            conversation = %state.conversation_id,
            persisted,
            "turn post-processed"
        );
        Ok((state, Next::Continue))
    }
}
