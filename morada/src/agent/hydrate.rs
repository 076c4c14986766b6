//! Hydrate: reconstitute the turn state from the durable store.

use async_trait::async_trait;

use crate::error::AgentError;
use crate::graph::{Next, Node};
use crate::kb::{KnowledgeBase, KnowledgeSource};
use crate::message::Message;
use crate::prompts::SYSTEM_PROMPT;
use crate::services::Services;
use crate::state::{CurrentFocus, TurnState};
use crate::store::PROFILE_SECTIONS;
use crate::summary;

/// First node of every turn: creates the conversation row when needed, reads
/// profile + portfolio + prior session summary (≤3 store round trips inside
/// `hydrate`), builds the knowledge base, and seeds the message list with the
/// persona prompt, the context block, and the incoming user message.
pub struct HydrateNode {
    services: Services,
}

impl HydrateNode {
    pub fn new(services: Services) -> Self {
        Self { services }
    }
}

#[async_trait]
impl Node<TurnState> for HydrateNode {
    fn id(&self) -> &str {
        "hydrate"
    }

    async fn run(&self, state: TurnState) -> Result<(TurnState, Next), AgentError> {
        let mut state = state;
        let store = &self.services.store;

        if state.conversation_id.is_empty() {
            let conversation = store.create_conversation(&state.user_id).await?;
            state.conversation_id = conversation.id;
        } else if store
            .get_conversation(&state.user_id, &state.conversation_id)
            .await?
            .is_none()
        {
            return Err(AgentError::InvalidInput(format!(
                "unknown conversation: {}",
                state.conversation_id
            )));
        }

        let bundle = store.hydrate(&state.user_id).await?;

        let mut kb = KnowledgeBase::new(self.services.config.min_lines_for_partial_read);

        let profile_text = summary::profile_summary(bundle.profile.as_ref());
        kb.pin(
            "user/profile",
            &profile_text,
            Some(&profile_text),
            KnowledgeSource::Store,
        );

        kb.pin(
            "portfolio/index",
            &summary::portfolio_index_summary(&bundle.portfolio),
            Some(&summary::portfolio_index_content(&bundle.portfolio)),
            KnowledgeSource::Store,
        );

        let active = bundle.portfolio.iter().find(|e| e.item.is_active);
        if let Some(entry) = active {
            let resumo_key = format!("portfolio/{}/resumo", entry.item.id);
            match &entry.analysis {
                Some(analysis) => kb.pin(
                    &resumo_key,
                    &summary::analysis_summary(analysis, &entry.property),
                    Some(&summary::analysis_resumo_content(analysis, &entry.property)),
                    KnowledgeSource::Store,
                ),
                None => kb.pin(
                    &resumo_key,
                    "Sem análise disponível para este imóvel",
                    None,
                    KnowledgeSource::Store,
                ),
            }
        }

        match &bundle.last_session_summary {
            Some(text) => kb.pin(
                "session/resumo_anterior",
                "Resumo da sessão anterior",
                Some(text),
                KnowledgeSource::Store,
            ),
            None => kb.pin(
                "session/resumo_anterior",
                summary::NO_PRIOR_SESSION_SUMMARY,
                None,
                KnowledgeSource::Store,
            ),
        }

        for section in PROFILE_SECTIONS {
            let section_text = bundle
                .profile
                .as_ref()
                .and_then(|p| p.section_summaries.get(section).cloned())
                .unwrap_or_else(|| {
                    summary::section_summary(section, &serde_json::Value::Null)
                });
            kb.index(format!("user/{}", section), section_text, KnowledgeSource::Store);
        }

        for entry in &bundle.portfolio {
            if entry.item.is_active {
                if entry.analysis.is_some() {
                    kb.index(
                        format!("portfolio/{}/analise", entry.item.id),
                        "Análise detalhada por divisão",
                        KnowledgeSource::Store,
                    );
                }
                continue;
            }
            let resumo_summary = match &entry.analysis {
                Some(analysis) => summary::analysis_summary(analysis, &entry.property),
                None => "Sem análise disponível para este imóvel".to_string(),
            };
            kb.index(
                format!("portfolio/{}/resumo", entry.item.id),
                resumo_summary,
                KnowledgeSource::Store,
            );
            if entry.analysis.is_some() {
                kb.index(
                    format!("portfolio/{}/analise", entry.item.id),
                    "Análise detalhada por divisão",
                    KnowledgeSource::Store,
                );
            }
        }

        state.current_focus = active.map(|entry| CurrentFocus {
            property_id: entry.item.id.clone(),
            topic: "imóvel ativo".into(),
            depth: 1,
        });

        let context_block = kb.render(&state.todos, state.current_focus.as_ref());
        state.knowledge = kb;
        state.messages = vec![
            Message::persona(SYSTEM_PROMPT),
            Message::context_refresh(context_block),
            Message::user(state.incoming.clone()),
        ];

        tracing::debug!(
            user = %state.user_id,
            conversation = %state.conversation_id,
            portfolio = bundle.portfolio.len(),
            "turn hydrated"
        );
        Ok((state, Next::Continue))
    }
}
