//! Portfolio tools: save, archive, activate, and search saved properties.

use async_trait::async_trait;
use serde_json::{json, Value};
use stream_event::ClientEvent;
use uuid::Uuid;

use crate::error::AgentError;
use crate::kb::KnowledgeSource;
use crate::services::Services;
use crate::state::{CurrentFocus, ExecutedAction};
use crate::store::{DurableEffect, PortfolioEntry, PortfolioItem, PortfolioStatus};
use crate::summary;

use super::{refresh_portfolio_index, Command, StateUpdates, Tool, ToolSpec, TurnView};

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

fn display_name(entry: &PortfolioEntry) -> String {
    entry
        .item
        .nickname
        .clone()
        .unwrap_or_else(|| entry.property.title.clone())
}

/// `save_to_portfolio`: adds an already-analysed property to the portfolio.
pub struct SaveToPortfolioTool;

#[async_trait]
impl Tool for SaveToPortfolioTool {
    fn name(&self) -> &str {
        "save_to_portfolio"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            description: Some(
                "Guarda um imóvel já analisado no portfólio. Usa o URL do anúncio."
                    .to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "property_url": {"type": "string"},
                    "nickname": {"type": "string"},
                },
                "required": ["property_url"],
            }),
        }
    }

    async fn call(
        &self,
        args: Value,
        turn: &TurnView<'_>,
        services: &Services,
    ) -> Result<Command, AgentError> {
        let url = args
            .get("property_url")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        let nickname = args
            .get("nickname")
            .and_then(|v| v.as_str())
            .map(String::from);

        let Some(property) = services.store.get_property_by_external_id(url).await? else {
            return Ok(Command::error(
                "imóvel desconhecido; corre primeiro trigger_property_analysis com o URL",
            ));
        };
        let Some(analysis) = services
            .store
            .get_latest_analysis(
                turn.user_id,
                &property.id,
                crate::store::ANALYSIS_KIND_RENOVATION,
            )
            .await?
        else {
            return Ok(Command::error(
                "este imóvel ainda não tem análise; corre trigger_property_analysis primeiro",
            ));
        };

        let mut entries = services.store.hydrate(turn.user_id).await?.portfolio;
        if let Some(existing) = entries.iter().find(|e| e.item.property_id == property.id) {
            return Ok(Command::error(format!(
                "este imóvel já está no portfólio como ({})",
                existing.item.id
            )));
        }

        let item = PortfolioItem {
            id: format!("item-{}", Uuid::new_v4()),
            user_id: turn.user_id.to_string(),
            property_id: property.id.clone(),
            nickname,
            status: PortfolioStatus::Saved,
            is_active: false,
            created_at: now(),
            last_active_at: now(),
        };
        let entry = PortfolioEntry {
            item: item.clone(),
            property,
            analysis: Some(analysis),
        };
        entries.push(entry.clone());

        let mut kb = turn.knowledge.clone();
        refresh_portfolio_index(&mut kb, &entries);
        let resumo_key = format!("portfolio/{}/resumo", item.id);
        kb.write(
            &resumo_key,
            Some(&summary::analysis_summary(
                entry.analysis.as_ref().unwrap(),
                &entry.property,
            )),
            None,
            KnowledgeSource::Store,
        );

        let action = ExecutedAction {
            action_type: "portfolio_add".into(),
            entity_type: "portfolio_item".into(),
            entity_id: item.id.clone(),
            field_changed: None,
            old_value: None,
            new_value: Some(display_name(&entry)),
            confidence: 1.0,
            confirmed_by_user: false,
            description: format!("Guardado no portfólio: {}", display_name(&entry)),
        };
        let event = ClientEvent::Action {
            action_type: action.action_type.clone(),
            entity_type: action.entity_type.clone(),
            entity_id: action.entity_id.clone(),
            description: action.description.clone(),
        };

        Ok(Command::success(
            format!("Guardado no portfólio como ({}).", item.id),
            StateUpdates {
                knowledge: Some(kb),
                stream_events: vec![event],
                executed_actions: vec![action],
                touched_keys: vec!["portfolio/index".into(), resumo_key],
                ..Default::default()
            },
            vec![DurableEffect::CreatePortfolioItem(item)],
        ))
    }
}

/// `remove_from_portfolio`: soft-archives an item after explicit confirmation.
pub struct RemoveFromPortfolioTool;

#[async_trait]
impl Tool for RemoveFromPortfolioTool {
    fn name(&self) -> &str {
        "remove_from_portfolio"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            description: Some(
                "Arquiva um imóvel do portfólio. Só chama com confirmed=true depois de o \
                 utilizador confirmar explicitamente."
                    .to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "item_id": {"type": "string"},
                    "confirmed": {"type": "boolean"},
                },
                "required": ["item_id", "confirmed"],
            }),
        }
    }

    async fn call(
        &self,
        args: Value,
        turn: &TurnView<'_>,
        services: &Services,
    ) -> Result<Command, AgentError> {
        let item_id = args
            .get("item_id")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let confirmed = args
            .get("confirmed")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        if !confirmed {
            return Ok(Command::error(
                "arquivar exige confirmação explícita do utilizador; pergunta primeiro",
            ));
        }

        let entries = services.store.hydrate(turn.user_id).await?.portfolio;
        let Some(target) = entries.iter().find(|e| e.item.id == item_id) else {
            return Ok(Command::error(format!(
                "não encontrei o imóvel ({}) no portfólio",
                item_id
            )));
        };
        let name = display_name(target);

        let remaining: Vec<PortfolioEntry> = entries
            .iter()
            .filter(|e| e.item.id != item_id)
            .cloned()
            .collect();

        let mut kb = turn.knowledge.clone();
        refresh_portfolio_index(&mut kb, &remaining);
        for leaf in ["resumo", "analise"] {
            let key = format!("portfolio/{}/{}", item_id, leaf);
            if kb.contains(&key) {
                // Pinned keys stay for the rest of the turn; hydrate drops
                // them next turn.
                let _ = kb.remove(&key);
            }
        }

        let clears_focus = turn
            .current_focus
            .map(|f| f.property_id == item_id)
            .unwrap_or(false);

        let action = ExecutedAction {
            action_type: "portfolio_archive".into(),
            entity_type: "portfolio_item".into(),
            entity_id: item_id.clone(),
            field_changed: Some("status".into()),
            old_value: Some(PortfolioStatus::Saved.as_str().into()),
            new_value: Some(PortfolioStatus::Archived.as_str().into()),
            confidence: 1.0,
            confirmed_by_user: true,
            description: format!("Arquivado: {}", name),
        };
        let event = ClientEvent::Action {
            action_type: action.action_type.clone(),
            entity_type: action.entity_type.clone(),
            entity_id: action.entity_id.clone(),
            description: action.description.clone(),
        };

        Ok(Command::success(
            format!("Arquivei {} ({}).", name, item_id),
            StateUpdates {
                knowledge: Some(kb),
                current_focus: clears_focus.then_some(None),
                stream_events: vec![event],
                executed_actions: vec![action],
                touched_keys: vec!["portfolio/index".into()],
                ..Default::default()
            },
            vec![DurableEffect::SetPortfolioStatus {
                item_id,
                status: PortfolioStatus::Archived,
            }],
        ))
    }
}

/// `switch_active_property`: exclusively activates one item and loads its
/// analysis into knowledge.
pub struct SwitchActivePropertyTool;

#[async_trait]
impl Tool for SwitchActivePropertyTool {
    fn name(&self) -> &str {
        "switch_active_property"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            description: Some(
                "Torna um imóvel do portfólio o ativo da conversa e carrega o resumo da análise."
                    .to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "item_id": {"type": "string"},
                },
                "required": ["item_id"],
            }),
        }
    }

    async fn call(
        &self,
        args: Value,
        turn: &TurnView<'_>,
        services: &Services,
    ) -> Result<Command, AgentError> {
        let item_id = args
            .get("item_id")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        let mut entries = services.store.hydrate(turn.user_id).await?.portfolio;
        if !entries.iter().any(|e| e.item.id == item_id) {
            return Ok(Command::error(format!(
                "não encontrei o imóvel ({}) no portfólio",
                item_id
            )));
        }
        for e in entries.iter_mut() {
            e.item.is_active = e.item.id == item_id;
        }
        let target = entries
            .iter()
            .find(|e| e.item.id == item_id)
            .expect("checked above")
            .clone();

        let mut kb = turn.knowledge.clone();
        refresh_portfolio_index(&mut kb, &entries);
        let resumo_key = format!("portfolio/{}/resumo", item_id);
        let analise_key = format!("portfolio/{}/analise", item_id);
        let mut touched = vec!["portfolio/index".to_string()];
        match &target.analysis {
            Some(analysis) => {
                kb.write(
                    &resumo_key,
                    Some(&summary::analysis_summary(analysis, &target.property)),
                    Some(&summary::analysis_resumo_content(analysis, &target.property)),
                    KnowledgeSource::Store,
                );
                if !kb.contains(&analise_key) {
                    kb.index(
                        &analise_key,
                        "Análise detalhada por divisão",
                        KnowledgeSource::Store,
                    );
                }
                touched.push(resumo_key.clone());
            }
            None => {
                kb.write(
                    &resumo_key,
                    Some("Sem análise disponível para este imóvel"),
                    None,
                    KnowledgeSource::Store,
                );
            }
        }

        let name = display_name(&target);
        let action = ExecutedAction {
            action_type: "portfolio_switch_active".into(),
            entity_type: "portfolio_item".into(),
            entity_id: item_id.clone(),
            field_changed: Some("is_active".into()),
            old_value: None,
            new_value: Some("true".into()),
            confidence: 1.0,
            confirmed_by_user: false,
            description: format!("Imóvel ativo: {}", name),
        };
        let event = ClientEvent::Action {
            action_type: action.action_type.clone(),
            entity_type: action.entity_type.clone(),
            entity_id: action.entity_id.clone(),
            description: action.description.clone(),
        };

        Ok(Command::success(
            format!("Imóvel ativo agora: {} ({}).", name, item_id),
            StateUpdates {
                knowledge: Some(kb),
                current_focus: Some(Some(CurrentFocus {
                    property_id: item_id.clone(),
                    topic: "análise".into(),
                    depth: 1,
                })),
                stream_events: vec![event],
                executed_actions: vec![action],
                touched_keys: touched,
                ..Default::default()
            },
            vec![
                DurableEffect::SetActive {
                    item_id: item_id.clone(),
                },
                DurableEffect::TouchPortfolioItem { item_id },
            ],
        ))
    }
}

/// `search_portfolio`: resolves a natural-language reference to an item id.
/// Read-only.
pub struct SearchPortfolioTool;

impl SearchPortfolioTool {
    /// Keyword-match count of `query` tokens against the entry's searchable
    /// text (nickname, title, location, typology, price).
    fn score(query_tokens: &[String], entry: &PortfolioEntry) -> usize {
        let haystack = format!(
            "{} {} {} {} {}",
            entry.item.nickname.clone().unwrap_or_default(),
            entry.property.title,
            entry.property.location,
            entry.property.typology,
            entry.property.price_eur,
        )
        .to_lowercase();
        query_tokens
            .iter()
            .filter(|t| haystack.contains(t.as_str()))
            .count()
    }
}

#[async_trait]
impl Tool for SearchPortfolioTool {
    fn name(&self) -> &str {
        "search_portfolio"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            description: Some(
                "Encontra o imóvel do portfólio a que o utilizador se refere \
                 (por alcunha, zona ou preço). Não altera nada."
                    .to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string"},
                },
                "required": ["query"],
            }),
        }
    }

    async fn call(
        &self,
        args: Value,
        turn: &TurnView<'_>,
        services: &Services,
    ) -> Result<Command, AgentError> {
        let query = args
            .get("query")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_lowercase();
        let tokens: Vec<String> = query.split_whitespace().map(String::from).collect();
        if tokens.is_empty() {
            return Ok(Command::error("a pesquisa não pode ser vazia"));
        }

        let entries = services.store.hydrate(turn.user_id).await?.portfolio;
        if entries.is_empty() {
            return Ok(Command::error("o portfólio está vazio"));
        }

        let mut scored: Vec<(usize, &PortfolioEntry)> = entries
            .iter()
            .map(|e| (Self::score(&tokens, e), e))
            .collect();
        // Keyword count, then recency, then id for a stable order.
        scored.sort_by(|a, b| {
            b.0.cmp(&a.0)
                .then_with(|| b.1.item.last_active_at.cmp(&a.1.item.last_active_at))
                .then_with(|| a.1.item.id.cmp(&b.1.item.id))
        });

        let top_score = scored[0].0;
        if top_score == 0 {
            return Ok(Command::error(format!(
                "não encontrei nenhum imóvel correspondente a \"{}\"",
                query
            )));
        }

        let candidates: Vec<&PortfolioEntry> = scored
            .iter()
            .take_while(|(s, _)| *s == top_score)
            .map(|(_, e)| *e)
            .collect();

        if candidates.len() == 1 {
            let e = candidates[0];
            Ok(Command::text(format!(
                "Encontrado: ({}) {} — {}, {}",
                e.item.id,
                display_name(e),
                e.property.location,
                summary::format_eur(e.property.price_eur),
            )))
        } else {
            let list = candidates
                .iter()
                .map(|e| {
                    format!(
                        "- ({}) {} — {}",
                        e.item.id,
                        display_name(e),
                        e.property.location
                    )
                })
                .collect::<Vec<_>>()
                .join("\n");
            Ok(Command::text(format!(
                "Vários candidatos; confirma com o utilizador qual destes:\n{}",
                list
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::TurnState;
    use crate::store::{AdvisorStore, AnalysisRecord, ListingImage, PropertyRecord};
    use crate::testutil::test_services;

    async fn seed(
        store: &std::sync::Arc<dyn AdvisorStore>,
        suffix: &str,
        nickname: &str,
        location: &str,
        active: bool,
    ) {
        store
            .upsert_property(&PropertyRecord {
                id: format!("prop-{}", suffix),
                external_id: format!("https://example.test/p/{}", suffix),
                url: format!("https://example.test/p/{}", suffix),
                title: format!("T2 {}", location),
                location: location.into(),
                price_eur: 285_000,
                typology: "T2".into(),
                area_m2: 70.0,
                images: vec![ListingImage {
                    url: "u".into(),
                    tag: None,
                }],
                scraped_at: now(),
            })
            .await
            .unwrap();
        store
            .create_portfolio_item(&PortfolioItem {
                id: format!("item-{}", suffix),
                user_id: "u1".into(),
                property_id: format!("prop-{}", suffix),
                nickname: Some(nickname.into()),
                status: PortfolioStatus::Saved,
                is_active: active,
                created_at: now(),
                last_active_at: now(),
            })
            .await
            .unwrap();
        store
            .create_analysis(&AnalysisRecord {
                id: format!("an-{}", suffix),
                user_id: "u1".into(),
                property_id: format!("prop-{}", suffix),
                kind: crate::store::ANALYSIS_KIND_RENOVATION.into(),
                cost_min: 5_000,
                cost_max: 12_000,
                confidence: 0.7,
                narrative: "Precisa de obras na cozinha.".into(),
                created_at: now(),
            })
            .await
            .unwrap();
    }

    /// **Scenario**: searching "Alfama" resolves to the single matching item.
    #[tokio::test]
    async fn search_resolves_by_location() {
        let (_dir, services) = test_services().await;
        seed(&services.store, "1", "o de Alfama", "Alfama, Lisboa", false).await;
        seed(&services.store, "2", "o do Porto", "Cedofeita, Porto", false).await;

        let state = TurnState::new("u1", Some("c1".into()), "esquece o de Alfama");
        let cmd = SearchPortfolioTool
            .call(
                json!({"query": "Alfama"}),
                &TurnView::of(&state),
                &services,
            )
            .await
            .unwrap();
        let Command::Success { response_text, .. } = cmd else {
            panic!("expected success")
        };
        assert!(response_text.contains("(item-1)"));
        assert!(!response_text.contains("item-2"));
    }

    /// **Scenario**: a tie at the top returns the candidate list instead of
    /// committing to one.
    #[tokio::test]
    async fn search_tie_returns_candidates() {
        let (_dir, services) = test_services().await;
        seed(&services.store, "1", "casa lisboa", "Alfama, Lisboa", false).await;
        seed(&services.store, "2", "casa lisboa 2", "Benfica, Lisboa", false).await;

        let state = TurnState::new("u1", Some("c1".into()), "o de lisboa");
        let cmd = SearchPortfolioTool
            .call(
                json!({"query": "lisboa"}),
                &TurnView::of(&state),
                &services,
            )
            .await
            .unwrap();
        let Command::Success { response_text, .. } = cmd else {
            panic!("expected success")
        };
        assert!(response_text.contains("Vários candidatos"));
        assert!(response_text.contains("item-1"));
        assert!(response_text.contains("item-2"));
    }

    /// **Scenario**: no match is a tool error.
    #[tokio::test]
    async fn search_no_match_errors() {
        let (_dir, services) = test_services().await;
        seed(&services.store, "1", "o de Alfama", "Alfama, Lisboa", false).await;
        let state = TurnState::new("u1", Some("c1".into()), "x");
        let cmd = SearchPortfolioTool
            .call(
                json!({"query": "faro"}),
                &TurnView::of(&state),
                &services,
            )
            .await
            .unwrap();
        assert!(cmd.is_error());
    }

    /// **Scenario**: archiving without confirmation is refused; with it, the
    /// status effect and action are produced and the index drops the item.
    #[tokio::test]
    async fn archive_requires_confirmation() {
        let (_dir, services) = test_services().await;
        seed(&services.store, "1", "o de Alfama", "Alfama, Lisboa", false).await;
        let state = TurnState::new("u1", Some("c1".into()), "esquece");

        let cmd = RemoveFromPortfolioTool
            .call(
                json!({"item_id": "item-1", "confirmed": false}),
                &TurnView::of(&state),
                &services,
            )
            .await
            .unwrap();
        assert!(cmd.is_error());

        let cmd = RemoveFromPortfolioTool
            .call(
                json!({"item_id": "item-1", "confirmed": true}),
                &TurnView::of(&state),
                &services,
            )
            .await
            .unwrap();
        let Command::Success {
            updates, effects, ..
        } = cmd
        else {
            panic!("expected success")
        };
        assert!(matches!(
            effects[0],
            DurableEffect::SetPortfolioStatus {
                status: PortfolioStatus::Archived,
                ..
            }
        ));
        assert!(updates.executed_actions[0].confirmed_by_user);
        let kb = updates.knowledge.unwrap();
        assert_eq!(
            kb.get("portfolio/index").unwrap().summary,
            summary::EMPTY_PORTFOLIO_SUMMARY
        );
    }

    /// **Scenario**: switching the active property produces the exclusive
    /// SetActive effect, loads the resumo, and sets focus.
    #[tokio::test]
    async fn switch_active_loads_analysis_and_focus() {
        let (_dir, services) = test_services().await;
        seed(&services.store, "1", "o de Alfama", "Alfama, Lisboa", true).await;
        seed(&services.store, "2", "o do Porto", "Cedofeita, Porto", false).await;
        let state = TurnState::new("u1", Some("c1".into()), "muda para o do porto");

        let cmd = SwitchActivePropertyTool
            .call(
                json!({"item_id": "item-2"}),
                &TurnView::of(&state),
                &services,
            )
            .await
            .unwrap();
        let Command::Success {
            updates, effects, ..
        } = cmd
        else {
            panic!("expected success")
        };
        assert!(matches!(effects[0], DurableEffect::SetActive { .. }));
        let focus = updates.current_focus.unwrap().unwrap();
        assert_eq!(focus.property_id, "item-2");
        let kb = updates.knowledge.unwrap();
        let resumo = kb.get("portfolio/item-2/resumo").unwrap();
        assert!(resumo.is_loaded());
        assert!(resumo.summary.contains("obras estimadas"));
        assert!(kb.get("portfolio/index").unwrap().summary.contains("o do Porto"));
    }

    /// **Scenario**: saving an analysed property creates the item and
    /// refreshes the index; saving twice is refused.
    #[tokio::test]
    async fn save_to_portfolio_once() {
        let (_dir, services) = test_services().await;
        // Property + analysis exist, but no portfolio item yet.
        services
            .store
            .upsert_property(&PropertyRecord {
                id: "prop-9".into(),
                external_id: "https://example.test/p/9".into(),
                url: "https://example.test/p/9".into(),
                title: "T1 Graça".into(),
                location: "Graça, Lisboa".into(),
                price_eur: 199_000,
                typology: "T1".into(),
                area_m2: 48.0,
                images: vec![],
                scraped_at: now(),
            })
            .await
            .unwrap();
        services
            .store
            .create_analysis(&AnalysisRecord {
                id: "an-9".into(),
                user_id: "u1".into(),
                property_id: "prop-9".into(),
                kind: crate::store::ANALYSIS_KIND_RENOVATION.into(),
                cost_min: 2_000,
                cost_max: 5_000,
                confidence: 0.8,
                narrative: "Bom estado geral.".into(),
                created_at: now(),
            })
            .await
            .unwrap();

        let state = TurnState::new("u1", Some("c1".into()), "guarda esse");
        let cmd = SaveToPortfolioTool
            .call(
                json!({"property_url": "https://example.test/p/9", "nickname": "o da Graça"}),
                &TurnView::of(&state),
                &services,
            )
            .await
            .unwrap();
        let Command::Success {
            updates, effects, ..
        } = cmd
        else {
            panic!("expected success")
        };
        let DurableEffect::CreatePortfolioItem(item) = &effects[0] else {
            panic!("expected CreatePortfolioItem")
        };
        services.store.apply_effects("u1", &effects).await.unwrap();

        let kb = updates.knowledge.unwrap();
        assert!(kb
            .get("portfolio/index")
            .unwrap()
            .summary
            .contains("1 imóvel guardado"));

        // Second save is refused now that the item exists.
        let cmd = SaveToPortfolioTool
            .call(
                json!({"property_url": "https://example.test/p/9"}),
                &TurnView::of(&state),
                &services,
            )
            .await
            .unwrap();
        match cmd {
            Command::Error { message } => assert!(message.contains(&item.id)),
            _ => panic!("expected error"),
        }
    }

    /// **Scenario**: saving an unanalysed property is refused.
    #[tokio::test]
    async fn save_requires_prior_analysis() {
        let (_dir, services) = test_services().await;
        services
            .store
            .upsert_property(&PropertyRecord {
                id: "prop-8".into(),
                external_id: "https://example.test/p/8".into(),
                url: "https://example.test/p/8".into(),
                title: "T3".into(),
                location: "Sintra".into(),
                price_eur: 310_000,
                typology: "T3".into(),
                area_m2: 95.0,
                images: vec![],
                scraped_at: now(),
            })
            .await
            .unwrap();
        let state = TurnState::new("u1", Some("c1".into()), "guarda");
        let cmd = SaveToPortfolioTool
            .call(
                json!({"property_url": "https://example.test/p/8"}),
                &TurnView::of(&state),
                &services,
            )
            .await
            .unwrap();
        match cmd {
            Command::Error { message } => assert!(message.contains("análise")),
            _ => panic!("expected error"),
        }
    }
}
