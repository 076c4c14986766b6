//! Profile tool: patch one section, regenerate summaries, persist, log.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::{json, Value};
use stream_event::ClientEvent;

use crate::error::AgentError;
use crate::kb::KnowledgeSource;
use crate::services::Services;
use crate::state::ExecutedAction;
use crate::store::{merge_section_patch, DurableEffect};
use crate::summary;

use super::{Command, StateUpdates, Tool, ToolSpec, TurnView};

/// `update_user_profile`: patches one of the five profile sections.
pub struct UpdateUserProfileTool;

#[async_trait]
impl Tool for UpdateUserProfileTool {
    fn name(&self) -> &str {
        "update_user_profile"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            description: Some(
                "Atualiza uma secção do perfil do utilizador com os dados que ele partilhou. \
                 O patch é um objeto JSON; valores null apagam campos."
                    .to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "section": {
                        "type": "string",
                        "enum": ["fiscal", "budget", "renovation", "preferences", "goals"],
                    },
                    "patch": {"type": "object"},
                },
                "required": ["section", "patch"],
            }),
        }
    }

    async fn call(
        &self,
        args: Value,
        turn: &TurnView<'_>,
        services: &Services,
    ) -> Result<Command, AgentError> {
        let section = args
            .get("section")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let patch = args.get("patch").cloned().unwrap_or(json!({}));
        if patch.as_object().map(|o| o.is_empty()).unwrap_or(true) {
            return Ok(Command::error("o patch não pode ser vazio"));
        }

        let profile = services.store.get_profile(turn.user_id).await?;
        let mut sections: BTreeMap<String, Value> =
            profile.as_ref().map(|p| p.sections.clone()).unwrap_or_default();
        let old_value = sections.get(&section).cloned();

        let mut merged = old_value.clone().unwrap_or(json!({}));
        merge_section_patch(&mut merged, &patch);
        sections.insert(section.clone(), merged.clone());

        let section_summary = summary::section_summary(&section, &merged);
        let master = summary::master_summary(&sections);

        let mut kb = turn.knowledge.clone();
        kb.write(
            "user/profile",
            Some(&master),
            Some(&master),
            KnowledgeSource::Store,
        );
        let section_key = format!("user/{}", section);
        let pretty =
            serde_json::to_string_pretty(&merged).unwrap_or_else(|_| merged.to_string());
        kb.write(
            &section_key,
            Some(&section_summary),
            Some(&format!("{}\n\n{}", section_summary, pretty)),
            KnowledgeSource::Store,
        );

        let action = ExecutedAction {
            action_type: "profile_update".into(),
            entity_type: "profile".into(),
            entity_id: turn.user_id.to_string(),
            field_changed: Some(section.clone()),
            old_value: old_value.map(|v| v.to_string()),
            new_value: Some(merged.to_string()),
            confidence: 0.9,
            confirmed_by_user: false,
            description: format!("Perfil atualizado: {}", section_summary),
        };
        let event = ClientEvent::Action {
            action_type: action.action_type.clone(),
            entity_type: action.entity_type.clone(),
            entity_id: action.entity_id.clone(),
            description: action.description.clone(),
        };

        Ok(Command::success(
            format!("Perfil atualizado. {}", section_summary),
            StateUpdates {
                knowledge: Some(kb),
                stream_events: vec![event],
                executed_actions: vec![action],
                touched_keys: vec!["user/profile".into(), section_key],
                ..Default::default()
            },
            vec![DurableEffect::UpsertProfile {
                section,
                patch,
                section_summary,
                master_summary: master,
            }],
        ))
    }
}
