//! Deterministic summary templates for profile, portfolio, and analysis
//! projections, plus the one LLM-backed narrative for conversation end.
//!
//! Everything here is pure string templating except
//! [`conversation_narrative`], which falls back to a template when the LLM
//! call fails. User-facing text is Portuguese.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::llm::LlmClient;
use crate::message::Message;
use crate::store::{AnalysisRecord, PortfolioEntry, Profile, PropertyRecord, RoomFeature};

/// Empty-state sentinel for `user/profile`.
pub const EMPTY_PROFILE_SUMMARY: &str =
    "Comprador de primeira casa; perfil ainda por preencher.";

/// Empty-state sentinel for `portfolio/index`.
pub const EMPTY_PORTFOLIO_SUMMARY: &str = "Nenhum imóvel guardado ainda.";

/// Empty-state sentinel for `session/resumo_anterior`.
pub const NO_PRIOR_SESSION_SUMMARY: &str = "Primeira conversa; sem sessão anterior.";

/// Formats an amount in euros with thin spacing: `285000` → `285 000 €`.
pub fn format_eur(amount: i64) -> String {
    let digits = amount.abs().to_string();
    let mut grouped = String::new();
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(' ');
        }
        grouped.push(c);
    }
    if amount < 0 {
        format!("-{} €", grouped)
    } else {
        format!("{} €", grouped)
    }
}

/// One-line summary of a profile section from its JSON value.
pub fn section_summary(section: &str, value: &serde_json::Value) -> String {
    let pairs = match value.as_object() {
        Some(obj) if !obj.is_empty() => obj
            .iter()
            .map(|(k, v)| format!("{}: {}", k, render_scalar(v)))
            .collect::<Vec<_>>()
            .join(", "),
        _ => return format!("{}: sem dados", section_label(section)),
    };
    format!("{}: {}", section_label(section), pairs)
}

/// Master identity summary regenerated whenever a section changes.
pub fn master_summary(sections: &BTreeMap<String, serde_json::Value>) -> String {
    let filled: Vec<&str> = crate::store::PROFILE_SECTIONS
        .iter()
        .copied()
        .filter(|s| {
            sections
                .get(*s)
                .and_then(|v| v.as_object())
                .map(|o| !o.is_empty())
                .unwrap_or(false)
        })
        .collect();
    if filled.is_empty() {
        return EMPTY_PROFILE_SUMMARY.to_string();
    }
    format!(
        "Comprador de primeira casa; secções preenchidas: {}.",
        filled
            .iter()
            .map(|s| section_label(s))
            .collect::<Vec<_>>()
            .join(", ")
    )
}

/// Summary line for `user/profile` given a hydrated profile.
pub fn profile_summary(profile: Option<&Profile>) -> String {
    match profile {
        Some(p) if !p.master_summary.is_empty() => p.master_summary.clone(),
        _ => EMPTY_PROFILE_SUMMARY.to_string(),
    }
}

/// Short digest for the `portfolio/index` summary line.
pub fn portfolio_index_summary(entries: &[PortfolioEntry]) -> String {
    if entries.is_empty() {
        return EMPTY_PORTFOLIO_SUMMARY.to_string();
    }
    let counted = if entries.len() == 1 {
        "1 imóvel guardado".to_string()
    } else {
        format!("{} imóveis guardados", entries.len())
    };
    let active = entries
        .iter()
        .find(|e| e.item.is_active)
        .map(|e| display_name(&e.item.nickname, &e.property));
    match active {
        Some(name) => format!("{}; ativo: {}", counted, name),
        None => counted,
    }
}

/// One line per portfolio item: the content of `portfolio/index`.
pub fn portfolio_index_content(entries: &[PortfolioEntry]) -> String {
    entries
        .iter()
        .map(|e| {
            let mut line = format!(
                "- ({}) {} — {}, {}",
                e.item.id,
                display_name(&e.item.nickname, &e.property),
                e.property.location,
                format_eur(e.property.price_eur),
            );
            if let Some(a) = &e.analysis {
                line.push_str(&format!(
                    "; obras {}–{}",
                    format_eur(a.cost_min),
                    format_eur(a.cost_max)
                ));
            }
            if e.item.is_active {
                line.push_str(" [ativo]");
            }
            line
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Summary line for `portfolio/{id}/resumo`.
pub fn analysis_summary(analysis: &AnalysisRecord, property: &PropertyRecord) -> String {
    format!(
        "{} ({}): obras estimadas {}–{}, confiança {:.0}%",
        property.title,
        property.typology,
        format_eur(analysis.cost_min),
        format_eur(analysis.cost_max),
        analysis.confidence * 100.0
    )
}

/// Content of `portfolio/{id}/resumo`: narrative plus totals.
pub fn analysis_resumo_content(analysis: &AnalysisRecord, property: &PropertyRecord) -> String {
    format!(
        "{}\n\nImóvel: {} — {} ({}, {:.0} m²), {}\nCusto estimado de obras: {} a {} (confiança {:.0}%)",
        analysis.narrative,
        property.title,
        property.location,
        property.typology,
        property.area_m2,
        format_eur(property.price_eur),
        format_eur(analysis.cost_min),
        format_eur(analysis.cost_max),
        analysis.confidence * 100.0
    )
}

/// Content of `portfolio/{id}/analise`: the per-room breakdown.
pub fn analysis_detail_content(features: &[RoomFeature]) -> String {
    if features.is_empty() {
        return "Sem divisões analisadas.".to_string();
    }
    features
        .iter()
        .map(|f| {
            let mut block = format!(
                "## {}\nEstado: {}\nCusto: {} a {} (confiança {:.0}%)",
                f.room_key,
                f.condition,
                format_eur(f.cost_min),
                format_eur(f.cost_max),
                f.confidence * 100.0
            );
            for item in &f.items {
                block.push_str(&format!(
                    "\n- {}: {}–{}",
                    item.label,
                    format_eur(item.cost_min),
                    format_eur(item.cost_max)
                ));
            }
            block
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Narrative for the end of a conversation. LLM-backed with a deterministic
/// template fallback when the call fails.
pub async fn conversation_narrative(llm: Arc<dyn LlmClient>, messages: &[Message]) -> String {
    let transcript: String = messages
        .iter()
        .filter(|m| !m.is_system())
        .map(|m| format!("{}: {}\n", m.role(), m.content()))
        .collect();
    let prompt = vec![
        Message::persona(
            "Resume a conversa seguinte em 2-3 frases, em português, na perspetiva do assistente. \
             Menciona imóveis discutidos e decisões tomadas.",
        ),
        Message::user(transcript),
    ];
    match llm.invoke(&prompt).await {
        Ok(r) if !r.content.trim().is_empty() => r.content,
        _ => narrative_fallback(messages),
    }
}

/// Deterministic fallback narrative.
pub fn narrative_fallback(messages: &[Message]) -> String {
    let user_turns = messages.iter().filter(|m| m.role() == "user").count();
    match messages.iter().find(|m| m.role() == "user") {
        Some(first) => format!(
            "Sessão com {} mensagens do utilizador; começou com \"{}\".",
            user_turns,
            first.content().chars().take(80).collect::<String>()
        ),
        None => "Sessão sem mensagens do utilizador.".to_string(),
    }
}

fn display_name(nickname: &Option<String>, property: &PropertyRecord) -> String {
    nickname.clone().unwrap_or_else(|| property.title.clone())
}

fn section_label(section: &str) -> &str {
    match section {
        "fiscal" => "Fiscal",
        "budget" => "Orçamento",
        "renovation" => "Obras",
        "preferences" => "Preferências",
        "goals" => "Objetivos",
        other => other,
    }
}

fn render_scalar(v: &serde_json::Value) -> String {
    match v {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LlmResponse, MockLlm};
    use crate::store::{ListingImage, PortfolioItem, PortfolioStatus};

    fn property() -> PropertyRecord {
        PropertyRecord {
            id: "prop-1".into(),
            external_id: "ext-1".into(),
            url: "https://example.test/p/1".into(),
            title: "T2 em Alfama".into(),
            location: "Alfama, Lisboa".into(),
            price_eur: 285_000,
            typology: "T2".into(),
            area_m2: 78.0,
            images: vec![ListingImage {
                url: "u".into(),
                tag: None,
            }],
            scraped_at: "2026-01-01T00:00:00Z".into(),
        }
    }

    fn entry(active: bool) -> PortfolioEntry {
        PortfolioEntry {
            item: PortfolioItem {
                id: "item-1".into(),
                user_id: "u1".into(),
                property_id: "prop-1".into(),
                nickname: Some("o de Alfama".into()),
                status: PortfolioStatus::Saved,
                is_active: active,
                created_at: String::new(),
                last_active_at: String::new(),
            },
            property: property(),
            analysis: None,
        }
    }

    #[test]
    fn format_eur_groups_thousands() {
        assert_eq!(format_eur(0), "0 €");
        assert_eq!(format_eur(950), "950 €");
        assert_eq!(format_eur(285_000), "285 000 €");
        assert_eq!(format_eur(1_250_000), "1 250 000 €");
    }

    /// **Scenario**: an empty portfolio renders the empty-state sentinel.
    #[test]
    fn empty_portfolio_sentinel() {
        assert_eq!(portfolio_index_summary(&[]), EMPTY_PORTFOLIO_SUMMARY);
        assert_eq!(portfolio_index_content(&[]), "");
    }

    /// **Scenario**: the digest agrees in number: singular for one item,
    /// plural from two onwards.
    #[test]
    fn portfolio_index_marks_active() {
        let entries = vec![entry(true)];
        let summary = portfolio_index_summary(&entries);
        assert!(summary.contains("1 imóvel guardado"));
        assert!(!summary.contains("imóveis"));
        assert!(summary.contains("o de Alfama"));
        let content = portfolio_index_content(&entries);
        assert!(content.contains("(item-1)"));
        assert!(content.contains("[ativo]"));
        assert!(content.contains("285 000 €"));

        let two = vec![entry(true), entry(false)];
        assert!(portfolio_index_summary(&two).contains("2 imóveis guardados"));
    }

    #[test]
    fn master_summary_lists_filled_sections() {
        let mut sections = BTreeMap::new();
        assert_eq!(master_summary(&sections), EMPTY_PROFILE_SUMMARY);
        sections.insert("budget".to_string(), serde_json::json!({"entrada": 30000}));
        sections.insert("goals".to_string(), serde_json::json!({}));
        let s = master_summary(&sections);
        assert!(s.contains("Orçamento"));
        assert!(!s.contains("Objetivos"));
    }

    #[test]
    fn section_summary_renders_pairs() {
        let s = section_summary("budget", &serde_json::json!({"entrada": 30000}));
        assert!(s.starts_with("Orçamento:"));
        assert!(s.contains("entrada: 30000"));
        assert_eq!(
            section_summary("fiscal", &serde_json::json!({})),
            "Fiscal: sem dados"
        );
    }

    #[test]
    fn analysis_detail_lists_rooms_and_items() {
        let features = vec![RoomFeature {
            id: "rf".into(),
            analysis_id: "an".into(),
            room_key: "cozinha_1".into(),
            room_type: "cozinha".into(),
            condition: "precisa de obras".into(),
            items: vec![crate::store::CostItem {
                label: "bancada".into(),
                cost_min: 800,
                cost_max: 1500,
            }],
            cost_min: 3000,
            cost_max: 7000,
            confidence: 0.8,
        }];
        let text = analysis_detail_content(&features);
        assert!(text.contains("## cozinha_1"));
        assert!(text.contains("precisa de obras"));
        assert!(text.contains("bancada"));
        assert_eq!(analysis_detail_content(&[]), "Sem divisões analisadas.");
    }

    /// **Scenario**: the narrative uses the LLM when it answers and the
    /// template when it fails.
    #[tokio::test]
    async fn narrative_llm_and_fallback() {
        let messages = vec![
            Message::persona("p"),
            Message::user("olá"),
            Message::assistant("olá, bem-vinda"),
        ];

        let llm = Arc::new(MockLlm::always(LlmResponse::text("Falámos de Alfama.")));
        let got = conversation_narrative(llm, &messages).await;
        assert_eq!(got, "Falámos de Alfama.");

        let llm = Arc::new(MockLlm::scripted(vec![]));
        let got = conversation_narrative(llm, &messages).await;
        assert!(got.contains("1 mensagens do utilizador"));
        assert!(got.contains("olá"));
    }
}
