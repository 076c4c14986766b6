//! Store-backed content fetcher: resolves a knowledge key to the bytes behind
//! it when a `load` asks for content that lives in the durable store.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{AgentError, KbError};
use crate::store::{AdvisorStore, PROFILE_SECTIONS};
use crate::summary;

use super::ContentFetcher;

/// Resolves `user/...`, `portfolio/...`, and `session/...` keys against the
/// store, scoped to one user. Portfolio keys go through the hydrate join so a
/// single round trip yields item, property, and latest analysis together.
pub struct StoreContentFetcher {
    store: Arc<dyn AdvisorStore>,
    user_id: String,
}

impl StoreContentFetcher {
    pub fn new(store: Arc<dyn AdvisorStore>, user_id: impl Into<String>) -> Self {
        Self {
            store,
            user_id: user_id.into(),
        }
    }

    async fn fetch_profile_section(&self, section: &str) -> Result<String, AgentError> {
        let profile = self.store.get_profile(&self.user_id).await?;
        let value = profile.as_ref().and_then(|p| p.sections.get(section));
        match value {
            Some(v) if v.as_object().map(|o| !o.is_empty()).unwrap_or(false) => {
                let pretty = serde_json::to_string_pretty(v)
                    .map_err(|e| AgentError::ExecutionFailed(e.to_string()))?;
                Ok(format!(
                    "{}\n\n{}",
                    summary::section_summary(section, v),
                    pretty
                ))
            }
            _ => Ok("Ainda sem dados nesta secção.".to_string()),
        }
    }

    async fn fetch_portfolio_key(&self, item_id: &str, leaf: &str) -> Result<String, AgentError> {
        let bundle = self.store.hydrate(&self.user_id).await?;
        let entry = bundle
            .portfolio
            .iter()
            .find(|e| e.item.id == item_id)
            .ok_or_else(|| KbError::UnknownKey(format!("portfolio/{}/{}", item_id, leaf)))?;
        let analysis = entry.analysis.as_ref().ok_or_else(|| {
            AgentError::InvalidInput(format!("imóvel {} ainda não foi analisado", item_id))
        })?;
        match leaf {
            "resumo" => Ok(summary::analysis_resumo_content(analysis, &entry.property)),
            "analise" => {
                let features = self.store.get_room_features(&analysis.id).await?;
                Ok(summary::analysis_detail_content(&features))
            }
            other => Err(KbError::UnknownKey(format!("portfolio/{}/{}", item_id, other)).into()),
        }
    }
}

#[async_trait]
impl ContentFetcher for StoreContentFetcher {
    async fn fetch(&self, key: &str) -> Result<String, AgentError> {
        let parts: Vec<&str> = key.split('/').collect();
        match parts.as_slice() {
            ["user", "profile"] => {
                let profile = self.store.get_profile(&self.user_id).await?;
                match profile {
                    Some(p) => {
                        let mut out = summary::profile_summary(Some(&p));
                        for section in PROFILE_SECTIONS {
                            if let Some(s) = p.section_summaries.get(section) {
                                out.push_str(&format!("\n{}", s));
                            }
                        }
                        Ok(out)
                    }
                    None => Ok(summary::EMPTY_PROFILE_SUMMARY.to_string()),
                }
            }
            ["user", section] if PROFILE_SECTIONS.contains(section) => {
                self.fetch_profile_section(section).await
            }
            ["portfolio", "index"] => {
                let bundle = self.store.hydrate(&self.user_id).await?;
                Ok(summary::portfolio_index_content(&bundle.portfolio))
            }
            ["portfolio", item_id, leaf] => self.fetch_portfolio_key(item_id, leaf).await,
            ["session", "resumo_anterior"] => {
                let bundle = self.store.hydrate(&self.user_id).await?;
                Ok(bundle
                    .last_session_summary
                    .unwrap_or_else(|| summary::NO_PRIOR_SESSION_SUMMARY.to_string()))
            }
            _ => Err(KbError::UnknownKey(key.to_string()).into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;

    async fn store_with_profile() -> (tempfile::TempDir, Arc<dyn AdvisorStore>) {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::new(dir.path().join("t.db")).unwrap();
        store
            .upsert_profile(
                "u1",
                "budget",
                serde_json::json!({"entrada": 30000}),
                "Orçamento: entrada: 30000",
                "Comprador de primeira casa; secções preenchidas: Orçamento.",
            )
            .await
            .unwrap();
        (dir, Arc::new(store))
    }

    /// **Scenario**: profile keys resolve to summaries plus section JSON;
    /// empty sections get the sentinel.
    #[tokio::test]
    async fn fetches_profile_keys() {
        let (_dir, store) = store_with_profile().await;
        let fetcher = StoreContentFetcher::new(store, "u1");

        let profile = fetcher.fetch("user/profile").await.unwrap();
        assert!(profile.contains("Orçamento"));

        let budget = fetcher.fetch("user/budget").await.unwrap();
        assert!(budget.contains("30000"));

        let fiscal = fetcher.fetch("user/fiscal").await.unwrap();
        assert_eq!(fiscal, "Ainda sem dados nesta secção.");
    }

    /// **Scenario**: unknown key shapes are rejected with UnknownKey.
    #[tokio::test]
    async fn unknown_key_shapes_rejected() {
        let (_dir, store) = store_with_profile().await;
        let fetcher = StoreContentFetcher::new(store, "u1");
        let err = fetcher.fetch("garbage/key/deep/er").await.unwrap_err();
        assert!(matches!(err, AgentError::Knowledge(KbError::UnknownKey(_))));
    }

    /// **Scenario**: the prior-session key falls back to the sentinel.
    #[tokio::test]
    async fn session_summary_sentinel() {
        let (_dir, store) = store_with_profile().await;
        let fetcher = StoreContentFetcher::new(store, "u1");
        let got = fetcher.fetch("session/resumo_anterior").await.unwrap();
        assert_eq!(got, summary::NO_PRIOR_SESSION_SUMMARY);
    }
}
