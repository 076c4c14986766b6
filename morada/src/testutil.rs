//! Shared unit-test fixtures: a tempfile-backed store plus mock clients.

use std::sync::Arc;

use crate::config::RuntimeConfig;
use crate::llm::{LlmClient, LlmResponse, MockLlm};
use crate::pipeline::{FixedVision, FixtureScraper};
use crate::services::Services;
use crate::store::SqliteStore;

pub(crate) async fn test_services_with_llm(
    llm: Arc<dyn LlmClient>,
) -> (tempfile::TempDir, Services) {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(SqliteStore::new(dir.path().join("morada.db")).unwrap());
    let services = Services::new(
        store,
        llm,
        Arc::new(FixedVision),
        Arc::new(FixtureScraper),
        RuntimeConfig::default(),
    );
    (dir, services)
}

pub(crate) async fn test_services() -> (tempfile::TempDir, Services) {
    test_services_with_llm(Arc::new(MockLlm::always(LlmResponse::text("ok")))).await
}
