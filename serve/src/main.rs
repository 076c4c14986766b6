//! Morada gateway binary: wire clients, compile the turn graph, serve.

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use morada::llm::ChatOpenAI;
use morada::pipeline::{FixtureScraper, HttpScraper, ListingScraper, LlmVision, VisionClient};
use morada::store::SqliteStore;
use morada::tools::default_registry;
use morada::{RuntimeConfig, Services, TurnRunner};

use serve::{build_router, AppState, StaticTokenIdentity};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("morada-serve: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let _ = config::load_and_apply("morada", None);
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cfg = RuntimeConfig::from_env();
    let registry = default_registry();

    let store = Arc::new(SqliteStore::new(&cfg.db_path)?);
    let llm = Arc::new(ChatOpenAI::new(cfg.model.clone()).with_tools(registry.specs()));
    // Vision and summaries run on a plain client, without the tool surface.
    let vision: Arc<dyn VisionClient> =
        Arc::new(LlmVision::new(Arc::new(ChatOpenAI::new(cfg.model.clone()))));
    let scraper: Arc<dyn ListingScraper> = match &cfg.scraper_base_url {
        Some(base) => Arc::new(HttpScraper::new(base.clone())),
        None => {
            tracing::warn!("MORADA_SCRAPER_URL not set; using the fixture scraper");
            Arc::new(FixtureScraper)
        }
    };

    let services = Services::new(store, llm, vision, scraper, cfg);
    let runner = Arc::new(TurnRunner::new(services.clone(), registry)?);

    let auth = StaticTokenIdentity::from_env()
        .ok_or("MORADA_AUTH_TOKEN is required (bearer token for /chat)")?;
    let router = build_router(AppState::new(runner, services, Arc::new(auth)));

    let bind = std::env::var("MORADA_BIND").unwrap_or_else(|_| "127.0.0.1:8088".to_string());
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    tracing::info!(%bind, "morada gateway listening");
    axum::serve(listener, router).await?;
    Ok(())
}
