//! Analysis pipeline delegate: a linear 5-stage graph
//! (scrape → classify → group → estimate → summarize) invoked by the
//! `trigger_property_analysis` tool.
//!
//! Stage failures set an error field on state instead of aborting the graph;
//! downstream stages pass through and the tool surfaces the failure as a tool
//! error command with no durable commit.

mod scraper;
mod stages;
mod state;
mod vision;

pub use scraper::{FixtureScraper, HttpScraper, ListingScraper};
pub use stages::{ClassifyNode, EstimateNode, GroupNode, ScrapeNode, SummarizeNode};
pub use state::{
    CostTotals, PipelineState, RoomClassification, RoomEstimate, ScrapedListing, StageError,
    MULTI_INSTANCE_TYPES, ROOM_BATHROOM, ROOM_BEDROOM, ROOM_EXTERIOR, ROOM_FLOOR_PLAN, ROOM_HALL,
    ROOM_KITCHEN, ROOM_LIVING,
};
pub use vision::{fallback_estimate, FixedVision, LlmVision, RoomEstimateDraft, VisionClient};

use std::sync::Arc;

use crate::error::AgentError;
use crate::graph::{CompiledStateGraph, StateGraph, END, START};
use crate::services::Services;

/// Result of a successful pipeline run, ready to persist.
#[derive(Debug, Clone)]
pub struct AnalysisOutcome {
    pub listing: ScrapedListing,
    pub estimates: Vec<RoomEstimate>,
    pub floor_plans: Vec<String>,
    pub narrative: String,
    pub totals: CostTotals,
}

/// Mean of per-room confidence weighted by `cost_max`, so expensive rooms
/// dominate. Zero rooms → 0; zero total weight → plain mean.
pub fn weighted_confidence(rooms: &[(i64, f64)]) -> f64 {
    if rooms.is_empty() {
        return 0.0;
    }
    let total: i64 = rooms.iter().map(|(w, _)| *w).sum();
    if total <= 0 {
        return rooms.iter().map(|(_, c)| c).sum::<f64>() / rooms.len() as f64;
    }
    rooms
        .iter()
        .map(|(w, c)| (*w as f64) * c)
        .sum::<f64>()
        / total as f64
}

/// Compiles the linear analysis graph from the injected services.
pub fn build_analysis_graph(
    services: &Services,
) -> Result<CompiledStateGraph<PipelineState>, AgentError> {
    let mut graph = StateGraph::new();
    graph.add_node(
        "scrape",
        Arc::new(ScrapeNode::new(services.scraper.clone())),
    );
    graph.add_node(
        "classify",
        Arc::new(ClassifyNode::new(
            services.vision.clone(),
            services.config.classify_concurrency,
        )),
    );
    graph.add_node("group", Arc::new(GroupNode::new(services.vision.clone())));
    graph.add_node(
        "estimate",
        Arc::new(EstimateNode::new(
            services.vision.clone(),
            services.config.estimate_concurrency,
        )),
    );
    graph.add_node("summarize", Arc::new(SummarizeNode::new(services.llm.clone())));
    graph.add_edge(START, "scrape");
    graph.add_edge("scrape", "classify");
    graph.add_edge("classify", "group");
    graph.add_edge("group", "estimate");
    graph.add_edge("estimate", "summarize");
    graph.add_edge("summarize", END);
    graph
        .compile()
        .map_err(|e| AgentError::ExecutionFailed(format!("pipeline graph: {}", e)))
}

/// Runs the full pipeline for one listing URL.
pub async fn run_analysis(services: &Services, url: &str) -> Result<AnalysisOutcome, AgentError> {
    let graph = build_analysis_graph(services)?;
    let state = graph
        .invoke_with_cancel(PipelineState::new(url), services.cancel.child_token())
        .await?;

    if let Some(err) = state.error {
        return Err(AgentError::PipelineStage {
            stage: err.stage,
            message: err.message,
        });
    }

    let listing = state
        .listing
        .ok_or_else(|| AgentError::ExecutionFailed("pipeline ended without a listing".into()))?;
    let totals = state
        .totals
        .ok_or_else(|| AgentError::ExecutionFailed("pipeline ended without totals".into()))?;
    let narrative = state
        .narrative
        .ok_or_else(|| AgentError::ExecutionFailed("pipeline ended without narrative".into()))?;

    Ok(AnalysisOutcome {
        listing,
        estimates: state.estimates,
        floor_plans: state.floor_plans,
        narrative,
        totals,
    })
}
