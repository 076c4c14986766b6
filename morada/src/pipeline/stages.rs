//! The five analysis stages as graph nodes.
//!
//! Every stage checks `state.error` first and passes through, so one failure
//! short-circuits the rest of the run without aborting the graph.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;

use crate::error::AgentError;
use crate::graph::{Next, Node};
use crate::llm::LlmClient;
use crate::message::Message;
use crate::retry::{run_with_retry, RetryPolicy};
use crate::summary::format_eur;

use super::scraper::ListingScraper;
use super::state::{
    PipelineState, RoomClassification, RoomEstimate, ROOM_FLOOR_PLAN, MULTI_INSTANCE_TYPES,
};
use super::vision::{fallback_estimate, type_from_keywords, VisionClient};
use super::weighted_confidence;

/// Scrape: listing URL → property data + images. Transient failures retried
/// with exponential backoff (3 attempts, base 2s).
pub struct ScrapeNode {
    scraper: Arc<dyn ListingScraper>,
    retry: RetryPolicy,
}

impl ScrapeNode {
    pub fn new(scraper: Arc<dyn ListingScraper>) -> Self {
        Self {
            scraper,
            retry: RetryPolicy::exponential(
                3,
                Duration::from_secs(2),
                Duration::from_secs(30),
                2.0,
            ),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

#[async_trait]
impl Node<PipelineState> for ScrapeNode {
    fn id(&self) -> &str {
        "scrape"
    }

    async fn run(&self, state: PipelineState) -> Result<(PipelineState, Next), AgentError> {
        if state.error.is_some() {
            return Ok((state, Next::Continue));
        }
        let url = state.url.clone();
        let scraper = self.scraper.clone();
        let result = run_with_retry(&self.retry, || {
            let scraper = scraper.clone();
            let url = url.clone();
            async move { scraper.scrape(&url).await }
        })
        .await;

        let state = match result {
            Ok(listing) => {
                tracing::debug!(url = %state.url, images = listing.images.len(), "listing scraped");
                PipelineState {
                    listing: Some(listing),
                    ..state
                }
            }
            Err(e) => state.fail("scrape", e.to_string()),
        };
        Ok((state, Next::Continue))
    }
}

/// Classify: tag map first (free); untagged images go to the fast vision
/// classifier, bounded by a semaphore.
pub struct ClassifyNode {
    vision: Arc<dyn VisionClient>,
    concurrency: usize,
}

impl ClassifyNode {
    pub fn new(vision: Arc<dyn VisionClient>, concurrency: usize) -> Self {
        Self {
            vision,
            concurrency,
        }
    }
}

#[async_trait]
impl Node<PipelineState> for ClassifyNode {
    fn id(&self) -> &str {
        "classify"
    }

    async fn run(&self, state: PipelineState) -> Result<(PipelineState, Next), AgentError> {
        if state.error.is_some() {
            return Ok((state, Next::Continue));
        }
        let Some(listing) = &state.listing else {
            return Ok((state.fail("classify", "no listing from scrape"), Next::Continue));
        };

        let mut classifications = Vec::new();
        let mut untagged = Vec::new();
        for image in &listing.images {
            match &image.tag {
                Some(tag) => {
                    let (room_type, _) = type_from_keywords(tag);
                    classifications.push(RoomClassification {
                        image_url: image.url.clone(),
                        room_type,
                        room_index: 0,
                        confidence: 0.95,
                    });
                }
                None => untagged.push(image.url.clone()),
            }
        }

        let sem = Arc::new(Semaphore::new(self.concurrency.max(1)));
        let futures = untagged.into_iter().map(|url| {
            let vision = self.vision.clone();
            let sem = sem.clone();
            async move {
                let _permit = sem.acquire().await.expect("semaphore never closed");
                match vision.classify_room(&url).await {
                    Ok((room_type, confidence)) => Some(RoomClassification {
                        image_url: url,
                        room_type,
                        room_index: 0,
                        confidence,
                    }),
                    Err(e) => {
                        tracing::warn!(image = %url, error = %e, "image classification failed, skipping");
                        None
                    }
                }
            }
        });
        let classified: Vec<_> = futures::future::join_all(futures).await;
        classifications.extend(classified.into_iter().flatten());

        if classifications.is_empty() && !listing.images.is_empty() {
            return Ok((
                state.fail("classify", "no image could be classified"),
                Next::Continue,
            ));
        }

        Ok((
            PipelineState {
                classifications,
                ..state
            },
            Next::Continue,
        ))
    }
}

/// Group: cluster multi-instance types into physical rooms with one batched
/// vision call; singletons keep index 1; floor plans are split out.
pub struct GroupNode {
    vision: Arc<dyn VisionClient>,
}

impl GroupNode {
    pub fn new(vision: Arc<dyn VisionClient>) -> Self {
        Self { vision }
    }
}

#[async_trait]
impl Node<PipelineState> for GroupNode {
    fn id(&self) -> &str {
        "group"
    }

    async fn run(&self, state: PipelineState) -> Result<(PipelineState, Next), AgentError> {
        if state.error.is_some() {
            return Ok((state, Next::Continue));
        }

        let mut floor_plans = Vec::new();
        let mut by_type: BTreeMap<String, Vec<RoomClassification>> = BTreeMap::new();
        for c in &state.classifications {
            if c.room_type == ROOM_FLOOR_PLAN {
                floor_plans.push(c.image_url.clone());
            } else {
                by_type.entry(c.room_type.clone()).or_default().push(c.clone());
            }
        }

        // One batched call covers every multi-instance type with 2+ images.
        let needs_clustering: BTreeMap<String, Vec<String>> = by_type
            .iter()
            .filter(|(t, members)| {
                MULTI_INSTANCE_TYPES.contains(&t.as_str()) && members.len() > 1
            })
            .map(|(t, members)| {
                (
                    t.clone(),
                    members.iter().map(|c| c.image_url.clone()).collect(),
                )
            })
            .collect();

        let indices = if needs_clustering.is_empty() {
            BTreeMap::new()
        } else {
            match self.vision.group_rooms(&needs_clustering).await {
                Ok(indices) => indices,
                Err(e) => {
                    // Under-grouping beats over-grouping: merge each type
                    // into a single instance when clustering fails.
                    tracing::warn!(error = %e, "room clustering failed, merging per type");
                    needs_clustering
                        .iter()
                        .map(|(t, urls)| (t.clone(), vec![1; urls.len()]))
                        .collect()
                }
            }
        };

        let mut rooms: BTreeMap<String, Vec<RoomClassification>> = BTreeMap::new();
        for (room_type, members) in by_type {
            let assigned = indices.get(&room_type);
            for (i, mut member) in members.into_iter().enumerate() {
                let index = assigned
                    .and_then(|v| v.get(i).copied())
                    .filter(|n| *n >= 1)
                    .unwrap_or(1);
                member.room_index = index;
                rooms
                    .entry(format!("{}_{}", room_type, index))
                    .or_default()
                    .push(member);
            }
        }

        Ok((
            PipelineState {
                rooms,
                floor_plans,
                ..state
            },
            Next::Continue,
        ))
    }
}

/// Estimate: concurrent per-room vision calls; on failure each room falls
/// back to the conservative fixed table with confidence 0.3.
pub struct EstimateNode {
    vision: Arc<dyn VisionClient>,
    concurrency: usize,
}

impl EstimateNode {
    pub fn new(vision: Arc<dyn VisionClient>, concurrency: usize) -> Self {
        Self {
            vision,
            concurrency,
        }
    }
}

#[async_trait]
impl Node<PipelineState> for EstimateNode {
    fn id(&self) -> &str {
        "estimate"
    }

    async fn run(&self, state: PipelineState) -> Result<(PipelineState, Next), AgentError> {
        if state.error.is_some() {
            return Ok((state, Next::Continue));
        }

        let sem = Arc::new(Semaphore::new(self.concurrency.max(1)));
        let futures = state.rooms.iter().map(|(room_key, members)| {
            let vision = self.vision.clone();
            let sem = sem.clone();
            let room_key = room_key.clone();
            let room_type = members
                .first()
                .map(|m| m.room_type.clone())
                .unwrap_or_default();
            let urls: Vec<String> = members.iter().map(|m| m.image_url.clone()).collect();
            async move {
                let _permit = sem.acquire().await.expect("semaphore never closed");
                let draft = match vision.estimate_room(&room_key, &room_type, &urls).await {
                    Ok(draft) => draft,
                    Err(e) => {
                        tracing::warn!(room = %room_key, error = %e, "estimate failed, using fallback table");
                        fallback_estimate(&room_type)
                    }
                };
                RoomEstimate {
                    room_key,
                    room_type,
                    condition: draft.condition,
                    items: draft.items,
                    cost_min: draft.cost_min,
                    cost_max: draft.cost_max,
                    confidence: draft.confidence,
                }
            }
        });
        let mut estimates: Vec<RoomEstimate> = futures::future::join_all(futures).await;
        // Completion order is non-deterministic; aggregate by key.
        estimates.sort_by(|a, b| a.room_key.cmp(&b.room_key));

        Ok((PipelineState { estimates, ..state }, Next::Continue))
    }
}

/// Summarize: totals plus a narrative; falls back to a template when the
/// summary call fails.
pub struct SummarizeNode {
    llm: Arc<dyn LlmClient>,
}

impl SummarizeNode {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    fn template(state: &PipelineState) -> String {
        let title = state
            .listing
            .as_ref()
            .map(|l| l.title.clone())
            .unwrap_or_else(|| state.url.clone());
        let (cost_min, cost_max): (i64, i64) = state
            .estimates
            .iter()
            .fold((0, 0), |(lo, hi), e| (lo + e.cost_min, hi + e.cost_max));
        format!(
            "Análise de {}: {} divisões avaliadas; obras estimadas entre {} e {}.",
            title,
            state.estimates.len(),
            format_eur(cost_min),
            format_eur(cost_max),
        )
    }
}

#[async_trait]
impl Node<PipelineState> for SummarizeNode {
    fn id(&self) -> &str {
        "summarize"
    }

    async fn run(&self, state: PipelineState) -> Result<(PipelineState, Next), AgentError> {
        if state.error.is_some() {
            return Ok((state, Next::Continue));
        }

        let cost_min: i64 = state.estimates.iter().map(|e| e.cost_min).sum();
        let cost_max: i64 = state.estimates.iter().map(|e| e.cost_max).sum();
        let pairs: Vec<(i64, f64)> = state
            .estimates
            .iter()
            .map(|e| (e.cost_max, e.confidence))
            .collect();
        let totals = super::state::CostTotals {
            cost_min,
            cost_max,
            confidence: weighted_confidence(&pairs),
        };

        let rooms_text = state
            .estimates
            .iter()
            .map(|e| {
                format!(
                    "- {}: {}; {} a {}",
                    e.room_key,
                    e.condition,
                    format_eur(e.cost_min),
                    format_eur(e.cost_max)
                )
            })
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = vec![
            Message::persona(
                "Escreve um parágrafo em português a resumir o estado do imóvel e as obras \
                 necessárias, para quem compra a primeira casa. Sem listas, sem JSON.",
            ),
            Message::user(format!(
                "Imóvel: {}\nDivisões:\n{}",
                state
                    .listing
                    .as_ref()
                    .map(|l| l.title.as_str())
                    .unwrap_or(&state.url),
                rooms_text
            )),
        ];

        let narrative = match self.llm.invoke(&prompt).await {
            Ok(r) if !r.content.trim().is_empty() => r.content,
            _ => Self::template(&state),
        };

        Ok((
            PipelineState {
                narrative: Some(narrative),
                totals: Some(totals),
                ..state
            },
            Next::Continue,
        ))
    }
}
