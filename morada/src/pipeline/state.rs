//! State flowing through the five analysis stages.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::store::{CostItem, ListingImage};

/// Room type vocabulary used by classification and grouping.
pub const ROOM_KITCHEN: &str = "cozinha";
pub const ROOM_LIVING: &str = "sala";
pub const ROOM_BEDROOM: &str = "quarto";
pub const ROOM_BATHROOM: &str = "casa_de_banho";
pub const ROOM_EXTERIOR: &str = "exterior";
pub const ROOM_HALL: &str = "corredor";
pub const ROOM_FLOOR_PLAN: &str = "planta";

/// Room types that can appear more than once per listing and need instance
/// clustering.
pub const MULTI_INSTANCE_TYPES: [&str; 2] = [ROOM_BEDROOM, ROOM_BATHROOM];

/// A scraped listing before it becomes a property row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapedListing {
    pub url: String,
    pub title: String,
    pub location: String,
    pub price_eur: i64,
    pub typology: String,
    pub area_m2: f64,
    pub images: Vec<ListingImage>,
}

/// Per-image classification result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomClassification {
    pub image_url: String,
    pub room_type: String,
    /// Instance index within the type (1-based); 0 until grouping assigns it.
    pub room_index: u32,
    pub confidence: f64,
}

/// Per-room estimate produced by the estimate stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomEstimate {
    pub room_key: String,
    pub room_type: String,
    pub condition: String,
    pub items: Vec<CostItem>,
    pub cost_min: i64,
    pub cost_max: i64,
    pub confidence: f64,
}

/// Aggregated totals for the whole property.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostTotals {
    pub cost_min: i64,
    pub cost_max: i64,
    pub confidence: f64,
}

/// A stage failure; downstream stages check it and pass through.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageError {
    pub stage: String,
    pub message: String,
}

/// State of one pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineState {
    pub url: String,
    pub listing: Option<ScrapedListing>,
    pub classifications: Vec<RoomClassification>,
    /// room_key → member classifications.
    pub rooms: BTreeMap<String, Vec<RoomClassification>>,
    pub floor_plans: Vec<String>,
    pub estimates: Vec<RoomEstimate>,
    pub narrative: Option<String>,
    pub totals: Option<CostTotals>,
    /// Set by the first failing stage; later stages pass through.
    pub error: Option<StageError>,
}

impl PipelineState {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            listing: None,
            classifications: Vec::new(),
            rooms: BTreeMap::new(),
            floor_plans: Vec::new(),
            estimates: Vec::new(),
            narrative: None,
            totals: None,
            error: None,
        }
    }

    /// Marks this run failed at `stage`.
    pub fn fail(mut self, stage: &str, message: impl Into<String>) -> Self {
        self.error = Some(StageError {
            stage: stage.to_string(),
            message: message.into(),
        });
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fail_records_stage_and_message() {
        let state = PipelineState::new("https://example.test/p/1").fail("scrape", "timeout");
        let err = state.error.unwrap();
        assert_eq!(err.stage, "scrape");
        assert_eq!(err.message, "timeout");
    }
}
