//! Durable store surface: typed async operations over the rows the
//! orchestrator depends on, plus the transactional effect list tools return.

mod sqlite;

pub use sqlite::SqliteStore;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Analysis kind produced by the renovation pipeline.
pub const ANALYSIS_KIND_RENOVATION: &str = "renovation";

/// Profile sections a user can fill in over time.
pub const PROFILE_SECTIONS: [&str; 5] = ["fiscal", "budget", "renovation", "preferences", "goals"];

/// One listing photo, optionally tagged by the listing site ("cozinha",
/// "quarto 2", "planta", ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListingImage {
    pub url: String,
    pub tag: Option<String>,
}

/// A scraped property listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyRecord {
    pub id: String,
    /// Stable id derived from the listing URL; unique across users.
    pub external_id: String,
    pub url: String,
    pub title: String,
    pub location: String,
    pub price_eur: i64,
    /// Portuguese typology string, e.g. "T2".
    pub typology: String,
    pub area_m2: f64,
    pub images: Vec<ListingImage>,
    pub scraped_at: String,
}

/// Portfolio item lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PortfolioStatus {
    Saved,
    Archived,
}

impl PortfolioStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PortfolioStatus::Saved => "saved",
            PortfolioStatus::Archived => "archived",
        }
    }

    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "saved" => Ok(PortfolioStatus::Saved),
            "archived" => Ok(PortfolioStatus::Archived),
            other => Err(StoreError::Storage(format!(
                "unknown portfolio status: {}",
                other
            ))),
        }
    }
}

/// A user's saved reference to a property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioItem {
    pub id: String,
    pub user_id: String,
    pub property_id: String,
    pub nickname: Option<String>,
    pub status: PortfolioStatus,
    /// At most one item per user has this set.
    pub is_active: bool,
    pub created_at: String,
    pub last_active_at: String,
}

/// One renovation line item inside a room estimate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostItem {
    pub label: String,
    pub cost_min: i64,
    pub cost_max: i64,
}

/// Cached per-room estimate; recalculation re-totals from these without any
/// vision calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomFeature {
    pub id: String,
    pub analysis_id: String,
    /// e.g. "quarto_2"; aggregation is by this key.
    pub room_key: String,
    pub room_type: String,
    pub condition: String,
    pub items: Vec<CostItem>,
    pub cost_min: i64,
    pub cost_max: i64,
    pub confidence: f64,
}

/// The headline result of one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRecord {
    pub id: String,
    pub user_id: String,
    pub property_id: String,
    pub kind: String,
    pub cost_min: i64,
    pub cost_max: i64,
    pub confidence: f64,
    pub narrative: String,
    pub created_at: String,
}

/// User profile: five JSON sections plus deterministic summaries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub user_id: String,
    pub sections: BTreeMap<String, serde_json::Value>,
    pub section_summaries: BTreeMap<String, String>,
    pub master_summary: String,
    pub updated_at: String,
}

/// Conversation row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub user_id: String,
    pub message_count: i64,
    pub summary: Option<String>,
    pub created_at: String,
    pub ended_at: Option<String>,
}

/// Persisted chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: String,
    pub conversation_id: String,
    pub role: String,
    pub content: String,
    /// JSON-encoded tool calls for assistant messages that carry them.
    pub tool_calls: Option<String>,
    pub tool_call_id: Option<String>,
    pub created_at: String,
}

/// Audit row: one per durable mutation, the undo surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionLogEntry {
    pub id: String,
    pub user_id: String,
    pub conversation_id: String,
    pub message_id: Option<String>,
    pub action_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub field_changed: Option<String>,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub trigger_message: Option<String>,
    pub confidence: f64,
    pub confirmed_by_user: bool,
    pub timestamp: String,
}

/// One saved portfolio item joined with its property and latest analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioEntry {
    pub item: PortfolioItem,
    pub property: PropertyRecord,
    pub analysis: Option<AnalysisRecord>,
}

/// Everything hydrate needs, fetched in at most three round trips.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HydrationBundle {
    pub profile: Option<Profile>,
    pub portfolio: Vec<PortfolioEntry>,
    pub last_session_summary: Option<String>,
}

impl Default for Profile {
    fn default() -> Self {
        Self {
            user_id: String::new(),
            sections: BTreeMap::new(),
            section_summaries: BTreeMap::new(),
            master_summary: String::new(),
            updated_at: String::new(),
        }
    }
}

/// A store mutation described by a tool command; all effects of one tool are
/// applied in a single transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DurableEffect {
    UpsertProfile {
        section: String,
        patch: serde_json::Value,
        section_summary: String,
        master_summary: String,
    },
    UpsertProperty(PropertyRecord),
    CreatePortfolioItem(PortfolioItem),
    SetPortfolioStatus {
        item_id: String,
        status: PortfolioStatus,
    },
    /// Exclusively marks one item active, unsetting every other item of the user.
    SetActive {
        item_id: String,
    },
    /// Bumps `last_active_at` (search recency tiebreak).
    TouchPortfolioItem {
        item_id: String,
    },
    CreateAnalysis(AnalysisRecord),
    SaveRoomFeatures {
        analysis_id: String,
        features: Vec<RoomFeature>,
    },
    UpdateAnalysisTotals {
        analysis_id: String,
        cost_min: i64,
        cost_max: i64,
        confidence: f64,
        narrative: String,
    },
}

/// Typed async operations against the durable store. Every user-scoped read
/// and write filters by the calling user's id.
#[async_trait]
pub trait AdvisorStore: Send + Sync {
    async fn get_profile(&self, user_id: &str) -> Result<Option<Profile>, StoreError>;

    /// Shallow-merges `patch` into one section and stores the regenerated
    /// summaries. `null` values in the patch delete keys.
    async fn upsert_profile(
        &self,
        user_id: &str,
        section: &str,
        patch: serde_json::Value,
        section_summary: &str,
        master_summary: &str,
    ) -> Result<(), StoreError>;

    /// Profile + saved portfolio (with properties and latest analyses) +
    /// last session summary, in ≤3 round trips.
    async fn hydrate(&self, user_id: &str) -> Result<HydrationBundle, StoreError>;

    async fn get_property_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<PropertyRecord>, StoreError>;

    async fn upsert_property(&self, record: &PropertyRecord) -> Result<(), StoreError>;

    async fn get_portfolio_item(
        &self,
        user_id: &str,
        item_id: &str,
    ) -> Result<Option<PortfolioItem>, StoreError>;

    async fn create_portfolio_item(&self, item: &PortfolioItem) -> Result<(), StoreError>;

    async fn update_portfolio_status(
        &self,
        user_id: &str,
        item_id: &str,
        status: PortfolioStatus,
    ) -> Result<(), StoreError>;

    /// Atomically unsets `is_active` on every item of the user, then sets it
    /// on `item_id`.
    async fn set_active(&self, user_id: &str, item_id: &str) -> Result<(), StoreError>;

    async fn get_latest_analysis(
        &self,
        user_id: &str,
        property_id: &str,
        kind: &str,
    ) -> Result<Option<AnalysisRecord>, StoreError>;

    async fn create_analysis(&self, record: &AnalysisRecord) -> Result<(), StoreError>;

    async fn update_analysis(&self, record: &AnalysisRecord) -> Result<(), StoreError>;

    async fn get_room_features(&self, analysis_id: &str) -> Result<Vec<RoomFeature>, StoreError>;

    async fn save_room_features(
        &self,
        analysis_id: &str,
        features: &[RoomFeature],
    ) -> Result<(), StoreError>;

    async fn create_conversation(&self, user_id: &str) -> Result<Conversation, StoreError>;

    async fn get_conversation(
        &self,
        user_id: &str,
        conversation_id: &str,
    ) -> Result<Option<Conversation>, StoreError>;

    async fn end_conversation(
        &self,
        conversation_id: &str,
        summary: &str,
    ) -> Result<(), StoreError>;

    async fn increment_message_count(
        &self,
        conversation_id: &str,
        by: i64,
    ) -> Result<(), StoreError>;

    /// Appends one message; returns the new message id.
    async fn append_message(
        &self,
        conversation_id: &str,
        role: &str,
        content: &str,
        tool_calls: Option<String>,
        tool_call_id: Option<String>,
    ) -> Result<String, StoreError>;

    async fn list_messages(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<StoredMessage>, StoreError>;

    async fn log_action(&self, entry: &ActionLogEntry) -> Result<(), StoreError>;

    async fn list_actions(
        &self,
        user_id: &str,
        conversation_id: &str,
    ) -> Result<Vec<ActionLogEntry>, StoreError>;

    /// Applies a tool's durable effects in one transaction; on any failure
    /// nothing is committed.
    async fn apply_effects(
        &self,
        user_id: &str,
        effects: &[DurableEffect],
    ) -> Result<(), StoreError>;
}

/// Shallow object merge used by profile patches: patch keys override,
/// `null` deletes.
pub fn merge_section_patch(current: &mut serde_json::Value, patch: &serde_json::Value) {
    if !current.is_object() {
        *current = serde_json::json!({});
    }
    let target = current.as_object_mut().expect("made object above");
    if let Some(obj) = patch.as_object() {
        for (k, v) in obj {
            if v.is_null() {
                target.remove(k);
            } else {
                target.insert(k.clone(), v.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_patch_overrides_and_deletes() {
        let mut current = serde_json::json!({"renda": 900, "poupanca": 20000});
        let patch = serde_json::json!({"renda": 950, "poupanca": null, "entrada": 30000});
        merge_section_patch(&mut current, &patch);
        assert_eq!(current["renda"], 950);
        assert_eq!(current["entrada"], 30000);
        assert!(current.get("poupanca").is_none());
    }

    #[test]
    fn merge_patch_into_non_object_resets() {
        let mut current = serde_json::Value::Null;
        merge_section_patch(&mut current, &serde_json::json!({"a": 1}));
        assert_eq!(current["a"], 1);
    }

    #[test]
    fn portfolio_status_roundtrip() {
        assert_eq!(PortfolioStatus::parse("saved").unwrap(), PortfolioStatus::Saved);
        assert_eq!(
            PortfolioStatus::parse("archived").unwrap(),
            PortfolioStatus::Archived
        );
        assert!(PortfolioStatus::parse("x").is_err());
        assert_eq!(PortfolioStatus::Archived.as_str(), "archived");
    }
}
